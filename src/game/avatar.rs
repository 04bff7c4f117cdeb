//! Avatar model
//!
//! Simulation-side state of an avatar that is not itself a replicated
//! field: the sub-values composite fields are packed from, placement, and
//! movement rates.

use std::f32::consts::PI;

use crate::error::ReplicationError;
use crate::game::persistence::AvatarRecord;
use crate::game::update::flags::PlayerFlags;

/// Map identifier
pub type MapId = u32;

/// Playable race
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Race {
    Human = 1,
    Orc = 2,
    Dwarf = 3,
    NightElf = 4,
    Undead = 5,
    Tauren = 6,
    Gnome = 7,
    Troll = 8,
}

impl Race {
    pub const ALL: [Race; 8] = [
        Race::Human,
        Race::Orc,
        Race::Dwarf,
        Race::NightElf,
        Race::Undead,
        Race::Tauren,
        Race::Gnome,
        Race::Troll,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|race| *race as u8 == value)
    }
}

/// Playable class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Class {
    Warrior = 1,
    Paladin = 2,
    Hunter = 3,
    Rogue = 4,
    Priest = 5,
    Shaman = 7,
    Mage = 8,
    Warlock = 9,
    Druid = 11,
}

impl Class {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Warrior),
            2 => Some(Self::Paladin),
            3 => Some(Self::Hunter),
            4 => Some(Self::Rogue),
            5 => Some(Self::Priest),
            7 => Some(Self::Shaman),
            8 => Some(Self::Mage),
            9 => Some(Self::Warlock),
            11 => Some(Self::Druid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Gender {
    #[default]
    Male = 0,
    Female = 1,
}

impl Gender {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Gender::Male),
            1 => Some(Gender::Female),
            _ => None,
        }
    }
}

/// Resource pool type, which also indexes the power fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PowerType {
    Mana = 0,
    Rage = 1,
    Focus = 2,
    Energy = 3,
}

impl PowerType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PowerType::Mana),
            1 => Some(PowerType::Rage),
            2 => Some(PowerType::Focus),
            3 => Some(PowerType::Energy),
            _ => None,
        }
    }

    /// Power type used by a class
    pub fn for_class(class: Class) -> Self {
        match class {
            Class::Warrior => PowerType::Rage,
            Class::Hunter => PowerType::Focus,
            Class::Rogue => PowerType::Energy,
            _ => PowerType::Mana,
        }
    }

    /// Initial maximum for this pool
    pub fn default_max(self) -> u32 {
        match self {
            PowerType::Rage => 1000,
            _ => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Placement of an avatar in the world
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Location {
    pub map: MapId,
    pub position: Vector3,
    pub orientation: f32,
}

impl Location {
    pub fn new(map: MapId, position: Vector3, orientation: f32) -> Self {
        Self {
            map,
            position,
            orientation,
        }
    }
}

/// Destination of a pending relocation
pub type TeleportTarget = Location;

/// Offset of an avatar riding a transport
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransportAttachment {
    pub guid: u64,
    pub offset: Vector3,
    pub orientation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Appearance {
    pub skin: u8,
    pub face: u8,
    pub hair_style: u8,
    pub hair_colour: u8,
    pub facial_hair: u8,
}

/// Movement rate kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeedKind {
    Run,
    Swim,
    Walk,
    Turn,
}

/// Highest movement speed the client handles without glitches
pub const MAX_SPEED: f32 = 56.0;

impl SpeedKind {
    pub fn default_value(self) -> f32 {
        match self {
            SpeedKind::Run => 7.0,
            SpeedKind::Swim => 4.722_222_3,
            SpeedKind::Walk => 2.5,
            SpeedKind::Turn => PI,
        }
    }

    /// Clamp a requested rate
    ///
    /// Non-positive values reset to the default. Linear speeds are capped
    /// at [`MAX_SPEED`]; turn rate has no upper bound.
    pub fn clamp(self, value: f32) -> f32 {
        if value.is_nan() || value <= 0.0 {
            return self.default_value();
        }
        match self {
            SpeedKind::Turn => value,
            _ => value.min(MAX_SPEED),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SpeedKind::Run => "run",
            SpeedKind::Swim => "swim",
            SpeedKind::Walk => "walk",
            SpeedKind::Turn => "turn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementSpeeds {
    pub run: f32,
    pub swim: f32,
    pub walk: f32,
    pub turn: f32,
}

impl Default for MovementSpeeds {
    fn default() -> Self {
        Self {
            run: SpeedKind::Run.default_value(),
            swim: SpeedKind::Swim.default_value(),
            walk: SpeedKind::Walk.default_value(),
            turn: SpeedKind::Turn.default_value(),
        }
    }
}

impl MovementSpeeds {
    pub fn get(&self, kind: SpeedKind) -> f32 {
        match kind {
            SpeedKind::Run => self.run,
            SpeedKind::Swim => self.swim,
            SpeedKind::Walk => self.walk,
            SpeedKind::Turn => self.turn,
        }
    }

    pub fn set(&mut self, kind: SpeedKind, value: f32) {
        match kind {
            SpeedKind::Run => self.run = value,
            SpeedKind::Swim => self.swim = value,
            SpeedKind::Walk => self.walk = value,
            SpeedKind::Turn => self.turn = value,
        }
    }
}

/// Model dimensions for a race and gender
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaceModel {
    pub bounding_radius: f32,
    pub scale: f32,
}

pub fn race_model(race: Race, gender: Gender) -> RaceModel {
    let female = gender == Gender::Female;
    let (bounding_radius, scale) = match race {
        Race::Human => (if female { 0.208 } else { 0.306 }, 1.0),
        Race::Orc => (if female { 0.236 } else { 0.372 }, 1.0),
        Race::Dwarf => (0.347, 1.0),
        Race::NightElf => (if female { 0.306 } else { 0.389 }, 1.0),
        Race::Undead => (0.383, 1.0),
        Race::Tauren => {
            if female {
                (0.8725, 1.25)
            } else {
                (0.9747, 1.3)
            }
        }
        Race::Gnome => (0.3519, 1.0),
        Race::Troll => (0.306, 1.0),
    };
    RaceModel {
        bounding_radius,
        scale,
    }
}

/// Sub-values and placement owned by the simulation
#[derive(Debug, Clone, PartialEq)]
pub struct AvatarState {
    pub race: Race,
    pub class: Class,
    pub gender: Gender,
    pub power_type: PowerType,
    pub stand_state: u8,
    pub shapeshift_form: u8,
    pub sheath_state: u8,
    pub combo_points: u8,
    pub appearance: Appearance,
    pub extra_flags: PlayerFlags,
    pub bank_slots: u8,
    pub location: Location,
    pub zone: u32,
    pub transport: Option<TransportAttachment>,
    pub speeds: MovementSpeeds,
}

impl AvatarState {
    pub fn from_record(record: &AvatarRecord) -> Result<Self, ReplicationError> {
        let race = Race::from_u8(record.race).ok_or(ReplicationError::UnknownRace(record.race))?;
        let class =
            Class::from_u8(record.class).ok_or(ReplicationError::UnknownClass(record.class))?;

        let mut extra_flags = PlayerFlags::from_bits_truncate(record.extra_flags);
        if record.is_gm {
            extra_flags.insert(PlayerFlags::GM);
        }

        Ok(Self {
            race,
            class,
            gender: Gender::from_u8(record.gender)
                .ok_or(ReplicationError::UnknownGender(record.gender))?,
            power_type: PowerType::for_class(class),
            stand_state: 0,
            shapeshift_form: 0,
            sheath_state: 0,
            combo_points: 0,
            appearance: Appearance {
                skin: record.skin,
                face: record.face,
                hair_style: record.hair_style,
                hair_colour: record.hair_colour,
                facial_hair: record.facial_hair,
            },
            extra_flags,
            bank_slots: record.bank_slots,
            location: Location::new(
                record.map,
                Vector3::new(record.x, record.y, record.z),
                record.orientation,
            ),
            zone: record.zone,
            transport: None,
            speeds: MovementSpeeds::default(),
        })
    }

    /// race, class, gender, power type
    pub fn bytes_0(&self) -> [u8; 4] {
        [
            self.race as u8,
            self.class as u8,
            self.gender as u8,
            self.power_type as u8,
        ]
    }

    /// stand state, unused, shapeshift form, sheath state
    pub fn bytes_1(&self) -> [u8; 4] {
        [self.stand_state, 0, self.shapeshift_form, self.sheath_state]
    }

    pub fn bytes_2(&self) -> [u8; 4] {
        [self.combo_points, 0, 0, 0]
    }

    /// skin, face, hair style, hair colour
    pub fn player_bytes(&self) -> [u8; 4] {
        let a = &self.appearance;
        [a.skin, a.face, a.hair_style, a.hair_colour]
    }

    /// extra flags, bank slots, facial hair, unused
    pub fn player_bytes_2(&self) -> [u8; 4] {
        [
            self.extra_flags.bits(),
            self.bank_slots,
            self.appearance.facial_hair,
            0,
        ]
    }

    pub fn model(&self) -> RaceModel {
        race_model(self.race, self.gender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AvatarRecord {
        AvatarRecord {
            guid: 1,
            race: 1,
            class: 4,
            gender: 0,
            ..AvatarRecord::default()
        }
    }

    #[test]
    fn test_power_type_for_class() {
        assert_eq!(PowerType::for_class(Class::Warrior), PowerType::Rage);
        assert_eq!(PowerType::for_class(Class::Hunter), PowerType::Focus);
        assert_eq!(PowerType::for_class(Class::Rogue), PowerType::Energy);
        assert_eq!(PowerType::for_class(Class::Mage), PowerType::Mana);
        assert_eq!(PowerType::Rage.default_max(), 1000);
    }

    #[test]
    fn test_bytes_0_from_record() {
        let state = AvatarState::from_record(&record()).unwrap();
        assert_eq!(state.bytes_0(), [1, 4, 0, 3]);
    }

    #[test]
    fn test_gm_account_sets_flag() {
        let mut rec = record();
        rec.is_gm = true;
        rec.bank_slots = 2;
        rec.facial_hair = 5;
        let state = AvatarState::from_record(&rec).unwrap();
        assert_eq!(state.player_bytes_2(), [PlayerFlags::GM.bits(), 2, 5, 0]);
    }

    #[test]
    fn test_unknown_race_and_class() {
        let mut rec = record();
        rec.race = 42;
        assert_eq!(
            AvatarState::from_record(&rec),
            Err(ReplicationError::UnknownRace(42))
        );

        let mut rec = record();
        rec.class = 6;
        assert_eq!(
            AvatarState::from_record(&rec),
            Err(ReplicationError::UnknownClass(6))
        );

        let mut rec = record();
        rec.gender = 2;
        assert_eq!(
            AvatarState::from_record(&rec),
            Err(ReplicationError::UnknownGender(2))
        );
    }

    #[test]
    fn test_speed_clamp() {
        assert_eq!(SpeedKind::Run.clamp(0.0), 7.0);
        assert_eq!(SpeedKind::Run.clamp(1000.0), 56.0);
        assert_eq!(SpeedKind::Run.clamp(30.0), 30.0);
        assert_eq!(SpeedKind::Swim.clamp(-1.0), 4.722_222_3);
        assert_eq!(SpeedKind::Walk.clamp(56.0), 56.0);
        assert_eq!(SpeedKind::Turn.clamp(0.0), PI);
        assert_eq!(SpeedKind::Turn.clamp(100.0), 100.0);
        assert_eq!(SpeedKind::Run.clamp(f32::NAN), 7.0);
    }

    #[test]
    fn test_race_model() {
        let tauren = race_model(Race::Tauren, Gender::Female);
        assert_eq!(tauren.bounding_radius, 0.8725);
        assert_eq!(tauren.scale, 1.25);

        let human = race_model(Race::Human, Gender::Male);
        assert_eq!(human.bounding_radius, 0.306);
        assert_eq!(human.scale, 1.0);
    }
}
