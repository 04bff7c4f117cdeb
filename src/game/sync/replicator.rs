//! Avatar replication driver
//!
//! Owns one avatar's field store and walks it through
//! `Offline -> Initializing -> Active -> Relocating -> Offline`:
//!
//! - Activation seeds the store, sends the full state to the avatar itself
//!   and to everyone in view, and forwards their published baselines back.
//! - Each tick drains the dirty set into a partial update for retained
//!   observers, sends full updates to observers that just entered view and
//!   destroys to those that left.
//! - Teleports fan out destroys first, then either acknowledge in place or
//!   run the transfer-pending / new-world loading sequence. Placement is
//!   committed only after those messages are queued.
//! - Deactivation drops the session, removes the avatar from interest
//!   management (destroy fan-out included) and flushes the durable record.
//!
//! Collaborators are passed in through [`ReplicationContext`].

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::error::{ReplicationError, Result, SchemaError};
use crate::game::avatar::{
    AvatarState, Class, Gender, MapId, PowerType, Race, SpeedKind, TeleportTarget,
    TransportAttachment, Vector3,
};
use crate::game::metadata::RaceMetadata;
use crate::game::persistence::{AvatarRecord, AvatarStore};
use crate::game::sync::baseline::{BaselineCache, PublishedState};
use crate::game::sync::interest::InterestResolver;
use crate::game::update::compression::Compressor;
use crate::game::update::encoder::{encode_full, encode_partial, UpdateMessage};
use crate::game::update::fields::{
    avatar_fields, object_fields, unit_fields, EntityType, FieldId, FieldValue, Packing,
};
use crate::game::update::flags::{MessageFlags, PlayerFlags};
use crate::game::update::store::FieldStore;
use crate::game::Guid;
use crate::net::session::{PacketSink, SessionRegistry};
use crate::protocol::packets::{
    DestroyObjectPacket, NewWorldPacket, OutgoingPacket, Packet, SpeedChangePacket,
    TransferPendingPacket, UpdateObjectPacket, WorldportAckPacket,
};

/// Experience needed for level 2
pub const DEFAULT_NEXT_LEVEL_XP: u32 = 200;

/// Paperdoll, bag slots and bag space
pub const DEFAULT_NUM_INV_SLOTS: u32 = 0x89;

pub const DEFAULT_COMBAT_REACH: f32 = 1.5;

pub const DEFAULT_ATTACK_TIME_MS: u32 = 2000;

/// Maps that are never instanced
pub const DEFAULT_CONTINENT_MAPS: [MapId; 2] = [0, 1];

/// Replication lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationState {
    Offline,
    Initializing,
    Active,
    Relocating,
}

impl ReplicationState {
    pub fn name(&self) -> &'static str {
        match self {
            ReplicationState::Offline => "Offline",
            ReplicationState::Initializing => "Initializing",
            ReplicationState::Active => "Active",
            ReplicationState::Relocating => "Relocating",
        }
    }
}

impl std::fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a teleport was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    /// Same non-instanced map, single acknowledgement
    InPlace,
    /// Loading screen, waits for [`AvatarReplicator::complete_relocation`]
    Transfer,
}

/// Messages handed to the transport during one operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub partial: usize,
    pub full: usize,
    pub destroyed: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn sent(&self) -> usize {
        self.partial + self.full + self.destroyed
    }
}

/// Shared collaborators injected into every replicator
pub struct ReplicationContext {
    pub resolver: Arc<InterestResolver>,
    pub sessions: Arc<SessionRegistry>,
    pub baselines: Arc<BaselineCache>,
    pub metadata: Arc<dyn RaceMetadata>,
    pub store: Arc<dyn AvatarStore>,
    pub compressor: Compressor,
    pub continent_maps: Vec<MapId>,
}

impl ReplicationContext {
    /// Whether a map is a continent rather than an instance
    pub fn is_continent(&self, map: MapId) -> bool {
        self.continent_maps.contains(&map)
    }
}

impl std::fmt::Debug for ReplicationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationContext")
            .field("resolver", &self.resolver)
            .field("sessions", &self.sessions.len())
            .field("baselines", &self.baselines.len())
            .field("compressor", &self.compressor)
            .field("continent_maps", &self.continent_maps)
            .finish()
    }
}

/// Replication driver for one avatar
#[derive(Debug)]
pub struct AvatarReplicator {
    guid: Guid,
    state: ReplicationState,
    record: AvatarRecord,
    avatar: AvatarState,
    fields: FieldStore,
    ctx: Arc<ReplicationContext>,
}

impl AvatarReplicator {
    /// Build an offline replicator from a durable record
    pub fn new(record: AvatarRecord, ctx: Arc<ReplicationContext>) -> Result<Self> {
        let avatar = AvatarState::from_record(&record)?;
        let mut fields = FieldStore::new(EntityType::Avatar);
        fields.set(object_fields::GUID, record.guid)?;

        Ok(Self {
            guid: record.guid,
            state: ReplicationState::Offline,
            record,
            avatar,
            fields,
            ctx,
        })
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn state(&self) -> ReplicationState {
        self.state
    }

    pub fn avatar(&self) -> &AvatarState {
        &self.avatar
    }

    pub fn fields(&self) -> &FieldStore {
        &self.fields
    }

    pub fn record(&self) -> &AvatarRecord {
        &self.record
    }

    fn require(&self, expected: ReplicationState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(ReplicationError::InvalidState {
                from: self.state.name(),
                operation,
            }
            .into());
        }
        Ok(())
    }

    fn transition(&mut self, next: ReplicationState) {
        debug!(guid = self.guid, from = %self.state, to = %next, "Replication state change");
        self.state = next;
    }

    // ============ Field mutation ============

    /// Write a field
    ///
    /// Composite fields are unpacked into their sub-values and recomputed,
    /// so the store never holds a composite that disagrees with them.
    pub fn set_field(&mut self, id: FieldId, value: impl Into<FieldValue>) -> Result<()> {
        let value = value.into();
        let def = id.def().ok_or(SchemaError::UnknownField(id))?;
        match def.packing {
            Packing::Plain => self.fields.set(id, value)?,
            packing => {
                let word = match value {
                    FieldValue::U32(word) => word,
                    other => {
                        return Err(SchemaError::KindMismatch {
                            field: id,
                            expected: def.kind,
                            actual: other.kind(),
                        }
                        .into())
                    }
                };
                if let Some(parts) = packing.unpack_bytes(word) {
                    self.set_composite(id, parts)?;
                } else if let Some(parts) = packing.unpack_halves(word) {
                    self.fields.composite_set_halves(id, parts)?;
                }
            }
        }
        Ok(())
    }

    /// Set the four sub-values of a byte composite
    pub fn set_composite(&mut self, id: FieldId, parts: [u8; 4]) -> Result<()> {
        if id == unit_fields::BYTES_0 {
            let race = Race::from_u8(parts[0]).ok_or(ReplicationError::UnknownRace(parts[0]))?;
            let class =
                Class::from_u8(parts[1]).ok_or(ReplicationError::UnknownClass(parts[1]))?;
            let gender =
                Gender::from_u8(parts[2]).ok_or(ReplicationError::UnknownGender(parts[2]))?;
            let power_type = PowerType::from_u8(parts[3])
                .ok_or(ReplicationError::UnknownPowerType(parts[3]))?;
            self.avatar.race = race;
            self.avatar.class = class;
            self.avatar.gender = gender;
            self.avatar.power_type = power_type;
        } else if id == unit_fields::BYTES_1 {
            self.avatar.stand_state = parts[0];
            self.avatar.shapeshift_form = parts[2];
            self.avatar.sheath_state = parts[3];
        } else if id == unit_fields::BYTES_2 {
            self.avatar.combo_points = parts[0];
        } else if id == avatar_fields::BYTES {
            self.avatar.appearance.skin = parts[0];
            self.avatar.appearance.face = parts[1];
            self.avatar.appearance.hair_style = parts[2];
            self.avatar.appearance.hair_colour = parts[3];
        } else if id == avatar_fields::BYTES_2 {
            self.avatar.extra_flags = PlayerFlags::from_bits_truncate(parts[0]);
            self.avatar.bank_slots = parts[1];
            self.avatar.appearance.facial_hair = parts[2];
        } else {
            // composites without simulation sub-values are stored as given
            self.fields.composite_set(id, parts)?;
            return Ok(());
        }
        self.refresh_composite(id)
    }

    /// Recompute one composite from the current sub-values
    fn refresh_composite(&mut self, id: FieldId) -> Result<()> {
        let parts = if id == unit_fields::BYTES_0 {
            self.avatar.bytes_0()
        } else if id == unit_fields::BYTES_1 {
            self.avatar.bytes_1()
        } else if id == unit_fields::BYTES_2 {
            self.avatar.bytes_2()
        } else if id == avatar_fields::BYTES {
            self.avatar.player_bytes()
        } else if id == avatar_fields::BYTES_2 {
            self.avatar.player_bytes_2()
        } else {
            return Err(SchemaError::NotComposite(id).into());
        };
        self.fields.composite_set(id, parts)?;
        Ok(())
    }

    fn refresh_composites(&mut self) -> Result<()> {
        for id in [
            unit_fields::BYTES_0,
            unit_fields::BYTES_1,
            unit_fields::BYTES_2,
            avatar_fields::BYTES,
            avatar_fields::BYTES_2,
        ] {
            self.refresh_composite(id)?;
        }
        Ok(())
    }

    pub fn set_stand_state(&mut self, stand_state: u8) -> Result<()> {
        self.avatar.stand_state = stand_state;
        self.refresh_composite(unit_fields::BYTES_1)
    }

    pub fn set_shapeshift_form(&mut self, form: u8) -> Result<()> {
        self.avatar.shapeshift_form = form;
        self.refresh_composite(unit_fields::BYTES_1)
    }

    pub fn set_sheath_state(&mut self, sheath_state: u8) -> Result<()> {
        self.avatar.sheath_state = sheath_state;
        self.refresh_composite(unit_fields::BYTES_1)
    }

    pub fn set_combo_points(&mut self, combo_points: u8) -> Result<()> {
        self.avatar.combo_points = combo_points;
        self.refresh_composite(unit_fields::BYTES_2)
    }

    pub fn set_player_flag(&mut self, flag: PlayerFlags, enabled: bool) -> Result<()> {
        self.avatar.extra_flags.set(flag, enabled);
        self.refresh_composite(avatar_fields::BYTES_2)
    }

    pub fn set_bank_slots(&mut self, bank_slots: u8) -> Result<()> {
        self.avatar.bank_slots = bank_slots;
        self.refresh_composite(avatar_fields::BYTES_2)
    }

    pub fn set_level(&mut self, level: u32) -> Result<()> {
        Ok(self.fields.set(unit_fields::LEVEL, level)?)
    }

    pub fn set_xp(&mut self, xp: u32) -> Result<()> {
        Ok(self.fields.set(avatar_fields::XP, xp)?)
    }

    pub fn set_health(&mut self, health: u32) -> Result<()> {
        Ok(self.fields.set(unit_fields::HEALTH, health)?)
    }

    pub fn set_power(&mut self, power_type: PowerType, value: u32) -> Result<()> {
        let id = unit_fields::POWERS.nth(power_type as u16)?;
        Ok(self.fields.set(id, value)?)
    }

    /// Update placement without a teleport handshake
    pub fn move_to(&mut self, position: Vector3, orientation: f32) {
        self.avatar.location.position = position;
        self.avatar.location.orientation = orientation;
    }

    pub fn set_transport(&mut self, transport: Option<TransportAttachment>) {
        self.avatar.transport = transport;
    }

    // ============ Lifecycle ============

    /// Seed everything derived from the record and static metadata
    fn seed(&mut self) -> Result<()> {
        let info = self
            .ctx
            .metadata
            .race(self.avatar.race)
            .ok_or(ReplicationError::UnknownRace(self.avatar.race as u8))?;
        let model = self.avatar.model();
        let record = &self.record;

        let fields = &mut self.fields;
        fields.set(object_fields::GUID, self.guid)?;
        fields.set(
            object_fields::TYPE,
            EntityType::Avatar.type_flags().bits(),
        )?;
        fields.set(object_fields::SCALE_X, model.scale)?;

        fields.set(unit_fields::HEALTH, record.health)?;
        fields.set(unit_fields::MAX_HEALTH, record.health.max(1))?;
        for (index, power) in record.powers().into_iter().enumerate() {
            fields.set(unit_fields::POWERS.nth(index as u16)?, power)?;
        }
        for power_type in [
            PowerType::Mana,
            PowerType::Rage,
            PowerType::Focus,
            PowerType::Energy,
        ] {
            fields.set(
                unit_fields::MAX_POWERS.nth(power_type as u16)?,
                power_type.default_max(),
            )?;
        }
        fields.set(unit_fields::LEVEL, record.level)?;
        fields.set(unit_fields::FACTION_TEMPLATE, info.faction_id)?;
        fields.set(unit_fields::DISPLAY_ID, info.display_id(self.avatar.gender))?;
        fields.set(unit_fields::BOUNDING_RADIUS, model.bounding_radius)?;
        fields.set(unit_fields::COMBAT_REACH, DEFAULT_COMBAT_REACH)?;
        fields.set(unit_fields::MOD_CAST_SPEED, 1.0f32)?;
        fields.set(unit_fields::BASE_ATTACK_TIME, DEFAULT_ATTACK_TIME_MS)?;
        fields.set(unit_fields::BASE_ATTACK_TIME.nth(1)?, DEFAULT_ATTACK_TIME_MS)?;

        fields.set(avatar_fields::NUM_INV_SLOTS, DEFAULT_NUM_INV_SLOTS)?;
        fields.set(avatar_fields::XP, record.xp)?;
        fields.set(avatar_fields::NEXT_LEVEL_XP, DEFAULT_NEXT_LEVEL_XP)?;
        fields.set(avatar_fields::CHARACTER_POINTS1, record.talent_points)?;
        fields.set(avatar_fields::CHARACTER_POINTS2, record.skill_points)?;

        self.refresh_composites()
    }

    /// Become visible and controllable
    pub fn activate(&mut self) -> Result<TickReport> {
        self.require(ReplicationState::Offline, "activate")?;
        self.transition(ReplicationState::Initializing);

        if let Err(e) = self.seed() {
            self.transition(ReplicationState::Offline);
            return Err(e);
        }

        let mut report = TickReport::default();

        let own = encode_full(&mut self.fields, MessageFlags::SELF);
        let own = self.frame(&own)?;
        self.deliver(self.guid, &own, &mut report);
        report.full += 1;

        let published = self.publish();
        self.ctx
            .resolver
            .register(self.guid, &self.avatar.location);

        for observer in self.ctx.resolver.nearby(self.guid) {
            let ours = self.frame(&published.full)?;
            if self.deliver(observer, &ours, &mut report) {
                report.full += 1;
            }
            self.ctx.resolver.mark_known(self.guid, observer);

            if let Some(theirs) = self.ctx.baselines.get(observer) {
                let packet = self.frame(&theirs.full)?;
                if self.deliver(self.guid, &packet, &mut report) {
                    report.full += 1;
                }
                self.ctx.resolver.mark_known(observer, self.guid);
            }
        }

        self.transition(ReplicationState::Active);
        info!(
            guid = self.guid,
            map = self.avatar.location.map,
            observers = self.ctx.resolver.observers_of(self.guid).len(),
            "Avatar activated"
        );
        Ok(report)
    }

    /// Run one replication cycle
    ///
    /// Does nothing unless the avatar is active.
    pub fn tick(&mut self) -> Result<TickReport> {
        let mut report = TickReport::default();
        if self.state != ReplicationState::Active {
            return Ok(report);
        }

        self.ctx
            .resolver
            .relocate(self.guid, &self.avatar.location);
        let change = self.ctx.resolver.resolve(self.guid);
        let partial = encode_partial(&mut self.fields);

        if !change.left.is_empty() {
            let destroy = DestroyObjectPacket { guid: self.guid }.to_packet()?;
            for observer in &change.left {
                if self.deliver(*observer, &destroy, &mut report) {
                    report.destroyed += 1;
                }
            }
        }

        if !partial.is_empty() {
            let packet = self.frame(&partial)?;
            self.deliver(self.guid, &packet, &mut report);
            report.partial += 1;
            for observer in &change.retained {
                if self.deliver(*observer, &packet, &mut report) {
                    report.partial += 1;
                }
            }
        }

        let published = if partial.is_empty() {
            self.ctx
                .baselines
                .get(self.guid)
                .unwrap_or_else(|| self.publish())
        } else {
            self.publish()
        };

        if !change.entered.is_empty() {
            let full = self.frame(&published.full)?;
            for observer in &change.entered {
                if self.deliver(*observer, &full, &mut report) {
                    report.full += 1;
                }
            }
        }

        trace!(
            guid = self.guid,
            partial = report.partial,
            full = report.full,
            destroyed = report.destroyed,
            "Replication tick"
        );
        Ok(report)
    }

    /// Start a teleport
    ///
    /// Observers get a destroy before anything else. Returns how the
    /// relocation is carried out; a transfer leaves the avatar relocating
    /// until [`complete_relocation`](Self::complete_relocation).
    pub fn request_teleport(&mut self, target: TeleportTarget) -> Result<RelocationKind> {
        self.require(ReplicationState::Active, "teleport")?;

        let in_place =
            target.map == self.avatar.location.map && self.ctx.is_continent(target.map);
        if !in_place && target.map > u8::MAX as MapId {
            return Err(ReplicationError::InvalidMap(target.map).into());
        }

        self.transition(ReplicationState::Relocating);
        let mut report = TickReport {
            destroyed: self
                .ctx
                .resolver
                .fan_out_destroy(self.guid, self.ctx.sessions.as_ref()),
            ..TickReport::default()
        };
        self.ctx.resolver.forget_observers(self.guid);

        let kind = if in_place {
            let transport = self.avatar.transport.unwrap_or_default();
            let ack = WorldportAckPacket {
                transport_guid: transport.guid,
                transport_offset: transport.offset,
                transport_orientation: transport.orientation,
                position: target.position,
                orientation: target.orientation,
                movement_flags: 0,
            }
            .to_packet()?;
            self.deliver(self.guid, &ack, &mut report);

            self.avatar.location = target;
            self.ctx.resolver.relocate(self.guid, &target);
            self.transition(ReplicationState::Active);
            RelocationKind::InPlace
        } else {
            let pending = TransferPendingPacket { map: target.map }.to_packet()?;
            let new_world = NewWorldPacket {
                map: target.map as u8,
                position: target.position,
                orientation: target.orientation,
            }
            .to_packet()?;
            self.deliver(self.guid, &pending, &mut report);
            self.deliver(self.guid, &new_world, &mut report);

            self.avatar.location = target;
            self.avatar.transport = None;
            self.ctx.resolver.detach(self.guid);
            RelocationKind::Transfer
        };

        info!(
            guid = self.guid,
            map = target.map,
            kind = ?kind,
            observers_notified = report.destroyed,
            "Teleport"
        );
        Ok(kind)
    }

    /// Finish a transfer once the client has loaded the new map
    pub fn complete_relocation(&mut self) -> Result<TickReport> {
        self.require(ReplicationState::Relocating, "complete relocation")?;

        let mut report = TickReport::default();
        let own = encode_full(&mut self.fields, MessageFlags::SELF);
        let own = self.frame(&own)?;
        self.deliver(self.guid, &own, &mut report);
        report.full += 1;

        self.publish();
        self.ctx
            .resolver
            .register(self.guid, &self.avatar.location);
        self.transition(ReplicationState::Active);
        Ok(report)
    }

    /// Change a movement rate, returning the committed value
    ///
    /// Only the avatar's own connection is told.
    pub fn request_speed_change(&mut self, kind: SpeedKind, value: f32) -> Result<f32> {
        let speed = kind.clamp(value);
        self.avatar.speeds.set(kind, speed);

        let packet = SpeedChangePacket { kind, speed }.to_packet()?;
        let mut report = TickReport::default();
        self.deliver(self.guid, &packet, &mut report);
        debug!(guid = self.guid, kind = kind.name(), speed, "Speed change");
        Ok(speed)
    }

    /// Go offline and flush the durable record
    pub fn deactivate(&mut self) -> Result<AvatarRecord> {
        if self.state == ReplicationState::Offline {
            return Err(ReplicationError::InvalidState {
                from: self.state.name(),
                operation: "deactivate",
            }
            .into());
        }
        if self.state == ReplicationState::Relocating {
            warn!(
                error = %ReplicationError::RelocationInterrupted(self.guid),
                "Logout during relocation"
            );
        }

        self.ctx.sessions.unregister(self.guid);
        let notified = self
            .ctx
            .resolver
            .remove(self.guid, self.ctx.sessions.as_ref());
        self.ctx.baselines.remove(self.guid);
        self.transition(ReplicationState::Offline);

        self.sync_record();
        self.ctx.store.flush(&self.record)?;

        info!(guid = self.guid, observers_notified = notified, "Avatar deactivated");
        Ok(self.record.clone())
    }

    /// Copy flushed fields back into the durable record
    pub fn sync_record(&mut self) {
        let read = |id: FieldId| self.fields.get(id).map(FieldValue::as_u32).unwrap_or_default();
        let mut powers = [0u32; 4];
        for (index, power) in powers.iter_mut().enumerate() {
            if let Ok(id) = unit_fields::POWERS.nth(index as u16) {
                *power = read(id);
            }
        }

        let level = read(unit_fields::LEVEL);
        let xp = read(avatar_fields::XP);
        let talent_points = read(avatar_fields::CHARACTER_POINTS1);
        let skill_points = read(avatar_fields::CHARACTER_POINTS2);
        let health = read(unit_fields::HEALTH);
        let location = self.avatar.location;

        let record = &mut self.record;
        record.level = level;
        record.xp = xp;
        record.talent_points = talent_points;
        record.skill_points = skill_points;
        record.health = health;
        record.set_powers(powers);
        record.map = location.map;
        record.zone = self.avatar.zone;
        record.x = location.position.x;
        record.y = location.position.y;
        record.z = location.position.z;
        record.orientation = location.orientation;
    }

    // ============ Helpers ============

    fn publish(&self) -> Arc<PublishedState> {
        self.ctx.baselines.publish(PublishedState::new(
            self.guid,
            self.avatar.location,
            self.fields.snapshot(),
        ))
    }

    /// Compress and wrap an update message
    fn frame(&self, message: &UpdateMessage) -> Result<Packet> {
        let envelope = self.ctx.compressor.compress(message.as_bytes())?;
        Ok(UpdateObjectPacket { envelope }.to_packet()?)
    }

    /// Hand a packet to the transport, logging failures
    fn deliver(&self, target: Guid, packet: &Packet, report: &mut TickReport) -> bool {
        match self.ctx.sessions.deliver(target, packet) {
            Ok(()) => true,
            Err(e) => {
                report.failed += 1;
                warn!(
                    guid = self.guid,
                    target = target,
                    opcode = %packet.opcode(),
                    error = %e,
                    "Delivery failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::avatar::Location;
    use crate::game::grid::CellGrid;
    use crate::game::metadata::RaceTable;
    use crate::game::persistence::MemoryAvatarStore;
    use crate::game::update::encoder::{decode, UpdateKind};
    use crate::game::update::compression::decompress;
    use crate::protocol::packets::Opcode;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn context() -> (Arc<ReplicationContext>, Arc<MemoryAvatarStore>) {
        let store = Arc::new(MemoryAvatarStore::new());
        let ctx = ReplicationContext {
            resolver: Arc::new(InterestResolver::new(Arc::new(CellGrid::new(50.0)), 1)),
            sessions: Arc::new(SessionRegistry::new(64)),
            baselines: Arc::new(BaselineCache::new()),
            metadata: Arc::new(RaceTable::builtin()),
            store: store.clone(),
            compressor: Compressor::default(),
            continent_maps: DEFAULT_CONTINENT_MAPS.to_vec(),
        };
        (Arc::new(ctx), store)
    }

    fn record(guid: Guid, x: f32) -> AvatarRecord {
        let mut record = AvatarRecord::new(guid, format!("avatar{}", guid), 1, 4, 0);
        record.x = x;
        record.health = 50;
        record
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            packets.push(Packet::from_frame(&frame).unwrap());
        }
        packets
    }

    fn online(
        ctx: &Arc<ReplicationContext>,
        guid: Guid,
        x: f32,
    ) -> (AvatarReplicator, mpsc::Receiver<Bytes>) {
        let rx = ctx.sessions.open(guid);
        let mut replicator = AvatarReplicator::new(record(guid, x), ctx.clone()).unwrap();
        replicator.activate().unwrap();
        (replicator, rx)
    }

    #[test]
    fn test_activation_sends_self_full() {
        let (ctx, _) = context();
        let (replicator, mut rx) = online(&ctx, 1, 0.0);
        assert_eq!(replicator.state(), ReplicationState::Active);

        let packets = drain(&mut rx);
        assert_eq!(packets.len(), 1);
        // a full avatar update is well over the threshold
        assert_eq!(packets[0].opcode(), Opcode::SmsgCompressedUpdateObject);

        let body = decompress(packets[0].payload()).unwrap();
        let update = decode(&body).unwrap();
        assert_eq!(update.kind, UpdateKind::Full);
        assert!(update.flags.is_self());
        assert_eq!(
            update.values[&unit_fields::BYTES_0].as_u32().to_le_bytes(),
            [1, 4, 0, 3]
        );
        assert_eq!(update.values[&unit_fields::DISPLAY_ID], FieldValue::U32(49));
        assert_eq!(
            update.values[&unit_fields::FACTION_TEMPLATE],
            FieldValue::U32(1)
        );
    }

    #[test]
    fn test_activation_exchanges_full_state() {
        let (ctx, _) = context();
        let (_first, mut rx1) = online(&ctx, 1, 0.0);
        drain(&mut rx1);

        let (_second, mut rx2) = online(&ctx, 2, 10.0);

        let to_first = drain(&mut rx1);
        assert_eq!(to_first.len(), 1);
        let update = decode(&decompress(to_first[0].payload()).unwrap()).unwrap();
        assert_eq!(update.guid, 2);
        assert!(!update.flags.is_self());

        // own full state plus the first avatar's baseline
        let to_second = drain(&mut rx2);
        assert_eq!(to_second.len(), 2);
        let theirs = decode(&decompress(to_second[1].payload()).unwrap()).unwrap();
        assert_eq!(theirs.guid, 1);
    }

    #[test]
    fn test_tick_without_changes_sends_nothing() {
        let (ctx, _) = context();
        let (mut first, mut rx1) = online(&ctx, 1, 0.0);
        let (mut second, mut rx2) = online(&ctx, 2, 10.0);
        first.tick().unwrap();
        second.tick().unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        let report = first.tick().unwrap();
        assert_eq!(report.sent(), 0);
        assert!(drain(&mut rx2).is_empty());
    }

    #[test]
    fn test_tick_sends_partial_to_retained() {
        let (ctx, _) = context();
        let (mut first, mut rx1) = online(&ctx, 1, 0.0);
        let (_second, mut rx2) = online(&ctx, 2, 10.0);
        first.tick().unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        first.set_health(20).unwrap();
        let report = first.tick().unwrap();
        assert_eq!(report.partial, 2);

        let packets = drain(&mut rx2);
        assert_eq!(packets.len(), 1);
        let update = decode(&decompress(packets[0].payload()).unwrap()).unwrap();
        assert_eq!(update.kind, UpdateKind::Partial);
        assert_eq!(update.values.len(), 1);
        assert_eq!(update.values[&unit_fields::HEALTH], FieldValue::U32(20));
    }

    #[test]
    fn test_sub_value_change_marks_composite() {
        let (ctx, _) = context();
        let (mut replicator, _rx) = online(&ctx, 1, 0.0);

        replicator.set_sheath_state(1).unwrap();
        replicator.set_stand_state(8).unwrap();
        assert!(replicator.fields().is_dirty(unit_fields::BYTES_1));
        assert_eq!(
            replicator.fields().composite_get(unit_fields::BYTES_1).unwrap(),
            [8, 0, 0, 1]
        );

        replicator.set_player_flag(PlayerFlags::AFK, true).unwrap();
        assert_eq!(
            replicator
                .fields()
                .composite_get(avatar_fields::BYTES_2)
                .unwrap()[0],
            PlayerFlags::AFK.bits()
        );
    }

    #[test]
    fn test_set_field_on_composite_goes_through_sub_values() {
        let (ctx, _) = context();
        let (mut replicator, _rx) = online(&ctx, 1, 0.0);

        // unused byte is normalised away
        replicator
            .set_field(unit_fields::BYTES_1, u32::from_le_bytes([3, 9, 0, 2]))
            .unwrap();
        assert_eq!(replicator.avatar().stand_state, 3);
        assert_eq!(
            replicator.fields().composite_get(unit_fields::BYTES_1).unwrap(),
            [3, 0, 0, 2]
        );

        assert!(replicator
            .set_composite(unit_fields::BYTES_0, [42, 4, 0, 3])
            .is_err());
    }

    #[test]
    fn test_unknown_gender_rejected() {
        let (ctx, _) = context();
        let (mut replicator, _rx) = online(&ctx, 1, 0.0);
        let before = replicator.fields().composite_get(unit_fields::BYTES_0).unwrap();

        let err = replicator
            .set_composite(unit_fields::BYTES_0, [1, 4, 2, 3])
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::RealmsyncError::Replication(ReplicationError::UnknownGender(2))
        ));
        assert_eq!(
            replicator.fields().composite_get(unit_fields::BYTES_0).unwrap(),
            before
        );

        replicator
            .set_composite(unit_fields::BYTES_0, [1, 4, 1, 3])
            .unwrap();
        assert_eq!(replicator.avatar().gender, Gender::Female);
        assert_eq!(
            replicator.fields().composite_get(unit_fields::BYTES_0).unwrap(),
            [1, 4, 1, 3]
        );
    }

    #[test]
    fn test_operations_require_state() {
        let (ctx, _) = context();
        let mut replicator = AvatarReplicator::new(record(1, 0.0), ctx).unwrap();

        assert!(replicator.deactivate().is_err());
        assert!(replicator
            .request_teleport(Location::default())
            .is_err());
        assert_eq!(replicator.tick().unwrap(), TickReport::default());
        assert!(replicator.complete_relocation().is_err());
    }

    #[test]
    fn test_unknown_race_metadata_fails_activation() {
        let (ctx, _) = context();
        let ctx = Arc::new(ReplicationContext {
            resolver: ctx.resolver.clone(),
            sessions: ctx.sessions.clone(),
            baselines: ctx.baselines.clone(),
            metadata: Arc::new(RaceTable::empty()),
            store: ctx.store.clone(),
            compressor: Compressor::default(),
            continent_maps: vec![0, 1],
        });
        let mut replicator = AvatarReplicator::new(record(1, 0.0), ctx).unwrap();
        assert!(replicator.activate().is_err());
        assert_eq!(replicator.state(), ReplicationState::Offline);
    }

    #[test]
    fn test_invalid_map_rejected_before_fan_out() {
        let (ctx, _) = context();
        let (mut replicator, _rx) = online(&ctx, 1, 0.0);
        let target = Location::new(300, Vector3::default(), 0.0);
        assert!(replicator.request_teleport(target).is_err());
        assert_eq!(replicator.state(), ReplicationState::Active);
    }

    #[test]
    fn test_deactivate_flushes_record() {
        let (ctx, store) = context();
        let (mut replicator, _rx) = online(&ctx, 1, 12.0);

        replicator.set_level(7).unwrap();
        replicator.set_xp(150).unwrap();
        replicator.set_power(PowerType::Energy, 80).unwrap();
        let record = replicator.deactivate().unwrap();

        assert_eq!(record.level, 7);
        assert_eq!(record.xp, 150);
        assert_eq!(record.power4, 80);
        assert_eq!(record.x, 12.0);

        let saved = store.get(1).unwrap();
        assert_eq!(saved.level, 7);
        assert!(saved.last_saved.is_some());
        assert!(!ctx.sessions.contains(1));
        assert!(ctx.baselines.get(1).is_none());
    }
}
