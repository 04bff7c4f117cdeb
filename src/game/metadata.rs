//! Static race metadata
//!
//! Read-only lookup of race-derived faction and display ids, consulted
//! once at activation. [`RaceTable`] ships with built-in values and can be
//! overridden from a TOML file:
//!
//! ```toml
//! [[race]]
//! id = 1
//! faction_id = 1
//! male_display_id = 49
//! female_display_id = 50
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::game::avatar::{Gender, Race};

/// Race-derived values seeded into the unit block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RaceInfo {
    pub faction_id: u32,
    pub male_display_id: u32,
    pub female_display_id: u32,
}

impl RaceInfo {
    pub fn display_id(&self, gender: Gender) -> u32 {
        match gender {
            Gender::Male => self.male_display_id,
            Gender::Female => self.female_display_id,
        }
    }
}

/// Read-only race metadata provider
pub trait RaceMetadata: Send + Sync {
    fn race(&self, race: Race) -> Option<RaceInfo>;
}

#[derive(Debug, Deserialize)]
struct RaceEntry {
    id: u8,
    #[serde(flatten)]
    info: RaceInfo,
}

#[derive(Debug, Deserialize)]
struct RaceFile {
    #[serde(default, rename = "race")]
    races: Vec<RaceEntry>,
}

/// In-memory race table
#[derive(Debug, Clone, Default)]
pub struct RaceTable {
    races: HashMap<Race, RaceInfo>,
}

impl RaceTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table with the stock client values
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for (race, faction_id, male_display_id) in [
            (Race::Human, 1, 49),
            (Race::Orc, 2, 51),
            (Race::Dwarf, 3, 53),
            (Race::NightElf, 4, 55),
            (Race::Undead, 5, 57),
            (Race::Tauren, 6, 59),
            (Race::Gnome, 115, 1563),
            (Race::Troll, 116, 1478),
        ] {
            table.insert(
                race,
                RaceInfo {
                    faction_id,
                    male_display_id,
                    female_display_id: male_display_id + 1,
                },
            );
        }
        table
    }

    pub fn insert(&mut self, race: Race, info: RaceInfo) {
        self.races.insert(race, info);
    }

    /// Parse `[[race]]` entries on top of the built-in values
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: RaceFile = toml::from_str(content).context("Failed to parse race table")?;
        let mut table = Self::builtin();
        for entry in file.races {
            let race = Race::from_u8(entry.id)
                .with_context(|| format!("Unknown race id {} in race table", entry.id))?;
            table.insert(race, entry.info);
        }
        Ok(table)
    }

    /// Load from a file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read race table {}", path.display()))?;
        let table = Self::from_toml_str(&content)?;
        info!(path = %path.display(), races = table.len(), "Loaded race table");
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.races.len()
    }

    pub fn is_empty(&self) -> bool {
        self.races.is_empty()
    }
}

impl RaceMetadata for RaceTable {
    fn race(&self, race: Race) -> Option<RaceInfo> {
        self.races.get(&race).copied()
    }
}
