//! Avatar persistence module
//!
//! The durable avatar record and the storage seam the replicator flushes
//! it through on logout. Only the in-memory store lives here; real
//! backends implement [`AvatarStore`] elsewhere.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Durable state of one avatar
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarRecord {
    pub guid: u64,
    pub account_id: u32,
    pub name: String,
    /// Account has game master privileges
    pub is_gm: bool,

    pub race: u8,
    pub class: u8,
    pub gender: u8,
    pub skin: u8,
    pub face: u8,
    pub hair_style: u8,
    pub hair_colour: u8,
    pub facial_hair: u8,
    pub extra_flags: u8,
    pub bank_slots: u8,

    pub level: u32,
    pub xp: u32,
    pub talent_points: u32,
    pub skill_points: u32,

    pub map: u32,
    pub zone: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub orientation: f32,

    pub health: u32,
    pub power1: u32,
    pub power2: u32,
    pub power3: u32,
    pub power4: u32,

    pub last_saved: Option<DateTime<Utc>>,
}

impl AvatarRecord {
    /// Create a level 1 record at the origin of map 0
    pub fn new(guid: u64, name: impl Into<String>, race: u8, class: u8, gender: u8) -> Self {
        Self {
            guid,
            name: name.into(),
            race,
            class,
            gender,
            level: 1,
            ..Self::default()
        }
    }

    /// Powers as an array, indexed by power type
    pub fn powers(&self) -> [u32; 4] {
        [self.power1, self.power2, self.power3, self.power4]
    }

    pub fn set_powers(&mut self, powers: [u32; 4]) {
        [self.power1, self.power2, self.power3, self.power4] = powers;
    }
}

/// Durable storage for avatar records
pub trait AvatarStore: Send + Sync {
    /// Load a record by guid
    fn load(&self, guid: u64) -> Result<Option<AvatarRecord>>;

    /// Write a record back
    fn flush(&self, record: &AvatarRecord) -> Result<()>;
}

/// Avatar store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryAvatarStore {
    records: DashMap<u64, AvatarRecord>,
}

impl MemoryAvatarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without stamping it
    pub fn insert(&self, record: AvatarRecord) {
        self.records.insert(record.guid, record);
    }

    pub fn get(&self, guid: u64) -> Option<AvatarRecord> {
        self.records.get(&guid).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl AvatarStore for MemoryAvatarStore {
    fn load(&self, guid: u64) -> Result<Option<AvatarRecord>> {
        Ok(self.get(guid))
    }

    fn flush(&self, record: &AvatarRecord) -> Result<()> {
        let mut record = record.clone();
        record.last_saved = Some(Utc::now());
        debug!(guid = record.guid, level = record.level, "Flushed avatar record");
        self.records.insert(record.guid, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record() {
        let record = AvatarRecord::new(7, "Thrall", 2, 7, 0);
        assert_eq!(record.level, 1);
        assert_eq!(record.map, 0);
        assert!(record.last_saved.is_none());
    }

    #[test]
    fn test_powers_array() {
        let mut record = AvatarRecord::default();
        record.set_powers([1, 2, 3, 4]);
        assert_eq!(record.power3, 3);
        assert_eq!(record.powers(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_memory_store_flush_stamps_record() {
        let store = MemoryAvatarStore::new();
        let record = AvatarRecord::new(1, "Anduin", 1, 2, 0);
        store.insert(record.clone());

        assert!(store.load(1).unwrap().unwrap().last_saved.is_none());

        store.flush(&record).unwrap();
        let saved = store.load(1).unwrap().unwrap();
        assert!(saved.last_saved.is_some());
        assert_eq!(saved.name, "Anduin");
        assert!(store.load(2).unwrap().is_none());
    }

    #[test]
    fn test_record_toml_round_trip() {
        let record = AvatarRecord::new(3, "Jaina", 1, 8, 1);
        let text = toml::to_string(&record).unwrap();
        let parsed: AvatarRecord = toml::from_str(&text).unwrap();
        assert_eq!(parsed, record);
    }
}
