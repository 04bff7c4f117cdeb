//! Published baselines
//!
//! After each tick an avatar publishes an immutable snapshot of its fields
//! together with the encoded full update observers receive. Other avatars
//! read these instead of touching a live field store.

use std::sync::Arc;

use dashmap::DashMap;

use crate::game::avatar::Location;
use crate::game::update::encoder::{encode_snapshot, UpdateMessage};
use crate::game::update::flags::MessageFlags;
use crate::game::update::store::FieldSnapshot;
use crate::game::Guid;

/// Immutable view of one avatar
#[derive(Debug, Clone)]
pub struct PublishedState {
    pub guid: Guid,
    pub location: Location,
    pub snapshot: FieldSnapshot,
    /// Full update as seen by other entities
    pub full: UpdateMessage,
}

impl PublishedState {
    pub fn new(guid: Guid, location: Location, snapshot: FieldSnapshot) -> Self {
        let full = encode_snapshot(&snapshot, MessageFlags::empty());
        Self {
            guid,
            location,
            snapshot,
            full,
        }
    }
}

#[derive(Debug, Default)]
pub struct BaselineCache {
    entries: DashMap<Guid, Arc<PublishedState>>,
}

impl BaselineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, state: PublishedState) -> Arc<PublishedState> {
        let state = Arc::new(state);
        self.entries.insert(state.guid, Arc::clone(&state));
        state
    }

    pub fn get(&self, guid: Guid) -> Option<Arc<PublishedState>> {
        self.entries.get(&guid).map(|r| Arc::clone(&r))
    }

    pub fn remove(&self, guid: Guid) -> Option<Arc<PublishedState>> {
        self.entries.remove(&guid).map(|(_, state)| state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::update::encoder::decode;
    use crate::game::update::fields::{object_fields, unit_fields, EntityType, FieldValue};
    use crate::game::update::store::FieldStore;

    #[test]
    fn test_published_full_is_not_self() {
        let mut store = FieldStore::new(EntityType::Avatar);
        store.set(object_fields::GUID, 11u64).unwrap();
        store.set(unit_fields::LEVEL, 4u32).unwrap();

        let cache = BaselineCache::new();
        cache.publish(PublishedState::new(11, Location::default(), store.snapshot()));

        let state = cache.get(11).unwrap();
        let decoded = decode(state.full.as_bytes()).unwrap();
        assert!(!decoded.flags.is_self());
        assert_eq!(decoded.guid, 11);
        assert_eq!(decoded.values[&unit_fields::LEVEL], FieldValue::U32(4));
    }

    #[test]
    fn test_publish_replaces_and_remove() {
        let cache = BaselineCache::new();
        let store = FieldStore::new(EntityType::Avatar);
        cache.publish(PublishedState::new(1, Location::default(), store.snapshot()));
        cache.publish(PublishedState::new(1, Location::default(), store.snapshot()));
        assert_eq!(cache.len(), 1);

        assert!(cache.remove(1).is_some());
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }
}
