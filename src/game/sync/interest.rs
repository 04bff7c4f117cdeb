//! Interest resolver
//!
//! Decides which observers must receive an entity's updates. For every
//! subject the resolver remembers which observers currently hold a baseline
//! of it; each resolve compares that set against a fresh grid query and
//! splits the observers into retained, entered and left.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::game::avatar::Location;
use crate::game::grid::{CellCoord, SpatialIndex};
use crate::game::Guid;
use crate::net::session::PacketSink;
use crate::protocol::packets::{DestroyObjectPacket, OutgoingPacket};

/// Observer transitions for one subject
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterestChange {
    /// Still in view, need a partial update
    pub retained: HashSet<Guid>,
    /// Newly in view, need a full update
    pub entered: HashSet<Guid>,
    /// Out of view, need a destroy
    pub left: HashSet<Guid>,
}

impl InterestChange {
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty() && self.entered.is_empty() && self.left.is_empty()
    }
}

/// Spatial interest management over a shared index
pub struct InterestResolver {
    index: Arc<dyn SpatialIndex>,
    radius: u32,
    /// subject -> observers holding a baseline of it
    known: RwLock<HashMap<Guid, HashSet<Guid>>>,
}

impl InterestResolver {
    /// `radius` is the view range in cells
    pub fn new(index: Arc<dyn SpatialIndex>, radius: u32) -> Self {
        Self {
            index,
            radius,
            known: RwLock::new(HashMap::new()),
        }
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn index(&self) -> &Arc<dyn SpatialIndex> {
        &self.index
    }

    /// Make a subject visible at a location
    pub fn register(&self, subject: Guid, location: &Location) -> CellCoord {
        let cell = self.index.insert(subject, location);
        self.known.write().entry(subject).or_default();
        debug!(guid = subject, ?cell, "Registered with spatial index");
        cell
    }

    /// Move a registered subject
    pub fn relocate(&self, subject: Guid, location: &Location) -> CellCoord {
        self.index.relocate(subject, location)
    }

    /// Take a subject out of the index without notifying anyone
    pub fn detach(&self, subject: Guid) -> Option<CellCoord> {
        self.index.remove(subject)
    }

    /// Entities currently in range of a subject, excluding itself
    pub fn nearby(&self, subject: Guid) -> HashSet<Guid> {
        match self.index.cell_of(subject) {
            Some(cell) => {
                let mut found = self.index.query_observers(cell, self.radius);
                found.remove(&subject);
                found
            }
            None => HashSet::new(),
        }
    }

    /// Compare the subject's range against its current observers
    ///
    /// The subject's observer set is replaced by the entities now in range.
    /// A subject that is not in the index loses every observer.
    pub fn resolve(&self, subject: Guid) -> InterestChange {
        let current = self.nearby(subject);
        let mut known = self.known.write();
        let previous = known.entry(subject).or_default();

        let change = InterestChange {
            retained: current.intersection(previous).copied().collect(),
            entered: current.difference(previous).copied().collect(),
            left: previous.difference(&current).copied().collect(),
        };
        *previous = current;
        change
    }

    /// Observers currently holding a baseline of the subject
    pub fn observers_of(&self, subject: Guid) -> HashSet<Guid> {
        self.known
            .read()
            .get(&subject)
            .cloned()
            .unwrap_or_default()
    }

    /// Record that an observer has received a full update of the subject
    pub fn mark_known(&self, subject: Guid, observer: Guid) {
        self.known.write().entry(subject).or_default().insert(observer);
    }

    /// Drop the subject from every other entity's observer set, so that
    /// they send it full updates again
    pub fn forget_observers(&self, subject: Guid) {
        let mut known = self.known.write();
        for (other, observers) in known.iter_mut() {
            if *other != subject {
                observers.remove(&subject);
            }
        }
    }

    /// Send a destroy for the subject to each of its observers and clear
    /// them, returning how many were handed to the transport
    ///
    /// Failed deliveries are logged and otherwise ignored.
    pub fn fan_out_destroy(&self, subject: Guid, sink: &dyn PacketSink) -> usize {
        let observers = self
            .known
            .write()
            .get_mut(&subject)
            .map(std::mem::take)
            .unwrap_or_default();
        if observers.is_empty() {
            return 0;
        }

        let packet = match (DestroyObjectPacket { guid: subject }).to_packet() {
            Ok(packet) => packet,
            Err(e) => {
                warn!(guid = subject, error = %e, "Failed to build destroy packet");
                return 0;
            }
        };

        let mut delivered = 0;
        for observer in observers {
            match sink.deliver(observer, &packet) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    guid = subject,
                    observer = observer,
                    error = %e,
                    "Destroy delivery failed"
                ),
            }
        }
        delivered
    }

    /// Remove a subject for good
    ///
    /// The destroy fan-out completes before the subject leaves the index.
    pub fn remove(&self, subject: Guid, sink: &dyn PacketSink) -> usize {
        let delivered = self.fan_out_destroy(subject, sink);
        self.index.remove(subject);
        self.forget_observers(subject);
        self.known.write().remove(&subject);
        debug!(guid = subject, delivered, "Removed from interest management");
        delivered
    }

    /// Number of subjects being tracked
    pub fn tracked(&self) -> usize {
        self.known.read().len()
    }
}

impl std::fmt::Debug for InterestResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterestResolver")
            .field("radius", &self.radius)
            .field("tracked", &self.tracked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::avatar::Vector3;
    use crate::game::grid::CellGrid;
    use crate::net::session::SessionRegistry;
    use crate::protocol::packets::{Opcode, Packet};

    fn at(x: f32) -> Location {
        Location::new(0, Vector3::new(x, 0.0, 0.0), 0.0)
    }

    fn resolver() -> InterestResolver {
        InterestResolver::new(Arc::new(CellGrid::new(50.0)), 1)
    }

    #[test]
    fn test_enter_retain_leave() {
        let resolver = resolver();
        resolver.register(1, &at(0.0));
        resolver.register(2, &at(10.0));
        resolver.register(3, &at(1000.0));

        let change = resolver.resolve(1);
        assert_eq!(change.entered, HashSet::from([2]));
        assert!(change.retained.is_empty());

        let change = resolver.resolve(1);
        assert_eq!(change.retained, HashSet::from([2]));
        assert!(change.entered.is_empty());

        resolver.relocate(2, &at(900.0));
        let change = resolver.resolve(1);
        assert_eq!(change.left, HashSet::from([2]));
        assert!(change.retained.is_empty());
        assert!(resolver.observers_of(1).is_empty());
    }

    #[test]
    fn test_left_and_retained_disjoint() {
        let resolver = resolver();
        resolver.register(1, &at(0.0));
        for guid in 2..10 {
            resolver.register(guid, &at(guid as f32 * 20.0));
        }
        resolver.resolve(1);
        resolver.relocate(5, &at(2000.0));
        let change = resolver.resolve(1);
        assert!(change.left.is_disjoint(&change.retained));
        assert!(change.left.is_disjoint(&change.entered));
    }

    #[test]
    fn test_remove_fans_out_destroy_first() {
        let resolver = resolver();
        let sessions = SessionRegistry::new(8);
        let mut rx2 = sessions.open(2);

        resolver.register(1, &at(0.0));
        resolver.register(2, &at(10.0));
        resolver.resolve(1);
        resolver.resolve(2);

        // observer 3 holds a baseline but has no session
        resolver.mark_known(1, 3);

        let delivered = resolver.remove(1, &sessions);
        assert_eq!(delivered, 1);

        let frame = rx2.try_recv().unwrap();
        let packet = Packet::from_frame(&frame).unwrap();
        assert_eq!(packet.opcode(), Opcode::SmsgDestroyObject);
        assert_eq!(packet.payload(), &1u64.to_le_bytes());

        assert!(!resolver.index().contains(1));
        assert!(!resolver.observers_of(2).contains(&1));
        assert!(resolver.nearby(2).is_empty());
    }

    #[test]
    fn test_forget_observers_forces_full_again() {
        let resolver = resolver();
        resolver.register(1, &at(0.0));
        resolver.register(2, &at(10.0));
        resolver.resolve(2);
        assert!(resolver.observers_of(2).contains(&1));

        resolver.forget_observers(1);
        let change = resolver.resolve(2);
        assert_eq!(change.entered, HashSet::from([1]));
    }

    #[test]
    fn test_detached_subject_loses_observers() {
        let resolver = resolver();
        resolver.register(1, &at(0.0));
        resolver.register(2, &at(10.0));
        resolver.resolve(1);

        resolver.detach(1);
        let change = resolver.resolve(1);
        assert_eq!(change.left, HashSet::from([2]));
    }
}
