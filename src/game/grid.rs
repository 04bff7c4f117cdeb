//! Spatial grid
//!
//! Partitions each map into square cells and answers which entities sit
//! within a ring of cells. Membership bookkeeping is kept behind one
//! coarse lock; the interest resolver only uses the query side.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::game::avatar::{Location, MapId};
use crate::game::Guid;

/// Default cell edge length in world units
pub const DEFAULT_CELL_SIZE: f32 = 50.0;

/// A grid cell on one map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub map: MapId,
    pub x: i32,
    pub y: i32,
}

impl CellCoord {
    pub fn new(map: MapId, x: i32, y: i32) -> Self {
        Self { map, x, y }
    }

    /// Chebyshev distance in cells, `None` across maps
    pub fn distance(&self, other: &CellCoord) -> Option<u32> {
        if self.map != other.map {
            return None;
        }
        Some((self.x - other.x).unsigned_abs().max((self.y - other.y).unsigned_abs()))
    }
}

/// Query/notify interface of the spatial index
pub trait SpatialIndex: Send + Sync {
    /// Cell containing a location
    fn cell_for(&self, location: &Location) -> CellCoord;

    /// Add an entity, returning its cell
    fn insert(&self, guid: Guid, location: &Location) -> CellCoord;

    /// Move an entity, returning its new cell
    fn relocate(&self, guid: Guid, location: &Location) -> CellCoord;

    /// Remove an entity, returning the cell it occupied
    fn remove(&self, guid: Guid) -> Option<CellCoord>;

    fn contains(&self, guid: Guid) -> bool;

    fn cell_of(&self, guid: Guid) -> Option<CellCoord>;

    /// Every entity within `radius` cells of `cell`
    fn query_observers(&self, cell: CellCoord, radius: u32) -> HashSet<Guid>;
}

#[derive(Debug, Default)]
struct GridInner {
    cells: HashMap<CellCoord, HashSet<Guid>>,
    members: HashMap<Guid, CellCoord>,
}

impl GridInner {
    fn detach(&mut self, guid: Guid) -> Option<CellCoord> {
        let cell = self.members.remove(&guid)?;
        if let Some(occupants) = self.cells.get_mut(&cell) {
            occupants.remove(&guid);
            if occupants.is_empty() {
                self.cells.remove(&cell);
            }
        }
        Some(cell)
    }

    fn attach(&mut self, guid: Guid, cell: CellCoord) {
        self.cells.entry(cell).or_default().insert(guid);
        self.members.insert(guid, cell);
    }
}

/// Uniform cell grid
#[derive(Debug)]
pub struct CellGrid {
    cell_size: f32,
    inner: RwLock<GridInner>,
}

impl Default for CellGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl CellGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            inner: RwLock::new(GridInner::default()),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of cells needed to cover a view distance
    pub fn radius_for(&self, view_distance: f32) -> u32 {
        (view_distance / self.cell_size).ceil().max(0.0) as u32
    }

    pub fn len(&self) -> usize {
        self.inner.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().members.is_empty()
    }
}

impl SpatialIndex for CellGrid {
    fn cell_for(&self, location: &Location) -> CellCoord {
        CellCoord::new(
            location.map,
            (location.position.x / self.cell_size).floor() as i32,
            (location.position.y / self.cell_size).floor() as i32,
        )
    }

    fn insert(&self, guid: Guid, location: &Location) -> CellCoord {
        let cell = self.cell_for(location);
        let mut inner = self.inner.write();
        inner.detach(guid);
        inner.attach(guid, cell);
        cell
    }

    fn relocate(&self, guid: Guid, location: &Location) -> CellCoord {
        let cell = self.cell_for(location);
        let mut inner = self.inner.write();
        if inner.members.get(&guid) != Some(&cell) {
            inner.detach(guid);
            inner.attach(guid, cell);
        }
        cell
    }

    fn remove(&self, guid: Guid) -> Option<CellCoord> {
        self.inner.write().detach(guid)
    }

    fn contains(&self, guid: Guid) -> bool {
        self.inner.read().members.contains_key(&guid)
    }

    fn cell_of(&self, guid: Guid) -> Option<CellCoord> {
        self.inner.read().members.get(&guid).copied()
    }

    fn query_observers(&self, cell: CellCoord, radius: u32) -> HashSet<Guid> {
        let inner = self.inner.read();
        let mut found = HashSet::new();

        // wide rings scan the occupied cells instead of every coordinate
        let span = 2 * u64::from(radius) + 1;
        if span.saturating_mul(span) > inner.cells.len() as u64 {
            let r = i64::from(radius);
            for (coord, occupants) in &inner.cells {
                if coord.map == cell.map
                    && (i64::from(coord.x) - i64::from(cell.x)).abs() <= r
                    && (i64::from(coord.y) - i64::from(cell.y)).abs() <= r
                {
                    found.extend(occupants.iter().copied());
                }
            }
            return found;
        }

        let r = radius.min(i32::MAX as u32) as i32;
        for x in cell.x.saturating_sub(r)..=cell.x.saturating_add(r) {
            for y in cell.y.saturating_sub(r)..=cell.y.saturating_add(r) {
                if let Some(occupants) = inner.cells.get(&CellCoord::new(cell.map, x, y)) {
                    found.extend(occupants.iter().copied());
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::avatar::Vector3;

    fn at(map: MapId, x: f32, y: f32) -> Location {
        Location::new(map, Vector3::new(x, y, 0.0), 0.0)
    }

    #[test]
    fn test_cell_for_negative_coordinates() {
        let grid = CellGrid::new(50.0);
        assert_eq!(grid.cell_for(&at(0, -1.0, 49.0)), CellCoord::new(0, -1, 0));
        assert_eq!(grid.cell_for(&at(1, 100.0, -100.0)), CellCoord::new(1, 2, -2));
    }

    #[test]
    fn test_query_ring() {
        let grid = CellGrid::new(50.0);
        grid.insert(1, &at(0, 10.0, 10.0));
        grid.insert(2, &at(0, 60.0, 10.0));
        grid.insert(3, &at(0, 500.0, 10.0));
        grid.insert(4, &at(1, 10.0, 10.0));

        let found = grid.query_observers(CellCoord::new(0, 0, 0), 1);
        assert_eq!(found, HashSet::from([1, 2]));

        let found = grid.query_observers(CellCoord::new(0, 0, 0), 0);
        assert_eq!(found, HashSet::from([1]));
    }

    #[test]
    fn test_query_at_coordinate_extremes() {
        let grid = CellGrid::new(50.0);
        let far = grid.insert(1, &at(0, 1.0e12, -1.0e12));
        assert_eq!(far, CellCoord::new(0, i32::MAX, i32::MIN));
        grid.insert(2, &at(0, 0.0, 0.0));
        for guid in 3..20 {
            grid.insert(guid, &at(0, guid as f32 * 500.0, 0.0));
        }

        // dense enough that the ring is walked coordinate by coordinate
        assert_eq!(grid.query_observers(far, 1), HashSet::from([1]));
        assert_eq!(grid.query_observers(far, u32::MAX).len(), 19);
        assert_eq!(
            grid.query_observers(CellCoord::new(0, 0, 0), u32::MAX).len(),
            19
        );
    }

    #[test]
    fn test_relocate_and_remove() {
        let grid = CellGrid::new(50.0);
        grid.insert(1, &at(0, 10.0, 10.0));
        let cell = grid.relocate(1, &at(0, 260.0, 10.0));

        assert_eq!(grid.cell_of(1), Some(cell));
        assert!(grid
            .query_observers(CellCoord::new(0, 0, 0), 1)
            .is_empty());

        assert_eq!(grid.remove(1), Some(cell));
        assert!(!grid.contains(1));
        assert_eq!(grid.remove(1), None);
        assert!(grid.is_empty());
    }

    #[test]
    fn test_radius_for_view_distance() {
        let grid = CellGrid::new(50.0);
        assert_eq!(grid.radius_for(100.0), 2);
        assert_eq!(grid.radius_for(101.0), 3);
        assert_eq!(grid.radius_for(0.0), 0);
    }

    #[test]
    fn test_cell_distance() {
        let a = CellCoord::new(0, 0, 0);
        assert_eq!(a.distance(&CellCoord::new(0, -2, 1)), Some(2));
        assert_eq!(a.distance(&CellCoord::new(1, 0, 0)), None);
    }
}
