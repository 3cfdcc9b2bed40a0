//! Spatial index.
//!
//! Fixed-size square cells over the world plane. Collision candidates come
//! from a cell neighborhood instead of an all-pairs scan. Coordinates are
//! validated before insertion: an entity with NaN or infinite position is
//! rejected rather than allowed to land in (and poison) an arbitrary cell.

use std::collections::HashMap;
use std::hash::Hash;

use crate::math::Vec2;

/// Default cell edge in world units, sized to the largest query radius.
pub const DEFAULT_CELL_SIZE: f32 = 128.0;

type Cell = (i32, i32);

/// Grid-bucketed positions keyed by an entity id.
#[derive(Debug, Default)]
pub struct SpatialGrid<K: Eq + Hash + Copy> {
    cell_size: f32,
    cells: HashMap<Cell, Vec<K>>,
    /// Reverse index: where each key currently lives.
    entries: HashMap<K, (Cell, Vec2)>,
}

impl<K: Eq + Hash + Copy> SpatialGrid<K> {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: if cell_size > 0.0 {
                cell_size
            } else {
                DEFAULT_CELL_SIZE
            },
            cells: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    fn cell_of(&self, pos: Vec2) -> Cell {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    /// Inserts or moves a key. Returns false (leaving the index unchanged
    /// for that key) when the position is not finite.
    pub fn upsert(&mut self, key: K, pos: Vec2) -> bool {
        if !pos.is_finite() {
            return false;
        }
        let new_cell = self.cell_of(pos);
        match self.entries.get_mut(&key) {
            Some((cell, stored)) => {
                if *cell == new_cell {
                    *stored = pos;
                    return true;
                }
                let old_cell = *cell;
                *cell = new_cell;
                *stored = pos;
                remove_from_cell(&mut self.cells, old_cell, key);
            }
            None => {
                self.entries.insert(key, (new_cell, pos));
            }
        }
        self.cells.entry(new_cell).or_default().push(key);
        true
    }

    pub fn remove(&mut self, key: K) {
        if let Some((cell, _)) = self.entries.remove(&key) {
            remove_from_cell(&mut self.cells, cell, key);
        }
    }

    /// Keys whose stored position lies within `radius` of `center`.
    ///
    /// Scans only the cells overlapping the query circle's bounding box.
    pub fn query_radius(&self, center: Vec2, radius: f32) -> Vec<K> {
        let mut out = Vec::new();
        if !center.is_finite() || radius < 0.0 {
            return out;
        }
        let min = self.cell_of(Vec2::new(center.x - radius, center.y - radius));
        let max = self.cell_of(Vec2::new(center.x + radius, center.y + radius));
        let r_sq = radius * radius;
        for cx in min.0..=max.0 {
            for cy in min.1..=max.1 {
                let Some(keys) = self.cells.get(&(cx, cy)) else {
                    continue;
                };
                for &key in keys {
                    if let Some((_, pos)) = self.entries.get(&key) {
                        if pos.sub(center).len_sq() <= r_sq {
                            out.push(key);
                        }
                    }
                }
            }
        }
        out
    }

    /// Every distinct unordered pair of keys sharing a cell neighborhood.
    ///
    /// A pair is emitted once even when both keys straddle the same two
    /// cells; ordering within the pair is by iteration, so callers wanting
    /// stable output should sort.
    pub fn neighbor_pairs(&self, interaction_radius: f32) -> Vec<(K, K)> {
        let mut out = Vec::new();
        let mut seen: Vec<K> = Vec::with_capacity(self.entries.len());
        for (&key, &(_, pos)) in &self.entries {
            for other in self.query_radius(pos, interaction_radius) {
                if other == key || seen.contains(&other) {
                    continue;
                }
                out.push((key, other));
            }
            seen.push(key);
        }
        out
    }
}

fn remove_from_cell<K: Eq + Copy>(cells: &mut HashMap<Cell, Vec<K>>, cell: Cell, key: K) {
    if let Some(keys) = cells.get_mut(&cell) {
        keys.retain(|&k| k != key);
        if keys.is_empty() {
            cells.remove(&cell);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_and_query() {
        let mut grid: SpatialGrid<u32> = SpatialGrid::new(100.0);
        assert!(grid.upsert(1, Vec2::new(10.0, 10.0)));
        assert!(grid.upsert(2, Vec2::new(40.0, 10.0)));
        assert!(grid.upsert(3, Vec2::new(900.0, 900.0)));

        let near = grid.query_radius(Vec2::new(0.0, 0.0), 60.0);
        assert!(near.contains(&1));
        assert!(near.contains(&2));
        assert!(!near.contains(&3));
    }

    #[test]
    fn rebuckets_on_cell_change() {
        let mut grid: SpatialGrid<u32> = SpatialGrid::new(100.0);
        grid.upsert(1, Vec2::new(10.0, 10.0));
        grid.upsert(1, Vec2::new(950.0, 950.0));

        assert!(grid.query_radius(Vec2::new(0.0, 0.0), 60.0).is_empty());
        assert_eq!(grid.query_radius(Vec2::new(940.0, 940.0), 60.0), vec![1]);
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn rejects_non_finite_positions() {
        let mut grid: SpatialGrid<u32> = SpatialGrid::new(100.0);
        assert!(!grid.upsert(1, Vec2::new(f32::NAN, 10.0)));
        assert!(!grid.upsert(2, Vec2::new(10.0, f32::INFINITY)));
        assert!(grid.is_empty());

        // A valid neighbor is unaffected by rejected inserts.
        assert!(grid.upsert(3, Vec2::new(10.0, 10.0)));
        assert!(!grid.upsert(3, Vec2::new(f32::NAN, f32::NAN)));
        assert_eq!(grid.query_radius(Vec2::new(0.0, 0.0), 50.0), vec![3]);
    }

    #[test]
    fn neighbor_pairs_are_distinct() {
        let mut grid: SpatialGrid<u32> = SpatialGrid::new(100.0);
        grid.upsert(1, Vec2::new(10.0, 10.0));
        grid.upsert(2, Vec2::new(20.0, 10.0));
        grid.upsert(3, Vec2::new(2000.0, 2000.0));

        let pairs = grid.neighbor_pairs(50.0);
        assert_eq!(pairs.len(), 1);
        let (a, b) = pairs[0];
        assert!(a != b);
        assert!([a, b].contains(&1) && [a, b].contains(&2));
    }

    #[test]
    fn remove_clears_entry() {
        let mut grid: SpatialGrid<u32> = SpatialGrid::new(100.0);
        grid.upsert(1, Vec2::new(10.0, 10.0));
        grid.remove(1);
        assert!(grid.is_empty());
        assert!(grid.query_radius(Vec2::new(10.0, 10.0), 50.0).is_empty());
    }
}
