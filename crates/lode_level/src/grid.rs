//! Chunk grid
//!
//! A level is cut into square chunks on the horizontal (x, y) plane. Each
//! chunk lists the entities whose bounding box overlaps it, so an entity
//! spanning several chunks appears in all of them.

use std::fmt;

use lode_asset::AssetHandle;

use crate::level::LevelEntity;

/// Axis-aligned world-space box
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    /// Smallest box holding both
    pub fn union(&self, other: &Bounds) -> Bounds {
        let mut out = *self;
        for axis in 0..3 {
            out.min[axis] = out.min[axis].min(other.min[axis]);
            out.max[axis] = out.max[axis].max(other.max[axis]);
        }
        out
    }
}

/// Chunk position on the grid
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

impl ChunkCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

/// Inclusive rectangle of chunk coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChunkBounds {
    pub min: ChunkCoord,
    pub max: ChunkCoord,
}

impl ChunkBounds {
    pub const fn new(min: ChunkCoord, max: ChunkCoord) -> Self {
        Self { min, max }
    }

    /// Square of `radius` chunks around `center`
    pub fn around(center: ChunkCoord, radius: u32) -> Self {
        let r = radius.min(i32::MAX as u32) as i32;
        Self {
            min: ChunkCoord::new(center.x.saturating_sub(r), center.y.saturating_sub(r)),
            max: ChunkCoord::new(center.x.saturating_add(r), center.y.saturating_add(r)),
        }
    }

    /// Chunks along x; up to 2^32, so wider than `u32`
    pub fn width(&self) -> u64 {
        (i64::from(self.max.x) - i64::from(self.min.x) + 1).max(0) as u64
    }

    pub fn height(&self) -> u64 {
        (i64::from(self.max.y) - i64::from(self.min.y) + 1).max(0) as u64
    }

    /// Total chunk count, saturating
    pub fn area(&self) -> u64 {
        self.width().saturating_mul(self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        (self.min.x..=self.max.x).contains(&coord.x) && (self.min.y..=self.max.y).contains(&coord.y)
    }

    /// Overlap of both rectangles, if any
    pub fn intersect(&self, other: &ChunkBounds) -> Option<ChunkBounds> {
        let out = ChunkBounds {
            min: ChunkCoord::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            max: ChunkCoord::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        };
        (!out.is_empty()).then_some(out)
    }

    /// Coordinates in y-major order
    pub fn iter(&self) -> impl Iterator<Item = ChunkCoord> {
        let (min, max) = (self.min, self.max);
        (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| ChunkCoord::new(x, y)))
    }
}

/// Entity layout of a level: which entities each chunk holds
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkGrid {
    bounds: ChunkBounds,
    chunk_size: f32,
    /// y-major, one list per chunk
    chunks: Vec<Vec<u32>>,
    special: Vec<u32>,
}

impl ChunkGrid {
    /// Empty grid covering `bounds`
    ///
    /// Callers bound the area first; see [`ChunkBounds::area`].
    pub fn new(bounds: ChunkBounds, chunk_size: f32) -> Self {
        let count = usize::try_from(bounds.area()).unwrap_or(0);
        Self {
            bounds,
            chunk_size,
            chunks: vec![Vec::new(); count],
            special: Vec::new(),
        }
    }

    /// Empty grid covering every chunk `world` touches
    pub fn for_world(world: &Bounds, chunk_size: f32) -> Self {
        Self::new(Self::world_bounds(world, chunk_size), chunk_size)
    }

    /// Chunk rectangle `for_world` would cover
    pub fn world_bounds(world: &Bounds, chunk_size: f32) -> ChunkBounds {
        span(world, chunk_size)
    }

    pub fn bounds(&self) -> ChunkBounds {
        self.bounds
    }

    pub fn chunk_size(&self) -> f32 {
        self.chunk_size
    }

    /// Number of grid chunks, the special chunk excluded
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Largest entity list of any grid chunk
    pub fn max_entities_per_chunk(&self) -> usize {
        self.chunks.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn index_of(&self, coord: ChunkCoord) -> Option<usize> {
        if !self.bounds.contains(coord) {
            return None;
        }
        let dx = (i64::from(coord.x) - i64::from(self.bounds.min.x)) as u64;
        let dy = (i64::from(coord.y) - i64::from(self.bounds.min.y)) as u64;
        let index = usize::try_from(dy.checked_mul(self.bounds.width())?.checked_add(dx)?).ok()?;
        (index < self.chunks.len()).then_some(index)
    }

    /// Entities overlapping `coord`; empty outside the grid
    pub fn entities(&self, coord: ChunkCoord) -> &[u32] {
        self.index_of(coord)
            .and_then(|i| self.chunks.get(i))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Entities loaded independently of the observer
    pub fn special(&self) -> &[u32] {
        &self.special
    }

    /// Chunk holding a world position; may lie outside the grid
    pub fn coord_of(&self, position: [f32; 3]) -> ChunkCoord {
        ChunkCoord::new(
            cell(position[0], self.chunk_size),
            cell(position[1], self.chunk_size),
        )
    }

    /// Grid chunks a box overlaps
    pub fn project(&self, bounds: &Bounds) -> Option<ChunkBounds> {
        span(bounds, self.chunk_size).intersect(&self.bounds)
    }

    /// Register entity `index` on every chunk its box overlaps
    pub fn insert(&mut self, index: u32, bounds: &Bounds) {
        let Some(area) = self.project(bounds) else {
            return;
        };
        for coord in area.iter() {
            if let Some(chunk) = self.index_of(coord).and_then(|i| self.chunks.get_mut(i)) {
                chunk.push(index);
            }
        }
    }

    pub fn insert_special(&mut self, index: u32) {
        self.special.push(index);
    }

    pub(crate) fn set_entities(&mut self, coord: ChunkCoord, entities: Vec<u32>) {
        if let Some(chunk) = self.index_of(coord).and_then(|i| self.chunks.get_mut(i)) {
            *chunk = entities;
        }
    }

    pub(crate) fn set_special(&mut self, entities: Vec<u32>) {
        self.special = entities;
    }
}

fn cell(value: f32, size: f32) -> i32 {
    (value / size).floor() as i32
}

/// Chunks touched by a box; a box ending exactly on a chunk edge stays out
/// of the next chunk
fn span(bounds: &Bounds, size: f32) -> ChunkBounds {
    let lo_x = cell(bounds.min[0], size);
    let lo_y = cell(bounds.min[1], size);
    let hi_x = ((bounds.max[0] / size).ceil() as i32 - 1).max(lo_x);
    let hi_y = ((bounds.max[1] / size).ceil() as i32 - 1).max(lo_y);
    ChunkBounds::new(ChunkCoord::new(lo_x, lo_y), ChunkCoord::new(hi_x, hi_y))
}

/// Streaming state of a chunk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChunkState {
    #[default]
    NotRequested,
    Requested,
}

/// Runtime chunk: its entity list plus the handles keeping them loaded
#[derive(Debug)]
pub struct Chunk {
    pub coord: ChunkCoord,
    pub state: ChunkState,
    pub entity_indices: Vec<u32>,
    /// Filled only while `Requested`
    pub entities_loaded: Vec<AssetHandle<LevelEntity>>,
}

impl Chunk {
    pub fn new(coord: ChunkCoord, entity_indices: Vec<u32>) -> Self {
        Self {
            coord,
            state: ChunkState::NotRequested,
            entity_indices,
            entities_loaded: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f32, y0: f32, x1: f32, y1: f32) -> Bounds {
        Bounds::new([x0, y0, 0.0], [x1, y1, 1.0])
    }

    #[test]
    fn test_world_span() {
        let grid = ChunkGrid::for_world(&square(0.0, 0.0, 40.0, 20.0), 10.0);
        assert_eq!(grid.bounds(), ChunkBounds::new(ChunkCoord::new(0, 0), ChunkCoord::new(3, 1)));
        assert_eq!(grid.len(), 8);

        let negative = ChunkGrid::for_world(&square(-15.0, -5.0, 5.0, 5.0), 10.0);
        assert_eq!(negative.bounds().min, ChunkCoord::new(-2, -1));
        assert_eq!(negative.bounds().max, ChunkCoord::new(0, 0));
    }

    #[test]
    fn test_insert_projects_box() {
        let mut grid = ChunkGrid::for_world(&square(0.0, 0.0, 40.0, 40.0), 10.0);
        grid.insert(0, &square(5.0, 5.0, 15.0, 8.0));
        grid.insert(1, &square(12.0, 2.0, 18.0, 8.0));
        // Far outside the grid: clamped away
        grid.insert(2, &square(100.0, 100.0, 110.0, 110.0));

        assert_eq!(grid.entities(ChunkCoord::new(0, 0)), &[0]);
        assert_eq!(grid.entities(ChunkCoord::new(1, 0)), &[0, 1]);
        assert_eq!(grid.entities(ChunkCoord::new(3, 3)), &[] as &[u32]);
        assert_eq!(grid.entities(ChunkCoord::new(9, 9)), &[] as &[u32]);
        assert_eq!(grid.max_entities_per_chunk(), 2);
    }

    #[test]
    fn test_index_never_exceeds_storage() {
        let wide = ChunkBounds::new(ChunkCoord::new(i32::MIN, 0), ChunkCoord::new(i32::MAX, 0));
        assert_eq!(wide.width(), 1 << 32);

        // Storage for a zero-width grid, bounds claiming otherwise
        let mut grid = ChunkGrid::new(ChunkBounds::new(ChunkCoord::new(0, 0), ChunkCoord::new(-1, 0)), 10.0);
        grid.bounds = wide;
        assert_eq!(grid.index_of(ChunkCoord::new(0, 0)), None);
        grid.set_entities(ChunkCoord::new(0, 0), vec![1]);
        grid.insert(2, &square(0.0, 0.0, 5.0, 5.0));
        assert!(grid.is_empty());
    }

    #[test]
    fn test_coord_of() {
        let grid = ChunkGrid::for_world(&square(0.0, 0.0, 40.0, 40.0), 10.0);
        assert_eq!(grid.coord_of([15.0, 5.0, 100.0]), ChunkCoord::new(1, 0));
        assert_eq!(grid.coord_of([-0.5, 39.9, 0.0]), ChunkCoord::new(-1, 3));
    }

    #[test]
    fn test_bounds_iteration_is_y_major() {
        let area = ChunkBounds::new(ChunkCoord::new(0, 0), ChunkCoord::new(1, 1));
        let coords: Vec<_> = area.iter().collect();
        assert_eq!(
            coords,
            vec![
                ChunkCoord::new(0, 0),
                ChunkCoord::new(1, 0),
                ChunkCoord::new(0, 1),
                ChunkCoord::new(1, 1),
            ]
        );
        assert!(ChunkBounds::around(ChunkCoord::new(0, 0), 1).contains(ChunkCoord::new(-1, 1)));
        assert!(area
            .intersect(&ChunkBounds::new(ChunkCoord::new(5, 5), ChunkCoord::new(6, 6)))
            .is_none());
    }
}
