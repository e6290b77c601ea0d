//! Level file format
//!
//! Little-endian binary layout:
//!
//! ```text
//! header        "LVLB" | version u32 | entity count u32 | world bounds 6×f32
//! chunk table   chunk bounds 4×i32 | x count u32 | y count u32 | chunk size f32
//!               | max entities per chunk u32
//!               | special chunk: u16 count, count×u32
//!               | per chunk, y-major: u16 count, count×u32
//! entity table  per entity: offset u32 | size u32 | bounds 6×i16
//! payloads      entity bytes, addressed by the entity table
//! ```
//!
//! Only the header and tables are read when a level loads. Entity payloads
//! are read one by one as chunks stream in.

use std::sync::Arc;

use lode_asset::ByteSource;

use crate::error::LevelError;
use crate::grid::{Bounds, ChunkBounds, ChunkCoord, ChunkGrid};

pub const SIGNATURE: [u8; 4] = *b"LVLB";
pub const VERSION: u32 = 2;

const HEADER_SIZE: usize = 4 + 4 + 4 + 6 * 4;
const CHUNK_TABLE_FIXED_SIZE: usize = 4 * 4 + 4 + 4 + 4 + 4;
pub const ENTITY_INFO_SIZE: usize = 20;

/// Upper bound on grid chunks accepted from a file
const MAX_CHUNKS: u64 = 1 << 22;

/// Where an entity's payload lives inside the level file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EntityInfo {
    pub offset: u32,
    pub size: u32,
    pub bounds_min: [i16; 3],
    pub bounds_max: [i16; 3],
}

impl EntityInfo {
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.bounds_min.map(f32::from), self.bounds_max.map(f32::from))
    }
}

/// Loaded level: its layout and entity table, without payloads
#[derive(Clone, Debug, Default)]
pub struct LevelAsset {
    pub version: u32,
    pub world_bounds: Bounds,
    pub grid: ChunkGrid,
    pub entities: Arc<Vec<EntityInfo>>,
}

impl LevelAsset {
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entity(&self, index: u32) -> Option<&EntityInfo> {
        self.entities.get(index as usize)
    }
}

/// One streamed entity
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LevelEntity {
    pub index: u32,
    pub bounds: Bounds,
    pub payload: Vec<u8>,
}

/// Sequential little-endian reader over a byte source
struct TableReader<'s> {
    source: &'s mut dyn ByteSource,
    pos: u64,
}

impl<'s> TableReader<'s> {
    fn new(source: &'s mut dyn ByteSource) -> Self {
        Self { source, pos: 0 }
    }

    fn bytes(&mut self, length: usize, table: &'static str) -> Result<Vec<u8>, LevelError> {
        let end = self.pos.saturating_add(length as u64);
        if end > self.source.len() {
            return Err(LevelError::Truncated(table));
        }
        let bytes = self
            .source
            .read(self.pos, length)
            .map_err(|_| LevelError::Truncated(table))?;
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self, table: &'static str) -> Result<u16, LevelError> {
        let b = self.bytes(2, table)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn indices(&mut self, table: &'static str) -> Result<Vec<u32>, LevelError> {
        let count = self.u16(table)? as usize;
        let raw = self.bytes(count * 4, table)?;
        Ok(raw.chunks_exact(4).map(le_u32).collect())
    }
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_f32(b: &[u8]) -> f32 {
    f32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_i16(b: &[u8]) -> i16 {
    i16::from_le_bytes([b[0], b[1]])
}

fn read_bounds(b: &[u8]) -> Bounds {
    let f: Vec<f32> = b.chunks_exact(4).take(6).map(le_f32).collect();
    Bounds::new([f[0], f[1], f[2]], [f[3], f[4], f[5]])
}

/// Read the header and tables of a level
pub fn read_level(source: &mut dyn ByteSource) -> Result<LevelAsset, LevelError> {
    let mut reader = TableReader::new(source);

    let header = reader.bytes(HEADER_SIZE, "header")?;
    let signature = [header[0], header[1], header[2], header[3]];
    if signature != SIGNATURE {
        return Err(LevelError::BadSignature(signature));
    }
    let version = le_u32(&header[4..8]);
    if version != VERSION {
        return Err(LevelError::UnsupportedVersion {
            found: version,
            expected: VERSION,
        });
    }
    let entity_count = le_u32(&header[8..12]);
    let world_bounds = read_bounds(&header[12..HEADER_SIZE]);

    let fixed = reader.bytes(CHUNK_TABLE_FIXED_SIZE, "chunk table")?;
    let bounds = ChunkBounds::new(
        ChunkCoord::new(le_i32(&fixed[0..4]), le_i32(&fixed[4..8])),
        ChunkCoord::new(le_i32(&fixed[8..12]), le_i32(&fixed[12..16])),
    );
    let x_count = le_u32(&fixed[16..20]);
    let y_count = le_u32(&fixed[20..24]);
    let chunk_size = le_f32(&fixed[24..28]);
    let max_per_chunk = le_u32(&fixed[28..32]);

    if bounds.is_empty()
        || bounds.width() != u64::from(x_count)
        || bounds.height() != u64::from(y_count)
    {
        return Err(LevelError::GridMismatch(format!(
            "{}x{} chunks for bounds {}..{}",
            x_count, y_count, bounds.min, bounds.max
        )));
    }
    if bounds.area() > MAX_CHUNKS {
        return Err(LevelError::GridMismatch(format!(
            "{}x{} chunks exceeds the grid limit",
            x_count, y_count
        )));
    }
    if !(chunk_size.is_finite() && chunk_size > 0.0) {
        return Err(LevelError::GridMismatch(format!("chunk size {}", chunk_size)));
    }

    let check = |indices: &[u32]| -> Result<(), LevelError> {
        match indices.iter().find(|&&i| i >= entity_count) {
            Some(&index) => Err(LevelError::EntityIndex {
                index,
                count: entity_count,
            }),
            None => Ok(()),
        }
    };

    let mut grid = ChunkGrid::new(bounds, chunk_size);
    let special = reader.indices("special chunk")?;
    check(&special)?;
    grid.set_special(special);

    for coord in bounds.iter() {
        let entities = reader.indices("chunk table")?;
        check(&entities)?;
        grid.set_entities(coord, entities);
    }
    if grid.max_entities_per_chunk() as u64 != u64::from(max_per_chunk) {
        return Err(LevelError::GridMismatch(format!(
            "largest chunk holds {} entities, header says {}",
            grid.max_entities_per_chunk(),
            max_per_chunk
        )));
    }

    let table = reader.bytes((entity_count as usize).saturating_mul(ENTITY_INFO_SIZE), "entity table")?;
    let entities = table
        .chunks_exact(ENTITY_INFO_SIZE)
        .map(|r| EntityInfo {
            offset: le_u32(&r[0..4]),
            size: le_u32(&r[4..8]),
            bounds_min: [le_i16(&r[8..10]), le_i16(&r[10..12]), le_i16(&r[12..14])],
            bounds_max: [le_i16(&r[14..16]), le_i16(&r[16..18]), le_i16(&r[18..20])],
        })
        .collect();

    Ok(LevelAsset {
        version,
        world_bounds,
        grid,
        entities: Arc::new(entities),
    })
}

struct PendingEntity {
    bounds: Bounds,
    payload: Vec<u8>,
    special: bool,
}

/// Bakes entities into a level file
///
/// Each entity box is projected onto every chunk it overlaps. Special
/// entities skip the grid and load whenever the level is streamed.
pub struct LevelBuilder {
    chunk_size: f32,
    entities: Vec<PendingEntity>,
}

impl LevelBuilder {
    pub fn new(chunk_size: f32) -> Self {
        Self {
            chunk_size,
            entities: Vec::new(),
        }
    }

    /// Add an entity, returning its index
    pub fn add_entity(&mut self, bounds: Bounds, payload: impl Into<Vec<u8>>) -> u32 {
        self.push(bounds, payload.into(), false)
    }

    /// Add an entity to the special chunk, returning its index
    pub fn add_special_entity(&mut self, bounds: Bounds, payload: impl Into<Vec<u8>>) -> u32 {
        self.push(bounds, payload.into(), true)
    }

    fn push(&mut self, bounds: Bounds, payload: Vec<u8>, special: bool) -> u32 {
        self.entities.push(PendingEntity {
            bounds,
            payload,
            special,
        });
        (self.entities.len() - 1) as u32
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Layout the baked file will carry
    pub fn grid(&self) -> ChunkGrid {
        let world = self.world_bounds();
        let mut grid = ChunkGrid::for_world(&world, self.chunk_size);
        for (index, entity) in self.entities.iter().enumerate() {
            if entity.special {
                grid.insert_special(index as u32);
            } else {
                grid.insert(index as u32, &entity.bounds);
            }
        }
        grid
    }

    fn world_bounds(&self) -> Bounds {
        self.entities
            .iter()
            .map(|e| e.bounds)
            .reduce(|a, b| a.union(&b))
            .unwrap_or_default()
    }

    /// Serialize the level
    pub fn build(&self) -> Result<Vec<u8>, LevelError> {
        if !(self.chunk_size.is_finite() && self.chunk_size > 0.0) {
            return Err(LevelError::GridMismatch(format!("chunk size {}", self.chunk_size)));
        }
        let entity_count = to_u32(self.entities.len(), "entity count")?;
        let world = self.world_bounds();
        let area = ChunkGrid::world_bounds(&world, self.chunk_size).area();
        if area > MAX_CHUNKS {
            return Err(LevelError::TooLarge(format!("{} chunks", area)));
        }
        let grid = self.grid();
        let bounds = grid.bounds();
        let (width, height) = (bounds.width() as u32, bounds.height() as u32);

        let mut out = Vec::new();
        out.extend_from_slice(&SIGNATURE);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&entity_count.to_le_bytes());
        put_bounds(&mut out, &world);

        for v in [bounds.min.x, bounds.min.y, bounds.max.x, bounds.max.y] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        out.extend_from_slice(&self.chunk_size.to_le_bytes());
        let max_per_chunk = to_u32(grid.max_entities_per_chunk(), "chunk entity count")?;
        out.extend_from_slice(&max_per_chunk.to_le_bytes());

        put_indices(&mut out, grid.special())?;
        for coord in bounds.iter() {
            put_indices(&mut out, grid.entities(coord))?;
        }

        let mut offset = (out.len() + self.entities.len() * ENTITY_INFO_SIZE) as u64;
        for entity in &self.entities {
            let size = to_u32(entity.payload.len(), "entity payload")?;
            let start = u32::try_from(offset)
                .map_err(|_| LevelError::TooLarge(format!("payload offset {}", offset)))?;
            out.extend_from_slice(&start.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            for v in entity.bounds.min.iter().chain(entity.bounds.max.iter()) {
                // Float to int casts saturate
                out.extend_from_slice(&(v.round() as i16).to_le_bytes());
            }
            offset += u64::from(size);
        }

        for entity in &self.entities {
            out.extend_from_slice(&entity.payload);
        }
        Ok(out)
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32, LevelError> {
    u32::try_from(value).map_err(|_| LevelError::TooLarge(format!("{} {}", what, value)))
}

fn put_bounds(out: &mut Vec<u8>, bounds: &Bounds) {
    for v in bounds.min.iter().chain(bounds.max.iter()) {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn put_indices(out: &mut Vec<u8>, indices: &[u32]) -> Result<(), LevelError> {
    let count = u16::try_from(indices.len())
        .map_err(|_| LevelError::TooLarge(format!("{} entities in one chunk", indices.len())))?;
    out.extend_from_slice(&count.to_le_bytes());
    for index in indices {
        out.extend_from_slice(&index.to_le_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use lode_asset::MemorySource;

    use super::*;

    fn square(x0: f32, y0: f32, x1: f32, y1: f32) -> Bounds {
        Bounds::new([x0, y0, 0.0], [x1, y1, 2.0])
    }

    fn sample() -> LevelBuilder {
        let mut builder = LevelBuilder::new(10.0);
        builder.add_entity(square(1.0, 1.0, 9.0, 9.0), b"house".to_vec());
        builder.add_entity(square(5.0, 5.0, 25.0, 8.0), b"wall".to_vec());
        builder.add_special_entity(square(0.0, 0.0, 30.0, 30.0), b"sky".to_vec());
        builder
    }

    #[test]
    fn test_read_baked_level() {
        let builder = sample();
        let bytes = builder.build().unwrap();
        let level = read_level(&mut MemorySource::new(bytes.clone())).unwrap();

        assert_eq!(level.version, VERSION);
        assert_eq!(level.entity_count(), 3);
        assert_eq!(level.grid, builder.grid());
        assert_eq!(level.grid.special(), &[2]);
        assert_eq!(level.grid.entities(ChunkCoord::new(0, 0)), &[0, 1]);
        assert_eq!(level.grid.entities(ChunkCoord::new(2, 0)), &[1]);

        let wall = level.entity(1).unwrap();
        let start = wall.offset as usize;
        assert_eq!(&bytes[start..start + wall.size as usize], b"wall");
        assert_eq!(wall.bounds(), square(5.0, 5.0, 25.0, 8.0));
    }

    #[test]
    fn test_rejects_bad_signature() {
        let mut bytes = sample().build().unwrap();
        bytes[0] = b'X';
        let err = read_level(&mut MemorySource::new(bytes)).unwrap_err();
        assert!(matches!(err, LevelError::BadSignature(_)));
    }

    #[test]
    fn test_rejects_old_version() {
        let mut bytes = sample().build().unwrap();
        bytes[4..8].copy_from_slice(&1u32.to_le_bytes());
        let err = read_level(&mut MemorySource::new(bytes)).unwrap_err();
        assert_eq!(err, LevelError::UnsupportedVersion { found: 1, expected: 2 });
    }

    #[test]
    fn test_truncated_tables() {
        let bytes = sample().build().unwrap();
        let err = read_level(&mut MemorySource::new(bytes[..HEADER_SIZE + 10].to_vec())).unwrap_err();
        assert_eq!(err, LevelError::Truncated("chunk table"));
    }

    #[test]
    fn test_grid_mismatch() {
        let mut bytes = sample().build().unwrap();
        // x count
        bytes[HEADER_SIZE + 16..HEADER_SIZE + 20].copy_from_slice(&7u32.to_le_bytes());
        let err = read_level(&mut MemorySource::new(bytes)).unwrap_err();
        assert!(matches!(err, LevelError::GridMismatch(_)));
    }

    #[test]
    fn test_chunk_span_wider_than_u32() {
        let mut bytes = sample().build().unwrap();
        let table = HEADER_SIZE;
        bytes[table..table + 4].copy_from_slice(&i32::MIN.to_le_bytes());
        bytes[table + 4..table + 8].copy_from_slice(&0i32.to_le_bytes());
        bytes[table + 8..table + 12].copy_from_slice(&i32::MAX.to_le_bytes());
        bytes[table + 12..table + 16].copy_from_slice(&0i32.to_le_bytes());
        // 2^32 chunks wide truncates to 0 in 32 bits
        bytes[table + 16..table + 20].copy_from_slice(&0u32.to_le_bytes());
        bytes[table + 20..table + 24].copy_from_slice(&1u32.to_le_bytes());

        let err = read_level(&mut MemorySource::new(bytes)).unwrap_err();
        assert!(matches!(err, LevelError::GridMismatch(_)));
    }

    #[test]
    fn test_huge_world_is_rejected_when_baking() {
        let mut builder = LevelBuilder::new(1.0);
        builder.add_entity(Bounds::new([-1.0e6, -1.0e6, 0.0], [1.0e6, 1.0e6, 1.0]), b"ocean".to_vec());
        assert!(matches!(builder.build(), Err(LevelError::TooLarge(_))));
    }

    #[test]
    fn test_empty_level() {
        let bytes = LevelBuilder::new(32.0).build().unwrap();
        let level = read_level(&mut MemorySource::new(bytes)).unwrap();
        assert_eq!(level.entity_count(), 0);
        assert_eq!(level.grid.len(), 1);
    }
}
