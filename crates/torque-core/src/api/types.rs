use std::fmt;

use glam::IVec3;
use serde::{Deserialize, Serialize};

/// Stable identifier for a rigid body. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BodyId(pub u64);

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "body#{}", self.0)
    }
}

/// Host-assigned identifier for a network peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Integer coordinate of one voxel cell. Cell `c` spans `[c, c + 1)` on each axis.
pub type CellCoord = IVec3;

/// Number of cells along each edge of a chunk.
pub const CHUNK_SIZE: i32 = 16;

/// Integer coordinate of a chunk (a `CHUNK_SIZE`³ block of cells).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord(pub IVec3);

impl ChunkCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self(IVec3::new(x, y, z))
    }

    /// The chunk that owns the given cell. Uses floor division so negative
    /// cells land in negative chunks.
    pub fn of_cell(cell: CellCoord) -> Self {
        Self(IVec3::new(
            cell.x.div_euclid(CHUNK_SIZE),
            cell.y.div_euclid(CHUNK_SIZE),
            cell.z.div_euclid(CHUNK_SIZE),
        ))
    }

    /// The chunk containing a world-space point.
    pub fn of_point(point: glam::Vec3) -> Self {
        Self::of_cell(point.floor().as_ivec3())
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk({}, {}, {})", self.0.x, self.0.y, self.0.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_of_cell_uses_floor_division() {
        assert_eq!(ChunkCoord::of_cell(IVec3::new(0, 15, 16)), ChunkCoord::new(0, 0, 1));
        assert_eq!(ChunkCoord::of_cell(IVec3::new(-1, -16, -17)), ChunkCoord::new(-1, -1, -2));
    }

    #[test]
    fn chunk_of_point_floors_first() {
        let chunk = ChunkCoord::of_point(glam::Vec3::new(-0.5, 31.9, 2.0));
        assert_eq!(chunk, ChunkCoord::new(-1, 1, 0));
    }

    #[test]
    fn ids_display_readably() {
        assert_eq!(BodyId(7).to_string(), "body#7");
        assert_eq!(ConnectionId(3).to_string(), "conn#3");
    }
}
