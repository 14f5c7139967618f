use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::api::types::{CellCoord, ChunkCoord};
use crate::error::WorldError;

/// The host's voxel world, as seen by the collision layer.
/// Implementations must be callable from the tick thread while the host
/// mutates terrain elsewhere.
pub trait VoxelWorld: Send + Sync {
    /// Whether the cell blocks movement. Errors are treated as empty by the core.
    fn is_solid(&self, cell: CellCoord) -> Result<bool, WorldError>;

    /// Whether the chunk's cells are available.
    fn is_loaded(&self, chunk: ChunkCoord) -> bool;

    /// Whether the cell holds liquid (for buoyancy).
    fn is_liquid(&self, _cell: CellCoord) -> bool {
        false
    }
}

#[derive(Default)]
struct GridState {
    solid: HashSet<CellCoord>,
    liquid: HashSet<CellCoord>,
    unloaded: HashSet<ChunkCoord>,
    failing: HashMap<CellCoord, String>,
    /// Cells with `y` below this are solid.
    floor: Option<i32>,
}

/// In-memory voxel world. Every chunk is loaded unless explicitly unloaded.
#[derive(Default)]
pub struct GridWorld {
    state: RwLock<GridState>,
}

impl GridWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// An endless solid floor whose top surface is at `y = top`.
    pub fn with_floor(top: i32) -> Self {
        let world = Self::new();
        world.state.write().floor = Some(top);
        world
    }

    pub fn set_solid(&self, cell: CellCoord, solid: bool) {
        let mut state = self.state.write();
        if solid {
            state.solid.insert(cell);
        } else {
            state.solid.remove(&cell);
        }
    }

    pub fn set_liquid(&self, cell: CellCoord, liquid: bool) {
        let mut state = self.state.write();
        if liquid {
            state.liquid.insert(cell);
        } else {
            state.liquid.remove(&cell);
        }
    }

    pub fn unload_chunk(&self, chunk: ChunkCoord) {
        self.state.write().unloaded.insert(chunk);
    }

    pub fn load_chunk(&self, chunk: ChunkCoord) {
        self.state.write().unloaded.remove(&chunk);
    }

    /// Make `is_solid` fail for one cell until cleared.
    pub fn fail_cell(&self, cell: CellCoord, message: impl Into<String>) {
        self.state.write().failing.insert(cell, message.into());
    }

    pub fn clear_failures(&self) {
        self.state.write().failing.clear();
    }
}

impl VoxelWorld for GridWorld {
    fn is_solid(&self, cell: CellCoord) -> Result<bool, WorldError> {
        let state = self.state.read();
        if let Some(message) = state.failing.get(&cell) {
            return Err(WorldError::new(message.clone()));
        }
        let below_floor = state.floor.is_some_and(|top| cell.y < top);
        Ok(below_floor || state.solid.contains(&cell))
    }

    fn is_loaded(&self, chunk: ChunkCoord) -> bool {
        !self.state.read().unloaded.contains(&chunk)
    }

    fn is_liquid(&self, cell: CellCoord) -> bool {
        self.state.read().liquid.contains(&cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;

    #[test]
    fn floor_is_solid_below_top() {
        let world = GridWorld::with_floor(0);
        assert_eq!(world.is_solid(IVec3::new(5, -1, 3)), Ok(true));
        assert_eq!(world.is_solid(IVec3::new(5, 0, 3)), Ok(false));
    }

    #[test]
    fn failing_cell_reports_error() {
        let world = GridWorld::new();
        world.fail_cell(IVec3::ZERO, "storage offline");
        assert!(world.is_solid(IVec3::ZERO).is_err());
        world.clear_failures();
        assert_eq!(world.is_solid(IVec3::ZERO), Ok(false));
    }

    #[test]
    fn chunks_load_and_unload() {
        let world = GridWorld::new();
        let chunk = ChunkCoord::new(1, 0, -1);
        assert!(world.is_loaded(chunk));
        world.unload_chunk(chunk);
        assert!(!world.is_loaded(chunk));
        world.load_chunk(chunk);
        assert!(world.is_loaded(chunk));
    }

    #[test]
    fn liquid_defaults_to_dry() {
        let world = GridWorld::new();
        world.set_liquid(IVec3::new(0, 0, 0), true);
        assert!(world.is_liquid(IVec3::new(0, 0, 0)));
        assert!(!world.is_liquid(IVec3::new(1, 0, 0)));
    }
}
