use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::api::types::{BodyId, CellCoord, ChunkCoord};
use crate::collision::contact::{ContactManifold, ContactTarget};
use crate::collision::shape::{penetration, ConvexPiece, Penetration, Shape};
use crate::collision::world::VoxelWorld;
use crate::error::WorldError;
use crate::math::{Aabb, Pose};

static UNIT_CELL: Shape = Shape::Cuboid {
    half_extents: Vec3::splat(0.5),
};

/// Smallest feature size used when choosing the sweep sample count.
const MIN_FEATURE: f32 = 0.05;

/// Tuning for sweeps and region scans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Upper bound on interpolated samples along one sweep.
    pub max_substeps: u32,
    /// Bisection iterations used to refine a time of impact.
    pub bisection_iterations: u32,
    /// Regions larger than this many cells are not scanned as one block.
    pub max_region_cells: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_substeps: 16,
            bisection_iterations: 8,
            max_region_cells: 32_768,
        }
    }
}

/// Solid cells inside a region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionQuery {
    pub solid_cells: Vec<CellCoord>,
    /// Chunks the region touched that were not loaded. Their cells count as empty.
    pub unloaded_chunks: Vec<ChunkCoord>,
    /// First collaborator failure, if any. The failing cells count as empty.
    pub world_error: Option<WorldError>,
}

impl RegionQuery {
    fn merge(&mut self, other: RegionQuery) {
        for cell in other.solid_cells {
            if !self.solid_cells.contains(&cell) {
                self.solid_cells.push(cell);
            }
        }
        for chunk in other.unloaded_chunks {
            if !self.unloaded_chunks.contains(&chunk) {
                self.unloaded_chunks.push(chunk);
            }
        }
        if self.world_error.is_none() {
            self.world_error = other.world_error;
        }
    }
}

/// Result of sweeping a shape between two poses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sweep {
    /// Nearest first.
    pub contacts: Vec<ContactManifold>,
    pub unloaded_chunks: Vec<ChunkCoord>,
    pub world_error: Option<WorldError>,
}

impl Sweep {
    pub fn nearest(&self) -> Option<&ContactManifold> {
        self.contacts.first()
    }

    pub fn max_depth(&self) -> f32 {
        self.contacts.iter().map(|c| c.depth).fold(0.0, f32::max)
    }
}

/// Read-only collision queries against the voxel world.
pub struct VoxelQuery<'w> {
    world: &'w dyn VoxelWorld,
    config: QueryConfig,
}

impl<'w> VoxelQuery<'w> {
    pub fn new(world: &'w dyn VoxelWorld) -> Self {
        Self {
            world,
            config: QueryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    fn too_large(&self, aabb: &Aabb) -> bool {
        let size = (aabb.max.floor() - aabb.min.floor()) + Vec3::ONE;
        size.x * size.y * size.z > self.config.max_region_cells as f32
    }

    /// Scan every cell overlapping `aabb`.
    pub fn query_region(&self, aabb: &Aabb) -> RegionQuery {
        let mut out = RegionQuery::default();
        if !aabb.is_finite() {
            return out;
        }
        if self.too_large(aabb) {
            log::warn!(
                "region {:?}..{:?} exceeds {} cells, skipped",
                aabb.min,
                aabb.max,
                self.config.max_region_cells
            );
            return out;
        }

        let mut loaded: HashMap<ChunkCoord, bool> = HashMap::new();
        for cell in aabb.cells() {
            let chunk = ChunkCoord::of_cell(cell);
            let is_loaded = *loaded.entry(chunk).or_insert_with(|| {
                let is_loaded = self.world.is_loaded(chunk);
                if !is_loaded {
                    out.unloaded_chunks.push(chunk);
                }
                is_loaded
            });
            if !is_loaded {
                continue;
            }
            match self.world.is_solid(cell) {
                Ok(true) => out.solid_cells.push(cell),
                Ok(false) => {}
                Err(err) => {
                    if out.world_error.is_none() {
                        out.world_error = Some(err);
                    }
                }
            }
        }
        out
    }

    /// Move `shape` from `from` to `to` and report every solid cell it hits,
    /// with the time of impact of each.
    pub fn sweep_shape(&self, body: BodyId, shape: &Shape, from: &Pose, to: &Pose) -> Sweep {
        let start_box = shape.world_aabb(from);
        let end_box = shape.world_aabb(to);
        let swept = start_box.union(&end_box);
        let region = if self.too_large(&swept) {
            let mut region = self.query_region(&start_box);
            region.merge(self.query_region(&end_box));
            region
        } else {
            self.query_region(&swept)
        };

        let mut sweep = Sweep {
            contacts: Vec::new(),
            unloaded_chunks: region.unloaded_chunks,
            world_error: region.world_error,
        };
        if region.solid_cells.is_empty() {
            return sweep;
        }

        let bounds = shape.local_aabb();
        let feature = bounds.half_extents().min_element().max(MIN_FEATURE);
        let reach = bounds.half_extents().length();
        let angle = from.orientation.angle_between(to.orientation);
        let travel = from.position.distance(to.position) + reach * angle;
        let samples = ((travel / feature).ceil() as u32).clamp(1, self.config.max_substeps.max(1));

        let mut pending = region.solid_cells;
        let mut pieces = Vec::new();
        let mut prev_t = 0.0;
        for i in 0..=samples {
            let t = i as f32 / samples as f32;
            let pose = if i == samples { *to } else { from.lerp(to, t) };
            pieces.clear();
            shape.pieces(&pose, &mut pieces);

            pending.retain(|&cell| {
                let Some(hit) = deepest(&pieces, cell) else {
                    return true;
                };
                let contact = if i == 0 {
                    manifold(body, cell, hit, 0.0)
                } else {
                    self.refine(body, shape, from, to, cell, prev_t, t)
                        .unwrap_or_else(|| manifold(body, cell, hit, t))
                };
                sweep.contacts.push(contact);
                false
            });
            if pending.is_empty() {
                break;
            }
            prev_t = t;
        }

        ContactManifold::sort_nearest_first(&mut sweep.contacts);
        sweep
    }

    /// Static overlap of `shape` at `pose` against solid cells. Every contact has `toi` 0.
    pub fn overlaps(&self, body: BodyId, shape: &Shape, pose: &Pose) -> Sweep {
        let region = self.query_region(&shape.world_aabb(pose));
        let mut pieces = Vec::new();
        shape.pieces(pose, &mut pieces);
        let mut contacts: Vec<ContactManifold> = region
            .solid_cells
            .iter()
            .filter_map(|&cell| deepest(&pieces, cell).map(|hit| manifold(body, cell, hit, 0.0)))
            .collect();
        ContactManifold::sort_nearest_first(&mut contacts);
        Sweep {
            contacts,
            unloaded_chunks: region.unloaded_chunks,
            world_error: region.world_error,
        }
    }

    /// Bisect between a free fraction `lo` and an overlapping fraction `hi`.
    #[allow(clippy::too_many_arguments)]
    fn refine(
        &self,
        body: BodyId,
        shape: &Shape,
        from: &Pose,
        to: &Pose,
        cell: CellCoord,
        mut lo: f32,
        mut hi: f32,
    ) -> Option<ContactManifold> {
        let mut pieces = Vec::new();
        for _ in 0..self.config.bisection_iterations {
            let mid = 0.5 * (lo + hi);
            pieces.clear();
            shape.pieces(&from.lerp(to, mid), &mut pieces);
            if deepest(&pieces, cell).is_some() {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        pieces.clear();
        shape.pieces(&from.lerp(to, hi), &mut pieces);
        deepest(&pieces, cell).map(|hit| manifold(body, cell, hit, lo))
    }
}

fn cell_piece(cell: CellCoord) -> ConvexPiece<'static> {
    ConvexPiece {
        shape: &UNIT_CELL,
        pose: Pose::from_position(cell.as_vec3() + Vec3::splat(0.5)),
    }
}

/// Deepest penetration of any piece into the cell.
fn deepest(pieces: &[ConvexPiece<'_>], cell: CellCoord) -> Option<Penetration> {
    let cell_box = Aabb::of_cell(cell);
    let target = cell_piece(cell);
    pieces
        .iter()
        .filter(|p| p.shape.world_aabb(&p.pose).intersects(&cell_box))
        .filter_map(|p| penetration(p, &target))
        .max_by(|a, b| a.depth.total_cmp(&b.depth))
}

fn manifold(body: BodyId, cell: CellCoord, hit: Penetration, toi: f32) -> ContactManifold {
    ContactManifold {
        body,
        target: ContactTarget::World(cell),
        point: hit.point,
        normal: hit.normal,
        depth: hit.depth,
        toi,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::world::GridWorld;
    use glam::IVec3;

    fn unit_box() -> Shape {
        Shape::cuboid(0.5, 0.5, 0.5)
    }

    #[test]
    fn region_lists_solid_cells() {
        let world = GridWorld::with_floor(0);
        let query = VoxelQuery::new(&world);
        let region = query.query_region(&Aabb::new(Vec3::new(0.0, -1.5, 0.0), Vec3::new(2.0, 1.0, 1.0)));
        // y = -2 and y = -1 rows, x = 0 and 1.
        assert_eq!(region.solid_cells.len(), 4, "cells {:?}", region.solid_cells);
        assert!(region.unloaded_chunks.is_empty());
    }

    #[test]
    fn empty_region_rejects_without_contacts() {
        let world = GridWorld::new();
        let query = VoxelQuery::new(&world);
        let from = Pose::from_position(Vec3::new(0.5, 5.0, 0.5));
        let to = Pose::from_position(Vec3::new(0.5, -5.0, 0.5));
        let sweep = query.sweep_shape(BodyId(1), &unit_box(), &from, &to);
        assert!(sweep.contacts.is_empty());
    }

    #[test]
    fn falling_box_hits_floor_at_expected_fraction() {
        let world = GridWorld::with_floor(0);
        let query = VoxelQuery::new(&world);
        let from = Pose::from_position(Vec3::new(0.5, 1.0, 0.5));
        let to = Pose::from_position(Vec3::new(0.5, -0.5, 0.5));
        let sweep = query.sweep_shape(BodyId(1), &unit_box(), &from, &to);
        let hit = sweep.nearest().expect("floor contact");
        assert!((hit.toi - 1.0 / 3.0).abs() < 0.01, "toi {}", hit.toi);
        assert!((hit.normal - Vec3::Y).length() < 1e-3, "normal {:?}", hit.normal);
        assert_eq!(hit.target, ContactTarget::World(IVec3::new(0, -1, 0)));
    }

    #[test]
    fn unloaded_chunk_counts_as_empty_and_is_reported() {
        let world = GridWorld::with_floor(0);
        world.unload_chunk(ChunkCoord::new(0, -1, 0));
        let query = VoxelQuery::new(&world);
        let from = Pose::from_position(Vec3::new(0.5, 1.0, 0.5));
        let to = Pose::from_position(Vec3::new(0.5, -0.5, 0.5));
        let sweep = query.sweep_shape(BodyId(1), &unit_box(), &from, &to);
        assert!(sweep.contacts.is_empty());
        assert_eq!(sweep.unloaded_chunks, vec![ChunkCoord::new(0, -1, 0)]);
    }

    #[test]
    fn world_failure_is_contained() {
        let world = GridWorld::with_floor(0);
        world.fail_cell(IVec3::new(0, -1, 0), "disk error");
        let query = VoxelQuery::new(&world);
        let region = query.query_region(&Aabb::of_cell(IVec3::new(0, -1, 0)));
        assert!(region.solid_cells.is_empty());
        assert!(region.world_error.is_some());
    }

    #[test]
    fn static_overlap_reports_depth() {
        let world = GridWorld::with_floor(0);
        let query = VoxelQuery::new(&world);
        let pose = Pose::from_position(Vec3::new(0.5, 0.3, 0.5));
        let sweep = query.overlaps(BodyId(1), &unit_box(), &pose);
        assert!((sweep.max_depth() - 0.2).abs() < 1e-4, "depth {}", sweep.max_depth());
        assert!(sweep.contacts.iter().all(|c| c.toi == 0.0));
    }

    #[test]
    fn compound_hits_with_any_part() {
        let world = GridWorld::new();
        world.set_solid(IVec3::new(3, 0, 0), true);
        let query = VoxelQuery::new(&world);
        let shape = Shape::compound([
            (Pose::from_position(Vec3::new(-2.0, 0.0, 0.0)), Shape::sphere(0.4)),
            (Pose::from_position(Vec3::new(2.0, 0.0, 0.0)), Shape::sphere(0.4)),
        ]);
        let pose = Pose::from_position(Vec3::new(1.5, 0.5, 0.5));
        let sweep = query.overlaps(BodyId(9), &shape, &pose);
        assert_eq!(sweep.contacts.len(), 1);
        assert_eq!(sweep.contacts[0].body, BodyId(9));
    }
}
