use std::collections::HashSet;

use glam::{Quat, Vec3};

use crate::api::types::CellCoord;
use crate::math::aabb::Aabb;

/// Oriented bounding box: a box not necessarily aligned with the world axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obb {
    pub center: Vec3,
    pub half_extents: Vec3,
    pub rotation: Quat,
}

impl Obb {
    pub fn new(center: Vec3, half_extents: Vec3, rotation: Quat) -> Self {
        Self {
            center,
            half_extents: half_extents.abs(),
            rotation,
        }
    }

    /// The three world-space face normals.
    pub fn axes(&self) -> [Vec3; 3] {
        [
            self.rotation * Vec3::X,
            self.rotation * Vec3::Y,
            self.rotation * Vec3::Z,
        ]
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let h = self.half_extents;
        std::array::from_fn(|i| {
            let local = Vec3::new(
                if i & 1 == 0 { -h.x } else { h.x },
                if i & 2 == 0 { -h.y } else { h.y },
                if i & 4 == 0 { -h.z } else { h.z },
            );
            self.rotation * local + self.center
        })
    }

    pub fn aabb(&self) -> Aabb {
        let [x, y, z] = self.axes();
        let extent = x.abs() * self.half_extents.x
            + y.abs() * self.half_extents.y
            + z.abs() * self.half_extents.z;
        Aabb::from_center_half_extents(self.center, extent)
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        let local = self.rotation.inverse() * (p - self.center);
        local.abs().cmple(self.half_extents).all()
    }

    /// Farthest point of the box in `direction`.
    pub fn support(&self, direction: Vec3) -> Vec3 {
        let local = self.rotation.inverse() * direction;
        let h = self.half_extents;
        let corner = Vec3::new(
            if local.x >= 0.0 { h.x } else { -h.x },
            if local.y >= 0.0 { h.y } else { -h.y },
            if local.z >= 0.0 { h.z } else { -h.z },
        );
        self.rotation * corner + self.center
    }

    /// Point of the support feature (face, edge or corner) in `direction`
    /// closest to the line through the centre along `direction`. Local axes
    /// whose share of the unit direction is within `tolerance` of zero count
    /// as lying flat against the surface.
    pub fn support_feature(&self, direction: Vec3, tolerance: f32) -> Vec3 {
        let Some(d) = (self.rotation.inverse() * direction).try_normalize() else {
            return self.center;
        };
        let h = self.half_extents;
        let mut local = Vec3::ZERO;
        let mut flat = [false; 3];
        let (mut num, mut den) = (0.0, 0.0);
        for i in 0..3 {
            if d[i].abs() <= tolerance {
                flat[i] = true;
            } else {
                local[i] = h[i].copysign(d[i]);
                num += local[i] * d[i];
                den += d[i] * d[i];
            }
        }
        let t = if den > 0.0 { num / den } else { 0.0 };
        for i in 0..3 {
            if flat[i] {
                local[i] = (t * d[i]).clamp(-h[i], h[i]);
            }
        }
        self.rotation * local + self.center
    }

    /// Cells touched by a unit-spaced lattice of sample points inside the box.
    /// Cheap and approximate: thin slivers between samples can be missed.
    pub fn cells_inside_approx(&self) -> HashSet<CellCoord> {
        let [dx, dy, dz] = self.axes();
        let start = self.center
            - dx * self.half_extents.x
            - dy * self.half_extents.y
            - dz * self.half_extents.z;
        let steps = (self.half_extents * 2.0).floor().as_uvec3();
        let mut cells = HashSet::new();
        for ix in 0..=steps.x {
            for iy in 0..=steps.y {
                for iz in 0..=steps.z {
                    let p = start + dx * ix as f32 + dy * iy as f32 + dz * iz as f32;
                    cells.insert(p.floor().as_ivec3());
                }
            }
        }
        cells
    }
}
