use glam::{IVec3, Vec3};

use crate::api::types::CellCoord;

/// Axis-aligned bounding box. `min <= max` on every axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        let h = half_extents.abs();
        Self {
            min: center - h,
            max: center + h,
        }
    }

    /// The unit cube occupied by a voxel cell.
    pub fn of_cell(cell: CellCoord) -> Self {
        let min = cell.as_vec3();
        Self {
            min,
            max: min + Vec3::ONE,
        }
    }

    /// Smallest box containing all points. Empty input yields a degenerate box at the origin.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut iter = points.into_iter();
        let Some(first) = iter.next() else {
            return Self::new(Vec3::ZERO, Vec3::ZERO);
        };
        let (min, max) = iter.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
        Self { min, max }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn inflate(&self, margin: f32) -> Aabb {
        if margin <= 0.0 {
            return *self;
        }
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    pub fn translate(&self, offset: Vec3) -> Aabb {
        Aabb {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Strict overlap test: boxes that only touch along a face do not intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn closest_point(&self, p: Vec3) -> Vec3 {
        p.clamp(self.min, self.max)
    }

    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Inclusive range of cells whose unit cube overlaps this box.
    /// A box whose face lies exactly on a cell boundary does not include the
    /// cell on the far side of that boundary.
    pub fn cell_range(&self) -> (IVec3, IVec3) {
        let lo = self.min.floor().as_ivec3();
        let hi = (self.max.ceil() - Vec3::ONE).as_ivec3().max(lo);
        (lo, hi)
    }

    /// Iterate every overlapped cell in x-major, then y, then z order.
    pub fn cells(&self) -> impl Iterator<Item = CellCoord> {
        let (lo, hi) = self.cell_range();
        (lo.x..=hi.x).flat_map(move |x| {
            (lo.y..=hi.y).flat_map(move |y| (lo.z..=hi.z).map(move |z| IVec3::new(x, y, z)))
        })
    }

    pub fn cell_count(&self) -> usize {
        let (lo, hi) = self.cell_range();
        let d = hi - lo + IVec3::ONE;
        (d.x as usize) * (d.y as usize) * (d.z as usize)
    }
}
