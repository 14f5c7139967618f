use glam::Vec3;

use crate::api::types::{BodyId, CellCoord};

/// What a body collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactTarget {
    World(CellCoord),
    Body(BodyId),
}

/// One collision between a body and a target. Lives for a single tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactManifold {
    pub body: BodyId,
    pub target: ContactTarget,
    /// World-space contact point on the body.
    pub point: Vec3,
    /// Unit normal pointing from the target toward the body.
    pub normal: Vec3,
    pub depth: f32,
    /// Fraction along the sweep (0 = start pose, 1 = end pose).
    pub toi: f32,
}

impl ContactManifold {
    /// Nearest-first ordering: earlier impact, then deeper, then target cell order.
    pub fn sort_nearest_first(contacts: &mut [ContactManifold]) {
        contacts.sort_by(|a, b| {
            a.toi
                .total_cmp(&b.toi)
                .then(b.depth.total_cmp(&a.depth))
                .then_with(|| target_key(&a.target).cmp(&target_key(&b.target)))
        });
    }
}

fn target_key(target: &ContactTarget) -> (u8, i64, i64, i64) {
    match *target {
        ContactTarget::World(c) => (0, c.x as i64, c.y as i64, c.z as i64),
        ContactTarget::Body(id) => (1, id.0 as i64, 0, 0),
    }
}
