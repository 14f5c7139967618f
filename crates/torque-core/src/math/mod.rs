pub mod aabb;
pub mod inertia;
pub mod obb;
pub mod pose;

pub use aabb::Aabb;
pub use obb::Obb;
pub use pose::Pose;
