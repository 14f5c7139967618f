pub mod contact;
pub mod query;
pub mod shape;
pub mod world;

pub use contact::{ContactManifold, ContactTarget};
pub use query::{QueryConfig, RegionQuery, Sweep, VoxelQuery};
pub use shape::{CompoundPart, ConvexPiece, Material, Penetration, Shape};
pub use world::{GridWorld, VoxelWorld};
