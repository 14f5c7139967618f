pub mod forces;
pub mod integrator;
pub mod vehicle;

pub use forces::{DriverInput, ForceConfig};
pub use integrator::{recheck_deferred, Integrator, IntegratorConfig, StepReport};
pub use vehicle::{Wheel, WheelLayout};
