//! Common infrastructure for mock flyers.
//!
//! - **mode**: Operational modes (Instant, Realistic, Chaos)
//! - **timing**: Role-specific timing presets
//! - **errors**: Error injection framework
//! - **rng**: Seeded random number generator

pub mod errors;
pub mod mode;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;
