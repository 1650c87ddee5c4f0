//! Mock Flyer Devices for rust-daq coordination
//!
//! Simulated hardware participants for testing the coordination engine and
//! dry-running scans without physical hardware. All delays use
//! `tokio::time`, never `std::thread::sleep`, so a paused test clock makes
//! every measured livetime and deadtime exact.
//!
//! # Available Mocks
//!
//! - [`MockFlyerDevice`] - detector, trigger box or motion controller,
//!   selected by [`DeviceRole`](daq_core::DeviceRole)
//!
//! # Fault Injection
//!
//! - `never_ready()` - arming never completes
//! - `fault_after_frames(n)` / `stall_after_frames(n)` - sequence breaks off
//! - [`ErrorConfig`] - command failures by scenario or seeded random rate
//!
//! ```rust,ignore
//! use daq_driver_mock::{MockFlyerDevice, MockMode};
//! use daq_core::DeviceRole;
//!
//! let panda = MockFlyerDevice::builder("panda")
//!     .role(DeviceRole::TriggerBox)
//!     .readout_overhead(0.0005)
//!     .mode(MockMode::Realistic)
//!     .build();
//! ```

pub mod common;
mod mock_flyer;

pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};
pub use mock_flyer::{MockFlyerBuilder, MockFlyerConfig, MockFlyerDevice};
