//! `flyscan`
//!
//! Application layer over the trigger coordination engine: layered
//! configuration, tracing setup, construction of simulated flyers from
//! `[[devices]]` definitions and a summary of scan results.
//!
//! The engine itself lives in [`daq_coordinator`]; device traits in
//! [`daq_core`]; simulated hardware in [`daq_driver_mock`].

pub mod config;
pub mod devices;
pub mod logging;
pub mod summary;

pub use config::{ApplicationConfig, DeviceDefinition, FlyscanConfig, ScanConfig};
pub use devices::{
    build_coordinator, build_devices, connect_coordinator, coordinator_builder, scan_points,
};
pub use logging::{OutputFormat, TracingConfig};
pub use summary::{FlyerSummary, PointSummary, ScanSummary};
