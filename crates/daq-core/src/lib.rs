//! `daq-core`
//!
//! Core trait definitions and types for flyer devices.
//!
//! This crate provides the device-facing half of the coordination system. It
//! defines the capability traits a hardware adapter implements to take part in
//! a synchronized acquisition, the data types exchanged across that boundary,
//! and the driver-level error types.
//!
//! ## Layers
//!
//! - **Device adapters** (outside this crate): concrete drivers or simulators
//! - **Capabilities**: small async traits ([`Connectable`], [`Preparable`],
//!   [`Armable`], [`Triggerable`], [`ProgressSource`], [`Describable`])
//! - **Coordination** (`daq-coordinator`): drives devices only through
//!   [`FlyerDevice`], never through a concrete type
//!
//! ## Example
//!
//! ```rust,ignore
//! use daq_core::{AcquisitionSettings, FlyerDevice};
//!
//! async fn stage(device: &dyn FlyerDevice) -> anyhow::Result<()> {
//!     device.connect().await?;
//!     device
//!         .set_config(&AcquisitionSettings::new(0.1, 1))
//!         .await?;
//!     device.arm().await?;
//!     Ok(())
//! }
//! ```

pub mod capabilities;
pub mod error;
pub mod progress;

pub use capabilities::{
    Armable, Connectable, Describable, FlyerDevice, Preparable, ProgressSource, Triggerable,
};
pub use error::{AppResult, DaqError, DriverError, DriverErrorKind};
pub use progress::{
    AcquisitionSettings, DeviceDescription, DeviceRole, DeviceStatus, ProgressEvent, ProgressKind,
};

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
