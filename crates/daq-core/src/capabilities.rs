//! Atomic Device Capabilities
//!
//! This module defines the fine-grained capability traits a device adapter
//! implements to take part in a coordinated acquisition. The coordination
//! engine depends only on these traits, never on a concrete device type:
//!
//! - [`Connectable`]: open the link to the hardware
//! - [`Preparable`]: stage per-point configuration
//! - [`Armable`]: arm and report readiness
//! - [`Triggerable`]: start (and stop) the trigger sequence
//! - [`ProgressSource`]: stream timestamped progress markers
//! - [`Describable`]: static facts (role, exposure limits, readout overhead)
//!
//! [`FlyerDevice`] bundles all of them and is blanket-implemented, so any type
//! implementing the six capabilities can be handed to a flyer as
//! `Box<dyn FlyerDevice>`.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! struct TriggerBox { armed: AtomicBool, /* ... */ }
//!
//! #[async_trait]
//! impl Triggerable for TriggerBox {
//!     async fn issue_trigger(&self) -> Result<()> {
//!         if !self.armed.load(Ordering::SeqCst) {
//!             anyhow::bail!("TriggerBox: not armed");
//!         }
//!         // Start the gate sequence on the hardware and return immediately.
//!         Ok(())
//!     }
//! }
//! ```

use crate::progress::{AcquisitionSettings, DeviceDescription, DeviceStatus, ProgressEvent};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Capability: Connection
///
/// Devices that must open a link before use (serial, EPICS channel, socket).
///
/// # Contract
/// - Called once per session before any other operation
/// - Calling again on a connected device must be harmless
#[async_trait]
pub trait Connectable: Send + Sync {
    /// Open the link to the device.
    async fn connect(&self) -> Result<()>;
}

/// Capability: Per-Point Configuration
///
/// # Contract
/// - `set_config` stages settings for the next trigger sequence
/// - Staging does not arm or start acquisition
/// - Returns Err if the device rejects a value
#[async_trait]
pub trait Preparable: Send + Sync {
    /// Stage configuration for the next acquisition point.
    async fn set_config(&self, settings: &AcquisitionSettings) -> Result<()>;
}

/// Capability: Arming
///
/// # Contract
/// - `arm()` requests the device to enter its armed state and may return
///   before the hardware is ready
/// - Readiness is observed by polling `read_status()` until `Ready`
#[async_trait]
pub trait Armable: Send + Sync {
    /// Request the device to arm.
    async fn arm(&self) -> Result<()>;

    /// Report current device status.
    async fn read_status(&self) -> Result<DeviceStatus>;
}

/// Capability: Trigger Sequence
///
/// # Contract
/// - `issue_trigger()` starts the staged trigger sequence and returns
///   immediately; progress is reported through [`ProgressSource`]
/// - Calling `issue_trigger()` on an unarmed device returns Err
/// - `stop()` halts a running sequence; it may be called in any state
#[async_trait]
pub trait Triggerable: Send + Sync {
    /// Start the trigger sequence (non-blocking).
    async fn issue_trigger(&self) -> Result<()>;

    /// Stop any running sequence immediately.
    ///
    /// # Default Implementation
    /// Returns an error indicating stop is not supported.
    async fn stop(&self) -> Result<()> {
        anyhow::bail!("Stop not supported by this device")
    }
}

/// Capability: Progress Reporting
///
/// # Contract
/// - Each call returns a fresh stream that receives events emitted after
///   the call; callers subscribe before `issue_trigger()`
/// - A point's sequence ends with exactly one terminal event
///   (`Complete` or `Fault`)
pub trait ProgressSource: Send + Sync {
    /// Subscribe to progress events.
    fn stream_progress(&self) -> BoxStream<'static, ProgressEvent>;
}

/// Capability: Self Description
pub trait Describable: Send + Sync {
    /// Static device facts.
    fn describe(&self) -> DeviceDescription;
}

/// Full capability set required of a flyer's device.
pub trait FlyerDevice:
    Connectable + Preparable + Armable + Triggerable + ProgressSource + Describable
{
}

impl<T> FlyerDevice for T where
    T: Connectable + Preparable + Armable + Triggerable + ProgressSource + Describable
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{DeviceRole, ProgressKind};
    use futures::StreamExt;

    struct NullDevice;

    #[async_trait]
    impl Connectable for NullDevice {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Preparable for NullDevice {
        async fn set_config(&self, _settings: &AcquisitionSettings) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Armable for NullDevice {
        async fn arm(&self) -> Result<()> {
            Ok(())
        }

        async fn read_status(&self) -> Result<DeviceStatus> {
            Ok(DeviceStatus::Ready)
        }
    }

    #[async_trait]
    impl Triggerable for NullDevice {
        async fn issue_trigger(&self) -> Result<()> {
            Ok(())
        }
    }

    impl ProgressSource for NullDevice {
        fn stream_progress(&self) -> BoxStream<'static, ProgressEvent> {
            futures::stream::iter(vec![ProgressEvent::now(ProgressKind::Complete)]).boxed()
        }
    }

    impl Describable for NullDevice {
        fn describe(&self) -> DeviceDescription {
            DeviceDescription {
                model: "null".into(),
                role: DeviceRole::Detector,
                min_exposure_s: 0.0,
                readout_overhead_s: 0.0,
            }
        }
    }

    #[tokio::test]
    async fn test_blanket_flyer_device() {
        let device: Box<dyn FlyerDevice> = Box::new(NullDevice);
        device.connect().await.unwrap();
        assert!(device.read_status().await.unwrap().is_ready());
        assert!(device.stop().await.is_err(), "default stop is unsupported");

        let events: Vec<_> = device.stream_progress().collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }
}
