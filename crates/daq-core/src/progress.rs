//! Data exchanged between the coordination engine and a device.
//!
//! - [`AcquisitionSettings`]: what a device is staged with for one point
//! - [`DeviceStatus`]: polled readiness state
//! - [`ProgressEvent`]: timestamped markers a device emits while firing
//! - [`DeviceDescription`]: static facts used for validation and ordering
//!
//! Timestamps use `tokio::time::Instant` so that simulated devices and the
//! timing validator share one clock, including the paused clock in tests.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Device configuration for one acquisition point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Exposure (livetime) per trigger, in seconds.
    pub exposure_s: f64,
    /// Number of triggers the device must fire for this point.
    pub num_triggers: u32,
    /// Ordered axis targets of the point, `(axis, value)`.
    #[serde(default)]
    pub axis_targets: Vec<(String, f64)>,
}

impl AcquisitionSettings {
    /// Settings with no axis targets.
    pub fn new(exposure_s: f64, num_triggers: u32) -> Self {
        Self {
            exposure_s,
            num_triggers,
            axis_targets: Vec::new(),
        }
    }
}

/// Readiness reported by [`crate::Armable::read_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// Not armed.
    Idle,
    /// Arm requested, hardware not ready yet.
    Arming,
    /// Armed and ready to accept a trigger.
    Ready,
    /// Trigger sequence running.
    Acquiring,
    /// Device-reported fault.
    Fault(String),
}

impl DeviceStatus {
    /// True when the device will accept a trigger.
    pub fn is_ready(&self) -> bool {
        matches!(self, DeviceStatus::Ready)
    }
}

/// Role a device plays in a synchronized acquisition.
///
/// The default kickoff policy releases trigger sources before the devices
/// that depend on them: motion first, then trigger boxes, then detectors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// Motion controller driving the scanned axis.
    Motion,
    /// Trigger/gate generator (e.g. a PandA box).
    TriggerBox,
    /// Passive detector waiting on external triggers.
    #[default]
    Detector,
}

impl DeviceRole {
    /// Position in the default kickoff policy; lower goes first.
    pub fn kickoff_rank(&self) -> u8 {
        match self {
            DeviceRole::Motion => 0,
            DeviceRole::TriggerBox => 1,
            DeviceRole::Detector => 2,
        }
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRole::Motion => write!(f, "motion"),
            DeviceRole::TriggerBox => write!(f, "trigger_box"),
            DeviceRole::Detector => write!(f, "detector"),
        }
    }
}

/// Static device facts returned by [`crate::Describable::describe`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescription {
    /// Model or driver name.
    pub model: String,
    /// Role in the acquisition.
    pub role: DeviceRole,
    /// Shortest exposure the device accepts, in seconds.
    pub min_exposure_s: f64,
    /// Readout/overhead time between exposures, in seconds.
    /// This is the expected deadtime per trigger.
    pub readout_overhead_s: f64,
}

/// Kind of a progress marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressKind {
    /// Trigger `index` fired; exposure started.
    Trigger {
        /// Zero-based trigger index within the point.
        index: u32,
    },
    /// Frame `index` captured; exposure ended.
    FrameCaptured {
        /// Zero-based frame index within the point.
        index: u32,
    },
    /// Device finished its trigger sequence.
    Complete,
    /// Device reported a fault; no further events follow.
    Fault {
        /// Device-provided description.
        message: String,
    },
}

/// Timestamped progress marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// When the device observed the event.
    pub at: Instant,
    /// What happened.
    pub kind: ProgressKind,
}

impl ProgressEvent {
    /// Event stamped with the current time.
    pub fn now(kind: ProgressKind) -> Self {
        Self {
            at: Instant::now(),
            kind,
        }
    }

    /// True for `Complete` and `Fault`, after which a point's stream ends.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ProgressKind::Complete | ProgressKind::Fault { .. })
    }
}
