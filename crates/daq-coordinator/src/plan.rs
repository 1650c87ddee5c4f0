//! Acquisition points.
//!
//! An [`AcquisitionPoint`] is one position in a scan: where the axes go, how
//! long each exposure is, and how many triggers every flyer must fire there.
//! Points are built once and never modified afterwards.

use serde::{Deserialize, Serialize};

use daq_core::AcquisitionSettings;

/// Target value for one scanned axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisTarget {
    /// Axis name.
    pub axis: String,
    /// Target position.
    pub value: f64,
}

/// One point of a scan plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionPoint {
    axis_targets: Vec<AxisTarget>,
    exposure_s: f64,
    expected_triggers: u32,
}

impl AcquisitionPoint {
    /// Point without axis targets.
    pub fn new(exposure_s: f64, expected_triggers: u32) -> Self {
        Self {
            axis_targets: Vec::new(),
            exposure_s,
            expected_triggers,
        }
    }

    /// Add an axis target.
    #[must_use]
    pub fn with_target(mut self, axis: impl Into<String>, value: f64) -> Self {
        self.axis_targets.push(AxisTarget {
            axis: axis.into(),
            value,
        });
        self
    }

    /// Ordered axis targets.
    pub fn axis_targets(&self) -> &[AxisTarget] {
        &self.axis_targets
    }

    /// Exposure per trigger in seconds.
    pub fn exposure_s(&self) -> f64 {
        self.exposure_s
    }

    /// Triggers every flyer must fire.
    pub fn expected_triggers(&self) -> u32 {
        self.expected_triggers
    }

    /// Device-facing settings for this point.
    pub fn settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            exposure_s: self.exposure_s,
            num_triggers: self.expected_triggers,
            axis_targets: self
                .axis_targets
                .iter()
                .map(|t| (t.axis.clone(), t.value))
                .collect(),
        }
    }
}

/// Evenly spaced points along one axis, endpoints included.
///
/// A single point sits at `start`.
pub fn linear_points(
    axis: &str,
    start: f64,
    stop: f64,
    num_points: usize,
    exposure_s: f64,
    triggers_per_point: u32,
) -> Vec<AcquisitionPoint> {
    let step = if num_points > 1 {
        (stop - start) / (num_points - 1) as f64
    } else {
        0.0
    };
    (0..num_points)
        .map(|i| {
            AcquisitionPoint::new(exposure_s, triggers_per_point)
                .with_target(axis, start + step * i as f64)
        })
        .collect()
}
