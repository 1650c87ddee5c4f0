//! Printable scan outcome.

use std::fmt;

use daq_coordinator::{ErrorKind, PointResult, ScanResult, TimingVerdict, TriggerState};
use serde::Serialize;

/// Outcome of one flyer at one point.
#[derive(Debug, Clone, Serialize)]
pub struct FlyerSummary {
    /// Flyer id
    pub flyer: String,
    /// Final trigger logic state
    pub state: TriggerState,
    /// Triggers observed
    pub fired: u32,
    /// Mean observed livetime in seconds
    pub livetime_s: Option<f64>,
    /// Mean observed deadtime in seconds
    pub deadtime_s: Option<f64>,
    /// Cumulative deadtime drift in seconds
    pub drift_s: f64,
    /// Whether the timing was checked and passed
    pub within_tolerance: bool,
}

/// Outcome of one point.
#[derive(Debug, Clone, Serialize)]
pub struct PointSummary {
    /// Point index
    pub point: usize,
    /// Every flyer complete and within tolerance
    pub success: bool,
    /// Root cause category of a failed point
    pub error_kind: Option<ErrorKind>,
    /// Root cause message of a failed point
    pub error: Option<String>,
    /// Per-flyer outcome
    pub flyers: Vec<FlyerSummary>,
    /// Cross-flyer consistency warnings
    pub warnings: Vec<String>,
}

/// Outcome of a whole scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    /// Every executed point succeeded
    pub success: bool,
    /// Points executed
    pub points_run: usize,
    /// Points planned
    pub points_planned: usize,
    /// Per-point outcome
    pub points: Vec<PointSummary>,
}

impl PointSummary {
    fn from_result(result: &PointResult) -> Self {
        let mut flyers: Vec<FlyerSummary> = result
            .reports
            .iter()
            .map(|report| FlyerSummary {
                flyer: report.flyer.clone(),
                state: report.state,
                fired: report.fired_count,
                livetime_s: report.observed_livetime(),
                deadtime_s: report.observed_deadtime(),
                drift_s: report.cumulative_drift,
                within_tolerance: report.verdict == TimingVerdict::WithinTolerance,
            })
            .collect();

        // Failed before completion: states only.
        if let Some(failure) = &result.failure {
            for snapshot in &failure.flyer_states {
                if !flyers.iter().any(|f| f.flyer == snapshot.name) {
                    flyers.push(FlyerSummary {
                        flyer: snapshot.name.clone(),
                        state: snapshot.state,
                        fired: 0,
                        livetime_s: None,
                        deadtime_s: None,
                        drift_s: 0.0,
                        within_tolerance: false,
                    });
                }
            }
        }

        Self {
            point: result.point_index,
            success: result.success,
            error_kind: result.failure.as_ref().map(|f| f.kind()),
            error: result.root_cause().map(ToString::to_string),
            flyers,
            warnings: result.warnings.clone(),
        }
    }
}

impl ScanSummary {
    /// Summarize `scan` out of `planned` points.
    pub fn new(scan: &ScanResult, planned: usize) -> Self {
        Self {
            success: scan.success() && scan.points.len() == planned,
            points_run: scan.points.len(),
            points_planned: planned,
            points: scan.points.iter().map(PointSummary::from_result).collect(),
        }
    }
}

fn seconds(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.6}", v))
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for point in &self.points {
            let status = if point.success { "ok" } else { "FAILED" };
            writeln!(f, "point {:>4}  {}", point.point, status)?;
            for flyer in &point.flyers {
                writeln!(
                    f,
                    "    {:<12} {:<9} fired={:<4} livetime={} deadtime={} drift={:+.6}",
                    flyer.flyer,
                    flyer.state.to_string(),
                    flyer.fired,
                    seconds(flyer.livetime_s),
                    seconds(flyer.deadtime_s),
                    flyer.drift_s
                )?;
            }
            if let (Some(kind), Some(error)) = (&point.error_kind, &point.error) {
                writeln!(f, "    root cause [{}]: {}", kind, error)?;
            }
            for warning in &point.warnings {
                writeln!(f, "    warning: {}", warning)?;
            }
        }
        write!(
            f,
            "{} of {} points run, scan {}",
            self.points_run,
            self.points_planned,
            if self.success { "succeeded" } else { "failed" }
        )
    }
}
