//! Timing reports and validation.
//!
//! A flyer records every progress event of a point. From those timestamps:
//!
//! - livetime of trigger *i* is `FrameCaptured(i) - Trigger(i)`
//! - deadtime of trigger *i* is the gap from `FrameCaptured(i)` to the next
//!   event (`Trigger(i + 1)` or `Complete`)
//!
//! The observed value for a point is the mean over all triggers. The
//! [`TimingValidator`] compares it with the expected value (exposure for
//! livetime, device readout overhead for deadtime) and also accumulates
//! signed deadtime drift per flyer across points, so a slow drift is caught
//! even when every single point is inside tolerance.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use daq_core::{ProgressEvent, ProgressKind};

use crate::config::{CoordinatorConfig, Tolerance};
use crate::error::CoordinationError;
use crate::trigger_logic::TriggerState;

/// Livetime and deadtime measured from one point's progress events.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingObservation {
    /// Frames captured.
    pub frames: u32,
    /// Mean livetime in seconds.
    pub livetime: Option<f64>,
    /// Mean deadtime in seconds.
    pub deadtime: Option<f64>,
}

impl TimingObservation {
    /// Measure `events`, which must be in emission order.
    pub fn from_events(events: &[ProgressEvent]) -> Self {
        let mut livetimes = Vec::new();
        let mut deadtimes = Vec::new();
        let mut frames = 0;

        for (pos, event) in events.iter().enumerate() {
            let ProgressKind::FrameCaptured { index } = event.kind else {
                continue;
            };
            frames += 1;

            let trigger = events[..pos]
                .iter()
                .rev()
                .find(|e| matches!(e.kind, ProgressKind::Trigger { index: i } if i == index));
            if let Some(trigger) = trigger {
                livetimes.push(seconds_between(trigger, event));
            }

            let next = events[pos + 1..].iter().find(|e| {
                matches!(
                    e.kind,
                    ProgressKind::Trigger { .. } | ProgressKind::Complete
                )
            });
            if let Some(next) = next {
                deadtimes.push(seconds_between(event, next));
            }
        }

        Self {
            frames,
            livetime: mean(&livetimes),
            deadtime: mean(&deadtimes),
        }
    }
}

fn seconds_between(earlier: &ProgressEvent, later: &ProgressEvent) -> f64 {
    later.at.saturating_duration_since(earlier.at).as_secs_f64()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Outcome of timing validation for one report.
#[derive(Debug, Clone, PartialEq)]
pub enum TimingVerdict {
    /// Not validated (flyer did not complete).
    Unchecked,
    /// Every check passed.
    WithinTolerance,
    /// At least one check failed.
    Violated {
        /// One entry per failed check.
        reasons: Vec<String>,
    },
}

/// Per-flyer outcome of one acquisition point.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingReport {
    /// Flyer name.
    pub flyer: String,
    /// Point index within the session.
    pub point_index: Option<usize>,
    /// Trigger logic state when the report was taken.
    pub state: TriggerState,
    /// Triggers fired.
    pub fired_count: u32,
    /// Triggers expected.
    pub expected_triggers: u32,
    /// Kickoff to completion.
    pub elapsed: Option<Duration>,
    /// Ready to kickoff.
    pub arm_to_fire: Option<Duration>,
    /// Expected livetime (exposure), seconds.
    pub expected_livetime: f64,
    /// Expected deadtime (readout overhead), seconds.
    pub expected_deadtime: f64,
    /// Measured values.
    pub observed: TimingObservation,
    /// Livetime window used by validation.
    pub livetime_window: Option<(f64, f64)>,
    /// Deadtime window used by validation.
    pub deadtime_window: Option<(f64, f64)>,
    /// Cumulative signed deadtime drift of this flyer after this point.
    pub cumulative_drift: f64,
    /// Validation outcome.
    pub verdict: TimingVerdict,
    /// Error that faulted the flyer, if any.
    pub error: Option<CoordinationError>,
}

impl TimingReport {
    /// Mean observed livetime.
    pub fn observed_livetime(&self) -> Option<f64> {
        self.observed.livetime
    }

    /// Mean observed deadtime.
    pub fn observed_deadtime(&self) -> Option<f64> {
        self.observed.deadtime
    }

    /// Complete and within tolerance.
    pub fn is_success(&self) -> bool {
        self.state == TriggerState::Complete
            && self.verdict == TimingVerdict::WithinTolerance
            && self.error.is_none()
    }
}

/// Cross-flyer warnings for one point. Never fails a point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyCheck {
    /// Human-readable warnings.
    pub warnings: Vec<String>,
}

impl ConsistencyCheck {
    /// No warnings.
    pub fn is_consistent(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Checks observed timing against tolerance and tracks drift per flyer.
#[derive(Debug, Clone)]
pub struct TimingValidator {
    livetime_tolerance: Tolerance,
    deadtime_tolerance: Tolerance,
    drift_budget: f64,
    mismatch_ratio: f64,
    drift: HashMap<String, f64>,
}

impl TimingValidator {
    /// Validator using the tolerances of `config`.
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            livetime_tolerance: config.livetime_tolerance,
            deadtime_tolerance: config.deadtime_tolerance,
            drift_budget: config.drift_budget,
            mismatch_ratio: config.elapsed_mismatch_ratio,
            drift: HashMap::new(),
        }
    }

    /// Validate a completed flyer's report, filling windows, drift and verdict.
    ///
    /// Reports of flyers that did not complete are left `Unchecked`.
    pub fn validate(&mut self, report: &mut TimingReport) -> Result<(), CoordinationError> {
        if report.state != TriggerState::Complete {
            return Ok(());
        }

        let mut reasons = Vec::new();

        let live_window = self.livetime_tolerance.window(report.expected_livetime);
        report.livetime_window = Some(live_window);
        match report.observed.livetime {
            Some(observed)
                if self
                    .livetime_tolerance
                    .contains(report.expected_livetime, observed) => {}
            Some(observed) => reasons.push(format!(
                "livetime {:.6}s outside [{:.6}, {:.6}]",
                observed, live_window.0, live_window.1
            )),
            None => reasons.push("no livetime could be measured".to_string()),
        }

        let dead_window = self.deadtime_tolerance.window(report.expected_deadtime);
        report.deadtime_window = Some(dead_window);
        match report.observed.deadtime {
            Some(observed) => {
                if !self
                    .deadtime_tolerance
                    .contains(report.expected_deadtime, observed)
                {
                    reasons.push(format!(
                        "deadtime {:.6}s outside [{:.6}, {:.6}]",
                        observed, dead_window.0, dead_window.1
                    ));
                }
                let drift = self.drift.entry(report.flyer.clone()).or_insert(0.0);
                *drift += observed - report.expected_deadtime;
                report.cumulative_drift = *drift;
                if drift.abs() > self.drift_budget {
                    reasons.push(format!(
                        "cumulative deadtime drift {:.6}s exceeds budget {:.6}s",
                        drift, self.drift_budget
                    ));
                }
            }
            None => reasons.push("no deadtime could be measured".to_string()),
        }

        debug!(
            flyer = %report.flyer,
            point = ?report.point_index,
            livetime = ?report.observed.livetime,
            deadtime = ?report.observed.deadtime,
            drift = report.cumulative_drift,
            "timing validated"
        );

        if reasons.is_empty() {
            report.verdict = TimingVerdict::WithinTolerance;
            Ok(())
        } else {
            let message = reasons.join("; ");
            report.verdict = TimingVerdict::Violated { reasons };
            Err(CoordinationError::TimingViolation {
                flyer: report.flyer.clone(),
                message,
            })
        }
    }

    /// Cumulative signed deadtime drift recorded for `flyer`.
    pub fn cumulative_drift(&self, flyer: &str) -> f64 {
        self.drift.get(flyer).copied().unwrap_or(0.0)
    }

    /// Forget accumulated drift, e.g. at the start of a new scan.
    pub fn reset_drift(&mut self) {
        self.drift.clear();
    }

    /// Compare deadtime and elapsed time across the flyers of one point.
    pub fn check_consistency(&self, reports: &[TimingReport]) -> ConsistencyCheck {
        let mut warnings = Vec::new();

        let deadtimes: Vec<f64> = reports.iter().filter_map(|r| r.observed.deadtime).collect();
        if let Some(ratio) = spread(&deadtimes) {
            if ratio > self.mismatch_ratio {
                warnings.push(format!(
                    "observed deadtime differs across flyers by a factor of {:.3}",
                    ratio
                ));
            }
        }

        let elapsed: Vec<f64> = reports
            .iter()
            .filter_map(|r| r.elapsed.map(|d| d.as_secs_f64()))
            .collect();
        if let Some(ratio) = spread(&elapsed) {
            if ratio > self.mismatch_ratio {
                warnings.push(format!(
                    "acquisition time differs across flyers by a factor of {:.3}",
                    ratio
                ));
            }
        }

        for warning in &warnings {
            warn!(%warning, "timing inconsistency across flyers");
        }
        ConsistencyCheck { warnings }
    }
}

// max/min over positive values; None when fewer than two are comparable.
fn spread(values: &[f64]) -> Option<f64> {
    let positive: Vec<f64> = values.iter().copied().filter(|v| *v > 0.0).collect();
    if positive.len() < 2 {
        return None;
    }
    let max = positive.iter().copied().fold(f64::MIN, f64::max);
    let min = positive.iter().copied().fold(f64::MAX, f64::min);
    Some(max / min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn events(spec: &[(u64, ProgressKind)]) -> Vec<ProgressEvent> {
        let origin = Instant::now();
        spec.iter()
            .map(|(ms, kind)| ProgressEvent {
                at: origin + Duration::from_millis(*ms),
                kind: kind.clone(),
            })
            .collect()
    }

    fn report(flyer: &str, livetime: f64, deadtime: f64) -> TimingReport {
        TimingReport {
            flyer: flyer.into(),
            point_index: Some(0),
            state: TriggerState::Complete,
            fired_count: 1,
            expected_triggers: 1,
            elapsed: Some(Duration::from_secs_f64(livetime + deadtime)),
            arm_to_fire: None,
            expected_livetime: 0.1,
            expected_deadtime: 0.01,
            observed: TimingObservation {
                frames: 1,
                livetime: Some(livetime),
                deadtime: Some(deadtime),
            },
            livetime_window: None,
            deadtime_window: None,
            cumulative_drift: 0.0,
            verdict: TimingVerdict::Unchecked,
            error: None,
        }
    }

    #[test]
    fn test_observation_means() {
        use ProgressKind::*;
        let obs = TimingObservation::from_events(&events(&[
            (0, Trigger { index: 0 }),
            (100, FrameCaptured { index: 0 }),
            (110, Trigger { index: 1 }),
            (210, FrameCaptured { index: 1 }),
            (230, Complete),
        ]));
        assert_eq!(obs.frames, 2);
        assert!((obs.livetime.unwrap() - 0.1).abs() < 1e-9);
        assert!((obs.deadtime.unwrap() - 0.015).abs() < 1e-9);
    }

    #[test]
    fn test_observation_without_pairs() {
        let obs = TimingObservation::from_events(&events(&[(0, ProgressKind::Complete)]));
        assert_eq!(obs, TimingObservation::default());
    }

    #[test]
    fn test_validate_within_tolerance() {
        let mut validator = TimingValidator::new(&CoordinatorConfig::default());
        let mut r = report("det", 0.105, 0.012);
        validator.validate(&mut r).unwrap();
        assert_eq!(r.verdict, TimingVerdict::WithinTolerance);
        let (low, high) = r.livetime_window.unwrap();
        assert!((low - 0.09).abs() < 1e-12 && (high - 0.11).abs() < 1e-12);
        assert!((r.cumulative_drift - 0.002).abs() < 1e-12);
        assert!(r.is_success());
    }

    #[test]
    fn test_validate_livetime_violation() {
        let mut validator = TimingValidator::new(&CoordinatorConfig::default());
        let mut r = report("det", 0.2, 0.01);
        let err = validator.validate(&mut r).unwrap_err();
        assert!(matches!(err, CoordinationError::TimingViolation { .. }));
        assert!(matches!(r.verdict, TimingVerdict::Violated { ref reasons } if reasons.len() == 1));
    }

    #[test]
    fn test_drift_budget_catches_slow_drift() {
        let config = CoordinatorConfig::default()
            .with_deadtime_tolerance(Tolerance::Absolute(0.01))
            .with_drift_budget(0.015);
        let mut validator = TimingValidator::new(&config);

        // Each point 6 ms late: inside the 10 ms tolerance, drift 6, 12, 18 ms.
        let mut outcomes = Vec::new();
        for _ in 0..3 {
            let mut r = report("det", 0.1, 0.016);
            outcomes.push(validator.validate(&mut r).is_ok());
        }
        assert_eq!(outcomes, vec![true, true, false]);
        assert!((validator.cumulative_drift("det") - 0.018).abs() < 1e-9);

        validator.reset_drift();
        assert_eq!(validator.cumulative_drift("det"), 0.0);
    }

    #[test]
    fn test_faulted_report_is_unchecked() {
        let mut validator = TimingValidator::new(&CoordinatorConfig::default());
        let mut r = report("det", 0.5, 0.5);
        r.state = TriggerState::Faulted;
        validator.validate(&mut r).unwrap();
        assert_eq!(r.verdict, TimingVerdict::Unchecked);
        assert!(!r.is_success());
    }

    #[test]
    fn test_consistency_warnings() {
        let validator = TimingValidator::new(&CoordinatorConfig::default());
        let same = [report("a", 0.1, 0.01), report("b", 0.1, 0.0105)];
        assert!(validator.check_consistency(&same).is_consistent());

        let skewed = [report("a", 0.1, 0.01), report("b", 0.1, 0.03)];
        let check = validator.check_consistency(&skewed);
        assert!(!check.is_consistent());
        assert!(check.warnings[0].contains("deadtime"));
    }
}
