//! Coordinator configuration.
//!
//! Timeouts, tolerances and the kickoff priority are deployment decisions,
//! so they are plain serde data with defaults. The root application loads
//! them from the `[coordinator]` section of its configuration file.
//!
//! ```toml
//! [coordinator]
//! kickoff_priority = ["panda"]
//! arm_timeout_s = 2.0
//! complete_timeout_s = 10.0
//! livetime_tolerance = { fraction = 0.1 }
//! deadtime_tolerance = { absolute = 0.005 }
//! drift_budget = 0.05
//!
//! [coordinator.flyers.slow_det]
//! arm_timeout_s = 5.0
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;

// Float comparisons on measured timing must not fail on representation noise.
const TOLERANCE_EPSILON: f64 = 1e-9;

/// Allowed deviation of an observed value from its expected value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Tolerance {
    /// Fixed allowance in seconds.
    Absolute(f64),
    /// Allowance as a fraction of the expected value.
    Fraction(f64),
}

impl Tolerance {
    /// Allowed absolute deviation around `expected`.
    pub fn allowance(&self, expected: f64) -> f64 {
        match self {
            Tolerance::Absolute(seconds) => *seconds,
            Tolerance::Fraction(fraction) => fraction * expected.abs(),
        }
    }

    /// Inclusive `(low, high)` window around `expected`.
    pub fn window(&self, expected: f64) -> (f64, f64) {
        let allowance = self.allowance(expected);
        (expected - allowance, expected + allowance)
    }

    /// True when `observed` lies within the window around `expected`.
    pub fn contains(&self, expected: f64, observed: f64) -> bool {
        (observed - expected).abs() <= self.allowance(expected) + TOLERANCE_EPSILON
    }

    fn value(&self) -> f64 {
        match self {
            Tolerance::Absolute(v) | Tolerance::Fraction(v) => *v,
        }
    }
}

/// Per-flyer timeout overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlyerOverrides {
    /// Overrides [`CoordinatorConfig::arm_timeout_s`].
    pub arm_timeout_s: Option<f64>,
    /// Overrides [`CoordinatorConfig::complete_timeout_s`].
    pub complete_timeout_s: Option<f64>,
}

/// Effective deadlines for one flyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlyerTimeouts {
    /// Deadline for `arm()` plus readiness. Also bounds `stop()` on abort.
    pub arm: Duration,
    /// Deadline for the trigger sequence to finish after kickoff.
    pub complete: Duration,
    /// Interval between readiness polls while arming.
    pub poll_interval: Duration,
}

impl Default for FlyerTimeouts {
    fn default() -> Self {
        CoordinatorConfig::default().timeouts_for("")
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Flyer ids kicked off first, in this order. Remaining flyers follow by
    /// role (motion, trigger box, detector) and insertion order.
    pub kickoff_priority: Vec<String>,
    /// Seconds a flyer may take to report ready after `arm()`.
    pub arm_timeout_s: f64,
    /// Seconds a flyer may take to finish its trigger sequence.
    pub complete_timeout_s: f64,
    /// Seconds between readiness polls while arming.
    pub ready_poll_interval_s: f64,
    /// Allowed deviation of observed deadtime from readout overhead.
    pub deadtime_tolerance: Tolerance,
    /// Allowed deviation of observed livetime from exposure.
    pub livetime_tolerance: Tolerance,
    /// Seconds of cumulative signed deadtime drift tolerated per flyer.
    pub drift_budget: f64,
    /// Cross-flyer max/min ratio above which a consistency warning is raised.
    pub elapsed_mismatch_ratio: f64,
    /// Per-flyer overrides keyed by flyer id.
    pub flyers: HashMap<String, FlyerOverrides>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            kickoff_priority: Vec::new(),
            arm_timeout_s: 2.0,
            complete_timeout_s: 10.0,
            ready_poll_interval_s: 0.005,
            deadtime_tolerance: Tolerance::Absolute(0.005),
            livetime_tolerance: Tolerance::Fraction(0.1),
            drift_budget: 0.05,
            elapsed_mismatch_ratio: 1.1,
            flyers: HashMap::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Put `ids` at the front of the kickoff order.
    pub fn with_kickoff_priority<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kickoff_priority = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set the default arm timeout.
    pub fn with_arm_timeout(mut self, seconds: f64) -> Self {
        self.arm_timeout_s = seconds;
        self
    }

    /// Set the default completion timeout.
    pub fn with_complete_timeout(mut self, seconds: f64) -> Self {
        self.complete_timeout_s = seconds;
        self
    }

    /// Set the livetime tolerance.
    pub fn with_livetime_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.livetime_tolerance = tolerance;
        self
    }

    /// Set the deadtime tolerance.
    pub fn with_deadtime_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.deadtime_tolerance = tolerance;
        self
    }

    /// Set the cumulative drift budget.
    pub fn with_drift_budget(mut self, seconds: f64) -> Self {
        self.drift_budget = seconds;
        self
    }

    /// Override timeouts for one flyer.
    pub fn with_flyer_override(mut self, flyer: impl Into<String>, overrides: FlyerOverrides) -> Self {
        self.flyers.insert(flyer.into(), overrides);
        self
    }

    /// Check value ranges. Flyer ids are checked when a session is built.
    pub fn validate(&self) -> Result<(), CoordinationError> {
        positive("arm_timeout_s", self.arm_timeout_s)?;
        positive("complete_timeout_s", self.complete_timeout_s)?;
        positive("ready_poll_interval_s", self.ready_poll_interval_s)?;
        non_negative("drift_budget", self.drift_budget)?;
        non_negative("deadtime_tolerance", self.deadtime_tolerance.value())?;
        non_negative("livetime_tolerance", self.livetime_tolerance.value())?;
        if !self.elapsed_mismatch_ratio.is_finite() || self.elapsed_mismatch_ratio < 1.0 {
            return Err(CoordinationError::Configuration(format!(
                "elapsed_mismatch_ratio must be >= 1.0, got {}",
                self.elapsed_mismatch_ratio
            )));
        }
        for (flyer, overrides) in &self.flyers {
            if let Some(v) = overrides.arm_timeout_s {
                positive(&format!("flyers.{flyer}.arm_timeout_s"), v)?;
            }
            if let Some(v) = overrides.complete_timeout_s {
                positive(&format!("flyers.{flyer}.complete_timeout_s"), v)?;
            }
        }
        Ok(())
    }

    /// Effective deadlines for `flyer`, overrides applied.
    pub fn timeouts_for(&self, flyer: &str) -> FlyerTimeouts {
        let overrides = self.flyers.get(flyer);
        let arm = overrides
            .and_then(|o| o.arm_timeout_s)
            .unwrap_or(self.arm_timeout_s);
        let complete = overrides
            .and_then(|o| o.complete_timeout_s)
            .unwrap_or(self.complete_timeout_s);
        FlyerTimeouts {
            arm: seconds(arm, Duration::from_secs(2)),
            complete: seconds(complete, Duration::from_secs(10)),
            poll_interval: seconds(self.ready_poll_interval_s, Duration::from_millis(5)),
        }
    }
}

fn seconds(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

fn positive(field: &str, value: f64) -> Result<(), CoordinationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CoordinationError::Configuration(format!(
            "{field} must be a positive number of seconds, got {value}"
        )))
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), CoordinationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(CoordinationError::Configuration(format!(
            "{field} must be finite and non-negative, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = CoordinatorConfig::default();
        config.validate().unwrap();
        let timeouts = config.timeouts_for("any");
        assert_eq!(timeouts.arm, Duration::from_secs(2));
        assert_eq!(timeouts.complete, Duration::from_secs(10));
    }

    #[test]
    fn test_flyer_override_applies_to_one_flyer() {
        let config = CoordinatorConfig::default().with_flyer_override(
            "slow",
            FlyerOverrides {
                arm_timeout_s: Some(5.0),
                complete_timeout_s: None,
            },
        );
        assert_eq!(config.timeouts_for("slow").arm, Duration::from_secs(5));
        assert_eq!(config.timeouts_for("slow").complete, Duration::from_secs(10));
        assert_eq!(config.timeouts_for("fast").arm, Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(CoordinatorConfig::default()
            .with_arm_timeout(0.0)
            .validate()
            .is_err());
        assert!(CoordinatorConfig::default()
            .with_complete_timeout(f64::NAN)
            .validate()
            .is_err());
        assert!(CoordinatorConfig::default()
            .with_drift_budget(-0.1)
            .validate()
            .is_err());
        assert!(CoordinatorConfig::default()
            .with_livetime_tolerance(Tolerance::Fraction(-0.5))
            .validate()
            .is_err());
    }

    #[test]
    fn test_tolerance_window() {
        let tol = Tolerance::Fraction(0.1);
        let (low, high) = tol.window(0.1);
        assert!((low - 0.09).abs() < 1e-12);
        assert!((high - 0.11).abs() < 1e-12);
        assert!(tol.contains(0.1, 0.11));
        assert!(!tol.contains(0.1, 0.111));

        let abs = Tolerance::Absolute(0.01);
        assert!(abs.contains(0.0, 0.01));
        assert!(!abs.contains(0.0, 0.02));
    }

    #[test]
    fn test_deserialize_from_toml() {
        let text = r#"
            kickoff_priority = ["panda"]
            arm_timeout_s = 1.5
            livetime_tolerance = { fraction = 0.2 }
            deadtime_tolerance = { absolute = 0.01 }

            [flyers.det1]
            complete_timeout_s = 30.0
        "#;
        let config: CoordinatorConfig = toml::from_str(text).unwrap();
        assert_eq!(config.kickoff_priority, vec!["panda".to_string()]);
        assert_eq!(config.arm_timeout_s, 1.5);
        assert_eq!(config.livetime_tolerance, Tolerance::Fraction(0.2));
        assert_eq!(config.deadtime_tolerance, Tolerance::Absolute(0.01));
        assert_eq!(config.complete_timeout_s, 10.0);
        assert_eq!(
            config.timeouts_for("det1").complete,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_tolerance_rejects_unknown_kind() {
        let text = r#"livetime_tolerance = { percent = 5.0 }"#;
        assert!(toml::from_str::<CoordinatorConfig>(text).is_err());
    }
}
