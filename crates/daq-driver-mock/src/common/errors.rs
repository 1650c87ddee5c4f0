//! Error injection for mock flyers.
//!
//! Every device command checks its operation name against an [`ErrorConfig`]
//! before doing anything. Operation names used by
//! [`MockFlyerDevice`](crate::MockFlyerDevice) are `connect`, `set_config`,
//! `arm`, `read_status`, `trigger` and `stop`. Injected failures are
//! [`DriverError`]s, the same type a real driver raises.

use std::collections::HashMap;
use std::sync::Arc;

use daq_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;

use super::rng::MockRng;

/// Error injection configuration for mock devices
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0); `"*"` applies to all
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

/// Deterministic failure scenario.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// `operation` succeeds `count` times, then fails every time
    FailAfterN {
        /// Operation name
        operation: &'static str,
        /// Successful calls before failing
        count: u32,
    },
    /// `operation` always fails with a timeout error
    Timeout {
        /// Operation name
        operation: &'static str,
    },
    /// `operation` never returns
    Hang {
        /// Operation name
        operation: &'static str,
    },
    /// The first command of any kind loses the link; every later one fails
    CommunicationLoss,
    /// The first command latches a hardware fault code; every later one fails
    HardwareFault {
        /// Fault code reported in the message
        code: u32,
    },
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
    hardware_fault_code: Option<u32>,
}

impl ErrorConfig {
    fn build(
        failure_rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(failure_rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Create error config with no errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation, seeded for reproducibility
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self::build(HashMap::from([("*", rate)]), Vec::new(), seed)
    }

    /// Create error config with a single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Create error config with multiple scenarios
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Per-operation failure rates
    pub fn with_rates(rates: HashMap<&'static str, f64>) -> Self {
        Self::build(rates, Vec::new(), None)
    }

    /// Whether `operation` is configured to never return
    pub fn hangs(&self, operation: &str) -> bool {
        self.scenarios
            .iter()
            .any(|s| matches!(s, ErrorScenario::Hang { operation: op } if *op == operation))
    }

    /// Check if an operation should fail and return appropriate error
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: &'static str,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Communication,
                format!("Communication lost during '{}'", operation),
            ));
        }
        if let Some(code) = state.hardware_fault_code {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Hardware fault: {}", code),
            ));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let calls = state.operation_counts.entry(operation).or_insert(0);
                    *calls += 1;
                    if *calls > *count {
                        return Err(DriverError::new(
                            driver_type,
                            DriverErrorKind::Hardware,
                            format!("Injected '{}' failure after {} calls", operation, count),
                        ));
                    }
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Timeout,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Communication,
                        format!("Communication lost during '{}'", operation),
                    ));
                }
                ErrorScenario::HardwareFault { code } => {
                    state.hardware_fault_code = Some(*code);
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Hardware fault: {}", code),
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Reset error state (clear counters, faults)
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_errors() {
        let config = ErrorConfig::none();
        for op in ["connect", "set_config", "arm", "trigger", "stop"] {
            assert!(config.check_operation("mock_detector", op).is_ok());
        }
    }

    #[test]
    fn test_random_failures_are_reproducible() {
        let run = || {
            let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
            (0..200)
                .map(|_| config.check_operation("mock_detector", "arm").is_err())
                .collect::<Vec<_>>()
        };
        let first = run();
        assert_eq!(first, run());
        let failures = first.iter().filter(|f| **f).count();
        assert!(failures > 60 && failures < 140, "Got {} failures", failures);
    }

    #[test]
    fn test_fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "trigger",
            count: 3,
        });
        for i in 0..3 {
            assert!(
                config.check_operation("mock_box", "trigger").is_ok(),
                "trigger {} should succeed",
                i + 1
            );
        }
        assert!(config.check_operation("mock_box", "trigger").is_err());
        assert!(config.check_operation("mock_box", "arm").is_ok());

        config.reset();
        assert!(config.check_operation("mock_box", "trigger").is_ok());
    }

    #[test]
    fn test_timeout_scenario() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout { operation: "arm" });
        let err = config.check_operation("mock_detector", "arm").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
        assert!(err.message.contains("timed out"));
        assert!(config.check_operation("mock_detector", "stop").is_ok());
    }

    #[test]
    fn test_hang_scenario_only_marks_its_operation() {
        let config = ErrorConfig::scenario(ErrorScenario::Hang { operation: "stop" });
        assert!(config.hangs("stop"));
        assert!(!config.hangs("arm"));
        assert!(config.check_operation("mock_detector", "stop").is_ok());
    }

    #[test]
    fn test_communication_loss_latches() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);
        let err = config.check_operation("mock_detector", "connect").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Communication);
        assert!(config.check_operation("mock_detector", "stop").is_err());
    }

    #[test]
    fn test_hardware_fault_code() {
        let config = ErrorConfig::scenario(ErrorScenario::HardwareFault { code: 0x42 });
        let err = config.check_operation("mock_detector", "arm").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
        assert!(err.message.contains("66"));
    }

    #[test]
    fn test_custom_rates() {
        let config = ErrorConfig::with_rates(HashMap::from([("stop", 1.0), ("arm", 0.0)]));
        for _ in 0..10 {
            assert!(config.check_operation("mock_detector", "stop").is_err());
            assert!(config.check_operation("mock_detector", "arm").is_ok());
        }
    }
}
