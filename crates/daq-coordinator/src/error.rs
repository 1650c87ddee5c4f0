//! Coordination error type.
//!
//! Every failure the engine surfaces to a caller is a [`CoordinationError`].
//! Device adapters report errors as `anyhow::Error`; the flyer converts them
//! into [`CoordinationError::HardwareFault`] with the flyer id attached, so a
//! caller always learns *which* participant failed and *what kind* of failure
//! it was without downcasting.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::events::Phase;

/// Failure category, used for reporting and root-cause classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A point or configuration value was rejected before touching hardware.
    Validation,
    /// An operation was called in a state that does not allow it.
    ProtocolViolation,
    /// A device did not become ready or complete within its deadline.
    Timeout,
    /// A device reported a fault or an operation on it failed.
    HardwareFault,
    /// Observed timing fell outside tolerance or drift exceeded its budget.
    TimingViolation,
    /// A flyer was stopped because of cancellation or a peer failure.
    Aborted,
    /// Coordinator configuration is invalid.
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::HardwareFault => "hardware_fault",
            ErrorKind::TimingViolation => "timing_violation",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Configuration => "configuration",
        };
        write!(f, "{}", label)
    }
}

/// Typed error of the coordination engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinationError {
    /// Point rejected by a flyer before any hardware call.
    #[error("Validation failed on '{flyer}': {reason}")]
    Validation {
        /// Flyer that rejected the point.
        flyer: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Operation called in a state that does not allow it. State is unchanged.
    #[error("Protocol violation on '{component}': cannot {operation} while {state}")]
    ProtocolViolation {
        /// Flyer or coordinator name.
        component: String,
        /// Attempted operation.
        operation: &'static str,
        /// State at the time of the call.
        state: String,
    },

    /// Deadline expired.
    #[error("Timeout on '{flyer}' during {phase} after {timeout:?}")]
    Timeout {
        /// Flyer that missed the deadline.
        flyer: String,
        /// Phase the deadline belonged to.
        phase: Phase,
        /// Configured deadline.
        timeout: Duration,
    },

    /// Device error or device-reported fault.
    #[error("Hardware fault on '{flyer}': {message}")]
    HardwareFault {
        /// Flyer whose device failed.
        flyer: String,
        /// Rendered device error chain.
        message: String,
    },

    /// Observed timing out of tolerance.
    #[error("Timing violation on '{flyer}': {message}")]
    TimingViolation {
        /// Flyer whose timing was out of tolerance.
        flyer: String,
        /// Every failed check, joined.
        message: String,
    },

    /// Stopped by cancellation or because another participant failed.
    #[error("'{component}' aborted: {reason}")]
    Aborted {
        /// Flyer or coordinator name.
        component: String,
        /// Abort reason.
        reason: String,
    },

    /// Invalid coordinator configuration.
    #[error("Coordinator configuration error: {0}")]
    Configuration(String),
}

impl CoordinationError {
    /// Failure category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinationError::Validation { .. } => ErrorKind::Validation,
            CoordinationError::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            CoordinationError::Timeout { .. } => ErrorKind::Timeout,
            CoordinationError::HardwareFault { .. } => ErrorKind::HardwareFault,
            CoordinationError::TimingViolation { .. } => ErrorKind::TimingViolation,
            CoordinationError::Aborted { .. } => ErrorKind::Aborted,
            CoordinationError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Flyer (or coordinator) the error originated from, if any.
    pub fn origin(&self) -> Option<&str> {
        match self {
            CoordinationError::Validation { flyer, .. }
            | CoordinationError::Timeout { flyer, .. }
            | CoordinationError::HardwareFault { flyer, .. }
            | CoordinationError::TimingViolation { flyer, .. } => Some(flyer),
            CoordinationError::ProtocolViolation { component, .. }
            | CoordinationError::Aborted { component, .. } => Some(component),
            CoordinationError::Configuration(_) => None,
        }
    }

    /// True for errors caused by someone else's failure or by cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(self, CoordinationError::Aborted { .. })
    }

    /// Wrap a device error as a hardware fault of `flyer`.
    pub fn hardware(flyer: &str, err: &anyhow::Error) -> Self {
        CoordinationError::HardwareFault {
            flyer: flyer.to_string(),
            message: format!("{:#}", err),
        }
    }

    pub(crate) fn violation(
        component: &str,
        operation: &'static str,
        state: impl std::fmt::Display,
    ) -> Self {
        CoordinationError::ProtocolViolation {
            component: component.to_string(),
            operation,
            state: state.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::{DriverError, DriverErrorKind};

    #[test]
    fn test_hardware_keeps_error_chain() {
        let err = anyhow::Error::from(DriverError::new(
            "mock_detector",
            DriverErrorKind::Communication,
            "link dropped",
        ))
        .context("arm failed");
        let coord = CoordinationError::hardware("det1", &err);
        assert_eq!(coord.kind(), ErrorKind::HardwareFault);
        assert_eq!(coord.origin(), Some("det1"));
        let text = coord.to_string();
        assert!(text.contains("arm failed"));
        assert!(text.contains("link dropped"));
    }

    #[test]
    fn test_timeout_display() {
        let err = CoordinationError::Timeout {
            flyer: "det2".into(),
            phase: Phase::Arm,
            timeout: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "Timeout on 'det2' during arm after 2s");
        assert!(!err.is_abort());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ErrorKind::TimingViolation.to_string(), "timing_violation");
        assert_eq!(
            CoordinationError::Configuration("x".into()).kind(),
            ErrorKind::Configuration
        );
    }
}
