//! Driver and application error types.
//!
//! Two layers of errors live here:
//!
//! - **`DriverError`**: a structured error raised at the device boundary, tagged
//!   with the driver type and a [`DriverErrorKind`]. Simulated devices use it
//!   for error injection so that injected failures look like real ones.
//! - **`DaqError`**: the application-level error for everything that is not a
//!   coordination failure (configuration, I/O, instrument setup).
//!
//! Coordination failures have their own typed error in `daq-coordinator`.
//! Capability traits themselves return `anyhow::Result`, so a `DriverError`
//! travels through them as an `anyhow::Error` and can be recovered with
//! `downcast_ref::<DriverError>()`.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a driver-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Device could not be brought up.
    Initialization,
    /// Device rejected its configuration.
    Configuration,
    /// Link to the device failed.
    Communication,
    /// Device reported an internal fault.
    Hardware,
    /// Device did not answer in time.
    Timeout,
    /// A parameter was out of the device's range.
    InvalidParameter,
    /// Operation not supported by this device.
    Unsupported,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{}", label)
    }
}

/// Structured error raised by a device driver.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver type identifier (e.g. `mock_detector`).
    pub driver_type: String,
    /// Failure category.
    pub kind: DriverErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary application error type.
///
/// # Error Categories
///
/// 1. **Configuration Errors** - `Config`, `Configuration`
///    - Occur during startup, before any device is touched
///    - Recovery: fix the configuration file or environment and restart
///
/// 2. **Hardware Errors** - `Instrument`, `Driver`
///    - Occur while building or connecting devices
///    - Recovery: check hardware connections, then retry
///
/// 3. **I/O Errors** - `Io`
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration source could not be read or parsed.
    ///
    /// Wraps the rendered error of the configuration loader (file syntax,
    /// missing fields, type mismatches).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration parsed but failed semantic validation.
    ///
    /// # Example
    ///
    /// ```rust
    /// use daq_core::error::DaqError;
    ///
    /// fn validate_exposure(exposure_s: f64) -> Result<(), DaqError> {
    ///     if exposure_s <= 0.0 {
    ///         return Err(DaqError::Configuration(
    ///             "exposure_s must be positive".into()
    ///         ));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Instrument could not be created or connected.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Structured driver error with category
    #[error("{0}")]
    Driver(#[from] DriverError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Instrument("trigger box offline".to_string());
        assert_eq!(err.to_string(), "Instrument error: trigger box offline");
    }

    #[test]
    fn test_driver_error_display() {
        let err = DaqError::Driver(DriverError::new(
            "mock_detector",
            DriverErrorKind::Timeout,
            "arm did not complete",
        ));
        assert!(err
            .to_string()
            .contains("Driver 'mock_detector' timeout error"));
    }

    #[test]
    fn test_driver_error_survives_anyhow() {
        let err: anyhow::Error =
            DriverError::new("mock_box", DriverErrorKind::Hardware, "fault 7").into();
        let driver = err.downcast_ref::<DriverError>().map(|e| e.kind);
        assert_eq!(driver, Some(DriverErrorKind::Hardware));
    }
}
