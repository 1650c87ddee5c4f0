//! Fly-scan configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `FLYSCAN_`, nested keys separated
//!    by a double underscore
//!
//! # Example
//! ```no_run
//! use flyscan::config::FlyscanConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FlyscanConfig::load("config/flyscan.toml")?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```
//!
//! Environment override: `FLYSCAN_APPLICATION__LOG_LEVEL=debug`.

use std::collections::HashSet;
use std::path::Path;

use daq_coordinator::CoordinatorConfig;
use daq_core::DaqError;
use daq_driver_mock::MockFlyerConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::logging::OutputFormat;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FLYSCAN_";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FlyscanConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Coordination engine settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Flyer definitions, in insertion order
    pub devices: Vec<DeviceDefinition>,
    /// Scan plan
    pub scan: ScanConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// One simulated flyer.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDefinition {
    /// Unique flyer identifier
    pub id: String,
    /// Whether this device takes part in the scan
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Device parameters (role, exposure limits, fault knobs)
    #[serde(flatten)]
    pub mock: MockFlyerConfig,
}

/// Linear fly scan along one axis.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Scanned axis name
    #[serde(default = "default_axis")]
    pub axis: String,
    /// First axis position
    pub start: f64,
    /// Last axis position
    pub stop: f64,
    /// Number of acquisition points
    pub num_points: usize,
    /// Exposure per trigger in seconds
    pub exposure_s: f64,
    /// Triggers fired per point
    #[serde(default = "default_triggers")]
    pub triggers_per_point: u32,
}

fn default_name() -> String {
    "flyscan".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_axis() -> String {
    "x".to_string()
}

fn default_triggers() -> u32 {
    1
}

impl FlyscanConfig {
    /// Load `path` merged with `FLYSCAN_` environment variables, then validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DaqError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DaqError::Config(format!(
                "configuration file '{}' not found",
                path.display()
            )));
        }
        let config = Self::figment(Figment::new().merge(Toml::file(path)))
            .extract::<Self>()
            .map_err(|e| DaqError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text without environment overrides or validation.
    pub fn from_toml_str(toml: &str) -> Result<Self, DaqError> {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| DaqError::Config(e.to_string()))
    }

    fn figment(base: Figment) -> Figment {
        base.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), DaqError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.coordinator
            .validate()
            .map_err(|e| DaqError::Configuration(e.to_string()))?;

        let mut ids = HashSet::new();
        for device in &self.devices {
            if !ids.insert(device.id.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate device ID: {}",
                    device.id
                )));
            }
        }

        let enabled: HashSet<&str> = self.enabled_devices().map(|d| d.id.as_str()).collect();
        if enabled.is_empty() {
            return Err(DaqError::Configuration(
                "at least one device must be enabled".to_string(),
            ));
        }
        for id in &self.coordinator.kickoff_priority {
            if !enabled.contains(id.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "kickoff_priority names '{id}', which is not an enabled device"
                )));
            }
        }

        let scan = &self.scan;
        if scan.num_points == 0 {
            return Err(DaqError::Configuration(
                "scan.num_points must be at least 1".to_string(),
            ));
        }
        if !scan.exposure_s.is_finite() || scan.exposure_s <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "scan.exposure_s must be positive, got {}",
                scan.exposure_s
            )));
        }
        if scan.triggers_per_point == 0 {
            return Err(DaqError::Configuration(
                "scan.triggers_per_point must be at least 1".to_string(),
            ));
        }
        if !scan.start.is_finite() || !scan.stop.is_finite() {
            return Err(DaqError::Configuration(
                "scan.start and scan.stop must be finite".to_string(),
            ));
        }

        Ok(())
    }

    /// Devices taking part in the scan, in file order.
    pub fn enabled_devices(&self) -> impl Iterator<Item = &DeviceDefinition> {
        self.devices.iter().filter(|d| d.enabled)
    }
}
