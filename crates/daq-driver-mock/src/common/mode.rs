//! Operational modes for mock flyers.
//!
//! - **Instant**: no link latency, no jitter, ready as soon as armed unless a
//!   ready delay is configured. Timing is exact under a paused clock.
//! - **Realistic**: role-specific link latency and ready delay from
//!   [`TimingConfig`](super::TimingConfig)
//! - **Chaos**: Realistic plus seeded jitter on every readout gap

use serde::{Deserialize, Serialize};

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests and dry runs
    Realistic,
    /// Hardware-like timing with jitter - for tolerance testing
    Chaos,
}

impl MockMode {
    /// Whether link latency and default ready delays apply.
    pub fn simulates_latency(&self) -> bool {
        !matches!(self, MockMode::Instant)
    }

    /// Whether readout gaps get random jitter.
    pub fn injects_jitter(&self) -> bool {
        matches!(self, MockMode::Chaos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
    }

    #[test]
    fn test_mode_behaviour() {
        assert!(!MockMode::Instant.simulates_latency());
        assert!(MockMode::Realistic.simulates_latency());
        assert!(!MockMode::Realistic.injects_jitter());
        assert!(MockMode::Chaos.simulates_latency());
        assert!(MockMode::Chaos.injects_jitter());
    }
}
