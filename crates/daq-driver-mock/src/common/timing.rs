//! Role-specific timing presets for Realistic and Chaos modes.

use std::time::Duration;

use daq_core::DeviceRole;

/// Timing configuration for non-instant modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Time from `arm()` until the device reports ready, in milliseconds
    pub ready_delay_ms: u64,
    /// Link latency added to every command, in milliseconds
    pub communication_delay_ms: u64,
    /// Upper bound of Chaos-mode jitter on each readout gap, in milliseconds
    pub jitter_ms: u64,
}

impl TimingConfig {
    /// Area detector: slow arming, small jitter
    pub fn detector() -> Self {
        Self {
            ready_delay_ms: 20,
            communication_delay_ms: 2,
            jitter_ms: 2,
        }
    }

    /// Trigger/gate generator: fast and tight
    pub fn trigger_box() -> Self {
        Self {
            ready_delay_ms: 5,
            communication_delay_ms: 1,
            jitter_ms: 1,
        }
    }

    /// Motion controller: settles before it can fly
    pub fn motion() -> Self {
        Self {
            ready_delay_ms: 50,
            communication_delay_ms: 5,
            jitter_ms: 1,
        }
    }

    /// Preset for `role`
    pub fn for_role(role: DeviceRole) -> Self {
        match role {
            DeviceRole::Motion => Self::motion(),
            DeviceRole::TriggerBox => Self::trigger_box(),
            DeviceRole::Detector => Self::detector(),
        }
    }

    /// Ready delay as a duration
    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }

    /// Link latency as a duration
    pub fn communication_delay(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }

    /// Jitter bound as a duration
    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let config = TimingConfig::default();
        assert_eq!(config.ready_delay(), Duration::ZERO);
        assert_eq!(config.communication_delay(), Duration::ZERO);
        assert_eq!(config.jitter(), Duration::ZERO);
    }

    #[test]
    fn test_role_presets() {
        assert_eq!(TimingConfig::for_role(DeviceRole::Detector), TimingConfig::detector());
        assert_eq!(TimingConfig::motion().ready_delay_ms, 50);
        assert!(TimingConfig::trigger_box().ready_delay() < TimingConfig::detector().ready_delay());
    }
}
