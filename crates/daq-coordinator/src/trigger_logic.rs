//! Per-flyer trigger state machine.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ prepare ┌──────────┐ arm ┌───────┐ kickoff ┌────────┐ complete ┌──────────┐
//! │ Idle │────────▶│ Prepared │────▶│ Armed │────────▶│ Firing │─────────▶│ Complete │
//! └──────┘         └──────────┘     └───────┘         └────────┘          └──────────┘
//!     ▲                                                                        │
//!     │ prepare (resets)          any state ── abort / fault ──▶ ┌─────────┐   │
//!     └──────────────────────────────────────────────────────────│ Faulted │◀──┘
//!                                                                └─────────┘
//! ```
//!
//! Transitions are never skipped. An operation called in the wrong state
//! returns [`CoordinationError::ProtocolViolation`] and leaves every field
//! untouched. `prepare` out of `Complete` or `Faulted` first resets to `Idle`.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use daq_core::DeviceDescription;

use crate::error::CoordinationError;
use crate::plan::AcquisitionPoint;

/// Trigger logic state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Nothing staged.
    Idle,
    /// Point validated and staged on the device.
    Prepared,
    /// Device reported ready.
    Armed,
    /// Trigger sequence running.
    Firing,
    /// All expected triggers fired and the device signalled completion.
    Complete,
    /// Aborted or device fault. Absorbing until the next `prepare`.
    Faulted,
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerState::Idle => write!(f, "idle"),
            TriggerState::Prepared => write!(f, "prepared"),
            TriggerState::Armed => write!(f, "armed"),
            TriggerState::Firing => write!(f, "firing"),
            TriggerState::Complete => write!(f, "complete"),
            TriggerState::Faulted => write!(f, "faulted"),
        }
    }
}

/// Expected trigger timing for the staged point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TriggerInfo {
    /// Number of triggers.
    pub num: u32,
    /// Expected livetime per trigger (the exposure), seconds.
    pub livetime: f64,
    /// Expected deadtime per trigger (the readout overhead), seconds.
    pub deadtime: f64,
    /// `num * (livetime + deadtime)`, seconds.
    pub total_time: f64,
}

/// State machine and timing bookkeeping for one flyer.
#[derive(Debug, Clone)]
pub struct TriggerLogic {
    owner: String,
    state: TriggerState,
    point: Option<AcquisitionPoint>,
    info: Option<TriggerInfo>,
    armed_at: Option<Instant>,
    fired_at: Option<Instant>,
    completed_at: Option<Instant>,
    arm_to_fire: Option<Duration>,
    fired_count: u32,
    last_error: Option<CoordinationError>,
}

impl TriggerLogic {
    /// Fresh logic in `Idle` for the flyer named `owner`.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            state: TriggerState::Idle,
            point: None,
            info: None,
            armed_at: None,
            fired_at: None,
            completed_at: None,
            arm_to_fire: None,
            fired_count: 0,
            last_error: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> TriggerState {
        self.state
    }

    /// Staged point.
    pub fn point(&self) -> Option<&AcquisitionPoint> {
        self.point.as_ref()
    }

    /// Expected timing of the staged point.
    pub fn trigger_info(&self) -> Option<TriggerInfo> {
        self.info
    }

    /// Triggers counted since kickoff.
    pub fn fired_count(&self) -> u32 {
        self.fired_count
    }

    /// Triggers the staged point expects, 0 when nothing is staged.
    pub fn expected_triggers(&self) -> u32 {
        self.info.map(|i| i.num).unwrap_or(0)
    }

    /// When the device reported ready.
    pub fn armed_at(&self) -> Option<Instant> {
        self.armed_at
    }

    /// Latency between readiness and kickoff.
    pub fn arm_to_fire(&self) -> Option<Duration> {
        self.arm_to_fire
    }

    /// Kickoff to completion.
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.fired_at, self.completed_at) {
            (Some(fired), Some(done)) => Some(done.saturating_duration_since(fired)),
            _ => None,
        }
    }

    /// Error that moved the logic to `Faulted`.
    pub fn last_error(&self) -> Option<&CoordinationError> {
        self.last_error.as_ref()
    }

    /// Check that `point` can be staged now without changing anything.
    pub fn check_prepare(
        &self,
        point: &AcquisitionPoint,
        device: &DeviceDescription,
    ) -> Result<TriggerInfo, CoordinationError> {
        if matches!(self.state, TriggerState::Armed | TriggerState::Firing) {
            return Err(CoordinationError::violation(&self.owner, "prepare", self.state));
        }

        let exposure = point.exposure_s();
        if !exposure.is_finite() || exposure <= 0.0 {
            return Err(self.invalid(format!("exposure must be positive, got {exposure}s")));
        }
        if exposure < device.min_exposure_s {
            return Err(self.invalid(format!(
                "exposure {exposure}s is below the {} minimum of {}s",
                device.model, device.min_exposure_s
            )));
        }
        if point.expected_triggers() == 0 {
            return Err(self.invalid("expected trigger count must be at least 1".to_string()));
        }

        let num = point.expected_triggers();
        let deadtime = device.readout_overhead_s;
        Ok(TriggerInfo {
            num,
            livetime: exposure,
            deadtime,
            total_time: f64::from(num) * (exposure + deadtime),
        })
    }

    /// Stage `point`: `Idle | Prepared | Complete | Faulted -> Prepared`.
    pub fn prepare(
        &mut self,
        point: &AcquisitionPoint,
        device: &DeviceDescription,
    ) -> Result<(), CoordinationError> {
        let info = self.check_prepare(point, device)?;
        if matches!(self.state, TriggerState::Complete | TriggerState::Faulted) {
            self.reset();
        }
        self.point = Some(point.clone());
        self.info = Some(info);
        self.armed_at = None;
        self.fired_at = None;
        self.completed_at = None;
        self.arm_to_fire = None;
        self.fired_count = 0;
        self.state = TriggerState::Prepared;
        Ok(())
    }

    /// Fail unless in `expected`.
    pub fn expect_state(
        &self,
        expected: TriggerState,
        operation: &'static str,
    ) -> Result<(), CoordinationError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CoordinationError::violation(&self.owner, operation, self.state))
        }
    }

    /// `Prepared -> Armed`, stamping the ready time.
    pub fn arm(&mut self) -> Result<(), CoordinationError> {
        self.expect_state(TriggerState::Prepared, "arm")?;
        self.armed_at = Some(Instant::now());
        self.state = TriggerState::Armed;
        Ok(())
    }

    /// `Armed -> Firing`, returning the arm-to-fire latency.
    pub fn kickoff(&mut self) -> Result<Duration, CoordinationError> {
        self.kickoff_at(Instant::now())
    }

    /// [`TriggerLogic::kickoff`] for a trigger issued at `fired_at`.
    pub fn kickoff_at(&mut self, fired_at: Instant) -> Result<Duration, CoordinationError> {
        self.expect_state(TriggerState::Armed, "kickoff")?;
        let latency = self
            .armed_at
            .map(|armed| fired_at.saturating_duration_since(armed))
            .unwrap_or_default();
        self.fired_at = Some(fired_at);
        self.arm_to_fire = Some(latency);
        self.fired_count = 0;
        self.state = TriggerState::Firing;
        Ok(latency)
    }

    /// Count one fired trigger. Returns the new count.
    ///
    /// A trigger beyond the expected count is a hardware fault and is not
    /// counted.
    pub fn record_trigger(&mut self) -> Result<u32, CoordinationError> {
        self.expect_state(TriggerState::Firing, "record a trigger")?;
        let expected = self.expected_triggers();
        if self.fired_count >= expected {
            return Err(CoordinationError::HardwareFault {
                flyer: self.owner.clone(),
                message: format!(
                    "device fired trigger {} but only {} were expected",
                    self.fired_count + 1,
                    expected
                ),
            });
        }
        self.fired_count += 1;
        Ok(self.fired_count)
    }

    /// `Firing -> Complete`, only once every expected trigger has fired.
    pub fn complete(&mut self) -> Result<(), CoordinationError> {
        self.expect_state(TriggerState::Firing, "complete")?;
        let expected = self.expected_triggers();
        if self.fired_count != expected {
            return Err(CoordinationError::violation(
                &self.owner,
                "complete",
                format!("firing with {} of {} triggers", self.fired_count, expected),
            ));
        }
        self.completed_at = Some(Instant::now());
        self.state = TriggerState::Complete;
        Ok(())
    }

    /// Any state -> `Faulted`. The first error of a point is kept.
    pub fn fault(&mut self, error: CoordinationError) {
        if self.state != TriggerState::Faulted {
            self.last_error = Some(error);
            self.state = TriggerState::Faulted;
        }
    }

    /// Any state -> `Faulted` with an abort reason.
    pub fn abort(&mut self, reason: impl Into<String>) {
        let error = CoordinationError::Aborted {
            component: self.owner.clone(),
            reason: reason.into(),
        };
        self.fault(error);
    }

    fn reset(&mut self) {
        self.state = TriggerState::Idle;
        self.point = None;
        self.info = None;
        self.last_error = None;
    }

    fn invalid(&self, reason: String) -> CoordinationError {
        CoordinationError::Validation {
            flyer: self.owner.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use daq_core::DeviceRole;

    fn device() -> DeviceDescription {
        DeviceDescription {
            model: "test".into(),
            role: DeviceRole::Detector,
            min_exposure_s: 0.001,
            readout_overhead_s: 0.01,
        }
    }

    fn logic_in(state: TriggerState) -> TriggerLogic {
        let mut logic = TriggerLogic::new("det");
        let point = AcquisitionPoint::new(0.1, 2);
        match state {
            TriggerState::Idle => {}
            TriggerState::Prepared => logic.prepare(&point, &device()).unwrap(),
            TriggerState::Armed => {
                logic.prepare(&point, &device()).unwrap();
                logic.arm().unwrap();
            }
            TriggerState::Firing => {
                logic.prepare(&point, &device()).unwrap();
                logic.arm().unwrap();
                logic.kickoff().unwrap();
            }
            TriggerState::Complete => {
                logic.prepare(&point, &device()).unwrap();
                logic.arm().unwrap();
                logic.kickoff().unwrap();
                logic.record_trigger().unwrap();
                logic.record_trigger().unwrap();
                logic.complete().unwrap();
            }
            TriggerState::Faulted => logic.abort("test"),
        }
        assert_eq!(logic.state(), state);
        logic
    }

    const ALL: [TriggerState; 6] = [
        TriggerState::Idle,
        TriggerState::Prepared,
        TriggerState::Armed,
        TriggerState::Firing,
        TriggerState::Complete,
        TriggerState::Faulted,
    ];

    #[test]
    fn test_happy_path() {
        let logic = logic_in(TriggerState::Complete);
        assert_eq!(logic.fired_count(), 2);
        assert!(logic.elapsed().is_some());
        assert!(logic.arm_to_fire().is_some());
        let info = logic.trigger_info().unwrap();
        assert_eq!(info.num, 2);
        assert!((info.total_time - 0.22).abs() < 1e-12);
    }

    #[test]
    fn test_transition_table() {
        for state in ALL {
            let mut logic = logic_in(state);
            let arm = logic.arm();
            assert_eq!(arm.is_ok(), state == TriggerState::Prepared, "arm from {state}");

            let mut logic = logic_in(state);
            let kick = logic.kickoff();
            assert_eq!(kick.is_ok(), state == TriggerState::Armed, "kickoff from {state}");

            let mut logic = logic_in(state);
            let rec = logic.record_trigger();
            assert_eq!(rec.is_ok(), state == TriggerState::Firing, "record from {state}");

            let mut logic = logic_in(state);
            let prep = logic.prepare(&AcquisitionPoint::new(0.1, 1), &device());
            let allowed = !matches!(state, TriggerState::Armed | TriggerState::Firing);
            assert_eq!(prep.is_ok(), allowed, "prepare from {state}");
        }
    }

    #[test]
    fn test_illegal_call_does_not_mutate() {
        for state in ALL {
            let mut logic = logic_in(state);
            let before = (logic.state(), logic.fired_count(), logic.armed_at());
            if state != TriggerState::Armed {
                let err = logic.kickoff().unwrap_err();
                assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
            }
            if state != TriggerState::Prepared {
                assert!(logic.arm().is_err());
            }
            assert_eq!(before, (logic.state(), logic.fired_count(), logic.armed_at()));
        }
    }

    #[test]
    fn test_validation_leaves_state_alone() {
        let mut logic = logic_in(TriggerState::Prepared);
        let err = logic
            .prepare(&AcquisitionPoint::new(0.0001, 1), &device())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(logic.state(), TriggerState::Prepared);
        assert_eq!(logic.expected_triggers(), 2);

        assert!(logic.prepare(&AcquisitionPoint::new(0.1, 0), &device()).is_err());
        assert!(logic
            .prepare(&AcquisitionPoint::new(f64::NAN, 1), &device())
            .is_err());
    }

    #[test]
    fn test_fired_count_never_exceeds_expected() {
        let mut logic = logic_in(TriggerState::Firing);
        logic.record_trigger().unwrap();
        logic.record_trigger().unwrap();
        let err = logic.record_trigger().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HardwareFault);
        assert_eq!(logic.fired_count(), 2);
    }

    #[test]
    fn test_complete_requires_all_triggers() {
        let mut logic = logic_in(TriggerState::Firing);
        logic.record_trigger().unwrap();
        let err = logic.complete().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(logic.state(), TriggerState::Firing);
    }

    #[test]
    fn test_fault_is_absorbing_until_prepare() {
        for state in ALL {
            let mut logic = logic_in(state);
            logic.fault(CoordinationError::HardwareFault {
                flyer: "det".into(),
                message: "first".into(),
            });
            logic.abort("second");
            assert_eq!(logic.state(), TriggerState::Faulted);
            if state != TriggerState::Faulted {
                assert_eq!(
                    logic.last_error().map(CoordinationError::kind),
                    Some(ErrorKind::HardwareFault)
                );
            }
        }

        let mut logic = logic_in(TriggerState::Faulted);
        logic.prepare(&AcquisitionPoint::new(0.1, 1), &device()).unwrap();
        assert_eq!(logic.state(), TriggerState::Prepared);
        assert!(logic.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_to_fire_latency() {
        let mut logic = logic_in(TriggerState::Armed);
        tokio::time::advance(Duration::from_millis(30)).await;
        let latency = logic.kickoff().unwrap();
        assert_eq!(latency, Duration::from_millis(30));
        assert_eq!(logic.arm_to_fire(), Some(latency));
    }

    #[tokio::test(start_paused = true)]
    async fn test_kickoff_at_uses_issue_time() {
        let mut logic = logic_in(TriggerState::Armed);
        let issued = Instant::now() + Duration::from_millis(5);
        tokio::time::advance(Duration::from_millis(30)).await;
        let latency = logic.kickoff_at(issued).unwrap();
        assert_eq!(latency, Duration::from_millis(5));
        assert_eq!(logic.state(), TriggerState::Firing);
    }
}
