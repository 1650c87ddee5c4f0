//! Flyer: one hardware participant behind the four-phase protocol.
//!
//! A [`Flyer`] exclusively owns its device handle and its [`TriggerLogic`].
//! The coordinator drives it through `prepare → arm → kickoff → complete`,
//! and calls [`Flyer::abort`] on any failure.
//!
//! Progress events of the current point are recorded in a `watch` channel so
//! that [`Flyer::monitor`] can be called any number of times: every stream
//! replays the point from its first event and ends at the terminal event.

use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use daq_core::{
    DeviceDescription, DeviceRole, DeviceStatus, FlyerDevice, ProgressEvent, ProgressKind,
};

use crate::config::FlyerTimeouts;
use crate::error::CoordinationError;
use crate::events::{EventBus, Outcome, Phase};
use crate::plan::AcquisitionPoint;
use crate::timing::{TimingObservation, TimingReport, TimingVerdict};
use crate::trigger_logic::{TriggerLogic, TriggerState};

/// Progress events recorded for one point.
#[derive(Debug, Clone, Default)]
struct ProgressLog {
    point: Option<usize>,
    events: Vec<ProgressEvent>,
}

enum Cursor {
    Next(ProgressEvent),
    Wait,
    End,
}

enum Drain {
    Finished(Result<(), CoordinationError>),
    TimedOut,
    Cancelled,
}

/// Coordination wrapper around one device.
pub struct Flyer {
    name: String,
    device: Box<dyn FlyerDevice>,
    description: Option<DeviceDescription>,
    logic: TriggerLogic,
    timeouts: FlyerTimeouts,
    point_index: Option<usize>,
    progress: Option<BoxStream<'static, ProgressEvent>>,
    log: watch::Sender<ProgressLog>,
    events: EventBus,
}

impl std::fmt::Debug for Flyer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flyer")
            .field("name", &self.name)
            .field("state", &self.logic.state())
            .field("point_index", &self.point_index)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl Flyer {
    /// Wrap `device` under `name`.
    pub fn new(
        name: impl Into<String>,
        device: Box<dyn FlyerDevice>,
        timeouts: FlyerTimeouts,
        events: EventBus,
    ) -> Self {
        let name = name.into();
        let (log, _) = watch::channel(ProgressLog::default());
        Self {
            logic: TriggerLogic::new(name.clone()),
            name,
            device,
            description: None,
            timeouts,
            point_index: None,
            progress: None,
            log,
            events,
        }
    }

    /// Flyer id.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Trigger logic state.
    pub fn state(&self) -> TriggerState {
        self.logic.state()
    }

    /// Read access to the trigger logic.
    pub fn trigger_logic(&self) -> &TriggerLogic {
        &self.logic
    }

    /// Device description, available after [`Flyer::connect`].
    pub fn description(&self) -> Option<&DeviceDescription> {
        self.description.as_ref()
    }

    /// Device role, `Detector` until connected.
    pub fn role(&self) -> DeviceRole {
        self.description
            .as_ref()
            .map(|d| d.role)
            .unwrap_or_default()
    }

    /// Index of the staged point.
    pub fn point_index(&self) -> Option<usize> {
        self.point_index
    }

    /// Effective deadlines.
    pub fn timeouts(&self) -> FlyerTimeouts {
        self.timeouts
    }

    fn emit(&self, phase: Phase, outcome: Outcome) {
        self.events
            .emit(phase, Some(&self.name), self.point_index, outcome);
    }

    /// Connect the device and cache its description.
    pub async fn connect(&mut self) -> Result<(), CoordinationError> {
        self.emit(Phase::Connect, Outcome::Started);
        if let Err(e) = self.device.connect().await {
            let err = CoordinationError::hardware(&self.name, &e);
            self.emit(Phase::Connect, Outcome::failed(&err));
            return Err(err);
        }
        let description = self.device.describe();
        info!(
            flyer = %self.name,
            model = %description.model,
            role = %description.role,
            "flyer connected"
        );
        self.description = Some(description);
        self.emit(Phase::Connect, Outcome::Succeeded);
        Ok(())
    }

    /// Validate `point` and stage it on the device as point `index`.
    ///
    /// Calling again with the same point while prepared is a no-op. A
    /// rejected point leaves the flyer untouched.
    pub async fn prepare(
        &mut self,
        index: usize,
        point: &AcquisitionPoint,
    ) -> Result<(), CoordinationError> {
        if self.logic.state() == TriggerState::Prepared
            && self.point_index == Some(index)
            && self.logic.point() == Some(point)
        {
            debug!(flyer = %self.name, point = index, "already prepared");
            return Ok(());
        }

        let Some(description) = self.description.clone() else {
            return Err(CoordinationError::violation(
                &self.name,
                "prepare",
                "not connected",
            ));
        };
        if let Err(err) = self.logic.check_prepare(point, &description) {
            self.emit(Phase::Prepare, Outcome::failed(&err));
            return Err(err);
        }

        self.point_index = Some(index);
        self.emit(Phase::Prepare, Outcome::Started);
        if let Err(e) = self.device.set_config(&point.settings()).await {
            let err = CoordinationError::hardware(&self.name, &e);
            self.fail(err.clone()).await;
            return Err(err);
        }
        self.logic.prepare(point, &description)?;
        self.progress = None;
        self.log.send_replace(ProgressLog {
            point: Some(index),
            events: Vec::new(),
        });

        debug!(
            flyer = %self.name,
            point = index,
            exposure_s = point.exposure_s(),
            triggers = point.expected_triggers(),
            "flyer prepared"
        );
        self.emit(Phase::Prepare, Outcome::Succeeded);
        Ok(())
    }

    /// Arm the device and wait until it reports ready.
    pub async fn arm(&mut self) -> Result<(), CoordinationError> {
        self.arm_cancellable(&CancellationToken::new()).await
    }

    /// [`Flyer::arm`] that gives up, aborting the flyer, when `cancel` fires.
    pub async fn arm_cancellable(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(), CoordinationError> {
        self.logic.expect_state(TriggerState::Prepared, "arm")?;
        self.emit(Phase::Arm, Outcome::Started);

        let deadline = self.timeouts.arm;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoordinationError::Aborted {
                component: self.name.clone(),
                reason: "arm cancelled".to_string(),
            }),
            ready = timeout(
                deadline,
                arm_until_ready(&self.name, self.device.as_ref(), self.timeouts.poll_interval),
            ) => match ready {
                Ok(result) => result,
                Err(_) => Err(CoordinationError::Timeout {
                    flyer: self.name.clone(),
                    phase: Phase::Arm,
                    timeout: deadline,
                }),
            },
        };

        match result {
            Ok(()) => {
                self.logic.arm()?;
                debug!(flyer = %self.name, "flyer armed");
                self.emit(Phase::Arm, Outcome::Succeeded);
                Ok(())
            }
            Err(err) => {
                self.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    /// Release the trigger sequence. Returns without waiting for it.
    pub async fn kickoff(&mut self) -> Result<(), CoordinationError> {
        self.logic.expect_state(TriggerState::Armed, "kickoff")?;
        self.emit(Phase::Kickoff, Outcome::Started);

        // Subscribe before triggering so no event is missed.
        let progress = self.device.stream_progress();
        // Fire time is when the trigger is issued, before link latency.
        let issued_at = Instant::now();
        if let Err(e) = self.device.issue_trigger().await {
            let err = CoordinationError::hardware(&self.name, &e);
            self.fail(err.clone()).await;
            return Err(err);
        }
        let latency = self.logic.kickoff_at(issued_at)?;
        self.progress = Some(progress);

        debug!(flyer = %self.name, arm_to_fire = ?latency, "flyer kicked off");
        self.emit(Phase::Kickoff, Outcome::Succeeded);
        Ok(())
    }

    /// Progress events of the current point, from its first event.
    ///
    /// The stream ends after `Complete` or a fault, or when another point is
    /// prepared. It is independent of the flyer borrow and can be polled from
    /// another task while the coordinator waits on [`Flyer::complete`].
    pub fn monitor(&self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let rx = self.log.subscribe();
        let point = self.log.borrow().point;
        stream::unfold((rx, 0usize, false), move |(mut rx, next, done)| async move {
            if done {
                return None;
            }
            loop {
                let cursor = {
                    let log = rx.borrow_and_update();
                    if log.point != point {
                        Cursor::End
                    } else if let Some(event) = log.events.get(next) {
                        Cursor::Next(event.clone())
                    } else {
                        Cursor::Wait
                    }
                };
                match cursor {
                    Cursor::Next(event) => {
                        let terminal = event.is_terminal();
                        return Some((event, (rx, next + 1, terminal)));
                    }
                    Cursor::Wait => {
                        if rx.changed().await.is_err() {
                            return None;
                        }
                    }
                    Cursor::End => return None,
                }
            }
        })
    }

    /// Wait for the trigger sequence to finish and report its timing.
    ///
    /// On deadline the flyer is aborted and a `Faulted` report is returned.
    pub async fn complete(&mut self) -> TimingReport {
        self.complete_cancellable(&CancellationToken::new()).await
    }

    /// [`Flyer::complete`] that aborts the flyer when `cancel` fires.
    pub async fn complete_cancellable(&mut self, cancel: &CancellationToken) -> TimingReport {
        match self.logic.state() {
            TriggerState::Firing => {}
            TriggerState::Complete | TriggerState::Faulted => return self.report(),
            state => {
                let mut report = self.report();
                report.error = Some(CoordinationError::violation(&self.name, "complete", state));
                return report;
            }
        }

        self.emit(Phase::Complete, Outcome::Started);
        let deadline = self.timeouts.complete;
        let Some(mut progress) = self.progress.take() else {
            let err = CoordinationError::HardwareFault {
                flyer: self.name.clone(),
                message: "no progress stream after kickoff".to_string(),
            };
            self.fail(err).await;
            return self.report();
        };

        let drained = tokio::select! {
            biased;
            _ = cancel.cancelled() => Drain::Cancelled,
            result = timeout(
                deadline,
                drain_progress(&self.name, &mut progress, &mut self.logic, &self.log),
            ) => match result {
                Ok(result) => Drain::Finished(result),
                Err(_) => Drain::TimedOut,
            },
        };

        match drained {
            Drain::Finished(Ok(())) => {
                info!(
                    flyer = %self.name,
                    point = ?self.point_index,
                    fired = self.logic.fired_count(),
                    elapsed = ?self.logic.elapsed(),
                    "flyer complete"
                );
                self.emit(Phase::Complete, Outcome::Succeeded);
            }
            Drain::Finished(Err(err)) => self.fail(err).await,
            Drain::TimedOut => {
                let err = CoordinationError::Timeout {
                    flyer: self.name.clone(),
                    phase: Phase::Complete,
                    timeout: deadline,
                };
                self.fail(err).await;
            }
            Drain::Cancelled => {
                let err = CoordinationError::Aborted {
                    component: self.name.clone(),
                    reason: "completion cancelled".to_string(),
                };
                self.fail(err).await;
            }
        }
        self.report()
    }

    /// Stop the device and fault the trigger logic. Never fails.
    pub async fn abort(&mut self) {
        info!(flyer = %self.name, state = %self.logic.state(), "aborting flyer");
        let err = CoordinationError::Aborted {
            component: self.name.clone(),
            reason: "abort requested".to_string(),
        };
        self.fail(err).await;
    }

    async fn fail(&mut self, err: CoordinationError) {
        // Stop gets the arm deadline; a device that never answers is
        // still faulted.
        match timeout(self.timeouts.arm, self.device.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(flyer = %self.name, error = %format!("{:#}", e), "device stop failed during abort");
            }
            Err(_) => {
                warn!(flyer = %self.name, timeout = ?self.timeouts.arm, "device stop timed out during abort");
            }
        }
        self.progress = None;
        self.logic.fault(err.clone());
        let marker = err.to_string();
        self.log.send_modify(|log| {
            if !log.events.last().is_some_and(ProgressEvent::is_terminal) {
                log.events
                    .push(ProgressEvent::now(ProgressKind::Fault { message: marker }));
            }
        });
        self.emit(Phase::Abort, Outcome::failed(&err));
    }

    /// Snapshot report of the current point.
    pub fn report(&self) -> TimingReport {
        let observed = TimingObservation::from_events(&self.log.borrow().events);
        let info = self.logic.trigger_info();
        TimingReport {
            flyer: self.name.clone(),
            point_index: self.point_index,
            state: self.logic.state(),
            fired_count: self.logic.fired_count(),
            expected_triggers: self.logic.expected_triggers(),
            elapsed: self.logic.elapsed(),
            arm_to_fire: self.logic.arm_to_fire(),
            expected_livetime: info.map(|i| i.livetime).unwrap_or(0.0),
            expected_deadtime: info.map(|i| i.deadtime).unwrap_or(0.0),
            observed,
            livetime_window: None,
            deadtime_window: None,
            cumulative_drift: 0.0,
            verdict: TimingVerdict::Unchecked,
            error: self.logic.last_error().cloned(),
        }
    }
}

async fn arm_until_ready(
    name: &str,
    device: &dyn FlyerDevice,
    poll_interval: Duration,
) -> Result<(), CoordinationError> {
    device
        .arm()
        .await
        .map_err(|e| CoordinationError::hardware(name, &e))?;
    loop {
        match device.read_status().await {
            Ok(DeviceStatus::Ready) => return Ok(()),
            Ok(DeviceStatus::Fault(message)) => {
                return Err(CoordinationError::HardwareFault {
                    flyer: name.to_string(),
                    message,
                })
            }
            Ok(_) => sleep(poll_interval).await,
            Err(e) => return Err(CoordinationError::hardware(name, &e)),
        }
    }
}

async fn drain_progress(
    name: &str,
    progress: &mut BoxStream<'static, ProgressEvent>,
    logic: &mut TriggerLogic,
    log: &watch::Sender<ProgressLog>,
) -> Result<(), CoordinationError> {
    while let Some(event) = progress.next().await {
        let kind = event.kind.clone();
        log.send_modify(|log| log.events.push(event));
        match kind {
            ProgressKind::Trigger { .. } => {
                logic.record_trigger()?;
            }
            ProgressKind::FrameCaptured { .. } => {}
            ProgressKind::Complete => {
                return logic.complete().map_err(|_| CoordinationError::HardwareFault {
                    flyer: name.to_string(),
                    message: format!(
                        "device completed after {} of {} triggers",
                        logic.fired_count(),
                        logic.expected_triggers()
                    ),
                });
            }
            ProgressKind::Fault { message } => {
                return Err(CoordinationError::HardwareFault {
                    flyer: name.to_string(),
                    message,
                })
            }
        }
    }
    Err(CoordinationError::HardwareFault {
        flyer: name.to_string(),
        message: "progress stream ended before completion".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use daq_driver_mock::{ErrorConfig, ErrorScenario, MockFlyerDevice};
    use tracing_test::traced_test;

    fn flyer(device: &MockFlyerDevice) -> Flyer {
        Flyer::new(
            device.id().to_string(),
            Box::new(device.clone()),
            FlyerTimeouts::default(),
            EventBus::default(),
        )
    }

    async fn armed(device: &MockFlyerDevice, point: &AcquisitionPoint) -> Flyer {
        let mut flyer = flyer(device);
        flyer.connect().await.unwrap();
        flyer.prepare(0, point).await.unwrap();
        flyer.arm().await.unwrap();
        flyer
    }

    #[tokio::test(start_paused = true)]
    async fn test_four_phase_protocol() {
        let device = MockFlyerDevice::builder("det").readout_overhead(0.01).build();
        let point = AcquisitionPoint::new(0.1, 3);
        let mut flyer = armed(&device, &point).await;
        assert_eq!(flyer.state(), TriggerState::Armed);

        flyer.kickoff().await.unwrap();
        assert_eq!(flyer.state(), TriggerState::Firing);

        let report = flyer.complete().await;
        assert_eq!(report.state, TriggerState::Complete);
        assert_eq!(report.fired_count, 3);
        assert_eq!(report.expected_triggers, 3);
        let elapsed = report.elapsed.unwrap().as_secs_f64();
        assert!((elapsed - 0.33).abs() < 1e-3, "elapsed {elapsed}");
        assert!((report.observed_livetime().unwrap() - 0.1).abs() < 1e-3);
        assert!((report.observed_deadtime().unwrap() - 0.01).abs() < 1e-3);
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent_for_same_point() {
        let device = MockFlyerDevice::builder("det").build();
        let mut flyer = flyer(&device);
        flyer.connect().await.unwrap();
        let point = AcquisitionPoint::new(0.01, 1);
        flyer.prepare(4, &point).await.unwrap();
        flyer.prepare(4, &point).await.unwrap();
        assert_eq!(device.config_calls(), 1);
        assert_eq!(flyer.point_index(), Some(4));
    }

    #[tokio::test]
    async fn test_prepare_rejects_exposure_below_minimum() {
        let device = MockFlyerDevice::builder("det").min_exposure(0.05).build();
        let mut flyer = flyer(&device);
        flyer.connect().await.unwrap();
        let err = flyer
            .prepare(0, &AcquisitionPoint::new(0.01, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(flyer.state(), TriggerState::Idle);
        assert_eq!(device.config_calls(), 0, "device untouched");
    }

    #[tokio::test]
    async fn test_kickoff_before_arm_is_protocol_violation() {
        let device = MockFlyerDevice::builder("det").build();
        let mut flyer = flyer(&device);
        flyer.connect().await.unwrap();
        let err = flyer.kickoff().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(flyer.state(), TriggerState::Idle);
        assert_eq!(device.trigger_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_timeout_faults_flyer() {
        let device = MockFlyerDevice::builder("det").never_ready().build();
        let mut flyer = flyer(&device);
        flyer.connect().await.unwrap();
        flyer.prepare(0, &AcquisitionPoint::new(0.01, 1)).await.unwrap();

        let start = tokio::time::Instant::now();
        let err = flyer.arm().await.unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Timeout {
                phase: Phase::Arm,
                ..
            }
        ));
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(flyer.state(), TriggerState::Faulted);
        assert_eq!(device.stop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_deadline_returns_faulted_report() {
        let device = MockFlyerDevice::builder("det").stall_after_frames(1).build();
        let mut flyer = armed(&device, &AcquisitionPoint::new(0.01, 3)).await;
        flyer.kickoff().await.unwrap();

        let report = flyer.complete().await;
        assert_eq!(report.state, TriggerState::Faulted);
        assert_eq!(report.fired_count, 1);
        assert!(matches!(
            report.error,
            Some(CoordinationError::Timeout {
                phase: Phase::Complete,
                ..
            })
        ));
        assert_eq!(device.stop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_fault_is_hardware_fault() {
        let device = MockFlyerDevice::builder("det").fault_after_frames(2).build();
        let mut flyer = armed(&device, &AcquisitionPoint::new(0.01, 4)).await;
        flyer.kickoff().await.unwrap();

        let report = flyer.complete().await;
        assert_eq!(report.state, TriggerState::Faulted);
        assert_eq!(
            report.error.as_ref().map(CoordinationError::kind),
            Some(ErrorKind::HardwareFault)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_replays_and_ends() {
        let device = MockFlyerDevice::builder("det").build();
        let mut flyer = armed(&device, &AcquisitionPoint::new(0.01, 2)).await;
        let live = flyer.monitor();
        flyer.kickoff().await.unwrap();

        let (report, live_events) = tokio::join!(flyer.complete(), live.collect::<Vec<_>>());
        assert_eq!(report.state, TriggerState::Complete);
        assert_eq!(live_events.len(), 5);
        assert!(live_events.last().unwrap().is_terminal());

        // Restartable: a second stream replays the whole point.
        let replay: Vec<_> = flyer.monitor().collect().await;
        assert_eq!(replay, live_events);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_ends_monitor() {
        let device = MockFlyerDevice::builder("det").build();
        let mut flyer = armed(&device, &AcquisitionPoint::new(1.0, 10)).await;
        flyer.kickoff().await.unwrap();
        let monitor = flyer.monitor();
        flyer.abort().await;

        let events: Vec<_> = monitor.collect().await;
        assert!(matches!(
            events.last().map(|e| &e.kind),
            Some(ProgressKind::Fault { .. })
        ));
        assert_eq!(flyer.state(), TriggerState::Faulted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_deadline_covers_unresponsive_arm() {
        let device = MockFlyerDevice::builder("det")
            .error_config(ErrorConfig::scenario(ErrorScenario::Hang { operation: "arm" }))
            .build();
        let mut flyer = flyer(&device);
        flyer.connect().await.unwrap();
        flyer.prepare(0, &AcquisitionPoint::new(0.01, 1)).await.unwrap();

        let start = tokio::time::Instant::now();
        let err = tokio::time::timeout(Duration::from_secs(60), flyer.arm())
            .await
            .expect("arm must honor its deadline")
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Timeout {
                phase: Phase::Arm,
                ..
            }
        ));
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
        assert_eq!(flyer.state(), TriggerState::Faulted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_cancel_covers_unresponsive_arm() {
        let device = MockFlyerDevice::builder("det")
            .error_config(ErrorConfig::scenario(ErrorScenario::Hang { operation: "arm" }))
            .build();
        let mut flyer = flyer(&device);
        flyer.connect().await.unwrap();
        flyer.prepare(0, &AcquisitionPoint::new(0.01, 1)).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = flyer.arm_cancellable(&cancel).await.unwrap_err();
        assert!(err.is_abort());
        assert_eq!(flyer.state(), TriggerState::Faulted);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_abort_bounds_unresponsive_stop() {
        let device = MockFlyerDevice::builder("det")
            .error_config(ErrorConfig::scenario(ErrorScenario::Hang { operation: "stop" }))
            .build();
        let mut flyer = armed(&device, &AcquisitionPoint::new(0.01, 1)).await;

        let start = tokio::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(60), flyer.abort())
            .await
            .expect("abort must not wait on a silent device");
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
        assert_eq!(flyer.state(), TriggerState::Faulted);
        assert_eq!(device.stop_count(), 1);
        assert!(logs_contain("device stop timed out during abort"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_to_fire_excludes_trigger_link_latency() {
        let device = MockFlyerDevice::builder("det")
            .mode(daq_driver_mock::MockMode::Realistic)
            .ready_delay(Duration::ZERO)
            .build();
        let link = daq_driver_mock::TimingConfig::for_role(DeviceRole::Detector)
            .communication_delay();
        assert!(link > Duration::ZERO);
        let mut flyer = armed(&device, &AcquisitionPoint::new(0.01, 1)).await;

        flyer.kickoff().await.unwrap();
        let report = flyer.complete().await;
        assert_eq!(report.state, TriggerState::Complete);
        assert_eq!(report.arm_to_fire, Some(Duration::ZERO));
        assert!(report.elapsed.unwrap() >= link);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_abort_swallows_stop_errors() {
        let device = MockFlyerDevice::builder("det")
            .error_config(ErrorConfig::scenario(ErrorScenario::Timeout {
                operation: "stop",
            }))
            .build();
        let mut flyer = flyer(&device);
        flyer.abort().await;
        flyer.abort().await;

        assert_eq!(flyer.state(), TriggerState::Faulted);
        assert_eq!(device.stop_count(), 2);
        assert!(logs_contain("device stop failed during abort"));
    }
}
