//! Coordinator - synchronized phase transitions across flyers.
//!
//! The coordinator owns every flyer of a session and is the only thing that
//! drives them. Each phase fans out to one future per flyer and waits for all
//! of them before the session phase advances:
//!
//! ```text
//! ┌──────┐ prepare_all ┌──────────┐ arm_all ┌───────┐ kickoff_all ┌───────────┐ await_completion ┌───────────┐
//! │ Idle │────────────▶│ Prepared │────────▶│ Armed │────────────▶│ Acquiring │─────────────────▶│ Completed │
//! └──────┘             └──────────┘         └───────┘             └───────────┘                  └───────────┘
//!    ▲                                                                                                 │
//!    └──────── abort_all (via Aborting) from any phase; prepare_all starts the next point ◀────────────┘
//! ```
//!
//! Any failure in a phase aborts every flyer and returns the first root
//! cause. `run_point` wraps the four phases and turns the outcome into a
//! [`PointResult`].
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut coordinator = Coordinator::builder("fly")
//!     .config(CoordinatorConfig::default().with_kickoff_priority(["panda"]))
//!     .add_flyer("panda", panda)
//!     .add_flyer("det", detector)
//!     .connect()
//!     .await?;
//!
//! let mut events = coordinator.subscribe();
//! let result = coordinator.run_point(&AcquisitionPoint::new(0.1, 10)).await;
//! assert!(result.success);
//! ```

use std::future::Future;

use futures::future::join_all;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use daq_core::{FlyerDevice, ProgressEvent};

use crate::config::CoordinatorConfig;
use crate::error::CoordinationError;
use crate::events::{CoordinationEvent, EventBus, Outcome, Phase, DEFAULT_EVENT_CAPACITY};
use crate::flyer::Flyer;
use crate::plan::AcquisitionPoint;
use crate::session::{CoordinationSession, FlyerSnapshot, PointResult, ScanResult, SessionPhase};
use crate::timing::{TimingReport, TimingValidator};
use crate::trigger_logic::TriggerState;

/// Collects flyers and configuration, then connects them into a [`Coordinator`].
pub struct CoordinatorBuilder {
    name: String,
    config: CoordinatorConfig,
    flyers: Vec<(String, Box<dyn FlyerDevice>)>,
    event_capacity: usize,
}

impl CoordinatorBuilder {
    /// Empty builder with default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CoordinatorConfig::default(),
            flyers: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Use `config`.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Capacity of the coordination event channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Add a flyer. Insertion order is kept.
    pub fn add_flyer<D>(self, name: impl Into<String>, device: D) -> Self
    where
        D: FlyerDevice + 'static,
    {
        self.add_boxed_flyer(name, Box::new(device))
    }

    /// Add an already boxed device.
    pub fn add_boxed_flyer(mut self, name: impl Into<String>, device: Box<dyn FlyerDevice>) -> Self {
        self.flyers.push((name.into(), device));
        self
    }

    /// Remove a flyer by id.
    pub fn remove_flyer(mut self, name: &str) -> Self {
        let before = self.flyers.len();
        self.flyers.retain(|(id, _)| id != name);
        if self.flyers.len() == before {
            warn!(coordinator = %self.name, flyer = name, "remove_flyer: no such flyer");
        }
        self
    }

    /// Ids added so far.
    pub fn flyer_names(&self) -> Vec<&str> {
        self.flyers.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Validate, connect every device concurrently and build the session.
    pub async fn connect(self) -> Result<Coordinator, CoordinationError> {
        let CoordinatorBuilder {
            name,
            config,
            flyers,
            event_capacity,
        } = self;

        config.validate()?;
        if flyers.is_empty() {
            return Err(CoordinationError::Configuration(format!(
                "coordinator '{name}' has no flyers"
            )));
        }
        for (pos, (id, _)) in flyers.iter().enumerate() {
            if flyers[..pos].iter().any(|(other, _)| other == id) {
                return Err(CoordinationError::Configuration(format!(
                    "duplicate flyer id '{id}'"
                )));
            }
        }
        for id in &config.kickoff_priority {
            if !flyers.iter().any(|(other, _)| other == id) {
                return Err(CoordinationError::Configuration(format!(
                    "kickoff_priority names unknown flyer '{id}'"
                )));
            }
        }
        for id in config.flyers.keys() {
            if !flyers.iter().any(|(other, _)| other == id) {
                warn!(coordinator = %name, flyer = %id, "timeout override for unknown flyer ignored");
            }
        }

        let events = EventBus::new(event_capacity);
        let mut flyers: Vec<Flyer> = flyers
            .into_iter()
            .map(|(id, device)| {
                let timeouts = config.timeouts_for(&id);
                Flyer::new(id, device, timeouts, events.clone())
            })
            .collect();

        let results = join_all(flyers.iter_mut().map(|flyer| flyer.connect())).await;
        if let Some(err) = results.into_iter().find_map(Result::err) {
            error!(coordinator = %name, error = %err, "flyer connection failed");
            return Err(err);
        }

        let order = kickoff_order(&flyers, &config.kickoff_priority);
        let session = CoordinationSession::new(flyers, order)?;
        let validator = TimingValidator::new(&config);

        let coordinator = Coordinator {
            name,
            config,
            session,
            validator,
            events,
            warnings: Vec::new(),
        };
        info!(
            coordinator = %coordinator.name,
            flyers = coordinator.session.flyers().len(),
            kickoff_order = ?coordinator.kickoff_order(),
            "coordinator connected"
        );
        Ok(coordinator)
    }
}

/// Flyer positions in kickoff order: priority ids first in listed order, then
/// the rest by role rank, insertion order on ties.
fn kickoff_order(flyers: &[Flyer], priority: &[String]) -> Vec<usize> {
    let mut order: Vec<(usize, (u8, usize))> = flyers
        .iter()
        .enumerate()
        .map(|(pos, flyer)| {
            let key = match priority.iter().position(|id| id == flyer.name()) {
                Some(rank) => (0, rank),
                None => (1, usize::from(flyer.role().kickoff_rank())),
            };
            (pos, key)
        })
        .collect();
    order.sort_by_key(|(_, key)| *key);
    order.into_iter().map(|(pos, _)| pos).collect()
}

struct Failure {
    at: Instant,
    position: usize,
    error: CoordinationError,
}

/// Earliest non-abort failure; insertion order breaks ties.
fn root_cause(mut failures: Vec<Failure>) -> Option<CoordinationError> {
    failures.sort_by_key(|f| (f.error.is_abort(), f.at, f.position));
    failures.into_iter().next().map(|f| f.error)
}

async fn until_cancelled<T, F>(cancel: &CancellationToken, phase: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = phase => Some(output),
    }
}

/// Owns one session's flyers and drives them through each point.
pub struct Coordinator {
    name: String,
    config: CoordinatorConfig,
    session: CoordinationSession,
    validator: TimingValidator,
    events: EventBus,
    warnings: Vec<String>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("name", &self.name)
            .field("phase", &self.session.phase())
            .field("flyers", &self.session.flyers())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Start building a coordinator.
    pub fn builder(name: impl Into<String>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(name)
    }

    /// Coordinator name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reported session phase.
    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    /// Read access to the session.
    pub fn session(&self) -> &CoordinationSession {
        &self.session
    }

    /// Active configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Read access to the validator (drift accounting).
    pub fn validator(&self) -> &TimingValidator {
        &self.validator
    }

    /// Forget accumulated drift.
    pub fn reset_drift(&mut self) {
        self.validator.reset_drift();
    }

    /// Consistency warnings of the last completed point.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Receive coordination events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.events.subscribe()
    }

    /// Flyer ids in kickoff order.
    pub fn kickoff_order(&self) -> Vec<&str> {
        let flyers = self.session.flyers();
        self.session
            .kickoff_order()
            .iter()
            .filter_map(|pos| flyers.get(*pos).map(Flyer::name))
            .collect()
    }

    /// Trigger logic state of every flyer.
    pub fn flyer_states(&self) -> Vec<FlyerSnapshot> {
        self.session.flyer_states()
    }

    /// Progress events of one flyer's current point. See [`Flyer::monitor`].
    pub fn monitor(
        &self,
        flyer: &str,
    ) -> Option<impl Stream<Item = ProgressEvent> + Send + 'static> {
        self.session.flyer(flyer).map(Flyer::monitor)
    }

    fn require(
        &self,
        allowed: &[SessionPhase],
        operation: &'static str,
    ) -> Result<(), CoordinationError> {
        let phase = self.session.phase();
        if allowed.contains(&phase) {
            Ok(())
        } else {
            Err(CoordinationError::violation(&self.name, operation, phase))
        }
    }

    fn point_index(&self) -> Option<usize> {
        self.session.current_point().map(|(index, _)| index)
    }

    /// Finish a fan-out phase: advance on success, otherwise abort everything.
    async fn settle(
        &mut self,
        phase: Phase,
        results: Vec<(Instant, usize, Result<(), CoordinationError>)>,
        next: SessionPhase,
    ) -> Result<(), CoordinationError> {
        let failures = results
            .into_iter()
            .filter_map(|(at, position, result)| {
                result.err().map(|error| Failure {
                    at,
                    position,
                    error,
                })
            })
            .collect();
        let index = self.point_index();
        match root_cause(failures) {
            None => {
                self.session.set_phase(next);
                info!(coordinator = %self.name, phase = %phase, point = ?index, "phase complete");
                self.events.emit(phase, None, index, Outcome::Succeeded);
                Ok(())
            }
            Some(err) => {
                error!(
                    coordinator = %self.name,
                    phase = %phase,
                    point = ?index,
                    root_cause = %err,
                    "phase failed, aborting session"
                );
                self.events.emit(phase, None, index, Outcome::failed(&err));
                self.abort_all().await;
                Err(err)
            }
        }
    }

    /// Prepare every flyer for `point` concurrently.
    pub async fn prepare_all(&mut self, point: &AcquisitionPoint) -> Result<(), CoordinationError> {
        self.require(
            &[
                SessionPhase::Idle,
                SessionPhase::Prepared,
                SessionPhase::Completed,
            ],
            "prepare_all",
        )?;
        let index = self.session.stage(point);
        self.events
            .emit(Phase::Prepare, None, Some(index), Outcome::Started);

        let results = join_all(self.session.flyers_mut().iter_mut().enumerate().map(
            |(position, flyer)| async move {
                let result = flyer.prepare(index, point).await;
                (Instant::now(), position, result)
            },
        ))
        .await;
        self.settle(Phase::Prepare, results, SessionPhase::Prepared)
            .await
    }

    /// Arm every flyer concurrently. The first failure cancels the others.
    pub async fn arm_all(&mut self) -> Result<(), CoordinationError> {
        self.require(&[SessionPhase::Prepared], "arm_all")?;
        self.events
            .emit(Phase::Arm, None, self.point_index(), Outcome::Started);

        let stop = CancellationToken::new();
        let stop = &stop;
        let results = join_all(self.session.flyers_mut().iter_mut().enumerate().map(
            |(position, flyer)| async move {
                let result = flyer.arm_cancellable(stop).await;
                if result.is_err() {
                    stop.cancel();
                }
                (Instant::now(), position, result)
            },
        ))
        .await;
        self.settle(Phase::Arm, results, SessionPhase::Armed).await
    }

    /// Kick off every flyer, one at a time, in kickoff order.
    pub async fn kickoff_all(&mut self) -> Result<(), CoordinationError> {
        self.require(&[SessionPhase::Armed], "kickoff_all")?;
        let index = self.point_index();
        self.events
            .emit(Phase::Kickoff, None, index, Outcome::Started);

        let order = self.session.kickoff_order().to_vec();
        for position in order {
            let Some(flyer) = self.session.flyers_mut().get_mut(position) else {
                continue;
            };
            if let Err(err) = flyer.kickoff().await {
                error!(
                    coordinator = %self.name,
                    point = ?index,
                    root_cause = %err,
                    "kickoff failed, aborting session"
                );
                self.events
                    .emit(Phase::Kickoff, None, index, Outcome::failed(&err));
                self.abort_all().await;
                return Err(err);
            }
        }

        self.session.set_phase(SessionPhase::Acquiring);
        info!(coordinator = %self.name, point = ?index, "all flyers kicked off");
        self.events
            .emit(Phase::Kickoff, None, index, Outcome::Succeeded);
        Ok(())
    }

    /// Wait for every flyer to finish and validate their timing.
    ///
    /// The point fails if any flyer faulted or any report is out of
    /// tolerance, even when the other flyers succeeded.
    pub async fn await_completion(&mut self) -> Result<Vec<TimingReport>, CoordinationError> {
        self.require(&[SessionPhase::Acquiring], "await_completion")?;
        let index = self.point_index();
        self.events
            .emit(Phase::Complete, None, index, Outcome::Started);

        let stop = CancellationToken::new();
        let stop = &stop;
        let completed = join_all(self.session.flyers_mut().iter_mut().enumerate().map(
            |(position, flyer)| async move {
                let report = flyer.complete_cancellable(stop).await;
                if report.state != TriggerState::Complete {
                    stop.cancel();
                }
                (Instant::now(), position, report)
            },
        ))
        .await;

        let mut failures = Vec::new();
        let mut reports = Vec::with_capacity(completed.len());
        for (at, position, mut report) in completed {
            if report.state == TriggerState::Complete {
                if let Err(error) = self.validator.validate(&mut report) {
                    warn!(coordinator = %self.name, point = ?index, error = %error, "timing violation");
                    failures.push(Failure {
                        at,
                        position,
                        error,
                    });
                }
            } else {
                let error = report.error.clone().unwrap_or_else(|| {
                    CoordinationError::HardwareFault {
                        flyer: report.flyer.clone(),
                        message: format!("flyer ended in state {}", report.state),
                    }
                });
                failures.push(Failure {
                    at,
                    position,
                    error,
                });
            }
            reports.push(report);
        }

        self.warnings = self.validator.check_consistency(&reports).warnings;
        self.session.record_reports(reports.iter().cloned());

        match root_cause(failures) {
            None => {
                self.session.set_phase(SessionPhase::Completed);
                info!(coordinator = %self.name, point = ?index, "point completed");
                self.events
                    .emit(Phase::Validate, None, index, Outcome::Succeeded);
                Ok(reports)
            }
            Some(err) => {
                error!(
                    coordinator = %self.name,
                    point = ?index,
                    root_cause = %err,
                    "point failed, aborting session"
                );
                self.events
                    .emit(Phase::Validate, None, index, Outcome::failed(&err));
                self.abort_all().await;
                Err(err)
            }
        }
    }

    /// Abort every flyer concurrently. Never fails; safe to repeat.
    pub async fn abort_all(&mut self) {
        let index = self.point_index();
        warn!(
            coordinator = %self.name,
            phase = %self.session.phase(),
            point = ?index,
            "aborting all flyers"
        );
        self.session.set_phase(SessionPhase::Aborting);
        self.events.emit(Phase::Abort, None, index, Outcome::Started);

        join_all(self.session.flyers_mut().iter_mut().map(|flyer| flyer.abort())).await;

        self.session.set_phase(SessionPhase::Idle);
        self.events
            .emit(Phase::Abort, None, index, Outcome::Succeeded);
    }

    /// Run one point through every phase.
    pub async fn run_point(&mut self, point: &AcquisitionPoint) -> PointResult {
        self.run_point_cancellable(point, &CancellationToken::new())
            .await
    }

    /// [`Coordinator::run_point`] that aborts the session when `cancel` fires.
    pub async fn run_point_cancellable(
        &mut self,
        point: &AcquisitionPoint,
        cancel: &CancellationToken,
    ) -> PointResult {
        self.warnings.clear();
        let outcome = self.drive_point(point, cancel).await;
        let index = self.point_index().unwrap_or_default();
        match outcome {
            Ok(reports) => PointResult::succeeded(index, reports, self.warnings.clone()),
            Err(root_cause) => {
                let mut result = PointResult::failed(
                    index,
                    root_cause,
                    self.session.flyer_states(),
                    self.session.reports().to_vec(),
                );
                result.warnings = self.warnings.clone();
                result
            }
        }
    }

    async fn drive_point(
        &mut self,
        point: &AcquisitionPoint,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimingReport>, CoordinationError> {
        let prepared = until_cancelled(cancel, self.prepare_all(point)).await;
        match prepared {
            Some(result) => result?,
            None => return Err(self.cancelled().await),
        }
        let armed = until_cancelled(cancel, self.arm_all()).await;
        match armed {
            Some(result) => result?,
            None => return Err(self.cancelled().await),
        }
        let kicked = until_cancelled(cancel, self.kickoff_all()).await;
        match kicked {
            Some(result) => result?,
            None => return Err(self.cancelled().await),
        }
        let completed = until_cancelled(cancel, self.await_completion()).await;
        match completed {
            Some(result) => result,
            None => Err(self.cancelled().await),
        }
    }

    async fn cancelled(&mut self) -> CoordinationError {
        warn!(coordinator = %self.name, phase = %self.session.phase(), "point cancelled by caller");
        self.abort_all().await;
        CoordinationError::Aborted {
            component: self.name.clone(),
            reason: "cancelled by caller".to_string(),
        }
    }

    /// Run `points` in order as one fly scan, stopping at the first failure.
    ///
    /// Drift accounting starts from zero for every scan.
    pub async fn run_points(&mut self, points: &[AcquisitionPoint]) -> ScanResult {
        self.validator.reset_drift();
        info!(coordinator = %self.name, points = points.len(), "starting fly scan");

        let mut results = Vec::with_capacity(points.len());
        for point in points {
            let result = self.run_point(point).await;
            let failed = !result.success;
            results.push(result);
            if failed {
                warn!(coordinator = %self.name, completed = results.len() - 1, "fly scan stopped at failed point");
                break;
            }
        }
        ScanResult { points: results }
    }
}
