//! Coordination session state and point results.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::{CoordinationError, ErrorKind};
use crate::flyer::Flyer;
use crate::plan::AcquisitionPoint;
use crate::timing::TimingReport;
use crate::trigger_logic::TriggerState;

/// Session phase as reported to callers.
///
/// Flyers move between phases individually while a phase runs; the session
/// only advances once every flyer has finished the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No point staged, or the last point was aborted.
    Idle,
    /// Every flyer prepared.
    Prepared,
    /// Every flyer armed.
    Armed,
    /// Every flyer kicked off.
    Acquiring,
    /// Every flyer complete and within tolerance.
    Completed,
    /// Abort in progress.
    Aborting,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Prepared => write!(f, "prepared"),
            SessionPhase::Armed => write!(f, "armed"),
            SessionPhase::Acquiring => write!(f, "acquiring"),
            SessionPhase::Completed => write!(f, "completed"),
            SessionPhase::Aborting => write!(f, "aborting"),
        }
    }
}

/// Terminal state of one flyer, as carried by a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlyerSnapshot {
    /// Flyer id.
    pub name: String,
    /// Trigger logic state.
    pub state: TriggerState,
}

/// Why a point failed.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFailure {
    /// First-encountered root cause.
    pub root_cause: CoordinationError,
    /// State of every flyer after the session was unwound.
    pub flyer_states: Vec<FlyerSnapshot>,
}

impl PointFailure {
    /// Category of the root cause.
    pub fn kind(&self) -> ErrorKind {
        self.root_cause.kind()
    }
}

/// Result of one acquisition point: fully successful or a structured failure.
#[derive(Debug, Clone, PartialEq)]
pub struct PointResult {
    /// Point index within the session.
    pub point_index: usize,
    /// Every flyer complete and every report within tolerance.
    pub success: bool,
    /// Per-flyer reports, in insertion order. Empty if the point failed
    /// before completion.
    pub reports: Vec<TimingReport>,
    /// Set iff `success` is false.
    pub failure: Option<PointFailure>,
    /// Cross-flyer consistency warnings.
    pub warnings: Vec<String>,
}

impl PointResult {
    pub(crate) fn succeeded(
        point_index: usize,
        reports: Vec<TimingReport>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            point_index,
            success: true,
            reports,
            failure: None,
            warnings,
        }
    }

    pub(crate) fn failed(
        point_index: usize,
        root_cause: CoordinationError,
        flyer_states: Vec<FlyerSnapshot>,
        reports: Vec<TimingReport>,
    ) -> Self {
        Self {
            point_index,
            success: false,
            reports,
            failure: Some(PointFailure {
                root_cause,
                flyer_states,
            }),
            warnings: Vec::new(),
        }
    }

    /// Root cause of a failed point.
    pub fn root_cause(&self) -> Option<&CoordinationError> {
        self.failure.as_ref().map(|f| &f.root_cause)
    }
}

/// Results of a fly scan. Stops at the first failed point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    /// Results in point order.
    pub points: Vec<PointResult>,
}

impl ScanResult {
    /// Every executed point succeeded.
    pub fn success(&self) -> bool {
        self.points.iter().all(|p| p.success)
    }

    /// The failed point, if any.
    pub fn first_failure(&self) -> Option<&PointResult> {
        self.points.iter().find(|p| !p.success)
    }
}

/// Flyers, kickoff order, staged point and phase of one session.
#[derive(Debug)]
pub struct CoordinationSession {
    flyers: Vec<Flyer>,
    kickoff_order: Vec<usize>,
    phase: SessionPhase,
    current: Option<(usize, AcquisitionPoint)>,
    next_index: usize,
    reports: Vec<TimingReport>,
}

impl CoordinationSession {
    /// Session over `flyers` (insertion order kept) kicked off in
    /// `kickoff_order`, a permutation of flyer positions.
    pub fn new(flyers: Vec<Flyer>, kickoff_order: Vec<usize>) -> Result<Self, CoordinationError> {
        if flyers.is_empty() {
            return Err(CoordinationError::Configuration(
                "a session needs at least one flyer".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for flyer in &flyers {
            if !names.insert(flyer.name()) {
                return Err(CoordinationError::Configuration(format!(
                    "duplicate flyer id '{}'",
                    flyer.name()
                )));
            }
        }
        let mut sorted = kickoff_order.clone();
        sorted.sort_unstable();
        if sorted != (0..flyers.len()).collect::<Vec<_>>() {
            return Err(CoordinationError::Configuration(
                "kickoff order must name every flyer exactly once".to_string(),
            ));
        }
        Ok(Self {
            flyers,
            kickoff_order,
            phase: SessionPhase::Idle,
            current: None,
            next_index: 0,
            reports: Vec::new(),
        })
    }

    /// Reported phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
    }

    /// Flyers in insertion order.
    pub fn flyers(&self) -> &[Flyer] {
        &self.flyers
    }

    pub(crate) fn flyers_mut(&mut self) -> &mut [Flyer] {
        &mut self.flyers
    }

    /// Flyer by id.
    pub fn flyer(&self, name: &str) -> Option<&Flyer> {
        self.flyers.iter().find(|f| f.name() == name)
    }

    /// Flyer positions in kickoff order.
    pub fn kickoff_order(&self) -> &[usize] {
        &self.kickoff_order
    }

    /// Staged point and its index.
    pub fn current_point(&self) -> Option<(usize, &AcquisitionPoint)> {
        self.current.as_ref().map(|(i, p)| (*i, p))
    }

    /// Index for `point`: the staged index when re-preparing the same point
    /// while prepared, otherwise the next one.
    pub(crate) fn stage(&mut self, point: &AcquisitionPoint) -> usize {
        if self.phase == SessionPhase::Prepared {
            if let Some((index, staged)) = &self.current {
                if staged == point {
                    return *index;
                }
            }
        }
        let index = self.next_index;
        self.next_index += 1;
        self.current = Some((index, point.clone()));
        self.reports.clear();
        index
    }

    /// Trigger logic state of every flyer.
    pub fn flyer_states(&self) -> Vec<FlyerSnapshot> {
        self.flyers
            .iter()
            .map(|f| FlyerSnapshot {
                name: f.name().to_string(),
                state: f.state(),
            })
            .collect()
    }

    /// Append the reports of the staged point.
    pub(crate) fn record_reports(&mut self, reports: impl IntoIterator<Item = TimingReport>) {
        self.reports.extend(reports);
    }

    /// Reports of the staged point. Cleared when the next point is staged.
    pub fn reports(&self) -> &[TimingReport] {
        &self.reports
    }
}
