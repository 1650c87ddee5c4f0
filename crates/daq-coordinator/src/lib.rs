//! `daq-coordinator`
//!
//! Multi-device trigger coordination engine.
//!
//! Brings a motion device and any number of detectors and trigger boxes
//! ("flyers") into a common armed state, fires them in a configured order,
//! monitors them concurrently and validates their timing. A point either
//! succeeds for every flyer or fails as a whole with one root cause; any
//! failure unwinds the session through [`Coordinator::abort_all`].
//!
//! ## Components
//!
//! - [`TriggerLogic`]: per-flyer state machine and timing bookkeeping
//! - [`Flyer`]: one device behind `prepare → arm → kickoff → complete`
//! - [`TimingValidator`]: livetime/deadtime tolerance and drift budget
//! - [`Coordinator`]: fan-out/fan-in over flyers, phase barriers, abort
//! - [`AcquisitionPoint`], [`CoordinationSession`]: plan and run state
//!
//! Devices are reached only through [`daq_core::FlyerDevice`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod flyer;
pub mod plan;
pub mod session;
pub mod timing;
pub mod trigger_logic;

pub use config::{CoordinatorConfig, FlyerOverrides, FlyerTimeouts, Tolerance};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::{CoordinationError, ErrorKind};
pub use events::{CoordinationEvent, EventBus, Outcome, Phase};
pub use flyer::Flyer;
pub use plan::{linear_points, AcquisitionPoint, AxisTarget};
pub use session::{
    CoordinationSession, FlyerSnapshot, PointFailure, PointResult, ScanResult, SessionPhase,
};
pub use timing::{ConsistencyCheck, TimingObservation, TimingReport, TimingValidator, TimingVerdict};
pub use trigger_logic::{TriggerInfo, TriggerLogic, TriggerState};
