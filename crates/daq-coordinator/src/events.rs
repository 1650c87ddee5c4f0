//! Structured coordination events.
//!
//! Every phase transition of a flyer or of the session is published as a
//! [`CoordinationEvent`] on a broadcast channel, in the same spirit as a run
//! engine's document stream. Subscribers are optional; publishing with no
//! receiver is not an error. Each event is also logged through `tracing`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{CoordinationError, ErrorKind};

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Coordination phase an event or timeout belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Device connection at session construction.
    Connect,
    /// Staging a point.
    Prepare,
    /// Arming and waiting for readiness.
    Arm,
    /// Releasing the trigger sequence.
    Kickoff,
    /// Waiting for the trigger sequence to finish.
    Complete,
    /// Timing validation of completed flyers.
    Validate,
    /// Stopping devices.
    Abort,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Connect => "connect",
            Phase::Prepare => "prepare",
            Phase::Arm => "arm",
            Phase::Kickoff => "kickoff",
            Phase::Complete => "complete",
            Phase::Validate => "validate",
            Phase::Abort => "abort",
        };
        write!(f, "{}", label)
    }
}

/// Result of a phase step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Outcome {
    /// Step began.
    Started,
    /// Step finished successfully.
    Succeeded,
    /// Step failed.
    Failed {
        /// Failure category.
        kind: ErrorKind,
        /// Rendered error.
        message: String,
    },
}

impl Outcome {
    /// Failed outcome for `err`.
    pub fn failed(err: &CoordinationError) -> Self {
        Outcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One published phase transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinationEvent {
    /// Phase of the transition.
    pub phase: Phase,
    /// Flyer concerned, `None` for session-wide transitions.
    pub flyer_id: Option<String>,
    /// Acquisition point index, when one is staged.
    pub point_index: Option<usize>,
    /// Wall-clock time of the transition.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub outcome: Outcome,
}

/// Cloneable publisher shared by the coordinator and its flyers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoordinationEvent>,
}

impl EventBus {
    /// Create a bus with room for `capacity` undelivered events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.sender.subscribe()
    }

    /// Publish an event stamped now.
    pub fn emit(
        &self,
        phase: Phase,
        flyer_id: Option<&str>,
        point_index: Option<usize>,
        outcome: Outcome,
    ) {
        let event = CoordinationEvent {
            phase,
            flyer_id: flyer_id.map(str::to_string),
            point_index,
            timestamp: Utc::now(),
            outcome,
        };
        debug!(
            phase = %event.phase,
            flyer = event.flyer_id.as_deref().unwrap_or("session"),
            point = ?event.point_index,
            outcome = ?event.outcome,
            "coordination event"
        );
        // No receivers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(Phase::Arm, Some("det1"), Some(3), Outcome::Succeeded);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.phase, Phase::Arm);
        assert_eq!(event.flyer_id.as_deref(), Some("det1"));
        assert_eq!(event.point_index, Some(3));
        assert_eq!(event.outcome, Outcome::Succeeded);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(Phase::Abort, None, None, Outcome::Started);
    }
}
