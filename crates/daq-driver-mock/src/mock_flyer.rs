//! Simulated flyer device.
//!
//! [`MockFlyerDevice`] implements every `daq-core` capability with in-memory
//! state and `tokio::time` delays, so it runs exactly on a paused test clock.
//! Clones share one device.
//!
//! # Trigger sequence
//!
//! After `issue_trigger()` a background task emits, for each trigger `i`:
//!
//! ```text
//! Trigger(i) ── exposure ──▶ FrameCaptured(i) ── readout (+ drift, + jitter) ──▶ ...
//! ```
//!
//! and finally `Complete`. The readout gap grows by `deadtime_drift_s` for
//! every sequence the device has run, which simulates slow drift across a
//! scan. `fault_after_frames` and `stall_after_frames` cut the sequence
//! short with a `Fault` event or with silence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use daq_core::{
    AcquisitionSettings, Armable, Connectable, DeviceDescription, DeviceRole, DeviceStatus,
    Describable, DriverError, DriverErrorKind, Preparable, ProgressEvent, ProgressKind,
    ProgressSource, Triggerable,
};

use crate::common::{ErrorConfig, MockMode, MockRng, TimingConfig};

// =============================================================================
// MockFlyerConfig - configuration file representation
// =============================================================================

/// Configuration of a mock flyer, as found in a `[[devices]]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MockFlyerConfig {
    /// Role in the acquisition (default: detector)
    pub role: DeviceRole,
    /// Model name (default: derived from the role)
    pub model: Option<String>,
    /// Shortest accepted exposure in seconds (default: 0.001)
    pub min_exposure_s: f64,
    /// Readout overhead per trigger in seconds (default: 0.002)
    pub readout_overhead_s: f64,
    /// Arm-to-ready delay in seconds (default: mode dependent)
    pub ready_delay_s: Option<f64>,
    /// Extra readout per completed sequence in seconds (default: 0)
    pub deadtime_drift_s: f64,
    /// Never report ready after arming
    pub never_ready: bool,
    /// Emit a fault instead of trigger `n`
    pub fault_after_frames: Option<u32>,
    /// Go silent instead of trigger `n`
    pub stall_after_frames: Option<u32>,
    /// Operational mode
    pub mode: MockMode,
    /// Seed for Chaos jitter
    pub seed: Option<u64>,
}

impl Default for MockFlyerConfig {
    fn default() -> Self {
        Self {
            role: DeviceRole::Detector,
            model: None,
            min_exposure_s: 0.001,
            readout_overhead_s: 0.002,
            ready_delay_s: None,
            deadtime_drift_s: 0.0,
            never_ready: false,
            fault_after_frames: None,
            stall_after_frames: None,
            mode: MockMode::Instant,
            seed: None,
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`MockFlyerDevice`].
#[derive(Debug, Clone)]
pub struct MockFlyerBuilder {
    id: String,
    config: MockFlyerConfig,
    timing: Option<TimingConfig>,
    errors: ErrorConfig,
}

impl MockFlyerBuilder {
    /// Builder for a device named `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: MockFlyerConfig::default(),
            timing: None,
            errors: ErrorConfig::none(),
        }
    }

    /// Start from a configuration table.
    pub fn from_config(id: impl Into<String>, config: MockFlyerConfig) -> Self {
        Self {
            config,
            ..Self::new(id)
        }
    }

    /// Device role.
    pub fn role(mut self, role: DeviceRole) -> Self {
        self.config.role = role;
        self
    }

    /// Model name.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    /// Shortest accepted exposure.
    pub fn min_exposure(mut self, seconds: f64) -> Self {
        self.config.min_exposure_s = seconds;
        self
    }

    /// Readout overhead per trigger.
    pub fn readout_overhead(mut self, seconds: f64) -> Self {
        self.config.readout_overhead_s = seconds;
        self
    }

    /// Arm-to-ready delay, overriding the mode default.
    pub fn ready_delay(mut self, delay: Duration) -> Self {
        self.config.ready_delay_s = Some(delay.as_secs_f64());
        self
    }

    /// Extra readout added per completed sequence.
    pub fn deadtime_drift(mut self, seconds: f64) -> Self {
        self.config.deadtime_drift_s = seconds;
        self
    }

    /// Never report ready.
    pub fn never_ready(mut self) -> Self {
        self.config.never_ready = true;
        self
    }

    /// Fault instead of trigger `frames`.
    pub fn fault_after_frames(mut self, frames: u32) -> Self {
        self.config.fault_after_frames = Some(frames);
        self
    }

    /// Stall instead of trigger `frames`.
    pub fn stall_after_frames(mut self, frames: u32) -> Self {
        self.config.stall_after_frames = Some(frames);
        self
    }

    /// Operational mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Timing preset, overriding the role default.
    pub fn timing_config(mut self, timing: TimingConfig) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Error injection.
    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Seed for Chaos jitter.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Build the device.
    pub fn build(self) -> MockFlyerDevice {
        let config = self.config;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| format!("mock_{}", config.role));
        let description = DeviceDescription {
            model,
            role: config.role,
            min_exposure_s: config.min_exposure_s,
            readout_overhead_s: config.readout_overhead_s,
        };
        let timing = self
            .timing
            .unwrap_or_else(|| TimingConfig::for_role(config.role));
        let ready_delay = match config.ready_delay_s {
            Some(seconds) => Duration::try_from_secs_f64(seconds).unwrap_or_default(),
            None if config.mode.simulates_latency() => timing.ready_delay(),
            None => Duration::ZERO,
        };

        MockFlyerDevice {
            inner: Arc::new(Inner {
                id: self.id,
                description,
                ready_delay,
                deadtime_drift_s: config.deadtime_drift_s,
                never_ready: config.never_ready,
                fault_after_frames: config.fault_after_frames,
                stall_after_frames: config.stall_after_frames,
                mode: config.mode,
                timing,
                errors: self.errors,
                rng: MockRng::new(config.seed),
                state: Mutex::new(DeviceState::default()),
                stop_count: AtomicU32::new(0),
                trigger_calls: AtomicU32::new(0),
                config_calls: AtomicU32::new(0),
                sequences: AtomicU32::new(0),
            }),
        }
    }
}

// =============================================================================
// MockFlyerDevice
// =============================================================================

#[derive(Default)]
struct DeviceState {
    connected: bool,
    settings: Option<AcquisitionSettings>,
    armed: bool,
    ready_at: Option<Instant>,
    acquiring: bool,
    fault: Option<String>,
    subscribers: Vec<mpsc::UnboundedSender<ProgressEvent>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    id: String,
    description: DeviceDescription,
    ready_delay: Duration,
    deadtime_drift_s: f64,
    never_ready: bool,
    fault_after_frames: Option<u32>,
    stall_after_frames: Option<u32>,
    mode: MockMode,
    timing: TimingConfig,
    errors: ErrorConfig,
    rng: MockRng,
    state: Mutex<DeviceState>,
    stop_count: AtomicU32,
    trigger_calls: AtomicU32,
    config_calls: AtomicU32,
    sequences: AtomicU32,
}

impl Inner {
    fn driver_type(&self) -> &str {
        &self.description.model
    }

    async fn link_latency(&self) {
        if self.mode.simulates_latency() {
            sleep(self.timing.communication_delay()).await;
        }
    }

    async fn check(&self, operation: &'static str) -> Result<()> {
        if self.errors.hangs(operation) {
            debug!(device = %self.id, operation, "hanging");
            std::future::pending::<()>().await;
        }
        self.errors
            .check_operation(self.driver_type(), operation)
            .map_err(anyhow::Error::from)
    }

    fn publish(&self, kind: ProgressKind) {
        let event = ProgressEvent::now(kind);
        self.state
            .lock()
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn readout_gap(&self, sequence: u32) -> Duration {
        let seconds =
            self.description.readout_overhead_s + self.deadtime_drift_s * f64::from(sequence);
        let gap = Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or_default();
        if self.mode.injects_jitter() {
            gap + self.rng.jitter(self.timing.jitter())
        } else {
            gap
        }
    }
}

/// Simulated detector, trigger box or motion controller.
#[derive(Clone)]
pub struct MockFlyerDevice {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MockFlyerDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFlyerDevice")
            .field("id", &self.inner.id)
            .field("description", &self.inner.description)
            .field("mode", &self.inner.mode)
            .finish_non_exhaustive()
    }
}

impl MockFlyerDevice {
    /// Builder for a device named `id`.
    pub fn builder(id: impl Into<String>) -> MockFlyerBuilder {
        MockFlyerBuilder::new(id)
    }

    /// Device from a configuration table.
    pub fn from_config(id: impl Into<String>, config: MockFlyerConfig) -> Self {
        MockFlyerBuilder::from_config(id, config).build()
    }

    /// Device name.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Times `stop()` was called.
    pub fn stop_count(&self) -> u32 {
        self.inner.stop_count.load(Ordering::SeqCst)
    }

    /// Times `issue_trigger()` was called.
    pub fn trigger_calls(&self) -> u32 {
        self.inner.trigger_calls.load(Ordering::SeqCst)
    }

    /// Times `set_config()` was called.
    pub fn config_calls(&self) -> u32 {
        self.inner.config_calls.load(Ordering::SeqCst)
    }

    /// Trigger sequences started.
    pub fn sequences_run(&self) -> u32 {
        self.inner.sequences.load(Ordering::SeqCst)
    }

    /// Whether `connect()` succeeded.
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    /// Settings staged by the last `set_config()`.
    pub fn staged_settings(&self) -> Option<AcquisitionSettings> {
        self.inner.state.lock().settings.clone()
    }
}

async fn run_sequence(inner: Arc<Inner>, settings: AcquisitionSettings, sequence: u32) {
    let exposure = Duration::try_from_secs_f64(settings.exposure_s).unwrap_or_default();
    debug!(device = %inner.id, sequence, triggers = settings.num_triggers, "trigger sequence started");

    for index in 0..settings.num_triggers {
        if inner.stall_after_frames == Some(index) {
            debug!(device = %inner.id, frames = index, "stalling");
            return;
        }
        if inner.fault_after_frames == Some(index) {
            let message = format!("{}: injected fault after {} frames", inner.id, index);
            {
                let mut state = inner.state.lock();
                state.acquiring = false;
                state.fault = Some(message.clone());
            }
            inner.publish(ProgressKind::Fault { message });
            return;
        }

        inner.publish(ProgressKind::Trigger { index });
        sleep(exposure).await;
        inner.publish(ProgressKind::FrameCaptured { index });
        sleep(inner.readout_gap(sequence)).await;
    }

    inner.state.lock().acquiring = false;
    inner.publish(ProgressKind::Complete);
    debug!(device = %inner.id, sequence, "trigger sequence complete");
}

#[async_trait]
impl Connectable for MockFlyerDevice {
    async fn connect(&self) -> Result<()> {
        self.inner.link_latency().await;
        self.inner.check("connect").await?;
        self.inner.state.lock().connected = true;
        info!(device = %self.inner.id, model = %self.inner.description.model, "mock flyer connected");
        Ok(())
    }
}

#[async_trait]
impl Preparable for MockFlyerDevice {
    async fn set_config(&self, settings: &AcquisitionSettings) -> Result<()> {
        self.inner.link_latency().await;
        self.inner.config_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.check("set_config").await?;

        if settings.exposure_s < self.inner.description.min_exposure_s {
            return Err(DriverError::new(
                self.inner.driver_type(),
                DriverErrorKind::InvalidParameter,
                format!(
                    "exposure {}s below minimum {}s",
                    settings.exposure_s, self.inner.description.min_exposure_s
                ),
            )
            .into());
        }

        let mut state = self.inner.state.lock();
        if !state.connected {
            bail!("{}: set_config before connect", self.inner.id);
        }
        if state.acquiring {
            bail!("{}: set_config while acquiring", self.inner.id);
        }
        state.settings = Some(settings.clone());
        state.armed = false;
        state.ready_at = None;
        state.fault = None;
        Ok(())
    }
}

#[async_trait]
impl Armable for MockFlyerDevice {
    async fn arm(&self) -> Result<()> {
        self.inner.link_latency().await;
        self.inner.check("arm").await?;

        let mut state = self.inner.state.lock();
        if state.settings.is_none() {
            bail!("{}: arm before set_config", self.inner.id);
        }
        state.armed = true;
        state.ready_at = if self.inner.never_ready {
            None
        } else {
            Some(Instant::now() + self.inner.ready_delay)
        };
        Ok(())
    }

    async fn read_status(&self) -> Result<DeviceStatus> {
        self.inner.check("read_status").await?;
        let state = self.inner.state.lock();
        let status = if let Some(message) = &state.fault {
            DeviceStatus::Fault(message.clone())
        } else if state.acquiring {
            DeviceStatus::Acquiring
        } else if state.armed {
            match state.ready_at {
                Some(at) if Instant::now() >= at => DeviceStatus::Ready,
                _ => DeviceStatus::Arming,
            }
        } else {
            DeviceStatus::Idle
        };
        Ok(status)
    }
}

#[async_trait]
impl Triggerable for MockFlyerDevice {
    async fn issue_trigger(&self) -> Result<()> {
        self.inner.link_latency().await;
        self.inner.trigger_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.check("trigger").await?;

        let mut state = self.inner.state.lock();
        let ready = state.armed && state.ready_at.is_some_and(|at| Instant::now() >= at);
        if !ready {
            bail!("{}: trigger while not armed and ready", self.inner.id);
        }
        let settings = state
            .settings
            .clone()
            .ok_or_else(|| anyhow!("{}: trigger without configuration", self.inner.id))?;

        let sequence = self.inner.sequences.fetch_add(1, Ordering::SeqCst);
        state.armed = false;
        state.ready_at = None;
        state.acquiring = true;
        state.task = Some(tokio::spawn(run_sequence(
            Arc::clone(&self.inner),
            settings,
            sequence,
        )));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.inner.stop_count.fetch_add(1, Ordering::SeqCst);
        self.inner.check("stop").await?;

        let task = {
            let mut state = self.inner.state.lock();
            state.armed = false;
            state.ready_at = None;
            state.acquiring = false;
            state.task.take()
        };
        if let Some(task) = task {
            task.abort();
            debug!(device = %self.inner.id, "trigger sequence stopped");
        }
        Ok(())
    }
}

impl ProgressSource for MockFlyerDevice {
    fn stream_progress(&self) -> BoxStream<'static, ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.state.lock().subscribers.push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }
}

impl Describable for MockFlyerDevice {
    fn describe(&self) -> DeviceDescription {
        self.inner.description.clone()
    }
}
