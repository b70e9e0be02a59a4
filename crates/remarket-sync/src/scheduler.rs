//! # Sync Scheduler
//!
//! Runs a [`SyncTask`] once at start-up and then periodically, subject to
//! device conditions, retrying failed runs with exponential backoff.
//!
//! ## Run Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Scheduler Loop                                  │
//! │                                                                         │
//! │  one-shot  (start-up, trigger_now)   needs: any network                │
//! │  periodic  (every 15 min)            needs: unmetered, battery not low │
//! │  retry     (after JobOutcome::Retry) needs: what the failed run needed │
//! │                                                                         │
//! │   ┌──────────┐  due & allowed  ┌─────────┐  Success  ┌──────────┐      │
//! │   │  Waiting │────────────────►│ Running │──────────►│  Waiting │      │
//! │   └────┬─────┘                 └────┬────┘           └──────────┘      │
//! │        │ due, not allowed           │ Retry                             │
//! │        ▼                            ▼                                   │
//! │   re-check every constraint_poll    backoff 30s → 60s → … → 5h         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Runs never overlap. A trigger that arrives while one is already queued
//! replaces it. Shutdown lets the current run finish.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ScheduleSettings;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Task & Device Seams
// =============================================================================

/// Result of one scheduled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Run again later with backoff.
    Retry,
}

/// Work the scheduler drives.
#[async_trait]
pub trait SyncTask: Send + Sync + 'static {
    async fn run(&self) -> JobOutcome;
}

/// Connectivity as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Offline,
    /// Connected over a metered link (cellular, hotspot).
    Metered,
    Unmetered,
}

impl NetworkState {
    pub fn is_connected(&self) -> bool {
        !matches!(self, NetworkState::Offline)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkState::Offline => write!(f, "offline"),
            NetworkState::Metered => write!(f, "metered"),
            NetworkState::Unmetered => write!(f, "unmetered"),
        }
    }
}

/// Probe for the conditions a run may depend on.
pub trait DeviceConditions: Send + Sync {
    fn network(&self) -> NetworkState;
    fn battery_low(&self) -> bool;
}

/// Conditions that never change. Used where no platform probe exists.
#[derive(Debug, Clone, Copy)]
pub struct StaticConditions {
    pub network: NetworkState,
    pub battery_low: bool,
}

impl StaticConditions {
    /// Unmetered network, healthy battery.
    pub fn unrestricted() -> Self {
        StaticConditions {
            network: NetworkState::Unmetered,
            battery_low: false,
        }
    }
}

impl DeviceConditions for StaticConditions {
    fn network(&self) -> NetworkState {
        self.network
    }

    fn battery_low(&self) -> bool {
        self.battery_low
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Scheduler timing and constraints.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Queue a one-shot run at start-up.
    pub initial_sync: bool,
    /// Period between periodic runs. `None` disables them.
    pub periodic_interval: Option<Duration>,
    pub require_unmetered: bool,
    pub require_battery_not_low: bool,
    /// How often unmet constraints are re-checked while a run is due.
    pub constraint_poll: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Retries per failed run; 0 = unlimited.
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            initial_sync: true,
            periodic_interval: Some(Duration::from_secs(15 * 60)),
            require_unmetered: true,
            require_battery_not_low: true,
            constraint_poll: Duration::from_secs(30),
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(5 * 60 * 60),
            max_retries: 0,
        }
    }
}

impl From<&ScheduleSettings> for SchedulerConfig {
    fn from(settings: &ScheduleSettings) -> Self {
        SchedulerConfig {
            initial_sync: settings.initial_sync,
            periodic_interval: Some(settings.periodic_interval()),
            require_unmetered: settings.require_unmetered,
            require_battery_not_low: settings.require_battery_not_low,
            constraint_poll: settings.constraint_poll(),
            initial_backoff: settings.initial_backoff(),
            max_backoff: settings.max_backoff(),
            max_retries: settings.max_retries,
        }
    }
}

// =============================================================================
// Run Kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    OneShot,
    Periodic,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::OneShot => write!(f, "one-shot"),
            RunKind::Periodic => write!(f, "periodic"),
        }
    }
}

/// A failed run waiting for its backoff to elapse.
#[derive(Debug, Clone, Copy)]
struct PendingRetry {
    kind: RunKind,
    at: Instant,
}

// =============================================================================
// Scheduler Handle
// =============================================================================

/// Handle for controlling a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SchedulerHandle {
    /// Queues a one-shot run. Replaces a run that is already queued.
    pub fn trigger_now(&self) -> SyncResult<()> {
        match self.trigger_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Closed(())) => Err(SyncError::ShuttingDown),
        }
    }

    /// Triggers graceful shutdown. A run in progress completes first.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Failed to send shutdown signal".into()))
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Background loop driving a [`SyncTask`].
///
/// ## Usage
/// ```rust,ignore
/// let (handle, join) = SyncScheduler::spawn(
///     Arc::new(engine),
///     Arc::new(StaticConditions::unrestricted()),
///     SchedulerConfig::from(&config.schedule),
/// );
///
/// handle.trigger_now()?;
/// handle.shutdown().await?;
/// join.await?;
/// ```
pub struct SyncScheduler {
    task: Arc<dyn SyncTask>,
    conditions: Arc<dyn DeviceConditions>,
    config: SchedulerConfig,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,

    one_shot_due: bool,
    periodic_due: bool,
    next_period: Option<Instant>,
    retry: Option<PendingRetry>,
    retries: u32,
    backoff: ExponentialBackoff,
}

impl SyncScheduler {
    /// Spawns the scheduler loop on the current runtime.
    pub fn spawn(
        task: Arc<dyn SyncTask>,
        conditions: Arc<dyn DeviceConditions>,
        config: SchedulerConfig,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let backoff = Self::create_backoff(&config);
        let next_period = config.periodic_interval.map(|every| Instant::now() + every);

        let scheduler = SyncScheduler {
            task,
            conditions,
            one_shot_due: config.initial_sync,
            config,
            trigger_rx,
            shutdown_rx,
            periodic_due: false,
            next_period,
            retry: None,
            retries: 0,
            backoff,
        };

        let join = tokio::spawn(scheduler.run());
        (
            SchedulerHandle {
                trigger_tx,
                shutdown_tx,
            },
            join,
        )
    }

    fn create_backoff(config: &SchedulerConfig) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: config.initial_backoff,
            current_interval: config.initial_backoff,
            max_interval: config.max_backoff,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    async fn run(mut self) {
        info!(
            initial_sync = self.config.initial_sync,
            period = ?self.config.periodic_interval,
            "Sync scheduler starting"
        );

        loop {
            self.mark_due_periods(Instant::now());

            if let Some(kind) = self.next_runnable(Instant::now()) {
                self.execute(kind).await;
                continue;
            }

            let wake = self.next_wake(Instant::now());

            tokio::select! {
                _ = sleep_until(wake) => {}
                Some(()) = self.trigger_rx.recv() => {
                    debug!("Sync requested");
                    self.one_shot_due = true;
                    // A fresh request supersedes a one-shot waiting on backoff.
                    if matches!(self.retry, Some(PendingRetry { kind: RunKind::OneShot, .. })) {
                        self.clear_retry();
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Sync scheduler received shutdown signal");
                    break;
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    fn mark_due_periods(&mut self, now: Instant) {
        if let (Some(at), Some(every)) = (self.next_period, self.config.periodic_interval) {
            if now >= at {
                // Missed periods collapse into one run.
                self.periodic_due = true;
                self.next_period = Some(now + every);
            }
        }
    }

    /// Picks the run to start now, if any.
    fn next_runnable(&self, now: Instant) -> Option<RunKind> {
        if let Some(retry) = self.retry {
            if now >= retry.at && self.allows(retry.kind) {
                return Some(retry.kind);
            }
        }
        if self.one_shot_due && self.allows(RunKind::OneShot) {
            return Some(RunKind::OneShot);
        }
        if self.periodic_due && self.allows(RunKind::Periodic) {
            return Some(RunKind::Periodic);
        }
        None
    }

    fn allows(&self, kind: RunKind) -> bool {
        let network = self.conditions.network();
        match kind {
            RunKind::OneShot => network.is_connected(),
            RunKind::Periodic => {
                let network_ok = if self.config.require_unmetered {
                    network == NetworkState::Unmetered
                } else {
                    network.is_connected()
                };
                let battery_ok =
                    !self.config.require_battery_not_low || !self.conditions.battery_low();
                network_ok && battery_ok
            }
        }
    }

    fn next_wake(&self, now: Instant) -> Instant {
        let mut wake = self.next_period;

        if let Some(retry) = self.retry {
            let at = if retry.at > now {
                retry.at
            } else {
                now + self.config.constraint_poll
            };
            wake = Some(wake.map_or(at, |w| w.min(at)));
        }

        if self.one_shot_due || self.periodic_due {
            let poll = now + self.config.constraint_poll;
            wake = Some(wake.map_or(poll, |w| w.min(poll)));
        }

        // Nothing scheduled: only a trigger or shutdown can wake us.
        wake.unwrap_or_else(|| now + Duration::from_secs(24 * 60 * 60))
    }

    async fn execute(&mut self, kind: RunKind) {
        let is_retry = self.retry.is_some_and(|r| r.kind == kind);
        match kind {
            RunKind::OneShot => self.one_shot_due = false,
            RunKind::Periodic => self.periodic_due = false,
        }
        self.retry = None;

        info!(kind = %kind, retry = is_retry, network = %self.conditions.network(), "Sync run starting");
        let outcome = self.task.run().await;

        match outcome {
            JobOutcome::Success => {
                info!(kind = %kind, "Sync run finished");
                self.clear_retry();
            }
            JobOutcome::Retry => self.schedule_retry(kind),
        }
    }

    fn schedule_retry(&mut self, kind: RunKind) {
        if self.config.max_retries > 0 && self.retries >= self.config.max_retries {
            error!(
                kind = %kind,
                max_retries = self.config.max_retries,
                "Sync run kept failing, giving up until next trigger"
            );
            self.clear_retry();
            return;
        }

        match self.backoff.next_backoff() {
            Some(delay) => {
                self.retries += 1;
                warn!(kind = %kind, ?delay, attempt = self.retries, "Sync run will be retried");
                self.retry = Some(PendingRetry {
                    kind,
                    at: Instant::now() + delay,
                });
            }
            None => {
                // Only reachable with a bounded max_elapsed_time.
                error!("Retry backoff exhausted");
                self.clear_retry();
            }
        }
    }

    fn clear_retry(&mut self) {
        self.retry = None;
        self.retries = 0;
        self.backoff.reset();
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
