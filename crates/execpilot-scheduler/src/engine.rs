//! Adaptive scheduler: the loop that drives processing cycles.
//!
//! One loop task sleeps for the current interval, runs a cycle, retunes the
//! interval from how long the cycle took, and sleeps again. Cycles of the loop
//! never overlap. `stop()` cancels the pending sleep; a cycle already running
//! is allowed to finish.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use execpilot_core::config::{RetunePolicy, SchedulerConfig};
use execpilot_core::error::{ExecPilotError, Result};
use execpilot_core::traits::UserDirectory;
use execpilot_core::types::UserRecord;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::runner::{PerUserReport, PerUserTaskRunner, TaskCounts, TriggerOutcome};

/// Why a cycle ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleTrigger {
    Scheduled,
    Manual,
}

/// Summary of one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub trigger: CycleTrigger,
    pub started_at: DateTime<Utc>,
    pub users_processed: usize,
    /// Paused users and users already in flight elsewhere.
    pub users_skipped: usize,
    pub per_task_counts: TaskCounts,
    pub errors_count: usize,
    /// The user directory could not be read; nothing was processed.
    pub load_failed: bool,
    pub duration_ms: u64,
    /// Interval in effect after this cycle.
    pub interval_ms: u64,
}

/// Read-only view of the engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub current_interval_ms: u64,
    pub next_run_at: Option<DateTime<Utc>>,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub cycles_completed: u64,
}

/// New interval after a cycle that took `duration_ms`.
///
/// Grows when the cycle used more than `grow_threshold` of the interval,
/// shrinks when it used less than `shrink_threshold` and did real work.
/// Always within `[min_ms, max_ms]`.
pub fn retune(
    current_ms: u64,
    duration_ms: u64,
    users_processed: usize,
    min_ms: u64,
    max_ms: u64,
    policy: &RetunePolicy,
) -> u64 {
    let current = current_ms.clamp(min_ms, max_ms);
    let ratio = duration_ms as f64 / current as f64;
    let next = if ratio > policy.grow_threshold {
        ((current as f64 * policy.grow_factor).round() as u64).min(max_ms)
    } else if ratio < policy.shrink_threshold && users_processed > 0 {
        ((current as f64 * policy.shrink_factor).round() as u64).max(min_ms)
    } else {
        current
    };
    next.clamp(min_ms, max_ms)
}

struct EngineState {
    running: bool,
    last_run_at: Option<DateTime<Utc>>,
    current_interval_ms: u64,
    min_interval_ms: u64,
    max_interval_ms: u64,
    next_run_at: Option<DateTime<Utc>>,
    cycles_completed: u64,
    cycles_started: u64,
    scheduled_cycles: u64,
}

struct LoopControl {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Marks a user as being processed; unmarks on drop.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    user_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, user_id: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string());
        inserted.then(|| Self {
            set,
            user_id: user_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.user_id);
    }
}

enum UserOutcome {
    Done(PerUserReport),
    Skipped,
    Panicked,
}

struct Inner {
    state: Mutex<EngineState>,
    directory: Arc<dyn UserDirectory>,
    runner: PerUserTaskRunner,
    in_flight: Mutex<HashSet<String>>,
    control: Mutex<Option<LoopControl>>,
    wake: Notify,
    retune: RetunePolicy,
    max_concurrent_users: usize,
    load_timeout: Duration,
    sweep_every: u64,
    run_on_start: bool,
}

/// Handle to the scheduler. Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct AdaptiveScheduler {
    inner: Arc<Inner>,
}

impl AdaptiveScheduler {
    pub fn new(directory: Arc<dyn UserDirectory>, runner: PerUserTaskRunner, config: &SchedulerConfig) -> Self {
        let state = EngineState {
            running: false,
            last_run_at: None,
            current_interval_ms: config.initial_interval_ms(),
            min_interval_ms: config.min_interval_ms(),
            max_interval_ms: config.max_interval_ms(),
            next_run_at: None,
            cycles_completed: 0,
            cycles_started: 0,
            scheduled_cycles: 0,
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                directory,
                runner,
                in_flight: Mutex::new(HashSet::new()),
                control: Mutex::new(None),
                wake: Notify::new(),
                retune: config.retune,
                max_concurrent_users: config.max_concurrent_users.max(1),
                load_timeout: Duration::from_secs(config.load_timeout_secs),
                sweep_every: config.sweep_every_cycles,
                run_on_start: config.run_on_start,
            }),
        }
    }

    pub fn runner(&self) -> &PerUserTaskRunner {
        &self.inner.runner
    }

    /// Spawn the cycle loop. No-op when already running.
    pub fn start(&self) {
        let mut control = lock(&self.inner.control);
        if control.is_some() {
            tracing::debug!("⏰ Scheduler already running");
            return;
        }
        lock(&self.inner.state).running = true;

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.run_loop(token).await });
        *control = Some(LoopControl { cancel, handle });
    }

    /// Cancel the pending timer and wait for the loop to exit. A cycle in
    /// progress completes first. No-op when not running.
    pub async fn stop(&self) {
        let control = lock(&self.inner.control).take();
        let Some(control) = control else {
            return;
        };
        control.cancel.cancel();
        if let Err(e) = control.handle.await {
            tracing::error!("❌ Scheduler loop ended abnormally: {e}");
        }
        let mut state = lock(&self.inner.state);
        state.running = false;
        state.next_run_at = None;
    }

    /// Run one cycle now. Does not retune the interval or move the timer.
    pub async fn run_once(&self) -> CycleReport {
        let mut report = self.inner.execute_cycle(CycleTrigger::Manual).await;
        report.interval_ms = lock(&self.inner.state).current_interval_ms;
        report
    }

    /// Set the interval in minutes. Rejected outside the configured bounds,
    /// leaving the state unchanged. A running loop reschedules immediately.
    pub fn set_interval(&self, minutes: f64) -> Result<()> {
        let mut state = lock(&self.inner.state);
        let (min, max) = (state.min_interval_ms, state.max_interval_ms);
        let requested = minutes * SchedulerConfig::MS_PER_MINUTE as f64;
        if !minutes.is_finite() || requested < min as f64 || requested > max as f64 {
            return Err(ExecPilotError::config(format!(
                "interval {minutes} min is outside [{}, {}] min",
                min as f64 / SchedulerConfig::MS_PER_MINUTE as f64,
                max as f64 / SchedulerConfig::MS_PER_MINUTE as f64
            )));
        }
        let interval_ms = (requested.round() as u64).clamp(min, max);
        state.current_interval_ms = interval_ms;
        if state.running {
            state.next_run_at = Some(Utc::now() + chrono::Duration::milliseconds(interval_ms as i64));
        }
        drop(state);

        tracing::info!("⏱️ Interval set to {minutes} min ({interval_ms}ms)");
        self.inner.wake.notify_one();
        Ok(())
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = lock(&self.inner.state);
        SchedulerStatus {
            running: state.running,
            last_run_at: state.last_run_at,
            current_interval_ms: state.current_interval_ms,
            next_run_at: state.next_run_at,
            min_interval_ms: state.min_interval_ms,
            max_interval_ms: state.max_interval_ms,
            cycles_completed: state.cycles_completed,
        }
    }

    /// Manual digest for one user.
    pub async fn trigger_digest(&self, user_id: &str) -> Result<TriggerOutcome> {
        let user = self.inner.find_user(user_id).await?;
        let outcome = self.inner.runner.send_digest(&user).await;
        tracing::info!(user_id, "📰 Manual digest: {outcome}");
        Ok(outcome)
    }

    /// Manual urgent-task alert for one user.
    pub async fn trigger_urgent_tasks(&self, user_id: &str) -> Result<TriggerOutcome> {
        let user = self.inner.find_user(user_id).await?;
        let outcome = self.inner.runner.send_urgent_task_alerts(&user).await;
        tracing::info!(user_id, "🚨 Manual urgent-task alert: {outcome}");
        Ok(outcome)
    }
}

impl Inner {
    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            "⏰ Scheduler started (interval {}ms, {} concurrent users)",
            lock(&self.state).current_interval_ms,
            self.max_concurrent_users
        );
        if self.run_on_start && !cancel.is_cancelled() {
            self.scheduled_cycle().await;
        }

        loop {
            let interval_ms = {
                let mut state = lock(&self.state);
                state.next_run_at =
                    Some(Utc::now() + chrono::Duration::milliseconds(state.current_interval_ms as i64));
                state.current_interval_ms
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {
                    tracing::debug!("🔁 Interval changed, rescheduling");
                    continue;
                }
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
            }
            self.scheduled_cycle().await;
        }
        tracing::info!("🛑 Scheduler stopped");
    }

    async fn scheduled_cycle(&self) {
        let mut report = self.execute_cycle(CycleTrigger::Scheduled).await;

        let sweep_due = {
            let mut state = lock(&self.state);
            if !report.load_failed {
                let next = retune(
                    state.current_interval_ms,
                    report.duration_ms,
                    report.users_processed,
                    state.min_interval_ms,
                    state.max_interval_ms,
                    &self.retune,
                );
                if next != state.current_interval_ms {
                    tracing::info!(
                        cycle = report.cycle,
                        "📐 Interval retuned {}ms → {}ms",
                        state.current_interval_ms,
                        next
                    );
                    state.current_interval_ms = next;
                }
            }
            report.interval_ms = state.current_interval_ms;
            state.scheduled_cycles += 1;
            self.sweep_every > 0 && state.scheduled_cycles % self.sweep_every == 0
        };

        if sweep_due {
            let removed = self.runner.dedup().sweep();
            tracing::debug!("🧹 Dedup sweep after cycle {}: {removed} removed", report.cycle);
        }
    }

    async fn execute_cycle(&self, trigger: CycleTrigger) -> CycleReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let cycle = {
            let mut state = lock(&self.state);
            state.cycles_started += 1;
            state.cycles_started
        };

        let mut report = CycleReport {
            cycle,
            trigger,
            started_at,
            users_processed: 0,
            users_skipped: 0,
            per_task_counts: TaskCounts::default(),
            errors_count: 0,
            load_failed: false,
            duration_ms: 0,
            interval_ms: 0,
        };

        match self.load_users().await {
            Ok(mut users) => {
                users.sort_by(|a, b| a.id.cmp(&b.id));
                let outcomes: Vec<UserOutcome> = futures::stream::iter(users)
                    .map(|user| self.process_user(user))
                    .buffered(self.max_concurrent_users)
                    .collect()
                    .await;
                for outcome in outcomes {
                    match outcome {
                        UserOutcome::Done(user_report) => {
                            report.users_processed += 1;
                            report.errors_count += user_report.errors.len();
                            report.per_task_counts.merge(&user_report.counts);
                        }
                        UserOutcome::Skipped => report.users_skipped += 1,
                        UserOutcome::Panicked => report.errors_count += 1,
                    }
                }
            }
            Err(e) => {
                tracing::error!(cycle, "❌ Cycle aborted, could not load users: {e}");
                report.load_failed = true;
                report.errors_count = 1;
            }
        }

        report.duration_ms = clock.elapsed().as_millis() as u64;
        {
            let mut state = lock(&self.state);
            state.last_run_at = Some(started_at);
            state.cycles_completed += 1;
            report.interval_ms = state.current_interval_ms;
        }

        for (kind, healthy, failures) in self.runner.dispatcher().health_status() {
            if !healthy {
                tracing::warn!(cycle, "🩺 {kind} channel unhealthy after {failures} consecutive failures");
            }
        }

        tracing::info!(
            cycle,
            "🔄 Cycle done ({:?}): {} users, {} skipped, {} errors in {}ms",
            trigger,
            report.users_processed,
            report.users_skipped,
            report.errors_count,
            report.duration_ms
        );
        report
    }

    async fn load_users(&self) -> Result<Vec<UserRecord>> {
        tokio::time::timeout(self.load_timeout, self.directory.list_active_users())
            .await
            .unwrap_or_else(|_| {
                Err(ExecPilotError::timeout(format!(
                    "list_active_users did not finish within {}s",
                    self.load_timeout.as_secs()
                )))
            })
            .map_err(|e| match e {
                ExecPilotError::Load(_) => e,
                other => ExecPilotError::load(other.to_string()),
            })
    }

    async fn find_user(&self, user_id: &str) -> Result<UserRecord> {
        self.load_users()
            .await?
            .into_iter()
            .find(|u| u.id == user_id)
            .ok_or_else(|| ExecPilotError::NotFound(format!("user {user_id}")))
    }

    async fn process_user(&self, user: UserRecord) -> UserOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &user.id) else {
            tracing::warn!(user_id = %user.id, "⚠️ User already in flight, skipping");
            return UserOutcome::Skipped;
        };

        match AssertUnwindSafe(self.runner.run(&user)).catch_unwind().await {
            Ok(report) if report.paused => UserOutcome::Skipped,
            Ok(report) => UserOutcome::Done(report),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                tracing::error!(user_id = %user.id, "💥 User processing panicked: {message}");
                UserOutcome::Panicked
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
