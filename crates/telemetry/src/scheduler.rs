//! Job scheduler
//!
//! Runs one [`Job`] on a dedicated Tokio task at a [`Cadence`]:
//!
//! - `FixedRate`: first run after `initial_delay`, then every `period`
//! - `Weekly`: first run at the next `weekday hh:mm` UTC, then every 7 days
//!
//! Runs never overlap. A run that outlasts its period delays the next one
//! instead of stacking up.
//!
//! # Lifecycle
//!
//! ```text
//!   Stopped ──start──▶ Scheduled ◀──▶ Running
//!      ▲                   │             │
//!      │                 stop          stop
//!      │                   ▼             ▼
//!      └──────────────── ShuttingDown (final cycle)
//! ```
//!
//! `stop` cancels the schedule, lets an in-flight run finish, then runs the
//! job's final cycle. All of that is bounded by the shutdown timeout; past
//! it the task is aborted. Both `start` and `stop` are idempotent.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, NaiveDateTime, NaiveTime, TimeDelta, Utc, Weekday};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;

const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Longest initial delay or period a fixed-rate cadence accepts
pub const MAX_DELAY: Duration = tally_config::MAX_SCHEDULE_DELAY;

/// Work executed by a [`Scheduler`].
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// One scheduled cycle. Failures are logged by the job itself.
    async fn run(&self);

    /// Final cycle run once when the scheduler stops
    async fn finish(&self) {}
}

/// Weekly wall-clock time in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyTime {
    weekday: Weekday,
    time: NaiveTime,
}

impl WeeklyTime {
    pub fn new(weekday: Weekday, hour: u32, minute: u32) -> Result<Self, SchedulerError> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or(SchedulerError::InvalidTime { hour, minute })?;
        Ok(Self { weekday, time })
    }

    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    /// First occurrence strictly after `now`.
    ///
    /// Takes this week's occurrence and rolls it a week forward if it is not
    /// in the future, so the result is always within `(now, now + 7d]`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let monday = today - Days::new(u64::from(now.weekday().num_days_from_monday()));
        let day = monday + Days::new(u64::from(self.weekday.num_days_from_monday()));

        let candidate = NaiveDateTime::new(day, self.time).and_utc();
        if candidate <= now {
            candidate + TimeDelta::weeks(1)
        } else {
            candidate
        }
    }

    /// Time from `now` until the next occurrence
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        (self.next_after(now) - now).to_std().unwrap_or_default()
    }
}

impl fmt::Display for WeeklyTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} UTC", self.weekday, self.time.format("%H:%M"))
    }
}

/// Fixed-rate timing, validated by [`Cadence::fixed_rate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRate {
    initial_delay: Duration,
    period: Duration,
}

impl FixedRate {
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

/// When a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    FixedRate(FixedRate),
    Weekly(WeeklyTime),
}

impl Cadence {
    /// First run after `initial_delay`, then every `period`.
    ///
    /// Rejects a zero period and delays longer than [`MAX_DELAY`].
    pub fn fixed_rate(initial_delay: Duration, period: Duration) -> Result<Self, SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }
        for delay in [initial_delay, period] {
            if delay > MAX_DELAY {
                return Err(SchedulerError::DelayTooLong(delay));
            }
        }
        Ok(Self::FixedRate(FixedRate {
            initial_delay,
            period,
        }))
    }

    pub fn weekly(weekday: Weekday, hour: u32, minute: u32) -> Result<Self, SchedulerError> {
        Ok(Self::Weekly(WeeklyTime::new(weekday, hour, minute)?))
    }

    /// Delay before the first run when scheduled at `now`
    pub fn initial_delay(&self, now: DateTime<Utc>) -> Duration {
        match self {
            Self::FixedRate(rate) => rate.initial_delay,
            Self::Weekly(at) => at.delay_from(now),
        }
    }

    pub fn period(&self) -> Duration {
        match self {
            Self::FixedRate(rate) => rate.period,
            Self::Weekly(_) => WEEK,
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedRate(rate) => {
                write!(f, "every {:?} after {:?}", rate.period, rate.initial_delay)
            }
            Self::Weekly(at) => write!(f, "weekly on {}", at),
        }
    }
}

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Stopped = 0,
    Scheduled = 1,
    Running = 2,
    ShuttingDown = 3,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Scheduled,
            2 => Self::Running,
            3 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

/// Shared lifecycle cell between the scheduler and its worker task
#[derive(Debug)]
struct Lifecycle(AtomicU8);

impl Lifecycle {
    fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Runs a single job on a cadence.
pub struct Scheduler {
    job: Arc<dyn Job>,
    cadence: Cadence,
    shutdown_timeout: Duration,
    lifecycle: Arc<Lifecycle>,
    started: AtomicBool,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn Job>, cadence: Cadence, shutdown_timeout: Duration) -> Self {
        Self {
            job,
            cadence,
            shutdown_timeout,
            lifecycle: Arc::new(Lifecycle(AtomicU8::new(LifecycleState::Stopped as u8))),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    pub fn job_name(&self) -> &str {
        self.job.name()
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    /// Scheduled or currently running
    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::Scheduled | LifecycleState::Running
        )
    }

    /// Spawn the worker task.
    ///
    /// Returns `Ok(true)` if this call started the schedule, `Ok(false)` if
    /// it had already been started. A stopped scheduler is not restarted.
    pub fn start(&self) -> Result<bool, SchedulerError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime {
            job: self.job.name().to_string(),
        })?;

        if self.started.swap(true, Ordering::AcqRel) {
            debug!(job = self.job.name(), "scheduler already started");
            return Ok(false);
        }

        let initial_delay = self.cadence.initial_delay(Utc::now());
        info!(
            job = self.job.name(),
            cadence = %self.cadence,
            first_run_in_secs = initial_delay.as_secs(),
            "job scheduled"
        );

        self.lifecycle.set(LifecycleState::Scheduled);
        let handle = runtime.spawn(run_worker(
            Arc::clone(&self.job),
            initial_delay,
            self.cadence.period(),
            Arc::clone(&self.lifecycle),
            self.cancel.clone(),
        ));
        *self.worker.lock() = Some(handle);

        Ok(true)
    }

    /// Undo a `start` without a final cycle.
    ///
    /// Aborts the worker and returns the scheduler to its initial state so
    /// it can be started again. Used to roll back a partially started
    /// service.
    pub(crate) fn revoke(&self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
        self.lifecycle.set(LifecycleState::Stopped);
        self.started.store(false, Ordering::Release);
        debug!(job = self.job.name(), "scheduler start revoked");
    }

    /// Cancel the schedule and run the job's final cycle.
    ///
    /// Waits at most the shutdown timeout, then aborts the worker. Calling
    /// `stop` again, or on a scheduler that never started, does nothing.
    pub async fn stop(&self) {
        loop {
            let current = self.lifecycle.get();
            if matches!(
                current,
                LifecycleState::Stopped | LifecycleState::ShuttingDown
            ) {
                return;
            }
            if self.lifecycle.transition(current, LifecycleState::ShuttingDown) {
                break;
            }
        }

        debug!(job = self.job.name(), "stopping scheduler");
        self.cancel.cancel();

        let handle = self.worker.lock().take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => {
                    info!(job = self.job.name(), "job stopped");
                }
                Ok(Err(e)) => {
                    warn!(job = self.job.name(), error = %e, "job task failed during shutdown");
                }
                Err(_) => {
                    handle.abort();
                    warn!(
                        job = self.job.name(),
                        timeout_secs = self.shutdown_timeout.as_secs(),
                        "job did not finish within shutdown timeout, aborted"
                    );
                }
            }
        }

        self.lifecycle.set(LifecycleState::Stopped);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Dropped without stop(): no final cycle
        if let Some(handle) = self.worker.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_worker(
    job: Arc<dyn Job>,
    initial_delay: Duration,
    period: Duration,
    lifecycle: Arc<Lifecycle>,
    cancel: CancellationToken,
) {
    let now = Instant::now();
    let first = now.checked_add(initial_delay).unwrap_or(now + MAX_DELAY);
    let mut ticker = tokio::time::interval_at(first, period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !lifecycle.transition(LifecycleState::Scheduled, LifecycleState::Running) {
                    break;
                }
                job.run().await;
                if !lifecycle.transition(LifecycleState::Running, LifecycleState::Scheduled) {
                    break;
                }
            }
        }
    }

    debug!(job = job.name(), "running final cycle");
    job.finish().await;
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod scheduler_test;
