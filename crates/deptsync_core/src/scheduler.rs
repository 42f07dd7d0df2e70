//! Fixed-interval background scheduler for reconciliation runs.
//!
//! # Responsibility
//! - Trigger one run immediately on start, then on every interval tick.
//! - Keep runs strictly serialized and keep ticking after failed runs.
//! - Stop cooperatively: cancel, wait for the in-flight run, then exit.
//!
//! # Invariants
//! - At most one run is active at any instant; busy ticks are dropped.
//! - The in-progress flag is released by `RunGuard::drop`, on every exit
//!   path of the run task including panics.
//! - Run failures are logged at the run boundary and never end the loop.

use crate::service::sync_service::{RunOutcome, SyncError, SyncJob};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            STATE_RUNNING => Self::Running,
            STATE_STOPPED => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub overlaps_skipped: u64,
}

#[derive(Default)]
struct Shared {
    state: AtomicU8,
    in_progress: AtomicBool,
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    overlaps_skipped: AtomicU64,
}

impl Shared {
    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            runs_started: self.runs_started.load(Ordering::Acquire),
            runs_succeeded: self.runs_succeeded.load(Ordering::Acquire),
            runs_failed: self.runs_failed.load(Ordering::Acquire),
            overlaps_skipped: self.overlaps_skipped.load(Ordering::Acquire),
        }
    }
}

/// Exclusive right to execute one run.
struct RunGuard {
    shared: Arc<Shared>,
}

impl RunGuard {
    fn try_acquire(shared: &Arc<Shared>) -> Option<Self> {
        shared
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let _ = shared.state.compare_exchange(
            STATE_IDLE,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        Some(Self {
            shared: Arc::clone(shared),
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let _ = self.shared.state.compare_exchange(
            STATE_RUNNING,
            STATE_IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.shared.in_progress.store(false, Ordering::Release);
    }
}

/// Drives a [`SyncJob`] on a fixed interval.
pub struct Scheduler<J: SyncJob> {
    job: Arc<J>,
    interval: Duration,
}

impl<J: SyncJob> Scheduler<J> {
    pub fn new(job: J, interval: Duration) -> Self {
        Self {
            job: Arc::new(job),
            interval,
        }
    }

    /// Spawns the scheduling loop on the current tokio runtime.
    ///
    /// The first run starts immediately; later runs start on interval ticks
    /// measured from the loop start.
    pub fn start(self) -> SchedulerHandle {
        let shared = Arc::new(Shared::default());
        let shutdown = CancellationToken::new();

        info!(
            "event=scheduler_start module=scheduler status=ok interval_ms={}",
            self.interval.as_millis()
        );

        let task = tokio::spawn(run_loop(
            self.job,
            self.interval,
            Arc::clone(&shared),
            shutdown.clone(),
        ));

        SchedulerHandle {
            shutdown,
            task,
            shared,
        }
    }
}

/// Owned handle to a started scheduler.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats()
    }

    /// Token observed by the loop and every run; cancelling it requests stop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Requests cooperative cancellation and waits until the loop and any
    /// in-flight run have returned.
    pub async fn stop(self) -> SchedulerStats {
        self.shutdown.cancel();
        if let Err(err) = self.task.await {
            error!("event=scheduler_stop module=scheduler status=error error={err}");
            self.shared.state.store(STATE_STOPPED, Ordering::Release);
        }
        let stats = self.shared.stats();
        info!(
            "event=scheduler_stop module=scheduler status=ok runs_started={} runs_succeeded={} runs_failed={} overlaps_skipped={}",
            stats.runs_started, stats.runs_succeeded, stats.runs_failed, stats.overlaps_skipped
        );
        stats
    }
}

async fn run_loop<J: SyncJob>(
    job: Arc<J>,
    interval: Duration,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            _ = ticker.tick() => {}
        }

        let Some(guard) = RunGuard::try_acquire(&shared) else {
            shared.overlaps_skipped.fetch_add(1, Ordering::AcqRel);
            warn!("event=sync_tick module=scheduler status=skipped reason=overlap");
            continue;
        };

        in_flight = Some(tokio::spawn(run_guarded(
            Arc::clone(&job),
            guard,
            shutdown.child_token(),
        )));
    }

    if let Some(run) = in_flight.take() {
        if let Err(err) = run.await {
            error!("event=sync_run module=scheduler status=error error_code=aborted error={err}");
        }
    }
    shared.state.store(STATE_STOPPED, Ordering::Release);
}

async fn run_guarded<J: SyncJob>(job: Arc<J>, guard: RunGuard, cancel: CancellationToken) {
    guard.shared.runs_started.fetch_add(1, Ordering::AcqRel);
    let counter = match execute_logged_run(job, cancel).await {
        Ok(_) => &guard.shared.runs_succeeded,
        Err(_) => &guard.shared.runs_failed,
    };
    counter.fetch_add(1, Ordering::AcqRel);
    drop(guard);
}

/// Executes one run with start/ok/error events and a fresh `run_id`.
///
/// A panic inside the job is caught at this boundary and reported as
/// `SyncError::Aborted`.
pub async fn execute_logged_run<J: SyncJob>(
    job: Arc<J>,
    cancel: CancellationToken,
) -> Result<RunOutcome, SyncError> {
    let run_id = Uuid::new_v4();
    let started_at = Instant::now();
    info!("event=sync_run module=scheduler status=start run_id={run_id}");

    let result = match tokio::spawn(async move { job.run(cancel).await }).await {
        Ok(result) => result,
        Err(err) => Err(SyncError::Aborted(err.to_string())),
    };
    let duration_ms = started_at.elapsed().as_millis();

    match &result {
        Ok(RunOutcome::Bootstrapped) => info!(
            "event=sync_run module=scheduler status=ok run_id={run_id} duration_ms={duration_ms} outcome=bootstrapped created=0 skipped_existing=0 skipped_missing_reference=0"
        ),
        Ok(RunOutcome::NoCandidates) => info!(
            "event=sync_run module=scheduler status=ok run_id={run_id} duration_ms={duration_ms} outcome=no_candidates created=0 skipped_existing=0 skipped_missing_reference=0"
        ),
        Ok(RunOutcome::Reconciled(report)) => info!(
            "event=sync_run module=scheduler status=ok run_id={run_id} duration_ms={duration_ms} outcome=reconciled candidates={} created={} skipped_existing={} skipped_missing_reference={} skipped_tenant_mismatch={} cross_tenant={}",
            report.candidates,
            report.created,
            report.skipped_existing,
            report.skipped_missing_reference,
            report.skipped_tenant_mismatch,
            report.cross_tenant
        ),
        Err(err) => error!(
            "event=sync_run module=scheduler status=error run_id={run_id} duration_ms={duration_ms} error_code={} error={err}",
            err.code()
        ),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::{RunGuard, SchedulerState, Shared};
    use std::sync::Arc;

    #[test]
    fn run_guard_is_exclusive_and_released_on_drop() {
        let shared = Arc::new(Shared::default());

        let guard = RunGuard::try_acquire(&shared).expect("first acquire");
        assert!(RunGuard::try_acquire(&shared).is_none());
        assert_eq!(
            SchedulerState::from_u8(shared.state.load(std::sync::atomic::Ordering::Acquire)),
            SchedulerState::Running
        );

        drop(guard);
        assert_eq!(
            SchedulerState::from_u8(shared.state.load(std::sync::atomic::Ordering::Acquire)),
            SchedulerState::Idle
        );
        assert!(RunGuard::try_acquire(&shared).is_some());
    }
}
