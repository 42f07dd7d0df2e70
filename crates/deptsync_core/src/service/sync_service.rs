//! One reconciliation run: feed read, store phase, commit.
//!
//! # Responsibility
//! - Load the feed under a timeout and short-circuit bootstrap/empty feeds.
//! - Run the store phase on the blocking pool with a run-scoped connection.
//!
//! # Invariants
//! - The connection and its transaction live only inside the store phase and
//!   are released on every exit path.
//! - A timed-out store phase is cancelled cooperatively and awaited, so it
//!   never outlives the run that started it.
//! - At most one feed read is in flight per service; a read stuck past its
//!   timeout blocks new reads until it returns.

use crate::config::SyncConfig;
use crate::db::{open_db_with_options, DbError, OpenOptions};
use crate::feed::{load_feed, FeedError, FeedLoad};
use crate::model::association::AssociationLink;
use crate::reconcile::{ReconcileError, Reconciler, ReconciliationReport};
use crate::repo::association_store::SqliteAssociationStore;
use crate::repo::directory_repo::RepoError;
use async_trait::async_trait;
use log::{debug, warn};
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Run phase that can time out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    FeedRead,
    Store,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FeedRead => "feed_read",
            Self::Store => "store",
        }
    }
}

/// Successful run outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The feed did not exist and was created empty; no store access.
    Bootstrapped,
    /// The feed held no candidates; no store access.
    NoCandidates,
    Reconciled(ReconciliationReport),
}

impl RunOutcome {
    pub fn report(&self) -> Option<&ReconciliationReport> {
        match self {
            Self::Reconciled(report) => Some(report),
            Self::Bootstrapped | Self::NoCandidates => None,
        }
    }
}

/// Run-level failure. Never escapes the scheduler loop.
#[derive(Debug)]
pub enum SyncError {
    Feed(FeedError),
    /// An earlier feed read is still blocked; no new read was started.
    FeedStalled,
    Persistence(RepoError),
    Timeout { phase: RunPhase, after: Duration },
    Cancelled,
    /// The run task panicked or was aborted by the runtime.
    Aborted(String),
}

impl SyncError {
    /// Stable error kind for `error_code=` log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Feed(FeedError::Format { .. }) => "feed_format",
            Self::Feed(FeedError::Io { .. }) => "feed_io",
            Self::FeedStalled => "feed_stalled",
            Self::Persistence(_) => "persistence",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Aborted(_) => "aborted",
        }
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Feed(err) => write!(f, "{err}"),
            Self::FeedStalled => write!(f, "previous feed read has not returned yet"),
            Self::Persistence(err) => write!(f, "persistence failure: {err}"),
            Self::Timeout { phase, after } => write!(
                f,
                "{} phase timed out after {} ms",
                phase.as_str(),
                after.as_millis()
            ),
            Self::Cancelled => write!(f, "run cancelled"),
            Self::Aborted(message) => write!(f, "run aborted: {message}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Feed(err) => Some(err),
            Self::Persistence(err) => Some(err),
            Self::FeedStalled | Self::Timeout { .. } | Self::Cancelled | Self::Aborted(_) => {
                None
            }
        }
    }
}

impl From<FeedError> for SyncError {
    fn from(value: FeedError) -> Self {
        Self::Feed(value)
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        Self::Persistence(value)
    }
}

impl From<ReconcileError> for SyncError {
    fn from(value: ReconcileError) -> Self {
        match value {
            ReconcileError::Persistence(err) => Self::Persistence(err),
            ReconcileError::Cancelled { .. } => Self::Cancelled,
        }
    }
}

/// Unit of work driven by the scheduler.
#[async_trait]
pub trait SyncJob: Send + Sync + 'static {
    /// Executes one run. Implementations must observe `cancel` at their safe
    /// boundaries and return instead of blocking shutdown.
    async fn run(&self, cancel: CancellationToken) -> Result<RunOutcome, SyncError>;
}

/// Feed + SQLite reconciliation job.
#[derive(Debug, Clone)]
pub struct SyncService {
    feed_path: PathBuf,
    database_path: PathBuf,
    open_options: OpenOptions,
    reconciler: Reconciler,
    feed_timeout: Duration,
    store_timeout: Duration,
    feed_read_pending: Arc<AtomicBool>,
}

impl SyncService {
    pub fn new(feed_path: impl Into<PathBuf>, database_path: impl Into<PathBuf>) -> Self {
        Self::from_config(&SyncConfig::new(feed_path, database_path))
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            feed_path: config.data_file_path.clone(),
            database_path: config.database_path.clone(),
            open_options: OpenOptions::default(),
            reconciler: Reconciler::new(config.tenant_policy),
            feed_timeout: config.feed_timeout(),
            store_timeout: config.store_timeout(),
            feed_read_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_open_options(mut self, options: OpenOptions) -> Self {
        self.open_options = options;
        self
    }

    pub fn with_feed_timeout(mut self, timeout: Duration) -> Self {
        self.feed_timeout = timeout;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn feed_path(&self) -> &Path {
        &self.feed_path
    }

    /// Executes one full run.
    ///
    /// # Errors
    /// - `SyncError::Feed` for unreadable or malformed feeds.
    /// - `SyncError::Persistence` when opening, writing or committing fails.
    /// - `SyncError::Timeout` when a phase exceeds its bound.
    /// - `SyncError::Cancelled` when `cancel` fires before commit.
    pub async fn run_once(&self, cancel: CancellationToken) -> Result<RunOutcome, SyncError> {
        let candidates = match self.read_feed(&cancel).await? {
            FeedLoad::Bootstrapped => return Ok(RunOutcome::Bootstrapped),
            FeedLoad::NoCandidates => return Ok(RunOutcome::NoCandidates),
            FeedLoad::Candidates(candidates) => candidates,
        };
        debug!(
            "event=feed_load module=service status=ok candidates={} tenant_policy={}",
            candidates.len(),
            self.reconciler.policy().as_str()
        );

        self.reconcile_in_store(candidates, cancel)
            .await
            .map(RunOutcome::Reconciled)
    }

    async fn read_feed(&self, cancel: &CancellationToken) -> Result<FeedLoad, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let Some(pending) = PendingFeedRead::try_acquire(&self.feed_read_pending) else {
            warn!(
                "event=feed_load module=service status=skipped reason=previous_read_stalled path={}",
                self.feed_path.display()
            );
            return Err(SyncError::FeedStalled);
        };

        // The read owns its task: on timeout or cancel the handle is dropped
        // and `pending` is released only when the blocked read returns.
        let path = self.feed_path.clone();
        let mut read = tokio::spawn(async move {
            let _pending = pending;
            load_feed(&path).await
        });

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(SyncError::Cancelled),

            joined = tokio::time::timeout(self.feed_timeout, &mut read) => match joined {
                Ok(Ok(result)) => Ok(result?),
                Ok(Err(err)) => Err(SyncError::Aborted(err.to_string())),
                Err(_) => Err(SyncError::Timeout {
                    phase: RunPhase::FeedRead,
                    after: self.feed_timeout,
                }),
            },
        }
    }

    async fn reconcile_in_store(
        &self,
        candidates: Vec<AssociationLink>,
        cancel: CancellationToken,
    ) -> Result<ReconciliationReport, SyncError> {
        let store_cancel = cancel.child_token();
        let database_path = self.database_path.clone();
        let open_options = self.open_options;
        let reconciler = self.reconciler;
        let task_cancel = store_cancel.clone();

        let started_at = Instant::now();
        let mut task = tokio::task::spawn_blocking(move || {
            reconcile_blocking(
                &database_path,
                open_options,
                reconciler,
                &candidates,
                &task_cancel,
            )
        });

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = tokio::time::sleep(self.store_timeout) => {
                store_cancel.cancel();
                task.await
                    .map(|result| settle_after_store_deadline(result, self.store_timeout))
            }
        };

        debug!(
            "event=store_phase module=service status=done duration_ms={}",
            started_at.elapsed().as_millis()
        );

        match joined {
            Ok(result) => result,
            Err(err) => Err(SyncError::Aborted(err.to_string())),
        }
    }
}

#[async_trait]
impl SyncJob for SyncService {
    async fn run(&self, cancel: CancellationToken) -> Result<RunOutcome, SyncError> {
        self.run_once(cancel).await
    }
}

/// Exclusive right to read the feed; released when the read returns.
struct PendingFeedRead(Arc<AtomicBool>);

impl PendingFeedRead {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self(Arc::clone(flag)))
    }
}

impl Drop for PendingFeedRead {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Classifies the result of a store phase that was still running at its
/// deadline.
///
/// Cancellation and lock contention become `Timeout`. A commit that landed
/// right at the deadline is kept, and every other failure passes through.
fn settle_after_store_deadline(
    result: Result<ReconciliationReport, SyncError>,
    after: Duration,
) -> Result<ReconciliationReport, SyncError> {
    match result {
        Err(SyncError::Cancelled) => Err(SyncError::Timeout {
            phase: RunPhase::Store,
            after,
        }),
        Err(SyncError::Persistence(err)) if is_lock_contention(&err) => Err(SyncError::Timeout {
            phase: RunPhase::Store,
            after,
        }),
        other => other,
    }
}

fn is_lock_contention(err: &RepoError) -> bool {
    let source = match err {
        RepoError::Db(DbError::Sqlite(source)) | RepoError::Db(DbError::Migration { source, .. }) => {
            source
        }
        _ => return false,
    };
    matches!(
        source.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn reconcile_blocking(
    database_path: &Path,
    open_options: OpenOptions,
    reconciler: Reconciler,
    candidates: &[AssociationLink],
    cancel: &CancellationToken,
) -> Result<ReconciliationReport, SyncError> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    let mut conn =
        open_db_with_options(database_path, open_options).map_err(RepoError::from)?;
    let store = SqliteAssociationStore::begin(&mut conn)?;
    let report = reconciler.reconcile(candidates, store, cancel)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{settle_after_store_deadline, PendingFeedRead, RunPhase, SyncError};
    use crate::db::DbError;
    use crate::reconcile::ReconciliationReport;
    use crate::repo::directory_repo::RepoError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn sqlite_failure(code: std::os::raw::c_int) -> SyncError {
        SyncError::Persistence(RepoError::Db(DbError::Sqlite(
            rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None),
        )))
    }

    #[test]
    fn late_cancellation_and_busy_store_become_timeouts() {
        let after = Duration::from_millis(50);
        for result in [Err(SyncError::Cancelled), Err(sqlite_failure(rusqlite::ffi::SQLITE_BUSY))] {
            let err = settle_after_store_deadline(result, after).expect_err("must fail");
            assert!(matches!(
                err,
                SyncError::Timeout {
                    phase: RunPhase::Store,
                    ..
                }
            ));
        }
    }

    #[test]
    fn late_store_failures_keep_their_own_kind() {
        let after = Duration::from_millis(50);

        let constraint = settle_after_store_deadline(
            Err(sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT)),
            after,
        )
        .expect_err("must fail");
        assert_eq!(constraint.code(), "persistence");

        let missing_table = settle_after_store_deadline(
            Err(SyncError::Persistence(RepoError::MissingRequiredTable(
                "employee_departments",
            ))),
            after,
        )
        .expect_err("must fail");
        assert_eq!(missing_table.code(), "persistence");

        let committed = settle_after_store_deadline(Ok(ReconciliationReport::default()), after);
        assert!(committed.is_ok());
    }

    #[test]
    fn pending_feed_read_is_exclusive_until_dropped() {
        let flag = Arc::new(AtomicBool::new(false));

        let pending = PendingFeedRead::try_acquire(&flag).expect("first read");
        assert!(PendingFeedRead::try_acquire(&flag).is_none());
        assert!(flag.load(Ordering::Acquire));

        drop(pending);
        assert!(PendingFeedRead::try_acquire(&flag).is_some());
    }
}
