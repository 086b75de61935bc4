//! End-to-end commit operation.
//!
//! ```text
//! candidates -> ingest -> deduplicate -> Batcher -> Committer (per batch) -> CommitReport
//! ```
//!
//! Batches of one operation run sequentially. Operations on the same roster
//! are serialized in invocation order through a FIFO per-roster lock, and
//! across processes through the store's roster lease; operations on different
//! rosters may run concurrently up to `max_parallel_rosters` in
//! [`CommitPipeline::commit_many`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use roster_id::RosterId;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::batch::{Batch, Batcher, DEFAULT_BATCH_SIZE};
use crate::committer::Committer;
use crate::dedup::deduplicate;
use crate::error::{CommitError, StoreError};
use crate::lifecycle::ManualEdit;
use crate::model::StoredAssignment;
use crate::report::{BatchReport, CommitReport, FailureKind, FinalizeReport};
use crate::store::{AssignmentStore, RosterLease};
use crate::validate::{ingest, RawCandidate};

/// Configuration for the commit pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum rows per batch transaction.
    pub batch_size: usize,

    /// Time budget for a single batch transaction.
    pub batch_timeout: Option<Duration>,

    /// Time budget for a whole commit operation, measured from invocation.
    pub operation_timeout: Option<Duration>,

    /// Maximum rosters committed concurrently by `commit_many`.
    pub max_parallel_rosters: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: None,
            operation_timeout: None,
            max_parallel_rosters: 4,
        }
    }
}

/// One optimizer run's output for one roster.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub roster_id: RosterId,
    pub candidates: Vec<RawCandidate>,
    /// Overrides the configured operation timeout.
    pub timeout: Option<Duration>,
}

impl CommitRequest {
    pub fn new(roster_id: RosterId, candidates: Vec<RawCandidate>) -> Self {
        Self {
            roster_id,
            candidates,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// FIFO write locks, one per roster.
#[derive(Default)]
struct RosterLocks {
    locks: StdMutex<HashMap<RosterId, Arc<Mutex<()>>>>,
}

impl RosterLocks {
    async fn acquire(&self, roster_id: RosterId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(roster_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Drives commit operations, Finalize and planner edits against one store.
pub struct CommitPipeline {
    store: Arc<dyn AssignmentStore>,
    committer: Committer,
    batcher: Batcher,
    config: PipelineConfig,
    locks: RosterLocks,
}

impl CommitPipeline {
    pub fn new(store: Arc<dyn AssignmentStore>, config: PipelineConfig) -> Self {
        Self {
            committer: Committer::new(store.clone()),
            batcher: Batcher::new(config.batch_size),
            store,
            config,
            locks: RosterLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn AssignmentStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one commit operation and returns its report.
    ///
    /// Never fails as a whole: validation rejects, protected rows, failed
    /// batches and timeouts all end up in the report. Batches committed before
    /// a failure or timeout stay committed.
    #[instrument(skip(self, request), fields(roster_id = %request.roster_id, candidates = request.candidates.len()))]
    pub async fn commit(&self, request: CommitRequest) -> CommitReport {
        let CommitRequest {
            roster_id,
            candidates,
            timeout,
        } = request;
        let operation_limit = timeout.or(self.config.operation_timeout);
        let deadline = operation_limit.map(|limit| Instant::now() + limit);

        let _guard = self.locks.acquire(roster_id).await;
        let lease = self.lease_until(&roster_id, deadline).await;
        let report = self.run(roster_id, candidates, deadline, operation_limit).await;
        release(lease).await;
        report
    }

    async fn run(
        &self,
        roster_id: RosterId,
        candidates: Vec<RawCandidate>,
        deadline: Option<Instant>,
        operation_limit: Option<Duration>,
    ) -> CommitReport {
        let mut report = CommitReport::new(roster_id, self.batcher.size());
        report.total_candidates = candidates.len();

        let ingested = ingest(&roster_id, candidates);
        if !ingested.rejected.is_empty() {
            warn!(rejected = ingested.rejected.len(), "Rejected invalid candidates");
        }
        report.rejected = ingested.rejected;

        let deduped = deduplicate(ingested.accepted);
        report.duplicates_removed = deduped.duplicates_removed;

        let batches = match self.batcher.split(roster_id, deduped.survivors.clone()) {
            Ok(batches) => batches,
            Err(defect) => {
                error!(key = %defect.key, "Deduplicated input still contains a repeated key");
                let whole = Batch::new(0, roster_id, deduped.survivors);
                report.batch_count = 1;
                report.record_batch(&whole, Err(defect.into()), Duration::ZERO);
                return self.finish(report).await;
            }
        };
        report.batch_count = batches.len();

        info!(
            commit_id = %report.commit_id,
            accepted = deduped.survivors.len(),
            duplicates_removed = report.duplicates_removed,
            batches = batches.len(),
            "Starting commit"
        );

        for (position, batch) in batches.iter().enumerate() {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.abandon(&batches[position..], operation_limit, &mut report);
                        break;
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            let limit = match (self.config.batch_timeout, remaining) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            let started = Instant::now();
            let result = self.committer.commit(batch, limit).await;
            if let Err(e) = &result {
                warn!(
                    batch = batch.index(),
                    error = %e,
                    retryable = e.is_retryable(),
                    "Batch failed"
                );
                if matches!(e, CommitError::Timeout { .. })
                    && deadline.is_some_and(|d| Instant::now() >= d)
                {
                    report.timed_out = true;
                }
            }
            report.record_batch(batch, result, started.elapsed());
        }

        self.finish(report).await
    }

    /// Takes the store's lease on `roster_id`, giving up at `deadline`.
    ///
    /// Without a lease the operation still runs; each batch transaction keeps
    /// its own roster lock.
    async fn lease_until(
        &self,
        roster_id: &RosterId,
        deadline: Option<Instant>,
    ) -> Option<Box<dyn RosterLease>> {
        let acquire = self.store.lease_roster(roster_id);
        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, acquire).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Commit deadline passed while waiting for the roster lease");
                    return None;
                }
            },
            None => acquire.await,
        };
        match result {
            Ok(lease) => lease,
            Err(e) => {
                warn!(error = %e, "Proceeding without roster lease");
                None
            }
        }
    }

    /// Marks batches that were never started because the deadline passed.
    fn abandon(&self, remaining: &[Batch], limit: Option<Duration>, report: &mut CommitReport) {
        warn!(
            remaining = remaining.len(),
            "Commit deadline exceeded; abandoning unprocessed batches"
        );
        report.timed_out = true;
        let limit = limit.unwrap_or_default();
        for batch in remaining {
            report.record_batch(batch, Err(CommitError::Timeout { limit }), Duration::ZERO);
        }
    }

    async fn finish(&self, mut report: CommitReport) -> CommitReport {
        match self.store.status_counts(&report.roster_id).await {
            Ok(counts) => report.final_counts = Some(counts),
            Err(e) => warn!(error = %e, "Failed to read final status counts"),
        }
        report.finished_at = Utc::now();

        if let Err(e) = self.store.save_report(&report).await {
            warn!(commit_id = %report.commit_id, error = %e, "Failed to persist commit report");
        }

        let timeouts = report
            .failures()
            .filter(|b| b.failure().is_some_and(|f| f.kind == FailureKind::Timeout))
            .count();
        info!(
            commit_id = %report.commit_id,
            succeeded = report.succeeded_batches(),
            failed = report.failed_batches(),
            timeouts,
            skipped = report.rows_skipped(),
            rejected = report.rejected.len(),
            "Commit finished"
        );

        report
    }

    /// Runs several commit operations with bounded parallelism across rosters.
    ///
    /// Requests for the same roster run one after another in the order given.
    /// Reports come back in request order.
    pub async fn commit_many(&self, requests: Vec<CommitRequest>) -> Vec<CommitReport> {
        let total = requests.len();
        let mut groups: Vec<Vec<(usize, CommitRequest)>> = Vec::new();
        let mut group_of: HashMap<RosterId, usize> = HashMap::new();
        for (position, request) in requests.into_iter().enumerate() {
            let group = *group_of.entry(request.roster_id).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push((position, request));
        }

        let finished: Vec<Vec<(usize, CommitReport)>> = stream::iter(groups)
            .map(|group| async move {
                let mut reports = Vec::with_capacity(group.len());
                for (position, request) in group {
                    reports.push((position, self.commit(request).await));
                }
                reports
            })
            .buffer_unordered(self.config.max_parallel_rosters.max(1))
            .collect()
            .await;

        let mut ordered: Vec<(usize, CommitReport)> = finished.into_iter().flatten().collect();
        ordered.sort_by_key(|(position, _)| *position);
        debug_assert_eq!(ordered.len(), total);
        ordered.into_iter().map(|(_, report)| report).collect()
    }

    /// Commits a single batch again, as a caller-driven retry.
    #[instrument(skip(self, batch), fields(roster_id = %batch.roster_id(), batch = batch.index()))]
    pub async fn resubmit(&self, batch: Batch) -> BatchReport {
        let _guard = self.locks.acquire(*batch.roster_id()).await;
        let lease = self.lease_until(batch.roster_id(), None).await;
        let started = Instant::now();
        let result = self.committer.commit(&batch, self.config.batch_timeout).await;
        release(lease).await;
        BatchReport::new(&batch, &result, started.elapsed())
    }

    /// Promotes `Open` rows with a service to `Fixed`.
    #[instrument(skip(self), fields(roster_id = %roster_id))]
    pub async fn finalize(&self, roster_id: RosterId) -> Result<FinalizeReport, StoreError> {
        let _guard = self.locks.acquire(roster_id).await;
        let lease = self.store.lease_roster(&roster_id).await?;
        let promoted = self.store.finalize(&roster_id).await;
        release(lease).await;
        let promoted = promoted?;
        info!(promoted, "Roster finalized");
        Ok(FinalizeReport {
            roster_id,
            promoted,
        })
    }

    /// Applies a planner edit, including reverts to `Open`.
    #[instrument(skip(self, edit), fields(roster_id = %edit.roster_id, status = %edit.status))]
    pub async fn manual_edit(&self, edit: ManualEdit) -> Result<StoredAssignment, StoreError> {
        let _guard = self.locks.acquire(edit.roster_id).await;
        let lease = self.store.lease_roster(&edit.roster_id).await?;
        let row = self.store.apply_manual_edit(&edit).await;
        release(lease).await;
        let row = row?;
        info!(assignment_id = %row.id, "Applied manual edit");
        Ok(row)
    }
}

async fn release(lease: Option<Box<dyn RosterLease>>) {
    if let Some(lease) = lease {
        if let Err(e) = lease.release().await {
            warn!(error = %e, "Failed to release roster lease");
        }
    }
}
