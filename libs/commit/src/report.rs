//! Aggregate outcome of one commit operation.
//!
//! A report is produced for every commit operation, including ones where
//! some or all batches fail. Partial success is an ordinary outcome.

use std::time::Duration;

use chrono::{DateTime, Utc};
use roster_id::{CommitId, RosterId};
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::committer::{BatchApplied, ProtectedRowConflict};
use crate::error::CommitError;
use crate::model::{NaturalKey, StatusCounts};
use crate::validate::RejectedCandidate;

/// Category of a batch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DuplicateKeyDefect,
    StoreTransaction,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Whether resubmitting the batch verbatim may succeed.
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<NaturalKey>,
}

impl From<&CommitError> for BatchFailure {
    fn from(err: &CommitError) -> Self {
        let (kind, key) = match err {
            CommitError::DuplicateKey(defect) => (FailureKind::DuplicateKeyDefect, Some(defect.key)),
            CommitError::Store(_) => (FailureKind::StoreTransaction, None),
            CommitError::Timeout { .. } => (FailureKind::Timeout, None),
        };
        Self {
            kind,
            message: err.to_string(),
            retryable: err.is_retryable(),
            key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Succeeded {
        inserted: usize,
        updated: usize,
        unchanged: usize,
        skipped: usize,
    },
    Failed(BatchFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub index: usize,
    pub rows: usize,
    pub fingerprint: String,
    pub elapsed_ms: u64,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    pub fn new(batch: &Batch, result: &Result<BatchApplied, CommitError>, elapsed: Duration) -> Self {
        let outcome = match result {
            Ok(applied) => BatchOutcome::Succeeded {
                inserted: applied.inserted,
                updated: applied.updated,
                unchanged: applied.unchanged,
                skipped: applied.skipped(),
            },
            Err(e) => BatchOutcome::Failed(BatchFailure::from(e)),
        };
        Self {
            index: batch.index(),
            rows: batch.len(),
            fingerprint: batch.fingerprint(),
            elapsed_ms: elapsed.as_millis() as u64,
            outcome,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Succeeded { .. })
    }

    pub fn failure(&self) -> Option<&BatchFailure> {
        match &self.outcome {
            BatchOutcome::Failed(f) => Some(f),
            BatchOutcome::Succeeded { .. } => None,
        }
    }
}

/// The sole result surfaced to callers of a commit operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReport {
    pub commit_id: CommitId,
    pub roster_id: RosterId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_candidates: usize,
    pub rejected: Vec<RejectedCandidate>,
    pub duplicates_removed: usize,
    pub batch_size: usize,
    pub batch_count: usize,
    pub batches: Vec<BatchReport>,
    pub conflicts: Vec<ProtectedRowConflict>,
    /// Counts by status after the operation; absent if the store could not be read.
    pub final_counts: Option<StatusCounts>,
    /// The operation deadline passed before every batch was attempted.
    pub timed_out: bool,
}

impl CommitReport {
    pub fn new(roster_id: RosterId, batch_size: usize) -> Self {
        let now = Utc::now();
        Self {
            commit_id: CommitId::new(),
            roster_id,
            started_at: now,
            finished_at: now,
            total_candidates: 0,
            rejected: Vec::new(),
            duplicates_removed: 0,
            batch_size,
            batch_count: 0,
            batches: Vec::new(),
            conflicts: Vec::new(),
            final_counts: None,
            timed_out: false,
        }
    }

    /// Records a batch result, keeping any protected-row conflicts it produced.
    pub fn record_batch(
        &mut self,
        batch: &Batch,
        result: Result<BatchApplied, CommitError>,
        elapsed: Duration,
    ) {
        self.batches.push(BatchReport::new(batch, &result, elapsed));
        if let Ok(applied) = result {
            self.conflicts.extend(applied.conflicts);
        }
    }

    pub fn succeeded_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.succeeded()).count()
    }

    pub fn failed_batches(&self) -> usize {
        self.batches.len() - self.succeeded_batches()
    }

    pub fn rows_skipped(&self) -> usize {
        self.conflicts.len()
    }

    pub fn rows_written(&self) -> usize {
        self.batches
            .iter()
            .map(|b| match b.outcome {
                BatchOutcome::Succeeded {
                    inserted, updated, ..
                } => inserted + updated,
                BatchOutcome::Failed(_) => 0,
            })
            .sum()
    }

    /// True when every batch committed; skipped rows do not count against it.
    pub fn is_complete(&self) -> bool {
        !self.timed_out && self.batches.iter().all(BatchReport::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchReport> {
        self.batches.iter().filter(|b| !b.succeeded())
    }
}

/// Result of a Finalize operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeReport {
    pub roster_id: RosterId,
    pub promoted: u64,
}
