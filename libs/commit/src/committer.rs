//! Atomic, protection-aware application of one batch.
//!
//! [`plan_row`] is the single place that decides what happens to a candidate
//! given the row currently stored under its key. Store implementations call
//! it inside their transaction; [`Committer`] drives the store for one batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use roster_id::{AssignmentId, ServiceId};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::batch::Batch;
use crate::error::{CommitError, DuplicateKeyDefect};
use crate::lifecycle::{authorize, Actor};
use crate::model::{AssignmentCandidate, NaturalKey, Source, Status, StoredAssignment};
use crate::store::AssignmentStore;

/// A candidate that targeted a protected row and was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedRowConflict {
    pub key: NaturalKey,
    pub candidate_index: usize,
    pub existing_id: AssignmentId,
    pub existing_status: Status,
    pub existing_service_id: Option<ServiceId>,
    pub proposed_service_id: Option<ServiceId>,
}

/// What a store must do for one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowPlan {
    /// No row under this key yet; insert this new `Open` row.
    Insert(StoredAssignment),
    /// Overwrite the mutable fields of an existing `Open` row.
    Update(StoredAssignment),
    /// The existing `Open` row already holds exactly this candidate.
    Unchanged(AssignmentId),
    /// The existing row is protected; write nothing.
    Skip(ProtectedRowConflict),
}

/// Decides the effect of `candidate` on the row stored under its key.
///
/// Never returns a plan that deletes a row, changes a row's identity, or
/// changes a protected row.
pub fn plan_row(
    existing: Option<&StoredAssignment>,
    candidate: &AssignmentCandidate,
    candidate_index: usize,
    now: DateTime<Utc>,
) -> RowPlan {
    let Some(row) = existing else {
        return RowPlan::Insert(StoredAssignment {
            id: AssignmentId::new(),
            roster_id: candidate.roster_id,
            employee_id: candidate.employee_id,
            date: candidate.date,
            daypart: candidate.daypart,
            service_id: candidate.service_id,
            status: Status::Open,
            source: Source::Solver,
            confidence: candidate.confidence,
            previous_service_id: None,
            created_at: now,
            updated_at: now,
        });
    };

    if authorize(Actor::Solver, Some(row.status), Status::Open).is_err() {
        return RowPlan::Skip(ProtectedRowConflict {
            key: row.key(),
            candidate_index,
            existing_id: row.id,
            existing_status: row.status,
            existing_service_id: row.service_id,
            proposed_service_id: candidate.service_id,
        });
    }

    if row.service_id == candidate.service_id
        && row.confidence == candidate.confidence
        && row.source == Source::Solver
    {
        return RowPlan::Unchanged(row.id);
    }

    RowPlan::Update(StoredAssignment {
        service_id: candidate.service_id,
        confidence: candidate.confidence,
        source: Source::Solver,
        previous_service_id: row.service_id,
        updated_at: now,
        ..row.clone()
    })
}

/// Row counts and conflicts produced by one committed batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchApplied {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub conflicts: Vec<ProtectedRowConflict>,
}

impl BatchApplied {
    pub fn record(&mut self, plan: &RowPlan) {
        match plan {
            RowPlan::Insert(_) => self.inserted += 1,
            RowPlan::Update(_) => self.updated += 1,
            RowPlan::Unchanged(_) => self.unchanged += 1,
            RowPlan::Skip(conflict) => self.conflicts.push(conflict.clone()),
        }
    }

    pub fn skipped(&self) -> usize {
        self.conflicts.len()
    }
}

/// Applies batches to a store, one transaction per batch.
#[derive(Clone)]
pub struct Committer {
    store: Arc<dyn AssignmentStore>,
}

impl Committer {
    pub fn new(store: Arc<dyn AssignmentStore>) -> Self {
        Self { store }
    }

    /// Commits `batch` atomically.
    ///
    /// A batch containing a repeated natural key is refused before the store is
    /// touched. When `timeout` elapses the in-flight transaction is dropped,
    /// which rolls it back.
    #[instrument(skip(self, batch), fields(roster_id = %batch.roster_id(), batch = batch.index(), rows = batch.len()))]
    pub async fn commit(
        &self,
        batch: &Batch,
        timeout: Option<Duration>,
    ) -> Result<BatchApplied, CommitError> {
        if let Some(key) = batch.first_duplicate() {
            error!(
                key = %key,
                fingerprint = %batch.fingerprint(),
                "Duplicate natural key inside batch; deduplication invariant violated"
            );
            return Err(DuplicateKeyDefect { key }.into());
        }

        if batch.is_empty() {
            return Ok(BatchApplied::default());
        }

        let applied = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.store.commit_batch(batch))
                .await
                .map_err(|_| {
                    warn!(limit_ms = limit.as_millis() as u64, "Batch commit timed out");
                    CommitError::Timeout { limit }
                })??,
            None => self.store.commit_batch(batch).await?,
        };

        for conflict in &applied.conflicts {
            warn!(
                key = %conflict.key,
                status = %conflict.existing_status,
                "Skipped candidate targeting protected row"
            );
        }

        info!(
            inserted = applied.inserted,
            updated = applied.updated,
            unchanged = applied.unchanged,
            skipped = applied.skipped(),
            "Batch committed"
        );

        Ok(applied)
    }
}
