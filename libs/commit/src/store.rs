//! The persistent roster store seam.

use async_trait::async_trait;
use roster_id::{CommitId, RosterId};

use crate::batch::Batch;
use crate::committer::BatchApplied;
use crate::error::StoreError;
use crate::lifecycle::ManualEdit;
use crate::model::{StatusCounts, StoredAssignment};
use crate::report::CommitReport;

/// A store-held claim on a roster's write path across processes.
///
/// Dropping a lease without releasing it must still free the roster.
#[async_trait]
pub trait RosterLease: Send {
    async fn release(self: Box<Self>) -> Result<(), StoreError>;
}

/// Durable storage for roster assignments and commit reports.
///
/// Every write method runs as one transaction that either commits in full or
/// leaves the store untouched, and serializes with every other write to the
/// same roster. No method deletes an assignment.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Claims `roster_id` for one whole operation, waiting behind any other
    /// holder. Stores used by a single process return `None`; the pipeline's
    /// own roster lock already orders their operations.
    async fn lease_roster(
        &self,
        _roster_id: &RosterId,
    ) -> Result<Option<Box<dyn RosterLease>>, StoreError> {
        Ok(None)
    }

    /// Applies one batch, deciding each row with [`plan_row`](crate::plan_row).
    async fn commit_batch(&self, batch: &Batch) -> Result<BatchApplied, StoreError>;

    /// Promotes every `Open` row with a service to `Fixed`; returns the count.
    async fn finalize(&self, roster_id: &RosterId) -> Result<u64, StoreError>;

    /// Applies a planner edit under the lifecycle rules.
    async fn apply_manual_edit(&self, edit: &ManualEdit) -> Result<StoredAssignment, StoreError>;

    async fn list_assignments(&self, roster_id: &RosterId) -> Result<Vec<StoredAssignment>, StoreError>;

    async fn status_counts(&self, roster_id: &RosterId) -> Result<StatusCounts, StoreError>;

    async fn save_report(&self, report: &CommitReport) -> Result<(), StoreError>;

    async fn load_report(&self, commit_id: &CommitId) -> Result<Option<CommitReport>, StoreError>;

    /// Most recent reports for a roster, newest first.
    async fn recent_reports(
        &self,
        roster_id: &RosterId,
        limit: usize,
    ) -> Result<Vec<CommitReport>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
