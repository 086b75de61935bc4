//! In-process [`AssignmentStore`].
//!
//! Holds every roster in memory behind one async mutex, which gives the same
//! per-roster write serialization the Postgres store gets from advisory
//! locks. Each batch is applied to a staged copy of the roster and swapped in
//! only after every row succeeded.
//!
//! Fault injection (failed batches, slow commits, an unavailable store) lets
//! tests exercise rollback, retry and timeout paths.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use roster_id::{CommitId, RosterId};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::batch::Batch;
use crate::committer::{plan_row, BatchApplied, RowPlan};
use crate::error::StoreError;
use crate::lifecycle::{finalizes, ManualEdit};
use crate::model::{NaturalKey, Status, StatusCounts, StoredAssignment};
use crate::report::CommitReport;
use crate::store::AssignmentStore;

type RosterRows = HashMap<NaturalKey, StoredAssignment>;

#[derive(Default)]
struct Inner {
    rosters: HashMap<RosterId, RosterRows>,
    reports: Vec<CommitReport>,
}

#[derive(Debug, Default, Clone)]
struct Faults {
    fail_batches: HashSet<usize>,
    commit_delay: Option<Duration>,
    unavailable: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    faults: StdMutex<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn faults(&self) -> Faults {
        self.faults
            .lock()
            .map(|f| f.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn update_faults(&self, f: impl FnOnce(&mut Faults)) {
        let mut guard = self
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }

    /// Makes every commit of a batch with this index fail part-way through.
    pub fn fail_batch(&self, index: usize) {
        self.update_faults(|f| {
            f.fail_batches.insert(index);
        });
    }

    /// Delays each batch commit before it takes the store lock.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        self.update_faults(|f| f.commit_delay = delay);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.update_faults(|f| f.unavailable = unavailable);
    }

    pub fn clear_faults(&self) {
        self.update_faults(|f| *f = Faults::default());
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.faults().unavailable {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    #[instrument(skip(self, batch), fields(roster_id = %batch.roster_id(), batch = batch.index()))]
    async fn commit_batch(&self, batch: &Batch) -> Result<BatchApplied, StoreError> {
        self.check_available()?;
        let faults = self.faults();
        if let Some(delay) = faults.commit_delay {
            tokio::time::sleep(delay).await;
        }
        let fail_at = faults
            .fail_batches
            .contains(&batch.index())
            .then(|| batch.len() / 2);

        let mut inner = self.inner.lock().await;
        let mut staged = inner
            .rosters
            .get(batch.roster_id())
            .cloned()
            .unwrap_or_default();

        let now = Utc::now();
        let mut applied = BatchApplied::default();

        for (position, row) in batch.rows().iter().enumerate() {
            if fail_at == Some(position) {
                debug!(position, "Injected failure; discarding staged batch");
                return Err(StoreError::Transaction(format!(
                    "injected failure in batch {} after {} rows",
                    batch.index(),
                    position
                )));
            }

            let key = row.candidate.key();
            let plan = plan_row(staged.get(&key), &row.candidate, row.index, now);
            if let RowPlan::Insert(stored) | RowPlan::Update(stored) = &plan {
                staged.insert(key, stored.clone());
            }
            applied.record(&plan);
        }

        inner.rosters.insert(*batch.roster_id(), staged);
        Ok(applied)
    }

    async fn finalize(&self, roster_id: &RosterId) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let Some(rows) = inner.rosters.get_mut(roster_id) else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut promoted = 0;
        for row in rows.values_mut().filter(|row| finalizes(row)) {
            row.status = Status::Fixed;
            row.updated_at = now;
            promoted += 1;
        }
        Ok(promoted)
    }

    async fn apply_manual_edit(&self, edit: &ManualEdit) -> Result<StoredAssignment, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let rows = inner.rosters.entry(edit.roster_id).or_default();
        let key = edit.key();
        let updated = edit.apply_to(rows.get(&key), Utc::now())?;
        rows.insert(key, updated.clone());
        Ok(updated)
    }

    async fn list_assignments(&self, roster_id: &RosterId) -> Result<Vec<StoredAssignment>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        let mut rows: Vec<StoredAssignment> = inner
            .rosters
            .get(roster_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by_key(StoredAssignment::key);
        Ok(rows)
    }

    async fn status_counts(&self, roster_id: &RosterId) -> Result<StatusCounts, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .rosters
            .get(roster_id)
            .map(|rows| rows.values().collect())
            .unwrap_or_default())
    }

    async fn save_report(&self, report: &CommitReport) -> Result<(), StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        inner.reports.retain(|r| r.commit_id != report.commit_id);
        inner.reports.push(report.clone());
        Ok(())
    }

    async fn load_report(&self, commit_id: &CommitId) -> Result<Option<CommitReport>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .reports
            .iter()
            .find(|r| r.commit_id == *commit_id)
            .cloned())
    }

    async fn recent_reports(
        &self,
        roster_id: &RosterId,
        limit: usize,
    ) -> Result<Vec<CommitReport>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .reports
            .iter()
            .rev()
            .filter(|r| r.roster_id == *roster_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignmentCandidate, Daypart, IndexedCandidate};
    use chrono::NaiveDate;
    use roster_id::{EmployeeId, ServiceId};

    fn batch(index: usize, roster: RosterId, n: usize) -> Batch {
        let rows = (0..n)
            .map(|i| IndexedCandidate {
                index: i,
                candidate: AssignmentCandidate {
                    roster_id: roster,
                    employee_id: EmployeeId::new(),
                    date: NaiveDate::from_ymd_opt(2025, 12, 3).unwrap(),
                    daypart: Daypart::Morning,
                    service_id: Some(ServiceId::new()),
                    confidence: None,
                },
            })
            .collect();
        Batch::new(index, roster, rows)
    }

    #[tokio::test]
    async fn test_injected_failure_rolls_back_whole_batch() {
        let store = MemoryStore::new();
        let roster = RosterId::new();
        store.fail_batch(0);

        let err = store.commit_batch(&batch(0, roster, 10)).await.unwrap_err();
        assert!(matches!(err, StoreError::Transaction(_)));
        assert!(store.list_assignments(&roster).await.unwrap().is_empty());

        store.clear_faults();
        let applied = store.commit_batch(&batch(0, roster, 10)).await.unwrap();
        assert_eq!(applied.inserted, 10);
    }

    #[tokio::test]
    async fn test_finalize_promotes_open_rows_with_service() {
        let store = MemoryStore::new();
        let roster = RosterId::new();
        store.commit_batch(&batch(0, roster, 4)).await.unwrap();

        assert_eq!(store.finalize(&roster).await.unwrap(), 4);
        assert_eq!(store.finalize(&roster).await.unwrap(), 0);
        assert_eq!(store.status_counts(&roster).await.unwrap().fixed, 4);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.health_check().await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_recent_reports_newest_first() {
        let store = MemoryStore::new();
        let roster = RosterId::new();
        let first = CommitReport::new(roster, 10);
        let second = CommitReport::new(roster, 10);
        store.save_report(&first).await.unwrap();
        store.save_report(&second).await.unwrap();
        store.save_report(&CommitReport::new(RosterId::new(), 10)).await.unwrap();

        let recent = store.recent_reports(&roster, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].commit_id, second.commit_id);
        assert_eq!(
            store.load_report(&first.commit_id).await.unwrap().unwrap().commit_id,
            first.commit_id
        );
    }
}
