//! End-to-end commit operations against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use roster_commit::{
    deduplicate, ingest, AssignmentStore, Batch, Batcher, CommitPipeline, CommitRequest, Daypart,
    FailureKind, ManualEdit, MemoryStore, PipelineConfig, RawCandidate, Source, Status,
};
use roster_id::{EmployeeId, RosterId, ServiceId};

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()
}

/// `employees * days * 3` distinct candidates, each with its own service.
fn grid(roster: RosterId, employees: usize, days: u64) -> Vec<RawCandidate> {
    let staff: Vec<EmployeeId> = (0..employees).map(|_| EmployeeId::new()).collect();
    let mut out = Vec::new();
    for employee in &staff {
        for day in 0..days {
            let date = start_date() + Days::new(day);
            for daypart in Daypart::ALL {
                out.push(
                    RawCandidate::new(
                        roster.to_string(),
                        employee.to_string(),
                        date.to_string(),
                        daypart.as_str(),
                    )
                    .with_service(ServiceId::new().to_string())
                    .with_confidence(0.8),
                );
            }
        }
    }
    out
}

fn single(roster: RosterId, employee: EmployeeId, service: ServiceId) -> RawCandidate {
    RawCandidate::new(
        roster.to_string(),
        employee.to_string(),
        start_date().to_string(),
        "morning",
    )
    .with_service(service.to_string())
}

fn pipeline(store: Arc<MemoryStore>, config: PipelineConfig) -> CommitPipeline {
    CommitPipeline::new(store, config)
}

fn sized(batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_failed_batch_leaves_other_batches_committed() {
    let store = Arc::new(MemoryStore::new());
    store.fail_batch(7);
    let pipeline = pipeline(store.clone(), sized(50));
    let roster = RosterId::new();

    // 38 employees * 10 days * 3 dayparts
    let candidates = grid(roster, 38, 10);
    assert_eq!(candidates.len(), 1140);

    let report = pipeline.commit(CommitRequest::new(roster, candidates)).await;

    assert_eq!(report.batch_count, 23);
    assert_eq!(report.batches.len(), 23);
    assert_eq!(report.succeeded_batches(), 22);
    assert_eq!(report.failed_batches(), 1);
    assert!(!report.is_complete());
    assert!(!report.timed_out);

    let failed = report.failures().next().unwrap();
    assert_eq!(failed.index, 7);
    let failure = failed.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::StoreTransaction);
    assert!(failure.retryable);

    let rows = store.list_assignments(&roster).await.unwrap();
    assert_eq!(rows.len(), 1140 - 50);
    assert_eq!(report.rows_written(), 1090);
    assert_eq!(report.final_counts.unwrap().open, 1090);
}

#[tokio::test]
async fn test_fixed_row_survives_solver_commit() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), PipelineConfig::default());
    let roster = RosterId::new();
    let employee = EmployeeId::new();
    let kept = ServiceId::new();

    pipeline
        .manual_edit(ManualEdit {
            roster_id: roster,
            employee_id: employee,
            date: start_date(),
            daypart: Daypart::Morning,
            status: Status::Fixed,
            service_id: Some(kept),
        })
        .await
        .unwrap();

    let proposed = ServiceId::new();
    let report = pipeline
        .commit(CommitRequest::new(
            roster,
            vec![single(roster, employee, proposed)],
        ))
        .await;

    assert!(report.is_complete());
    assert_eq!(report.rows_skipped(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.existing_status, Status::Fixed);
    assert_eq!(conflict.existing_service_id, Some(kept));
    assert_eq!(conflict.proposed_service_id, Some(proposed));

    let rows = store.list_assignments(&roster).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, Status::Fixed);
    assert_eq!(rows[0].service_id, Some(kept));
    assert_eq!(rows[0].source, Source::Manual);
}

#[tokio::test]
async fn test_finalize_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), sized(20));
    let roster = RosterId::new();

    let mut candidates = grid(roster, 5, 4);
    // Two rows without a service stay Open.
    candidates.truncate(50);
    candidates.push(RawCandidate::new(
        roster.to_string(),
        EmployeeId::new().to_string(),
        start_date().to_string(),
        "evening",
    ));
    candidates.push(RawCandidate::new(
        roster.to_string(),
        EmployeeId::new().to_string(),
        start_date().to_string(),
        "afternoon",
    ));

    let report = pipeline.commit(CommitRequest::new(roster, candidates)).await;
    assert!(report.is_complete());

    let first = pipeline.finalize(roster).await.unwrap();
    assert_eq!(first.promoted, 50);
    let second = pipeline.finalize(roster).await.unwrap();
    assert_eq!(second.promoted, 0);

    let counts = store.status_counts(&roster).await.unwrap();
    assert_eq!(counts.fixed, 50);
    assert_eq!(counts.open, 2);
}

#[tokio::test]
async fn test_recommit_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), sized(7));
    let roster = RosterId::new();
    let candidates = grid(roster, 4, 3);

    let first = pipeline
        .commit(CommitRequest::new(roster, candidates.clone()))
        .await;
    let after_first = store.list_assignments(&roster).await.unwrap();

    let second = pipeline.commit(CommitRequest::new(roster, candidates)).await;
    let after_second = store.list_assignments(&roster).await.unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(first.rows_written(), 36);
    assert_eq!(second.rows_written(), 0);
    assert_ne!(first.commit_id, second.commit_id);
}

#[tokio::test]
async fn test_last_candidate_for_a_key_wins() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), sized(10));
    let roster = RosterId::new();
    let employee = EmployeeId::new();
    let early = ServiceId::new();
    let late = ServiceId::new();

    let mut candidates = grid(roster, 1, 8);
    candidates.insert(0, single(roster, employee, early));
    candidates.insert(25, single(roster, employee, late));

    let report = pipeline.commit(CommitRequest::new(roster, candidates)).await;
    assert_eq!(report.duplicates_removed, 1);
    assert!(report.is_complete());

    let rows = store.list_assignments(&roster).await.unwrap();
    let row = rows.iter().find(|r| r.employee_id == employee).unwrap();
    assert_eq!(row.service_id, Some(late));
    assert_eq!(rows.len(), 25);
}

#[tokio::test]
async fn test_invalid_candidates_are_rejected_and_rest_committed() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), PipelineConfig::default());
    let roster = RosterId::new();

    let mut candidates = grid(roster, 2, 1);
    candidates.push(RawCandidate::new(
        roster.to_string(),
        EmployeeId::new().to_string(),
        start_date().to_string(),
        "night",
    ));
    candidates.push(single(RosterId::new(), EmployeeId::new(), ServiceId::new()));
    candidates.push(RawCandidate::from_json(serde_json::json!(42)));

    let report = pipeline.commit(CommitRequest::new(roster, candidates)).await;

    assert_eq!(report.total_candidates, 9);
    assert_eq!(report.rejected.len(), 3);
    assert_eq!(
        report.rejected.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![6, 7, 8]
    );
    assert!(report.is_complete());
    assert_eq!(store.list_assignments(&roster).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_operation_timeout_keeps_committed_batches() {
    let store = Arc::new(MemoryStore::new());
    store.set_commit_delay(Some(Duration::from_millis(40)));
    let pipeline = pipeline(store.clone(), sized(3));
    let roster = RosterId::new();

    // 10 batches at 40ms each cannot finish in 100ms.
    let request = CommitRequest::new(roster, grid(roster, 10, 1))
        .with_timeout(Duration::from_millis(100));
    let report = pipeline.commit(request).await;

    assert!(report.timed_out);
    assert!(!report.is_complete());
    assert_eq!(report.batches.len(), 10);
    assert!(report.succeeded_batches() < 10);

    for failed in report.failures() {
        assert_eq!(failed.failure().unwrap().kind, FailureKind::Timeout);
    }

    let rows = store.list_assignments(&roster).await.unwrap();
    assert_eq!(rows.len(), report.succeeded_batches() * 3);
}

#[tokio::test]
async fn test_batch_timeout_rolls_back_batch() {
    let store = Arc::new(MemoryStore::new());
    store.set_commit_delay(Some(Duration::from_millis(200)));
    let pipeline = pipeline(
        store.clone(),
        PipelineConfig {
            batch_size: 3,
            batch_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    );
    let roster = RosterId::new();

    let report = pipeline
        .commit(CommitRequest::new(roster, grid(roster, 2, 1)))
        .await;

    assert_eq!(report.failed_batches(), 2);
    assert!(!report.timed_out);
    let failure = report.batches[0].failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert!(failure.retryable);
    assert!(store.list_assignments(&roster).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resubmit_failed_batch() {
    let store = Arc::new(MemoryStore::new());
    store.fail_batch(1);
    let pipeline = pipeline(store.clone(), sized(4));
    let roster = RosterId::new();
    let candidates = grid(roster, 4, 1);

    let report = pipeline
        .commit(CommitRequest::new(roster, candidates.clone()))
        .await;
    assert_eq!(report.failed_batches(), 1);
    assert_eq!(store.list_assignments(&roster).await.unwrap().len(), 8);

    store.clear_faults();
    let deduped = deduplicate(ingest(&roster, candidates).accepted);
    let batches = Batcher::new(4).split(roster, deduped.survivors).unwrap();
    let retried = batches[1].clone();
    assert_eq!(retried.fingerprint(), report.batches[1].fingerprint);

    let batch_report = pipeline.resubmit(retried).await;
    assert!(batch_report.succeeded());
    assert_eq!(store.list_assignments(&roster).await.unwrap().len(), 12);
}

#[tokio::test]
async fn test_batch_with_repeated_key_fails_without_writing() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), PipelineConfig::default());
    let roster = RosterId::new();

    let raw = single(roster, EmployeeId::new(), ServiceId::new());
    let accepted = ingest(&roster, vec![raw.clone(), raw]).accepted;
    assert_eq!(accepted.len(), 2);
    let key = accepted[0].candidate.key();

    let batch_report = pipeline.resubmit(Batch::new(0, roster, accepted)).await;

    let failure = batch_report.failure().expect("batch should fail");
    assert_eq!(failure.kind, FailureKind::DuplicateKeyDefect);
    assert_eq!(failure.key, Some(key));
    assert!(!failure.retryable);
    assert!(store.list_assignments(&roster).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unavailable_store_reports_every_batch() {
    let store = Arc::new(MemoryStore::new());
    store.set_unavailable(true);
    let pipeline = pipeline(store.clone(), sized(5));
    let roster = RosterId::new();

    let report = pipeline
        .commit(CommitRequest::new(roster, grid(roster, 3, 1)))
        .await;

    assert_eq!(report.failed_batches(), 2);
    assert!(report.final_counts.is_none());
    assert!(report
        .failures()
        .all(|b| b.failure().is_some_and(|f| f.retryable)));
}

#[tokio::test]
async fn test_commit_many_orders_same_roster_and_spans_rosters() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), sized(10));
    let roster = RosterId::new();
    let other = RosterId::new();
    let employee = EmployeeId::new();
    let first = ServiceId::new();
    let second = ServiceId::new();

    let reports = pipeline
        .commit_many(vec![
            CommitRequest::new(roster, vec![single(roster, employee, first)]),
            CommitRequest::new(other, grid(other, 2, 2)),
            CommitRequest::new(roster, vec![single(roster, employee, second)]),
        ])
        .await;

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].roster_id, roster);
    assert_eq!(reports[1].roster_id, other);
    assert_eq!(reports[2].roster_id, roster);
    assert!(reports.iter().all(|r| r.is_complete()));

    let rows = store.list_assignments(&roster).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].service_id, Some(second));
    assert_eq!(rows[0].previous_service_id, Some(first));
    assert_eq!(store.list_assignments(&other).await.unwrap().len(), 12);
}

#[tokio::test]
async fn test_reverted_row_is_open_to_solver_again() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), PipelineConfig::default());
    let roster = RosterId::new();
    let employee = EmployeeId::new();
    let blocked = ServiceId::new();

    let row = pipeline
        .manual_edit(ManualEdit {
            roster_id: roster,
            employee_id: employee,
            date: start_date(),
            daypart: Daypart::Morning,
            status: Status::BlockedLeave,
            service_id: Some(blocked),
        })
        .await
        .unwrap();
    pipeline
        .manual_edit(ManualEdit::revert(row.key(), row.service_id))
        .await
        .unwrap();

    let fresh = ServiceId::new();
    let report = pipeline
        .commit(CommitRequest::new(roster, vec![single(roster, employee, fresh)]))
        .await;
    assert_eq!(report.rows_skipped(), 0);

    let rows = store.list_assignments(&roster).await.unwrap();
    assert_eq!(rows[0].id, row.id);
    assert_eq!(rows[0].status, Status::Open);
    assert_eq!(rows[0].service_id, Some(fresh));
    assert_eq!(rows[0].source, Source::Solver);
}

#[tokio::test]
async fn test_reports_are_persisted() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), PipelineConfig::default());
    let roster = RosterId::new();

    let report = pipeline
        .commit(CommitRequest::new(roster, grid(roster, 1, 1)))
        .await;

    let loaded = store.load_report(&report.commit_id).await.unwrap().unwrap();
    assert_eq!(loaded, report);
    assert_eq!(store.recent_reports(&roster, 5).await.unwrap().len(), 1);
}
