//! Postgres-backed assignment store.
//!
//! Every write transaction starts with `pg_advisory_xact_lock` on the roster,
//! so solver commits, Finalize and manual edits for one roster serialize across
//! processes. Within the transaction the rows a batch touches are read with
//! `FOR UPDATE` and each row is decided by [`plan_row`].
//!
//! Whole operations are ordered by a second advisory lock on a separate key,
//! held by an otherwise idle transaction for as long as the [`RosterLease`]
//! lives. Rolling that transaction back, or dropping it, frees the roster.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use roster_commit::{
    plan_row, AssignmentStore, Batch, BatchApplied, CommitReport, Daypart, ManualEdit, NaturalKey,
    RosterLease, RowPlan, Source, Status, StatusCounts, StoreError, StoredAssignment,
};
use roster_id::{AssignmentId, CommitId, EmployeeId, RosterId, ServiceId};
use sqlx::{
    postgres::{PgPool, PgRow},
    Postgres, Row, Transaction,
};
use tracing::{debug, instrument};

use super::DbError;

const ASSIGNMENT_COLUMNS: &str = "assignment_id, roster_id, employee_id, work_date, daypart, \
     service_id, status, source, confidence, previous_service_id, created_at, updated_at";

fn column_error(column: &str, message: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.to_string().into(),
    }
}

fn parse_id<T, E: std::fmt::Display>(
    row: &PgRow,
    column: &str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    parse(&raw).map_err(|e| column_error(column, e))
}

fn parse_optional_id<T, E: std::fmt::Display>(
    row: &PgRow,
    column: &str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<Option<T>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.as_deref()
        .map(|s| parse(s).map_err(|e| column_error(column, e)))
        .transpose()
}

/// A `roster_assignments` row.
struct AssignmentRow(StoredAssignment);

impl<'r> sqlx::FromRow<'r, PgRow> for AssignmentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let daypart: String = row.try_get("daypart")?;
        let status: i16 = row.try_get("status")?;
        let source: String = row.try_get("source")?;

        Ok(Self(StoredAssignment {
            id: parse_id(row, "assignment_id", AssignmentId::parse)?,
            roster_id: parse_id(row, "roster_id", RosterId::parse)?,
            employee_id: parse_id(row, "employee_id", EmployeeId::parse)?,
            date: row.try_get("work_date")?,
            daypart: Daypart::parse(&daypart)
                .ok_or_else(|| column_error("daypart", format!("unknown daypart '{daypart}'")))?,
            service_id: parse_optional_id(row, "service_id", ServiceId::parse)?,
            status: Status::from_level(status)
                .ok_or_else(|| column_error("status", format!("unknown status level {status}")))?,
            source: Source::parse(&source)
                .ok_or_else(|| column_error("source", format!("unknown source '{source}'")))?,
            confidence: row.try_get("confidence")?,
            previous_service_id: parse_optional_id(row, "previous_service_id", ServiceId::parse)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

/// Store for roster assignments and commit reports.
#[derive(Clone)]
pub struct PgAssignmentStore {
    pool: PgPool,
}

impl PgAssignmentStore {
    /// Create a new assignment store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, DbError> {
        self.pool.begin().await.map_err(DbError::Query)
    }
}

/// Advisory key seed for single write transactions.
const WRITE_LOCK_SEED: i64 = 0;

/// Advisory key seed for whole-operation leases.
const LEASE_LOCK_SEED: i64 = 1;

async fn advisory_xact_lock(
    tx: &mut Transaction<'_, Postgres>,
    roster_id: &RosterId,
    seed: i64,
) -> Result<(), DbError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, $2))")
        .bind(roster_id.to_string())
        .bind(seed)
        .execute(&mut **tx)
        .await
        .map_err(DbError::query)?;
    Ok(())
}

/// Takes the roster's transaction-scoped write lock.
async fn lock_roster(tx: &mut Transaction<'_, Postgres>, roster_id: &RosterId) -> Result<(), DbError> {
    advisory_xact_lock(tx, roster_id, WRITE_LOCK_SEED).await
}

/// A roster lease backed by an open transaction holding the lease lock.
struct PgRosterLease {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RosterLease for PgRosterLease {
    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(DbError::Query)?;
        Ok(())
    }
}

/// Locks and returns the existing rows for `keys`.
async fn lock_existing(
    tx: &mut Transaction<'_, Postgres>,
    roster_id: &RosterId,
    keys: &[NaturalKey],
) -> Result<HashMap<NaturalKey, StoredAssignment>, DbError> {
    let employees: Vec<String> = keys.iter().map(|k| k.employee_id.to_string()).collect();
    let dates: Vec<NaiveDate> = keys.iter().map(|k| k.date).collect();
    let dayparts: Vec<String> = keys.iter().map(|k| k.daypart.as_str().to_string()).collect();

    let rows = sqlx::query_as::<_, AssignmentRow>(
        r#"
        SELECT a.*
        FROM roster_assignments a
        JOIN UNNEST($2::text[], $3::date[], $4::text[]) AS k(employee_id, work_date, daypart)
          ON a.employee_id = k.employee_id
         AND a.work_date = k.work_date
         AND a.daypart = k.daypart
        WHERE a.roster_id = $1
        FOR UPDATE OF a
        "#,
    )
    .bind(roster_id.to_string())
    .bind(employees)
    .bind(dates)
    .bind(dayparts)
    .fetch_all(&mut **tx)
    .await
    .map_err(DbError::query)?;

    Ok(rows
        .into_iter()
        .map(|AssignmentRow(row)| (row.key(), row))
        .collect())
}

async fn insert_row(tx: &mut Transaction<'_, Postgres>, row: &StoredAssignment) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO roster_assignments (
            assignment_id,
            roster_id,
            employee_id,
            work_date,
            daypart,
            service_id,
            status,
            source,
            confidence,
            previous_service_id,
            created_at,
            updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(row.id.to_string())
    .bind(row.roster_id.to_string())
    .bind(row.employee_id.to_string())
    .bind(row.date)
    .bind(row.daypart.as_str())
    .bind(row.service_id.map(|s| s.to_string()))
    .bind(row.status.level())
    .bind(row.source.as_str())
    .bind(row.confidence)
    .bind(row.previous_service_id.map(|s| s.to_string()))
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(DbError::query)?;
    Ok(())
}

/// Rewrites the mutable fields of an existing row; identity columns never change.
async fn update_row(tx: &mut Transaction<'_, Postgres>, row: &StoredAssignment) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE roster_assignments
        SET service_id = $2,
            status = $3,
            source = $4,
            confidence = $5,
            previous_service_id = $6,
            updated_at = $7
        WHERE assignment_id = $1
        "#,
    )
    .bind(row.id.to_string())
    .bind(row.service_id.map(|s| s.to_string()))
    .bind(row.status.level())
    .bind(row.source.as_str())
    .bind(row.confidence)
    .bind(row.previous_service_id.map(|s| s.to_string()))
    .bind(row.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(DbError::query)?;
    Ok(())
}

#[async_trait]
impl AssignmentStore for PgAssignmentStore {
    #[instrument(skip(self), fields(roster_id = %roster_id))]
    async fn lease_roster(
        &self,
        roster_id: &RosterId,
    ) -> Result<Option<Box<dyn RosterLease>>, StoreError> {
        let mut tx = self.begin().await?;
        advisory_xact_lock(&mut tx, roster_id, LEASE_LOCK_SEED).await?;
        debug!("Acquired roster lease");
        Ok(Some(Box::new(PgRosterLease { tx })))
    }

    #[instrument(skip(self, batch), fields(roster_id = %batch.roster_id(), batch = batch.index(), rows = batch.len()))]
    async fn commit_batch(&self, batch: &Batch) -> Result<BatchApplied, StoreError> {
        let mut tx = self.begin().await?;
        lock_roster(&mut tx, batch.roster_id()).await?;

        let keys: Vec<NaturalKey> = batch.keys().collect();
        let existing = lock_existing(&mut tx, batch.roster_id(), &keys).await?;
        debug!(existing = existing.len(), "Locked existing rows");

        let now = Utc::now();
        let mut applied = BatchApplied::default();

        for row in batch.rows() {
            let plan = plan_row(
                existing.get(&row.candidate.key()),
                &row.candidate,
                row.index,
                now,
            );
            match &plan {
                RowPlan::Insert(stored) => insert_row(&mut tx, stored).await?,
                RowPlan::Update(stored) => update_row(&mut tx, stored).await?,
                RowPlan::Unchanged(_) | RowPlan::Skip(_) => {}
            }
            applied.record(&plan);
        }

        tx.commit().await.map_err(DbError::Query)?;
        Ok(applied)
    }

    #[instrument(skip(self), fields(roster_id = %roster_id))]
    async fn finalize(&self, roster_id: &RosterId) -> Result<u64, StoreError> {
        let mut tx = self.begin().await?;
        lock_roster(&mut tx, roster_id).await?;

        // Same predicate as `lifecycle::finalizes`.
        let result = sqlx::query(
            r#"
            UPDATE roster_assignments
            SET status = $2, updated_at = now()
            WHERE roster_id = $1
              AND status = $3
              AND service_id IS NOT NULL
            "#,
        )
        .bind(roster_id.to_string())
        .bind(Status::Fixed.level())
        .bind(Status::Open.level())
        .execute(&mut *tx)
        .await
        .map_err(DbError::query)?;

        tx.commit().await.map_err(DbError::Query)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, edit), fields(roster_id = %edit.roster_id))]
    async fn apply_manual_edit(&self, edit: &ManualEdit) -> Result<StoredAssignment, StoreError> {
        let mut tx = self.begin().await?;
        lock_roster(&mut tx, &edit.roster_id).await?;

        let key = edit.key();
        let existing = lock_existing(&mut tx, &edit.roster_id, &[key]).await?;
        let current = existing.get(&key);
        let updated = edit.apply_to(current, Utc::now())?;

        if current.is_some() {
            update_row(&mut tx, &updated).await?;
        } else {
            insert_row(&mut tx, &updated).await?;
        }

        tx.commit().await.map_err(DbError::Query)?;
        Ok(updated)
    }

    async fn list_assignments(&self, roster_id: &RosterId) -> Result<Vec<StoredAssignment>, StoreError> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM roster_assignments WHERE roster_id = $1"
        ))
        .bind(roster_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let mut rows: Vec<StoredAssignment> = rows.into_iter().map(|AssignmentRow(row)| row).collect();
        rows.sort_by_key(StoredAssignment::key);
        Ok(rows)
    }

    async fn status_counts(&self, roster_id: &RosterId) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n
            FROM roster_assignments
            WHERE roster_id = $1
            GROUP BY status
            "#,
        )
        .bind(roster_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let level: i16 = row.try_get("status").map_err(DbError::Query)?;
            let n: i64 = row.try_get("n").map_err(DbError::Query)?;
            let status = Status::from_level(level)
                .ok_or_else(|| StoreError::Serialization(format!("unknown status level {level}")))?;
            counts.add(status, n as u64);
        }
        Ok(counts)
    }

    #[instrument(skip(self, report), fields(commit_id = %report.commit_id, roster_id = %report.roster_id))]
    async fn save_report(&self, report: &CommitReport) -> Result<(), StoreError> {
        let body = serde_json::to_value(report).map_err(DbError::from)?;

        sqlx::query(
            r#"
            INSERT INTO commit_reports (
                commit_id,
                roster_id,
                started_at,
                finished_at,
                total_candidates,
                batch_count,
                failed_batches,
                rows_skipped,
                timed_out,
                report
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (commit_id) DO UPDATE
            SET finished_at = EXCLUDED.finished_at,
                failed_batches = EXCLUDED.failed_batches,
                rows_skipped = EXCLUDED.rows_skipped,
                timed_out = EXCLUDED.timed_out,
                report = EXCLUDED.report
            "#,
        )
        .bind(report.commit_id.to_string())
        .bind(report.roster_id.to_string())
        .bind(report.started_at)
        .bind(report.finished_at)
        .bind(report.total_candidates as i32)
        .bind(report.batch_count as i32)
        .bind(report.failed_batches() as i32)
        .bind(report.rows_skipped() as i32)
        .bind(report.timed_out)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(DbError::query)?;

        Ok(())
    }

    async fn load_report(&self, commit_id: &CommitId) -> Result<Option<CommitReport>, StoreError> {
        let row = sqlx::query("SELECT report FROM commit_reports WHERE commit_id = $1")
            .bind(commit_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)?;

        row.map(|row| -> Result<CommitReport, StoreError> {
            let body: serde_json::Value = row.try_get("report").map_err(DbError::Query)?;
            Ok(serde_json::from_value(body)?)
        })
        .transpose()
    }

    async fn recent_reports(
        &self,
        roster_id: &RosterId,
        limit: usize,
    ) -> Result<Vec<CommitReport>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT report
            FROM commit_reports
            WHERE roster_id = $1
            ORDER BY started_at DESC, commit_id DESC
            LIMIT $2
            "#,
        )
        .bind(roster_id.to_string())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.into_iter()
            .map(|row| -> Result<CommitReport, StoreError> {
                let body: serde_json::Value = row.try_get("report").map_err(DbError::Query)?;
                Ok(serde_json::from_value(body)?)
            })
            .collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }
}
