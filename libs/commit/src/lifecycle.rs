//! Status lifecycle: who may move a row from which status to which.
//!
//! | actor    | permitted                                                       |
//! |----------|-----------------------------------------------------------------|
//! | Solver   | create `Open`; leave `Open` as `Open`                           |
//! | Finalize | `Open` -> `Fixed`; `Fixed` -> `Fixed` (no-op)                   |
//! | Planner  | create any; keep status; any -> `Open`; `Open` -> blocked       |
//!
//! The solver path can never produce anything but an `Open` row, and
//! `Open` -> `Fixed` is reachable only through Finalize.

use chrono::{DateTime, NaiveDate, Utc};
use roster_id::{AssignmentId, EmployeeId, RosterId, ServiceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Daypart, NaturalKey, Source, Status, StoredAssignment};

/// The party requesting a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// A solver commit through the Committer.
    Solver,
    /// The explicit Finalize operation.
    Finalize,
    /// A manual planner edit.
    Planner,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Solver => "solver",
            Self::Finalize => "finalize",
            Self::Planner => "planner",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The existing row is protected from this actor.
    #[error("row is protected with status {status}")]
    Protected { status: Status },

    #[error("{actor} may not move a row from {} to {to}", status_label(.from))]
    NotPermitted {
        actor: Actor,
        from: Option<Status>,
        to: Status,
    },
}

fn status_label(status: &Option<Status>) -> &'static str {
    status.map(|s| s.as_str()).unwrap_or("<new>")
}

/// Protection predicate consulted by the Committer.
pub fn is_protected(status: Status) -> bool {
    status.is_protected()
}

/// Checks a single transition. `current` is `None` when the row does not exist yet.
pub fn authorize(actor: Actor, current: Option<Status>, target: Status) -> Result<(), TransitionError> {
    use crate::model::Status::*;

    let allowed = match (actor, current, target) {
        (Actor::Solver, None, Open) => true,
        (Actor::Solver, Some(Open), Open) => true,
        (Actor::Solver, Some(status), _) if is_protected(status) => {
            return Err(TransitionError::Protected { status });
        }

        (Actor::Finalize, Some(Open), Fixed) => true,
        (Actor::Finalize, Some(Fixed), Fixed) => true,

        (Actor::Planner, None, _) => true,
        (Actor::Planner, Some(from), to) if from == to => true,
        (Actor::Planner, Some(_), Open) => true,
        (Actor::Planner, Some(Open), BlockedUnavailable | BlockedLeave) => true,

        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(TransitionError::NotPermitted {
            actor,
            from: current,
            to: target,
        })
    }
}

/// Whether Finalize promotes this row.
///
/// Only `Open` rows that already carry a service are promoted.
pub fn finalizes(row: &StoredAssignment) -> bool {
    row.status == Status::Open && row.service_id.is_some()
}

/// A planner edit of one assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualEdit {
    pub roster_id: RosterId,
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub daypart: Daypart,
    pub status: Status,
    #[serde(default)]
    pub service_id: Option<ServiceId>,
}

impl ManualEdit {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(self.roster_id, self.employee_id, self.date, self.daypart)
    }

    /// Reverts the row at `key` to `Open`, keeping `service_id`.
    pub fn revert(key: NaturalKey, service_id: Option<ServiceId>) -> Self {
        Self {
            roster_id: key.roster_id,
            employee_id: key.employee_id,
            date: key.date,
            daypart: key.daypart,
            status: Status::Open,
            service_id,
        }
    }

    /// Computes the row that results from applying this edit over `existing`.
    pub fn apply_to(
        &self,
        existing: Option<&StoredAssignment>,
        now: DateTime<Utc>,
    ) -> Result<StoredAssignment, TransitionError> {
        authorize(Actor::Planner, existing.map(|row| row.status), self.status)?;

        Ok(match existing {
            Some(row) => StoredAssignment {
                service_id: self.service_id,
                status: self.status,
                source: Source::Manual,
                previous_service_id: if row.service_id != self.service_id {
                    row.service_id
                } else {
                    row.previous_service_id
                },
                updated_at: now,
                ..row.clone()
            },
            None => StoredAssignment {
                id: AssignmentId::new(),
                roster_id: self.roster_id,
                employee_id: self.employee_id,
                date: self.date,
                daypart: self.daypart,
                service_id: self.service_id,
                status: self.status,
                source: Source::Manual,
                confidence: None,
                previous_service_id: None,
                created_at: now,
                updated_at: now,
            },
        })
    }
}
