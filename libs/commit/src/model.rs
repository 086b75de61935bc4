//! Roster data model.

use chrono::{DateTime, NaiveDate, Utc};
use roster_id::{AssignmentId, EmployeeId, RosterId, ServiceId};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Part of the working day a shift covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Daypart {
    Morning,
    Afternoon,
    Evening,
}

impl Daypart {
    pub const ALL: [Daypart; 3] = [Daypart::Morning, Daypart::Afternoon, Daypart::Evening];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
        }
    }

    /// Case-insensitive parse of the canonical names.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for Daypart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assignment status, ordered by protection level.
///
/// Only `Open` rows may be touched by a solver commit; every other status
/// belongs to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    Fixed,
    BlockedUnavailable,
    BlockedLeave,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Open,
        Status::Fixed,
        Status::BlockedUnavailable,
        Status::BlockedLeave,
    ];

    /// Protection level as persisted (`0..=3`).
    pub const fn level(&self) -> i16 {
        match self {
            Self::Open => 0,
            Self::Fixed => 1,
            Self::BlockedUnavailable => 2,
            Self::BlockedLeave => 3,
        }
    }

    pub fn from_level(level: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.level() == level)
    }

    /// True for every status a solver commit must leave untouched.
    pub const fn is_protected(&self) -> bool {
        !matches!(self, Self::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Fixed => "fixed",
            Self::BlockedUnavailable => "blocked_unavailable",
            Self::BlockedLeave => "blocked_leave",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a stored row's current contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Solver,
    Manual,
    System,
    Import,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Solver => "solver",
            Self::Manual => "manual",
            Self::System => "system",
            Self::Import => "import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "solver" => Some(Self::Solver),
            "manual" => Some(Self::Manual),
            "system" => Some(Self::System),
            "import" => Some(Self::Import),
            _ => None,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Natural Key
// =============================================================================

/// The tuple that identifies at most one stored assignment.
///
/// Matches the `roster_assignments_natural_key` unique constraint exactly;
/// `service_id` is payload, not identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub roster_id: RosterId,
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub daypart: Daypart,
}

impl NaturalKey {
    pub fn new(
        roster_id: RosterId,
        employee_id: EmployeeId,
        date: NaiveDate,
        daypart: Daypart,
    ) -> Self {
        Self {
            roster_id,
            employee_id,
            date,
            daypart,
        }
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.roster_id, self.employee_id, self.date, self.daypart
        )
    }
}

// =============================================================================
// Candidates
// =============================================================================

/// A validated assignment proposed by the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentCandidate {
    pub roster_id: RosterId,
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub daypart: Daypart,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl AssignmentCandidate {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(self.roster_id, self.employee_id, self.date, self.daypart)
    }
}

/// A candidate tagged with its position in the optimizer's output.
///
/// The index is what "later is more authoritative" is measured by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedCandidate {
    pub index: usize,
    pub candidate: AssignmentCandidate,
}

// =============================================================================
// Stored Rows
// =============================================================================

/// A persisted roster assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAssignment {
    pub id: AssignmentId,
    pub roster_id: RosterId,
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub daypart: Daypart,
    pub service_id: Option<ServiceId>,
    pub status: Status,
    pub source: Source,
    pub confidence: Option<f64>,
    pub previous_service_id: Option<ServiceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredAssignment {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(self.roster_id, self.employee_id, self.date, self.daypart)
    }
}

/// Row counts per status for one roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub open: u64,
    pub fixed: u64,
    pub blocked_unavailable: u64,
    pub blocked_leave: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: Status, n: u64) {
        match status {
            Status::Open => self.open += n,
            Status::Fixed => self.fixed += n,
            Status::BlockedUnavailable => self.blocked_unavailable += n,
            Status::BlockedLeave => self.blocked_leave += n,
        }
    }

    pub fn get(&self, status: Status) -> u64 {
        match status {
            Status::Open => self.open,
            Status::Fixed => self.fixed,
            Status::BlockedUnavailable => self.blocked_unavailable,
            Status::BlockedLeave => self.blocked_leave,
        }
    }

    pub fn total(&self) -> u64 {
        self.open + self.fixed + self.blocked_unavailable + self.blocked_leave
    }
}

impl<'a> FromIterator<&'a StoredAssignment> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = &'a StoredAssignment>>(iter: I) -> Self {
        let mut counts = StatusCounts::default();
        for row in iter {
            counts.add(row.status, 1);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_levels_follow_protection_order() {
        let levels: Vec<i16> = Status::ALL.iter().map(Status::level).collect();
        assert_eq!(levels, vec![0, 1, 2, 3]);
        for status in Status::ALL {
            assert_eq!(Status::from_level(status.level()), Some(status));
        }
        assert_eq!(Status::from_level(4), None);
    }

    #[test]
    fn test_only_open_is_unprotected() {
        assert!(!Status::Open.is_protected());
        assert!(Status::Fixed.is_protected());
        assert!(Status::BlockedUnavailable.is_protected());
        assert!(Status::BlockedLeave.is_protected());
    }

    #[test]
    fn test_daypart_parse_is_case_insensitive() {
        assert_eq!(Daypart::parse("Morning"), Some(Daypart::Morning));
        assert_eq!(Daypart::parse("EVENING"), Some(Daypart::Evening));
        assert_eq!(Daypart::parse(" afternoon "), Some(Daypart::Afternoon));
        assert_eq!(Daypart::parse("night"), None);
        assert_eq!(Daypart::parse(""), None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&Status::BlockedUnavailable).unwrap();
        assert_eq!(json, "\"blocked_unavailable\"");
    }

    #[test]
    fn test_status_counts_from_rows() {
        let now = Utc::now();
        let row = |status| StoredAssignment {
            id: AssignmentId::new(),
            roster_id: RosterId::new(),
            employee_id: EmployeeId::new(),
            date: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
            daypart: Daypart::Morning,
            service_id: None,
            status,
            source: Source::Solver,
            confidence: None,
            previous_service_id: None,
            created_at: now,
            updated_at: now,
        };
        let rows = [row(Status::Open), row(Status::Open), row(Status::BlockedLeave)];
        let counts: StatusCounts = rows.iter().collect();
        assert_eq!(counts.open, 2);
        assert_eq!(counts.blocked_leave, 1);
        assert_eq!(counts.total(), 3);
    }
}
