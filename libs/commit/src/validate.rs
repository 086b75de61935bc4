//! Candidate validation at the ingestion boundary.
//!
//! The optimizer's output is loosely typed. Every element is parsed into an
//! [`AssignmentCandidate`] here or rejected with a [`ValidationError`]; nothing
//! downstream ever sees an unvalidated candidate.

use chrono::NaiveDate;
use roster_id::{EmployeeId, RosterId, ServiceId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ValidationError;
use crate::model::{AssignmentCandidate, Daypart, IndexedCandidate};

/// A candidate as received on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    #[serde(default)]
    pub roster_id: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub daypart: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,

    /// Decode failure for elements that were not candidate objects.
    #[serde(skip)]
    unreadable: Option<String>,
}

impl RawCandidate {
    pub fn new(
        roster_id: impl Into<String>,
        employee_id: impl Into<String>,
        date: impl Into<String>,
        daypart: impl Into<String>,
    ) -> Self {
        Self {
            roster_id: Some(roster_id.into()),
            employee_id: Some(employee_id.into()),
            date: Some(date.into()),
            daypart: Some(daypart.into()),
            ..Default::default()
        }
    }

    pub fn with_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Reads one element of a JSON candidate array.
    ///
    /// Never fails: an element of the wrong shape becomes a raw candidate that
    /// validation rejects, so one bad element cannot sink the whole list.
    pub fn from_json(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_else(|e| Self {
            unreadable: Some(e.to_string()),
            ..Default::default()
        })
    }
}

impl From<&AssignmentCandidate> for RawCandidate {
    fn from(candidate: &AssignmentCandidate) -> Self {
        Self {
            roster_id: Some(candidate.roster_id.to_string()),
            employee_id: Some(candidate.employee_id.to_string()),
            date: Some(candidate.date.format("%Y-%m-%d").to_string()),
            daypart: Some(candidate.daypart.as_str().to_string()),
            service_id: candidate.service_id.map(|s| s.to_string()),
            confidence: candidate.confidence,
            unreadable: None,
        }
    }
}

/// A candidate rejected before deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    /// Position in the optimizer's output.
    pub index: usize,
    pub reason: String,
}

/// Result of validating a whole candidate list.
#[derive(Debug, Default)]
pub struct Ingested {
    pub accepted: Vec<IndexedCandidate>,
    pub rejected: Vec<RejectedCandidate>,
}

/// Parses a strict ISO `YYYY-MM-DD` date.
///
/// chrono alone accepts unpadded fields and a leading sign.
fn parse_date(value: &str) -> Option<NaiveDate> {
    let bytes = value.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, ValidationError> {
    value
        .as_deref()
        .ok_or(ValidationError::MissingField(field))
}

/// Validates one candidate for the commit operation on `roster_id`.
pub fn validate(roster_id: &RosterId, raw: &RawCandidate) -> Result<AssignmentCandidate, ValidationError> {
    if let Some(reason) = &raw.unreadable {
        return Err(ValidationError::Unreadable(reason.clone()));
    }

    let candidate_roster = RosterId::parse(required(&raw.roster_id, "roster_id")?).map_err(|source| {
        ValidationError::InvalidId {
            field: "roster_id",
            source,
        }
    })?;
    if candidate_roster != *roster_id {
        return Err(ValidationError::RosterMismatch {
            expected: *roster_id,
            actual: candidate_roster,
        });
    }

    let employee_id =
        EmployeeId::parse(required(&raw.employee_id, "employee_id")?).map_err(|source| {
            ValidationError::InvalidId {
                field: "employee_id",
                source,
            }
        })?;

    let date_str = required(&raw.date, "date")?;
    let date =
        parse_date(date_str).ok_or_else(|| ValidationError::InvalidDate(date_str.to_string()))?;

    let daypart_str = required(&raw.daypart, "daypart")?;
    let daypart = Daypart::parse(daypart_str)
        .ok_or_else(|| ValidationError::InvalidDaypart(daypart_str.to_string()))?;

    let service_id = raw
        .service_id
        .as_deref()
        .map(ServiceId::parse)
        .transpose()
        .map_err(|source| ValidationError::InvalidId {
            field: "service_id",
            source,
        })?;

    if let Some(confidence) = raw.confidence {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::InvalidConfidence(confidence));
        }
    }

    Ok(AssignmentCandidate {
        roster_id: candidate_roster,
        employee_id,
        date,
        daypart,
        service_id,
        confidence: raw.confidence,
    })
}

/// Validates a full candidate list, keeping each survivor's original index.
pub fn ingest<I>(roster_id: &RosterId, raws: I) -> Ingested
where
    I: IntoIterator<Item = RawCandidate>,
{
    let mut ingested = Ingested::default();

    for (index, raw) in raws.into_iter().enumerate() {
        match validate(roster_id, &raw) {
            Ok(candidate) => ingested.accepted.push(IndexedCandidate { index, candidate }),
            Err(e) => {
                debug!(index, error = %e, "Rejected candidate");
                ingested.rejected.push(RejectedCandidate {
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }

    ingested
}
