//! ID definitions for roster planning resources.

use crate::define_id;

// =============================================================================
// Roster Model
// =============================================================================

define_id!(
    /// A roster: the planning scope that owns one natural-key space.
    RosterId,
    "rst"
);
define_id!(
    /// An employee that can be assigned to a shift.
    EmployeeId,
    "emp"
);
define_id!(
    /// A service (post, station, duty) filled by an assignment.
    ServiceId,
    "svc"
);

// =============================================================================
// Persistence
// =============================================================================

define_id!(
    /// Identity of a stored assignment row. Never changes once assigned.
    AssignmentId,
    "asgn"
);
define_id!(
    /// One invocation of the commit pipeline.
    CommitId,
    "cmt"
);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_roster_id_roundtrip() {
        let id = RosterId::new();
        let parsed: RosterId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("rst_"));
    }

    #[test]
    fn test_employee_id_rejects_roster_prefix() {
        let err = EmployeeId::parse("rst_01HV4Z2WQXKJNM8GPQY6VBKC3D").unwrap_err();
        assert_eq!(
            err,
            crate::IdError::InvalidPrefix {
                expected: "emp",
                actual: "rst".to_string()
            }
        );
    }

    #[test]
    fn test_missing_separator() {
        assert_eq!(
            ServiceId::parse("svc01HV4Z2WQXKJNM8GPQY6VBKC3D").unwrap_err(),
            crate::IdError::MissingSeparator
        );
    }

    #[test]
    fn test_empty() {
        assert_eq!(AssignmentId::parse("").unwrap_err(), crate::IdError::Empty);
    }

    #[test]
    fn test_invalid_ulid() {
        assert!(matches!(
            CommitId::parse("cmt_not-a-ulid").unwrap_err(),
            crate::IdError::InvalidUlid(_)
        ));
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let id = ServiceId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: ServiceId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_serde_rejects_wrong_prefix() {
        let result: Result<RosterId, _> =
            serde_json::from_str("\"emp_01HV4Z2WQXKJNM8GPQY6VBKC3D\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_assignment_ids_sort_by_creation() {
        let first = AssignmentId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = AssignmentId::new();
        assert!(first < second);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            RosterId::PREFIX,
            EmployeeId::PREFIX,
            ServiceId::PREFIX,
            AssignmentId::PREFIX,
            CommitId::PREFIX,
        ];
        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_parse_never_accepts_foreign_prefix(prefix in "[a-z]{1,6}") {
            prop_assume!(prefix != EmployeeId::PREFIX);
            let candidate = format!("{}_{}", prefix, crate::Ulid::new());
            prop_assert!(EmployeeId::parse(&candidate).is_err());
        }
    }
}
