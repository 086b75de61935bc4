//! # roster-id
//!
//! Typed identifiers for rosters, employees, services, stored assignments and
//! commit operations.
//!
//! Every identifier is a prefixed ULID, `{prefix}_{ulid}`:
//!
//! - `rst_01HV4Z2WQXKJNM8GPQY6VBKC3D` (roster)
//! - `emp_01HV4Z3MXNKPQR9HSTZ7WCLD4E` (employee)
//! - `asgn_01HV4Z4NYPLTRS0JTUA8XDME5F` (stored assignment)
//!
//! Identifiers coming from the optimizer are parsed strictly at the ingestion
//! boundary; a malformed ID never reaches the store.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
