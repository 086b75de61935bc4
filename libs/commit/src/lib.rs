//! # roster-commit
//!
//! Durable merge of optimizer output into a shift roster.
//!
//! A commit operation takes the ordered candidate list produced by one
//! optimizer run and moves it through:
//!
//! 1. [`validate`]: reject malformed candidates at the boundary
//! 2. [`dedup`]: collapse to one candidate per [`NaturalKey`] (last write wins)
//! 3. [`batch`]: split into bounded, contiguous batches
//! 4. [`committer`]: apply each batch atomically against an [`AssignmentStore`]
//! 5. [`report`]: aggregate everything into a [`CommitReport`]
//!
//! [`pipeline::CommitPipeline`] wires these together and adds per-roster
//! ordering, timeouts and bounded cross-roster parallelism.
//!
//! ## Invariants
//!
//! - No two stored rows share a natural key.
//! - Rows with a protected status are never overwritten by a solver commit.
//! - The pipeline never deletes a row.
//! - Committing the same batch twice leaves the store as committing it once.

pub mod batch;
pub mod committer;
pub mod dedup;
mod error;
pub mod lifecycle;
pub mod memory;
mod model;
pub mod pipeline;
pub mod report;
pub mod store;
pub mod validate;

pub use batch::{Batch, Batcher};
pub use committer::{plan_row, BatchApplied, Committer, ProtectedRowConflict, RowPlan};
pub use dedup::{deduplicate, Deduplicated};
pub use error::{CommitError, DuplicateKeyDefect, StoreError, ValidationError};
pub use lifecycle::{Actor, ManualEdit, TransitionError};
pub use memory::MemoryStore;
pub use model::*;
pub use pipeline::{CommitPipeline, CommitRequest, PipelineConfig};
pub use report::{BatchFailure, BatchOutcome, BatchReport, CommitReport, FailureKind, FinalizeReport};
pub use store::{AssignmentStore, RosterLease};
pub use validate::{ingest, Ingested, RawCandidate, RejectedCandidate};
