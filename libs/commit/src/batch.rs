//! Splitting deduplicated candidates into bounded batches.
//!
//! Each batch is committed in its own store transaction, which bounds the
//! blast radius of a failed write and keeps per-transaction latency flat.

use std::collections::HashSet;

use roster_id::RosterId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DuplicateKeyDefect;
use crate::model::{IndexedCandidate, NaturalKey};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const MAX_BATCH_SIZE: usize = 1000;

/// A contiguous, independently transacted slice of one commit operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    index: usize,
    roster_id: RosterId,
    rows: Vec<IndexedCandidate>,
}

impl Batch {
    pub fn new(index: usize, roster_id: RosterId, rows: Vec<IndexedCandidate>) -> Self {
        Self {
            index,
            roster_id,
            rows,
        }
    }

    /// Position of this batch within its commit operation.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn roster_id(&self) -> &RosterId {
        &self.roster_id
    }

    pub fn rows(&self) -> &[IndexedCandidate] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = NaturalKey> + '_ {
        self.rows.iter().map(|r| r.candidate.key())
    }

    /// The first natural key that appears twice in this batch, if any.
    pub fn first_duplicate(&self) -> Option<NaturalKey> {
        let mut seen = HashSet::with_capacity(self.rows.len());
        self.keys().find(|key| !seen.insert(*key))
    }

    /// SHA-256 over the canonical JSON of the batch's roster and rows.
    ///
    /// Two batches with the same fingerprint produce the same store state, so a
    /// caller can confirm a resubmission is verbatim.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "roster_id": self.roster_id,
            "rows": self.rows,
        })
        .to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

/// Splits a deduplicated list into batches of at most `size` rows.
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    size: usize,
}

impl Default for Batcher {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl Batcher {
    /// `size` is clamped to `1..=MAX_BATCH_SIZE`.
    pub fn new(size: usize) -> Self {
        Self {
            size: size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Splits `rows` into contiguous batches, preserving order.
    ///
    /// The input must already be unique per natural key. A repeated key means
    /// deduplication was bypassed or broken, and nothing is batched.
    pub fn split(
        &self,
        roster_id: RosterId,
        rows: Vec<IndexedCandidate>,
    ) -> Result<Vec<Batch>, DuplicateKeyDefect> {
        let mut seen = HashSet::with_capacity(rows.len());
        for row in &rows {
            let key = row.candidate.key();
            if !seen.insert(key) {
                return Err(DuplicateKeyDefect { key });
            }
        }

        let mut batches = Vec::with_capacity(rows.len().div_ceil(self.size));
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let chunk: Vec<IndexedCandidate> = rows.by_ref().take(self.size).collect();
            batches.push(Batch::new(batches.len(), roster_id, chunk));
        }
        Ok(batches)
    }
}
