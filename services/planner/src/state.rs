//! Application state shared across request handlers.

use std::sync::Arc;

use roster_commit::{AssignmentStore, CommitPipeline};

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pipeline: CommitPipeline,
    store_name: &'static str,
}

impl AppState {
    pub fn new(pipeline: CommitPipeline, store_name: &'static str) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                pipeline,
                store_name,
            }),
        }
    }

    pub fn pipeline(&self) -> &CommitPipeline {
        &self.inner.pipeline
    }

    pub fn store(&self) -> &Arc<dyn AssignmentStore> {
        self.inner.pipeline.store()
    }

    /// Name of the backing store, reported by readiness checks.
    pub fn store_name(&self) -> &'static str {
        self.inner.store_name
    }
}
