//! API v1 routes.

mod assignments;
mod commits;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(commits::routes())
        .merge(assignments::routes())
}
