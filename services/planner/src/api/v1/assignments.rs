//! Read-only view of a roster's stored assignments.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use roster_commit::{StatusCounts, StoredAssignment};
use serde::Serialize;

use super::commits::parse_roster_id;
use crate::api::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/rosters/{roster_id}/assignments", get(list_assignments))
}

#[derive(Debug, Serialize)]
pub struct AssignmentsResponse {
    pub counts: StatusCounts,
    pub items: Vec<StoredAssignment>,
}

/// GET /v1/rosters/{roster_id}/assignments
async fn list_assignments(
    State(state): State<AppState>,
    Path(roster_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let roster_id = parse_roster_id(&roster_id)?;
    let items = state.store().list_assignments(&roster_id).await?;
    let counts = items.iter().collect();
    Ok(Json(AssignmentsResponse { counts, items }))
}
