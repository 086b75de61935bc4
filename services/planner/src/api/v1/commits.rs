//! Commit operation endpoints.
//!
//! A commit always answers 200 with its report, including partial failure;
//! only malformed requests and unreachable stores produce problem responses.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use roster_commit::{CommitReport, CommitRequest, RawCandidate};
use roster_id::{CommitId, RosterId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/rosters/{roster_id}/commits",
            post(create_commit).get(list_commits),
        )
        .route("/rosters/{roster_id}/finalize", post(finalize_roster))
        .route("/commits/{commit_id}", get(get_commit))
}

/// Request body for a commit operation.
#[derive(Debug, Deserialize)]
pub struct CreateCommitRequest {
    /// The optimizer's ordered output. Elements are validated one by one.
    pub candidates: Vec<serde_json::Value>,

    /// Overrides the configured operation timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListCommitsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CommitsResponse {
    pub items: Vec<CommitReport>,
}

pub(super) fn parse_roster_id(raw: &str) -> Result<RosterId, ApiError> {
    RosterId::parse(raw).map_err(|e| {
        ApiError::bad_request("invalid_roster_id", format!("Invalid roster ID: {e}"))
    })
}

/// Commit one optimizer run's output into a roster.
///
/// POST /v1/rosters/{roster_id}/commits
async fn create_commit(
    State(state): State<AppState>,
    Path(roster_id): Path<String>,
    Json(body): Json<CreateCommitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let roster_id = parse_roster_id(&roster_id)?;

    let candidates: Vec<RawCandidate> = body
        .candidates
        .into_iter()
        .map(RawCandidate::from_json)
        .collect();

    let mut request = CommitRequest::new(roster_id, candidates);
    if let Some(ms) = body.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }

    let report = state.pipeline().commit(request).await;
    info!(
        commit_id = %report.commit_id,
        roster_id = %roster_id,
        complete = report.is_complete(),
        "Commit request served"
    );

    Ok(Json(report))
}

/// Most recent commit reports for a roster, newest first.
///
/// GET /v1/rosters/{roster_id}/commits
async fn list_commits(
    State(state): State<AppState>,
    Path(roster_id): Path<String>,
    Query(query): Query<ListCommitsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let roster_id = parse_roster_id(&roster_id)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let items = state.store().recent_reports(&roster_id, limit).await?;
    Ok(Json(CommitsResponse { items }))
}

/// GET /v1/commits/{commit_id}
async fn get_commit(
    State(state): State<AppState>,
    Path(commit_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let commit_id = CommitId::parse(&commit_id).map_err(|e| {
        ApiError::bad_request("invalid_commit_id", format!("Invalid commit ID: {e}"))
    })?;

    match state.store().load_report(&commit_id).await? {
        Some(report) => Ok(Json(report)),
        None => Err(ApiError::not_found(
            "commit_not_found",
            format!("No commit report for {commit_id}"),
        )
        .with_instance(format!("/v1/commits/{commit_id}"))),
    }
}

/// Promote every Open assignment with a service to Fixed.
///
/// POST /v1/rosters/{roster_id}/finalize
async fn finalize_roster(
    State(state): State<AppState>,
    Path(roster_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let roster_id = parse_roster_id(&roster_id)?;
    let report = state.pipeline().finalize(roster_id).await?;
    Ok(Json(report))
}
