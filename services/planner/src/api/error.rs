use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use roster_commit::StoreError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub code: String,
    pub retryable: bool,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://roster.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
            code,
            retryable: false,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn service_unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message).with_retryable(true)
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.problem.retryable = retryable;
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.problem.instance = Some(instance.into());
        self
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let retryable = err.is_retryable();
        let message = err.to_string();
        let error = match err {
            StoreError::Unavailable(_) => Self::service_unavailable("store_unavailable", message),
            StoreError::NotFound(_) => Self::not_found("not_found", message),
            StoreError::Transition(_) => Self::conflict("transition_not_permitted", message),
            StoreError::UniqueViolation(_) => Self::conflict("natural_key_conflict", message),
            StoreError::Transaction(_) => Self::internal("store_transaction_failed", message),
            StoreError::Serialization(_) => Self::internal("store_serialization", message),
        };
        error.with_retryable(retryable)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_commit::{Status, TransitionError};

    #[test]
    fn test_store_errors_map_to_status_codes() {
        let unavailable = ApiError::from(StoreError::Unavailable("down".into()));
        assert_eq!(unavailable.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(unavailable.problem.retryable);

        let transition = ApiError::from(StoreError::Transition(TransitionError::Protected {
            status: Status::Fixed,
        }));
        assert_eq!(transition.status, StatusCode::CONFLICT);
        assert!(!transition.problem.retryable);

        let failed = ApiError::from(StoreError::Transaction("deadlock".into()));
        assert_eq!(failed.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(failed.problem.retryable);
    }

    #[test]
    fn test_problem_response_content_type() {
        let response = ApiError::not_found("commit_not_found", "no such commit").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
