use crate::cluster::NodeId;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Failures raised by cluster, directory and session operations.
///
/// None of these are fatal to the process: timeouts resolve a session,
/// network failures surface to the initiating client, invariant
/// violations are logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("not the leader (current leader: {0:?})")]
    NotLeader(Option<NodeId>),
}

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    /// HTTP status used when this error answers an inter-node request
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::NetworkFailure(_) => StatusCode::BAD_GATEWAY,
            Self::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotLeader(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::NetworkFailure(e.to_string())
        }
    }
}

/// JSON body carried by every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(CoreError::not_found("p").status(), StatusCode::NOT_FOUND);
        assert_eq!(CoreError::conflict("no stock").status(), StatusCode::CONFLICT);
        assert_eq!(
            CoreError::NotLeader(Some("a".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            CoreError::NetworkFailure("down".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            CoreError::Timeout("slow".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_error_body_serialization() {
        let body = ErrorBody {
            error: CoreError::conflict("no stock").to_string(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"error":"conflict: no stock"}"#);
    }
}
