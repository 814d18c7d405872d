//! JSON error envelope.
//!
//! Every failure is answered as
//! `{"error":{"code":<code>,"details":"<prefix> - <message>"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error response of the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Unparseable request body.
    BadRequest(String),
    /// Well-formed request with invalid parameters.
    InvalidParams(String),
    /// Unknown resource.
    NotFound(String),
    /// Unexpected failure.
    Internal(String),
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: u32,
    details: String,
}

impl ApiError {
    /// HTTP status of the response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidParams(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code carried in the body.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::BadRequest(_) => 100_400,
            Self::InvalidParams(_) => 100_422,
            Self::NotFound(_) => 100_404,
            Self::Internal(_) => 100_500,
        }
    }

    /// Human-readable details carried in the body.
    #[must_use]
    pub fn details(&self) -> String {
        match self {
            Self::BadRequest(msg) => format!("Bad Request - {msg}"),
            Self::InvalidParams(msg) => format!("Invalid params - {msg}"),
            Self::NotFound(msg) => format!("Not found - {msg}"),
            Self::Internal(msg) => format!("Internal error - {msg}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                details: self.details(),
            },
        };
        (self.status(), Json(envelope)).into_response()
    }
}
