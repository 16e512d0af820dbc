use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use common::error::{BlobStoreError, IndexError, TagError};

const INVALID_CONTINUATION_TOKEN: &str = "The '_ct' parameter is invalid.";

/// Errors returned by the blob API.
///
/// Client errors carry a machine-readable code and message. Server errors
/// are logged and answered with a generic body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("{0}")]
    InvalidQuery(String),

    #[error("{0}")]
    InvalidParameter(String),

    #[error("{0}")]
    InvalidContinuationToken(String),

    #[error("The search returned no results.")]
    EmptyResults,

    #[error("not found")]
    NotFound,

    #[error("metadata index error: {0}")]
    Index(#[from] IndexError),

    #[error("blob store error: {0}")]
    Store(#[from] BlobStoreError),
}

#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    error: ErrorInfo<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorInfo<'a> {
    code: &'a str,
    message: String,
}

fn error_body(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorInfo { code, message },
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Tag(e) => error_body(StatusCode::BAD_REQUEST, e.code(), e.to_string()),
            ApiError::InvalidQuery(msg) => {
                error_body(StatusCode::BAD_REQUEST, "InvalidQuery", msg)
            }
            ApiError::InvalidParameter(msg) => {
                error_body(StatusCode::BAD_REQUEST, "InvalidParameter", msg)
            }
            ApiError::InvalidContinuationToken(msg) => {
                error_body(StatusCode::BAD_REQUEST, "InvalidContinuationToken", msg)
            }
            ApiError::Index(IndexError::InvalidContinuationToken) => error_body(
                StatusCode::BAD_REQUEST,
                "InvalidContinuationToken",
                INVALID_CONTINUATION_TOKEN.to_string(),
            ),
            e @ ApiError::EmptyResults => {
                error_body(StatusCode::NOT_FOUND, "EmptyResults", e.to_string())
            }
            ApiError::NotFound | ApiError::Index(IndexError::RecordNotFound) => {
                StatusCode::NOT_FOUND.into_response()
            }
            e => {
                tracing::error!(error = %e, "request failed");
                error_body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    "An unexpected error occurred.".to_string(),
                )
            }
        }
    }
}
