use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::engine::suggest::SuggestError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{service} request failed: {detail}")]
    Upstream {
        service: &'static str,
        detail: String,
    },

    #[error("{service} returned a malformed response: {detail}")]
    MalformedUpstream {
        service: &'static str,
        detail: String,
    },

    #[error("{0} did not respond in time")]
    UpstreamTimeout(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Upstream { .. }
            | AppError::MalformedUpstream { .. }
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => AppError::NotFound(format!("{entity} {id} not found")),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Timeout => AppError::UpstreamTimeout("store"),
            StoreError::Unavailable(detail) => AppError::Upstream {
                service: "store",
                detail,
            },
            StoreError::Malformed(detail) => AppError::MalformedUpstream {
                service: "store",
                detail,
            },
        }
    }
}

impl From<SuggestError> for AppError {
    fn from(err: SuggestError) -> Self {
        match err {
            SuggestError::Timeout => AppError::UpstreamTimeout("suggestion service"),
            SuggestError::ServiceUnavailable(detail) => AppError::Upstream {
                service: "suggestion service",
                detail,
            },
            SuggestError::MalformedResponse(detail) => AppError::MalformedUpstream {
                service: "suggestion service",
                detail,
            },
        }
    }
}
