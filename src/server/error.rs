//! HTTP mapping for chat errors.
//!
//! Every error crosses the wire as `{"message": ...}`; internal failures
//! are logged in full and answered with a generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::chat::core::errors::ChatError;

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::Auth(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            Self::RagUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            Self::InvalidConfig(_)
            | Self::Sqlite(_)
            | Self::TokioSqlite(_)
            | Self::Storage(_)
            | Self::Serialization(_)
            | Self::Url(_)
            | Self::HttpClient(_) => {
                tracing::error!("internal error: {self}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error.".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}
