//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Store(e) => {
                // Keep driver details out of the response body
                tracing::error!(error = %e, "Query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "query failed".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
