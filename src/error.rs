use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Reference error: {0}")]
    Reference(#[from] crate::reference::ReferenceError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] crate::pdf::ExtractError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::embedding::EmbedError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Chat error: {0}")]
    Chat(#[from] crate::chat::ChatError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_code) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg, "VALIDATION_ERROR"),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND"),
            ApiError::UnsupportedFileType(msg) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg, "UNSUPPORTED_FILE_TYPE")
            }
            ApiError::Reference(err) => {
                (StatusCode::BAD_REQUEST, err.to_string(), "REFERENCE_ERROR")
            }
            ApiError::Extraction(err) => {
                error!("Extraction error: {}", err);
                (StatusCode::UNPROCESSABLE_ENTITY, err.to_string(), "EXTRACTION_ERROR")
            }
            ApiError::Embedding(err) => {
                error!("Embedding error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    err.to_string(),
                    "EMBEDDING_ERROR",
                )
            }
            ApiError::Store(err) => {
                error!("Store error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), "STORE_ERROR")
            }
            ApiError::Chat(err) => {
                error!("Chat error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), "CHAT_ERROR")
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_ERROR",
                )
            }
        };

        let response_body = json!({
            "success": false,
            "error": error_message,
            "error_code": error_code,
            "timestamp": chrono::Utc::now()
        });

        (status, Json(response_body)).into_response()
    }
}

pub fn validation_error(message: &str) -> ApiError {
    ApiError::Validation(message.to_string())
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let response = validation_error("missing field").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_found_maps_to_404() {
        let response = ApiError::NotFound("no data".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unsupported_file_type_maps_to_415() {
        let response = ApiError::UnsupportedFileType("exe".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
