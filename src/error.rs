use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Body sent back for every rejected webhook, whatever check failed.
pub const REJECTED_BODY: &str = "Verification failed";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Request authentication rejected")]
    AuthenticationRejected,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Calendar provider error: {0}")]
    Provider(String),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Slack shows the raw body to the caller, so keep it plain and uninformative.
            AppError::AuthenticationRejected => {
                return (StatusCode::BAD_REQUEST, REJECTED_BODY).into_response();
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Provider(msg) => {
                tracing::error!("Calendar provider error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "PROVIDER_ERROR",
                    "Failed to communicate with the calendar provider".to_string(),
                )
            }
            AppError::Request(e) => {
                tracing::error!("HTTP request error: {:?}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "EXTERNAL_REQUEST_FAILED",
                    "Failed to communicate with external service".to_string(),
                )
            }
            AppError::Io(e) => {
                tracing::error!("Storage error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Json(e) => {
                tracing::error!("Serialization error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl AppError {
    /// Whether the failure happened on the calendar provider's side of the wire.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, AppError::Provider(_) | AppError::Request(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn rejection_is_plain_text_400() {
        let response = AppError::AuthenticationRejected.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], REJECTED_BODY.as_bytes());
    }

    #[tokio::test]
    async fn provider_details_do_not_reach_the_client() {
        let response = AppError::Provider("invalid_grant: token revoked".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("invalid_grant"));
        assert!(text.contains("PROVIDER_ERROR"));
    }

    #[test]
    fn classifies_provider_failures() {
        assert!(AppError::Provider("x".into()).is_provider_failure());
        assert!(!AppError::BadRequest("x".into()).is_provider_failure());
        assert!(!AppError::AuthenticationRejected.is_provider_failure());
    }
}
