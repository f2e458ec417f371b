use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// The offered session description could not be used (rejected request)
    #[error("Malformed offer: {0}")]
    MalformedOffer(String),

    /// The negotiation collaborator failed; the session was aborted
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The encoding pipeline faulted; the session must be torn down
    #[error("Encode error: {0}")]
    Encode(String),

    /// Startup resources could not be loaded
    #[error("Resource load error [{resource}]: {reason}")]
    ResourceLoad { resource: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("SIP error: {0}")]
    Sip(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn resource(resource: impl Into<String>, reason: impl ToString) -> Self {
        AppError::ResourceLoad {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MalformedOffer(_) => StatusCode::BAD_REQUEST,
            AppError::Serialization(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NegotiationFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        tracing::error!(
            status = status.as_u16(),
            error_message = %body.message,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::MalformedOffer("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NegotiationFailed("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Encode("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_resource_error_display() {
        let err = AppError::resource("greeting.ogg", "No such file");
        assert_eq!(
            err.to_string(),
            "Resource load error [greeting.ogg]: No such file"
        );
    }
}
