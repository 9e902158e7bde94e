// API error responses
//
// Every failure carries a stable machine-readable category alongside the
// human message: {"error": {"category": "...", "message": "..."}}.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use homefleet_contracts::ErrorCategory;
use homefleet_engine::EngineError;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub category: ErrorCategory,
    pub message: String,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            category: ErrorCategory::Validation,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            category: ErrorCategory::NotFound,
            message: message.into(),
        }
    }

    /// Well-defined refusal: the resource exists but the operation is not
    /// legal in its current state.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            category: ErrorCategory::Validation,
            message: message.into(),
        }
    }

    pub fn queue_unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            category: ErrorCategory::QueueUnavailable,
            message: message.into(),
        }
    }

    pub fn vault_invalid(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            category: ErrorCategory::VaultInvalid,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            category: ErrorCategory::Execution,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "category": self.category.to_string(),
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:#}", e);
        ApiError::internal("Internal server error")
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match &e {
            EngineError::TemplateNotFound(_) | EngineError::InstanceNotFound(_) => {
                ApiError::not_found(e.to_string())
            }
            EngineError::SecretNotFound(_) => ApiError::validation(e.to_string()),
            EngineError::InvalidTemplate(_)
            | EngineError::NoDevices
            | EngineError::DevicesNotFound(_)
            | EngineError::DeviceMissingIp { .. } => ApiError::validation(e.to_string()),
            EngineError::VaultInvalid => ApiError::vault_invalid(e.to_string()),
            EngineError::NotCancellable(_) => ApiError::conflict(e.to_string()),
            EngineError::Internal(inner) => {
                tracing::error!("Engine error: {:#}", inner);
                ApiError::internal("Internal server error")
            }
        }
    }
}
