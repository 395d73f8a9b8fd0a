use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    ResourceNotFound(String),
    StreamNotLive { stream_id: Uuid, current_state: String },
    ConsumerAlreadyExists(String),
    IncompatibleCapabilities(String),
    InsufficientScope(String),
    InvalidToken(String),
    TokenExpired,
    InvalidRefreshToken(String),
    InvalidCredentials,
    SfuUnavailable(String),
    RtspTimeout(String),
    SsrcCaptureFailed(String),
    RtspConnectionFailed(String),
    TranscoderError(String),
    ExtractionTimeout(String),
    NoRecordingData(String),
    DiskFull(String),
    NoPortsAvailable,
    Backlogged,
    InvalidState { from: String, to: String },
    InternalServerError(anyhow::Error),
}

impl AppError {
    pub fn validation<T: ToString>(t: T) -> Self {
        AppError::Validation(t.to_string())
    }

    pub fn not_found<T: ToString>(t: T) -> Self {
        AppError::ResourceNotFound(t.to_string())
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            AppError::StreamNotLive { .. } => "STREAM_NOT_LIVE",
            AppError::ConsumerAlreadyExists(_) => "CONSUMER_ALREADY_EXISTS",
            AppError::IncompatibleCapabilities(_) => "INCOMPATIBLE_CAPABILITIES",
            AppError::InsufficientScope(_) => "INSUFFICIENT_SCOPE",
            AppError::InvalidToken(_) => "INVALID_TOKEN",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::InvalidRefreshToken(_) => "INVALID_REFRESH_TOKEN",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::SfuUnavailable(_) => "SFU_UNAVAILABLE",
            AppError::RtspTimeout(_) => "RTSP_TIMEOUT",
            AppError::SsrcCaptureFailed(_) => "SSRC_CAPTURE_FAILED",
            AppError::RtspConnectionFailed(_) => "RTSP_CONNECTION_FAILED",
            AppError::TranscoderError(_) => "TRANSCODER_ERROR",
            AppError::ExtractionTimeout(_) => "EXTRACTION_TIMEOUT",
            AppError::NoRecordingData(_) => "NO_RECORDING_DATA",
            AppError::DiskFull(_) => "DISK_FULL",
            AppError::NoPortsAvailable => "NO_PORTS_AVAILABLE",
            AppError::Backlogged => "BACKLOGGED",
            AppError::InvalidState { .. } => "INVALID_STATE",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            AppError::StreamNotLive { .. }
            | AppError::ConsumerAlreadyExists(_)
            | AppError::InvalidState { .. } => StatusCode::CONFLICT,
            AppError::IncompatibleCapabilities(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InsufficientScope(_) => StatusCode::FORBIDDEN,
            AppError::InvalidToken(_)
            | AppError::TokenExpired
            | AppError::InvalidRefreshToken(_)
            | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::SfuUnavailable(_) | AppError::Backlogged => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RtspTimeout(_) | AppError::ExtractionTimeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            AppError::SsrcCaptureFailed(_)
            | AppError::RtspConnectionFailed(_)
            | AppError::TranscoderError(_) => StatusCode::BAD_GATEWAY,
            AppError::NoRecordingData(_) => StatusCode::NOT_FOUND,
            AppError::DiskFull(_) | AppError::NoPortsAvailable => {
                StatusCode::INSUFFICIENT_STORAGE
            }
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn description(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::ResourceNotFound(msg)
            | AppError::ConsumerAlreadyExists(msg)
            | AppError::IncompatibleCapabilities(msg)
            | AppError::InvalidToken(msg)
            | AppError::InvalidRefreshToken(msg)
            | AppError::SfuUnavailable(msg)
            | AppError::RtspTimeout(msg)
            | AppError::SsrcCaptureFailed(msg)
            | AppError::RtspConnectionFailed(msg)
            | AppError::TranscoderError(msg)
            | AppError::ExtractionTimeout(msg)
            | AppError::NoRecordingData(msg)
            | AppError::DiskFull(msg) => msg.clone(),
            AppError::StreamNotLive { stream_id, current_state } => {
                format!("stream {} is not LIVE (current state: {})", stream_id, current_state)
            }
            AppError::InsufficientScope(scope) => {
                format!("token is missing required scope: {}", scope)
            }
            AppError::TokenExpired => "access token has expired".to_string(),
            AppError::InvalidCredentials => "unknown client id or bad secret".to_string(),
            AppError::NoPortsAvailable => "rtp port range is exhausted".to_string(),
            AppError::Backlogged => "extraction queue is full, retry later".to_string(),
            AppError::InvalidState { from, to } => {
                format!("transition {} -> {} is not permitted", from, to)
            }
            AppError::InternalServerError(err) => err.to_string(),
        }
    }

    fn details(&self) -> Value {
        match self {
            AppError::StreamNotLive { stream_id, current_state } => json!({
                "stream_id": stream_id,
                "current_state": current_state,
                "required_state": "LIVE",
                "retry_after_seconds": 2,
            }),
            AppError::InvalidState { from, to } => json!({ "from": from, "to": to }),
            AppError::InsufficientScope(scope) => json!({ "required_scope": scope }),
            _ => json!({}),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.code(),
            "error_description": self.description(),
            "status_code": status.as_u16(),
            "details": self.details(),
            "request_id": Uuid::new_v4().to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError::InternalServerError(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses() {
        assert_eq!(AppError::Backlogged.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::Backlogged.code(), "BACKLOGGED");
        assert_eq!(
            AppError::NoRecordingData("gap".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AppError::TokenExpired.status(), StatusCode::UNAUTHORIZED);
        let not_live = AppError::StreamNotLive {
            stream_id: Uuid::nil(),
            current_state: "INITIALIZING".into(),
        };
        assert_eq!(not_live.status(), StatusCode::CONFLICT);
        assert_eq!(not_live.details()["current_state"], "INITIALIZING");
    }
}
