use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Failures a pipeline step can produce.
///
/// The text carried by `ResolverError` and `DownloadFailed` is for server
/// logs only; it never reaches a response body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("video unavailable")]
    VideoUnavailable,

    #[error("malformed video reference")]
    MalformedReference,

    #[error("no downloadable formats available")]
    NoFormatsAvailable,

    #[error("requested format not available")]
    FormatNotAvailable,

    #[error("stream type not allowed")]
    TypeNotAllowed,

    #[error("stream exceeds the maximum download size")]
    FileTooLarge,

    #[error("resolver failure: {0}")]
    ResolverError(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
    pub retry_after_seconds: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code: Some(code),
            retry_after_seconds: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "INVALID_INPUT")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
            retry_after_seconds: None,
        }
    }

    pub fn payload_too_large() -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body is too large.",
            "PAYLOAD_TOO_LARGE",
        )
    }

    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "Rate limit exceeded. Try again later.".to_string(),
            code: Some("RATE_LIMITED"),
            retry_after_seconds: Some(retry_after_seconds),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::InvalidInput(message) => Self::bad_request(message),
            PipelineError::VideoUnavailable => Self::new(
                StatusCode::NOT_FOUND,
                "Video is unavailable.",
                "VIDEO_UNAVAILABLE",
            ),
            PipelineError::MalformedReference => Self::new(
                StatusCode::BAD_REQUEST,
                "URL is not a valid video reference.",
                "MALFORMED_REFERENCE",
            ),
            PipelineError::NoFormatsAvailable => Self::new(
                StatusCode::NOT_FOUND,
                "No downloadable formats available.",
                "NO_FORMATS_AVAILABLE",
            ),
            PipelineError::FormatNotAvailable => Self::new(
                StatusCode::NOT_FOUND,
                "Requested format is not available.",
                "FORMAT_NOT_AVAILABLE",
            ),
            PipelineError::TypeNotAllowed => Self::new(
                StatusCode::BAD_REQUEST,
                "File type is not allowed.",
                "TYPE_NOT_ALLOWED",
            ),
            PipelineError::FileTooLarge => Self::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "File is too large.",
                "FILE_TOO_LARGE",
            ),
            PipelineError::ResolverError(detail) => {
                warn!("resolver failure: {detail}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to fetch video information.",
                    "RESOLVER_ERROR",
                )
            }
            PipelineError::DownloadFailed(detail) => {
                error!("download failed: {detail}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Download failed.",
                    "DOWNLOAD_FAILED",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
            retry_after_seconds: self.retry_after_seconds,
        });

        let mut response = (self.status, body).into_response();
        if let Some(seconds) = self.retry_after_seconds
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }

        response
    }
}
