use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::TubetoneError;

/// JSON error body: `{error, details?}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.into(),
                details: None,
            },
        }
    }

    /// Creates a 500 error without details
    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.body.details = Some(details.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Map a pipeline error to a response.
    ///
    /// Internal details are only exposed in dev mode, except for the
    /// diagnostics of metadata failures and errors about the request itself.
    pub fn from_error(err: TubetoneError, dev_mode: bool) -> Self {
        let detail = err.to_string();

        let api_error = match &err {
            TubetoneError::InvalidVideoId(_) => {
                return Self::new(StatusCode::BAD_REQUEST, "Invalid video id").with_details(detail)
            }
            TubetoneError::MissingQuery => {
                return Self::new(StatusCode::BAD_REQUEST, "Search query is required")
            }
            TubetoneError::VideoTooLong { limit, .. } => {
                return Self::new(StatusCode::BAD_REQUEST, "Video is too long").with_details(format!(
                    "Maximum duration is {} minutes",
                    limit / 60
                ))
            }
            TubetoneError::MetadataFetchFailed(_) | TubetoneError::MetadataParseFailed(_) => {
                return Self::internal("Failed to get video info").with_details(detail)
            }
            TubetoneError::ProcessSpawnFailed { .. } => Self::internal("Failed to start media tools"),
            TubetoneError::ExtractionFailed(_) | TubetoneError::TranscodeFailed { .. } => {
                Self::internal("Download failed")
            }
            TubetoneError::SearchFailed(_) => Self::internal("Search failed"),
            TubetoneError::ClientDisconnected | TubetoneError::Io(_) => {
                Self::internal("Internal server error")
            }
        };

        if dev_mode {
            let detail = match err {
                TubetoneError::TranscodeFailed { message, diagnostics } if !diagnostics.is_empty() => {
                    format!("{}\n{}", message, diagnostics)
                }
                _ => detail,
            };
            api_error.with_details(detail)
        } else {
            api_error
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
