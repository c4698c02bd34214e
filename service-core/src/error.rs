use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Message shown to clients for any failure whose detail must stay server-side.
pub const UNKNOWN_ERROR_MESSAGE: &str = "unknown error";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Already exists: {0}")]
    AlreadyExists(anyhow::Error),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error(transparent)]
    Multi(#[from] MultiError),
}

impl AppError {
    /// Stable error code returned alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::ValidationError(_) => "RequestValidationError",
            AppError::BadRequest(_) => "ClientError",
            AppError::NotFound(_) => "NotFoundError",
            AppError::Conflict(_) => "ConflictError",
            AppError::AlreadyExists(_) => "AlreadyExistsError",
            AppError::ServiceUnavailable(_)
            | AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::EmailError(_)
            | AppError::ConfigError(_)
            | AppError::Multi(_) => "ServerError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::ValidationError(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// Message safe to show a client. Server-side failures collapse to a
    /// generic message.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Validation(reason) => reason.clone(),
            AppError::ValidationError(err) => format!("Validation error: {}", err),
            AppError::BadRequest(err)
            | AppError::NotFound(err)
            | AppError::Conflict(err)
            | AppError::AlreadyExists(err) => err.to_string(),
            AppError::ServiceUnavailable(msg) => msg.clone(),
            _ => UNKNOWN_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Aggregate of independent failures from a batch operation.
#[derive(Debug)]
pub struct MultiError {
    pub message: String,
    pub errors: Vec<AppError>,
}

impl MultiError {
    pub fn new(message: impl Into<String>, errors: Vec<AppError>) -> Self {
        Self {
            message: message.into(),
            errors,
        }
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate as an `AppError`.
    pub fn collect(message: impl Into<String>, errors: Vec<AppError>) -> Result<(), AppError> {
        if errors.is_empty() {
            return Ok(());
        }
        Err(AppError::Multi(Self::new(message, errors)))
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{}: {}", self.message, joined)
    }
}

impl std::error::Error for MultiError {}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<lettre::error::Error> for AppError {
    fn from(err: lettre::error::Error) -> Self {
        AppError::EmailError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: &'static str,
        }

        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.client_message(),
                code: self.code(),
            }),
        )
            .into_response()
    }
}
