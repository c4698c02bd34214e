use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    AssumeRole(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Nuke template error: {0}")]
    Template(String),

    #[error("{0}")]
    Nuke(String),

    #[error("Pre-reset task {task} failed: {message}")]
    PreTask { task: &'static str, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl ResetError {
    pub fn pre_task(task: &'static str, err: impl std::fmt::Display) -> Self {
        ResetError::PreTask {
            task,
            message: err.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ResetError::Timeout(_))
    }
}
