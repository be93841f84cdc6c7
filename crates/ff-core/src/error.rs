use std::fmt;

use crate::validation::FieldIssue;

#[derive(Debug, Clone)]
pub enum AppError {
    PermissionDenied(String),
    LocationUnavailable(String),
    Validation(Vec<FieldIssue>),
    Duplicate(String),
    BatchTooLarge { limit: usize, actual: usize },
    NotFound(String),
    Sync(String),
    Storage(String),
    Database(String),
    InvalidTransition { from: String, to: String },
    Network(String),
    Serialization(String),
    Config(String),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::PermissionDenied(msg) => write!(f, "Location permission denied: {}", msg),
            AppError::LocationUnavailable(msg) => write!(f, "Location unavailable: {}", msg),
            AppError::Validation(issues) => {
                let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
                write!(f, "Validation failed for fields: {}", fields.join(", "))
            }
            AppError::Duplicate(msg) => write!(f, "Duplicate entry: {}", msg),
            AppError::BatchTooLarge { limit, actual } => {
                write!(f, "Batch too large: {} items (max {})", actual, limit)
            }
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Sync(msg) => write!(f, "Sync error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::InvalidTransition { from, to } => {
                write!(f, "Invalid status transition: {} -> {}", from, to)
            }
            AppError::Network(msg) => write!(f, "Network error: {}", msg),
            AppError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Internal(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
