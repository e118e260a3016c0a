//! Error types for the lead engine.
//!
//! Not-found and validation failures are returned to the caller with no
//! mutation applied. Replication failures stay inside the sync worker and
//! only surface here when a `RemoteStore` reports them.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("permission denied: {action}")]
    PermissionDenied { action: &'static str },

    #[error("sync failed: {0}")]
    Sync(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    pub fn lead_not_found(id: Uuid) -> Self {
        EngineError::NotFound { kind: "lead", id }
    }

    pub fn staff_not_found(id: Uuid) -> Self {
        EngineError::NotFound { kind: "staff user", id }
    }

    pub fn reminder_not_found(id: Uuid) -> Self {
        EngineError::NotFound { kind: "reminder", id }
    }

    /// Message the UI shows for this failure.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::NotFound { .. } => "record no longer exists".to_string(),
            EngineError::InvalidInput(reason) => reason.clone(),
            EngineError::PermissionDenied { .. } => {
                "you do not have access to this action".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
