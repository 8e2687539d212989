use thiserror::Error;

use crate::entities::ApprovalStatus;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },
}

/// Approval workflow errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApprovalError {
    #[error("Approval not found: {approval_id}")]
    NotFound { approval_id: String },

    #[error("Approval {approval_id} already resolved as {status}")]
    InvalidState {
        approval_id: String,
        status: ApprovalStatus,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },
}

/// Errors reported by the external model execution collaborator
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Model unavailable: {model}")]
    ModelUnavailable { model: String },

    #[error("Execution failed: {message}")]
    Failed { message: String },

    #[error("Execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for approval workflow operations
pub type WorkflowResult<T> = Result<T, ApprovalError>;
