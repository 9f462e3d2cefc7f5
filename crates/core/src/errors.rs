use thiserror::Error;

use crate::domain::approval::ApprovalId;
use crate::domain::booking::{BookingId, BookingStatus};

/// The workflow error taxonomy. Every variant is detected and returned
/// before any write happens, so a failed operation leaves no partial state.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("reservation window overlaps booking `{}` on the same vehicle", .conflicting.0)]
    Conflict { conflicting: BookingId },
    #[error("approval `{}` has already been processed", .approval.0)]
    AlreadyProcessed { approval: ApprovalId },
    #[error("invalid booking transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: BookingStatus, to: BookingStatus },
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }
}

/// Operation-level failure: either the workflow refused the request, or the
/// backing store did. Audit persistence problems never appear here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn persistence(message: impl ToString) -> Self {
        Self::Persistence(message.to_string())
    }

    /// The workflow refusal behind this error, if that is what it is.
    pub fn as_workflow(&self) -> Option<&WorkflowError> {
        match self {
            Self::Workflow(error) => Some(error),
            Self::Persistence(_) => None,
        }
    }
}
