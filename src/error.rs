use thiserror::Error;

use crate::models::StateKind;

pub use crate::utils::validation::ValidationError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate entry id: {0}")]
    DuplicateId(String),
}

/// Reasons an orchestrator request is refused without doing any work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationConflict {
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Entry {0} is already being analyzed")]
    AlreadyAnalyzing(String),

    #[error("Entry {0} already has a result")]
    AlreadyCompleted(String),

    #[error("Entry {id} is {state}, not pending")]
    NotPending { id: String, state: StateKind },

    #[error("A batch analysis is already in progress")]
    BatchInProgress,

    #[error("No pending images to analyze")]
    NothingPending,
}
