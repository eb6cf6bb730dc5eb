//! Application-level errors (wraps domain errors)

use thiserror::Error;

use crate::domain::DomainError;
use crate::infrastructure::traits::StoreError;

/// Application errors wrap domain errors and add application-level context.
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("{0}")]
    Domain(#[from] DomainError),

    /// Cloning a template failed; the run is aborted.
    #[error("failed to clone template {template_id} (suffix {suffix})")]
    CloneFailure {
        template_id: String,
        suffix: u32,
        #[source]
        source: StoreError,
    },

    #[error("duplication already running for repeater {repeater} in scope {scope}")]
    RunInProgress { repeater: String, scope: String },

    #[error("store error: {context}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("config error: {message}")]
    Config { message: String },
}

impl ApplicationError {
    /// HTTP-style status a transport layer would answer with.
    pub fn status_hint(&self) -> u16 {
        match self {
            ApplicationError::Domain(DomainError::NotFound { .. }) => 404,
            ApplicationError::Domain(DomainError::AccessDenied { .. }) => 403,
            ApplicationError::Domain(DomainError::Unprocessable(_)) => 422,
            ApplicationError::RunInProgress { .. } => 409,
            _ => 500,
        }
    }
}

/// Result type for application layer operations.
pub type ApplicationResult<T> = Result<T, ApplicationError>;
