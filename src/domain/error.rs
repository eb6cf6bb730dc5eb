//! Domain-level errors (no external dependencies)

use thiserror::Error;

/// Domain errors represent template-resolution and authorization violations.
/// These are independent of storage concerns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("access denied to template {template_id} (owned by {owner})")]
    AccessDenied { template_id: String, owner: String },

    #[error("unprocessable request: {0}")]
    Unprocessable(String),

    #[error("illegal run stage transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}
