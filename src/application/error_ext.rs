//! Error conversion helpers for store operations
//!
//! Provides an extension trait for adding context to storage failures.

use crate::application::{ApplicationError, ApplicationResult};
use crate::infrastructure::traits::StoreResult;

/// Extension trait for converting `StoreResult` to `ApplicationResult` with context.
pub trait StoreResultExt<T> {
    /// Add context to a storage error.
    ///
    /// # Example
    /// ```ignore
    /// store.node(id).with_store_context("load repeater")?;
    /// ```
    fn with_store_context(self, context: impl Into<String>) -> ApplicationResult<T>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn with_store_context(self, context: impl Into<String>) -> ApplicationResult<T> {
        self.map_err(|source| ApplicationError::Store {
            context: context.into(),
            source,
        })
    }
}
