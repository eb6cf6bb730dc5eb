//! Service container for dependency injection
//!
//! Wires the duplication service to a store and an interpreter.

use std::sync::Arc;

use crate::application::services::DuplicationService;
use crate::config::Settings;
use crate::infrastructure::interpreter::TokenInterpreter;
use crate::infrastructure::memory::InMemoryTreeStore;
use crate::infrastructure::traits::{Interpreter, TreeStore};

/// Container holding all application services.
pub struct ServiceContainer {
    pub settings: Arc<Settings>,

    pub store: Arc<dyn TreeStore>,

    pub interpreter: Arc<dyn Interpreter>,

    pub duplication: DuplicationService,
}

impl ServiceContainer {
    /// Create a container over `store` with the reference interpreter.
    pub fn new(settings: Settings, store: Arc<InMemoryTreeStore>) -> Self {
        Self::with_deps(settings, store, Arc::new(TokenInterpreter::new()))
    }

    /// Create a container with custom dependencies (for testing).
    pub fn with_deps(
        settings: Settings,
        store: Arc<dyn TreeStore>,
        interpreter: Arc<dyn Interpreter>,
    ) -> Self {
        let settings = Arc::new(settings);
        let duplication =
            DuplicationService::new(store.clone(), interpreter.clone(), settings.clone());

        Self {
            settings,
            store,
            interpreter,
            duplication,
        }
    }
}
