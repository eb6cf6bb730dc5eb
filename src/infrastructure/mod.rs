//! Infrastructure layer: storage and interpreter implementations, DI container
//!
//! This layer implements the boundary traits and wires up services.

pub mod di;
pub mod error;
pub mod interpreter;
pub mod memory;
pub mod traits;

pub use error::{InfraError, InfraResult};
pub use interpreter::TokenInterpreter;
pub use memory::{InMemoryTreeStore, TreeSnapshot};
