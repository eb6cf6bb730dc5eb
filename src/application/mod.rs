//! Application layer: services and use cases
//!
//! This layer orchestrates domain logic and depends on the storage and
//! interpreter boundary traits.

pub mod error;
pub mod error_ext;
pub mod events;
pub mod services;

pub use error::{ApplicationError, ApplicationResult};
pub use error_ext::StoreResultExt;
pub use events::{FixupPass, RunCounters, RunEvent, RunJournal};
