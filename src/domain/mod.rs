//! Domain layer: entities and business logic
//!
//! This layer is independent of external concerns (no I/O, no CLI, no config loading).

pub mod capability;
pub mod entities;
pub mod error;
pub mod plan;
pub mod reconciliation;
pub mod run;

pub use capability::{remap_tokens, Capability, TokenRef};
pub use entities::*;
pub use error::DomainError;
pub use plan::{planned_id, DuplicationPlan, PlannedNode, PlannedVariable};
pub use reconciliation::{ReconciliationMap, Resolution};
pub use run::{validate_transition, RunStage};
