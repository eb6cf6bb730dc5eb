//! Application services
//!
//! Concrete service implementations that orchestrate domain logic.
//! Services depend on the storage and interpreter boundary traits
//! but are themselves concrete structs, not traits.

mod assembler;
mod cloner;
mod duplication;
mod isolation;
mod recalc;
mod resolver;
mod rewriter;

pub use assembler::{DuplicatedEntry, DuplicationSummary, NodeRow, ResponseAssembler, RunDiagnostics};
pub use cloner::{CloneRecord, SubtreeCloner};
pub use duplication::{DuplicationService, ScopeGuard, ScopeLocks};
pub use isolation::IsolationEnforcer;
pub use recalc::{RecalculationDriver, RecalculationSummary};
pub use resolver::{ResolvedTemplates, TemplateResolver};
pub use rewriter::{ReferenceRewriter, RewriteOutcome, TableCopyCache};
