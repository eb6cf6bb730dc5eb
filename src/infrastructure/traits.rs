//! Storage and evaluation boundary traits
//!
//! These traits abstract the tree storage and the formula interpreter, allowing the
//! duplication services to be tested with in-memory or failing implementations.

use thiserror::Error;

use crate::domain::{
    CalculationAudit, Capability, LookupTable, Node, OwnInputs, Rule, Tree, Variable,
};

/// Storage failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Uniqueness violation on insert.
    #[error("{entity} already exists: {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("{entity} does not exist: {id}")]
    Missing { entity: &'static str, id: String },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Inserts and updates applied atomically by [`TreeStore::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub new_nodes: Vec<Node>,
    pub new_variables: Vec<Variable>,
    pub new_rules: Vec<Rule>,
    pub new_tables: Vec<LookupTable>,
    pub node_updates: Vec<Node>,
    pub variable_updates: Vec<Variable>,
    pub rule_updates: Vec<Rule>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.new_nodes.is_empty()
            && self.new_variables.is_empty()
            && self.new_rules.is_empty()
            && self.new_tables.is_empty()
            && self.node_updates.is_empty()
            && self.variable_updates.is_empty()
            && self.rule_updates.is_empty()
    }

    pub fn updating_nodes(nodes: Vec<Node>) -> Self {
        Self {
            node_updates: nodes,
            ..Self::default()
        }
    }
}

/// Tree storage abstraction (CRUD plus transactional multi-write).
pub trait TreeStore: Send + Sync {
    /// Get a tree by id.
    fn tree(&self, tree_id: &str) -> StoreResult<Option<Tree>>;

    /// Get a node by id.
    fn node(&self, id: &str) -> StoreResult<Option<Node>>;

    /// Get nodes by id in request order; missing ids are skipped.
    fn nodes(&self, ids: &[String]) -> StoreResult<Vec<Node>>;

    /// Direct children of a node, ordered by `order` then id.
    fn children(&self, parent_id: &str) -> StoreResult<Vec<Node>>;

    /// Canonical copy of `template_id` with `suffix` inside `scope_id`, if any.
    fn find_copy(&self, scope_id: &str, template_id: &str, suffix: u32)
        -> StoreResult<Option<Node>>;

    /// Get a variable by id.
    fn variable(&self, id: &str) -> StoreResult<Option<Variable>>;

    /// Variables attached to a node.
    fn variables_for_node(&self, node_id: &str) -> StoreResult<Vec<Variable>>;

    /// Get a formula or condition by id.
    fn rule(&self, id: &str) -> StoreResult<Option<Rule>>;

    /// Formulas and conditions owned by a node.
    fn rules_for_node(&self, node_id: &str) -> StoreResult<Vec<Rule>>;

    /// Get a lookup table by id.
    fn table(&self, id: &str) -> StoreResult<Option<LookupTable>>;

    /// Lookup tables owned by a node.
    fn tables_for_node(&self, node_id: &str) -> StoreResult<Vec<LookupTable>>;

    /// Apply all writes or none.
    ///
    /// Fails with `Conflict` if any inserted id exists (or repeats within the batch),
    /// `Missing` if any update target does not exist.
    fn apply(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Append a recalculation audit record.
    fn record_calculation(&self, audit: CalculationAudit) -> StoreResult<()>;
}

/// Evaluation failure reported by an interpreter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Formula/condition/table evaluator.
pub trait Interpreter: Send + Sync {
    /// Evaluate `capability` for `node` reading only `inputs`.
    fn evaluate(
        &self,
        node: &Node,
        capability: &Capability,
        inputs: &OwnInputs,
    ) -> Result<Option<String>, EvalError>;
}
