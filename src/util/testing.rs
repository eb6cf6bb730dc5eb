//! Test support: logging setup and an in-memory tree builder

use std::env;
use std::sync::{Arc, Once};

use tracing::{debug, info};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::domain::{
    LookupTable, Node, NodeType, RepeaterConfig, Rule, RuleKind, Tree, Variable,
};
use crate::infrastructure::{InMemoryTreeStore, TreeSnapshot};

static TEST_SETUP: Once = Once::new();

/// Tree every fixture node lands in unless stated otherwise.
pub const TREE_ID: &str = "tree-1";
/// Organization owning [`TREE_ID`].
pub const ORG_ID: &str = "org-1";

pub fn init_test_setup() {
    TEST_SETUP.call_once(|| {
        if env::var("RUST_LOG").is_err() {
            env::set_var("RUST_LOG", "debug");
        }
        // global logging subscriber, used by all tracing log macros
        setup_test_logging();
        info!("Test Setup complete");
    });
}

fn setup_test_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let subscriber = tracing_subscriber::registry().with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter),
    );

    // Only set if we haven't already set a global subscriber
    if tracing::dispatcher::has_been_set() {
        debug!("Tracing subscriber already set");
    } else {
        subscriber.try_init().unwrap_or_else(|e| {
            eprintln!("Error: Failed to set up logging: {}", e);
        });
    }
}

/// Builder for in-memory trees.
///
/// Starts with tree [`TREE_ID`] owned by [`ORG_ID`]; nodes added with [`TreeFixture::node`]
/// belong to it.
#[derive(Debug, Clone)]
pub struct TreeFixture {
    snapshot: TreeSnapshot,
}

impl Default for TreeFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeFixture {
    pub fn new() -> Self {
        Self {
            snapshot: TreeSnapshot::default(),
        }
        .tree(TREE_ID, ORG_ID)
    }

    pub fn tree(mut self, id: &str, organization_id: &str) -> Self {
        self.snapshot.trees.push(Tree {
            id: id.to_string(),
            organization_id: organization_id.to_string(),
            name: id.to_string(),
        });
        self
    }

    /// Repeater node declaring `templates`.
    pub fn repeater(mut self, id: &str, parent: Option<&str>, templates: &[&str]) -> Self {
        let mut node = Node::new(id, parent, TREE_ID, NodeType::Repeater);
        node.repeater = Some(RepeaterConfig {
            template_node_ids: templates.iter().map(|t| t.to_string()).collect(),
        });
        self.snapshot.nodes.push(node);
        self
    }

    pub fn node(self, id: &str, parent: Option<&str>, node_type: NodeType) -> Self {
        self.with_node(Node::new(id, parent, TREE_ID, node_type))
    }

    /// Field node with a raw input value.
    pub fn field(self, id: &str, parent: Option<&str>, value: &str) -> Self {
        let mut node = Node::new(id, parent, TREE_ID, NodeType::Field);
        node.value = Some(value.to_string());
        self.with_node(node)
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.snapshot.nodes.push(node);
        self
    }

    /// Modify an already added node.
    pub fn edit(mut self, id: &str, f: impl FnOnce(&mut Node)) -> Self {
        if let Some(node) = self.snapshot.nodes.iter_mut().find(|n| n.id == id) {
            f(node);
        }
        self
    }

    /// Variable on `node_id`, linked from the node.
    pub fn variable(mut self, id: &str, node_id: &str, source_ref: Option<&str>) -> Self {
        self.snapshot.variables.push(Variable {
            id: id.to_string(),
            node_id: node_id.to_string(),
            exposed_key: id.to_lowercase(),
            display_name: id.to_string(),
            source_ref: source_ref.map(str::to_string),
            computed_value: None,
            lookup: false,
        });
        self.edit(node_id, |n| n.linked_variable_ids.push(id.to_string()))
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.snapshot.variables.push(variable);
        self
    }

    /// Formula or condition owned by `node_id`, linked from the node.
    pub fn rule(mut self, id: &str, node_id: &str, kind: RuleKind, tokens: &[&str]) -> Self {
        self.snapshot.rules.push(Rule {
            id: id.to_string(),
            node_id: node_id.to_string(),
            kind,
            name: id.to_string(),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        });
        self.edit(node_id, |n| match kind {
            RuleKind::Formula => n.linked_formula_ids.push(id.to_string()),
            RuleKind::Condition => n.linked_condition_ids.push(id.to_string()),
        })
    }

    /// Table owned by `table.node_id`, linked from the node.
    pub fn table(mut self, table: LookupTable) -> Self {
        let (id, owner) = (table.id.clone(), table.node_id.clone());
        self.snapshot.tables.push(table);
        self.edit(&owner, |n| n.linked_table_ids.push(id))
    }

    pub fn snapshot(&self) -> &TreeSnapshot {
        &self.snapshot
    }

    pub fn build(self) -> Arc<InMemoryTreeStore> {
        Arc::new(InMemoryTreeStore::from_snapshot(self.snapshot))
    }
}
