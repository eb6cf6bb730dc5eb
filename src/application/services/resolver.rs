//! Template loading and authorization

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::application::{ApplicationResult, StoreResultExt};
use crate::domain::{AuthContext, DomainError, DuplicationPlan, Node};
use crate::infrastructure::traits::TreeStore;

/// Templates a run works on, split by whether they may be cloned.
#[derive(Debug, Clone)]
pub struct ResolvedTemplates {
    pub repeater: Node,
    pub to_duplicate: Vec<Node>,
    /// Section templates; never cloned.
    pub structural: Vec<Node>,
}

impl ResolvedTemplates {
    pub fn template(&self, id: &str) -> Option<&Node> {
        self.to_duplicate.iter().find(|n| n.id == id)
    }

    pub fn is_structural(&self, id: &str) -> bool {
        self.structural.iter().any(|n| n.id == id)
    }
}

/// Loads the repeater and its templates. Pure read.
pub struct TemplateResolver {
    store: Arc<dyn TreeStore>,
}

impl TemplateResolver {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    /// Resolve the repeater of `plan` and the templates its entries name.
    #[instrument(level = "debug", skip_all, fields(repeater = %plan.repeater_node_id))]
    pub fn resolve(
        &self,
        plan: &DuplicationPlan,
        auth: &AuthContext,
    ) -> ApplicationResult<ResolvedTemplates> {
        let repeater = self
            .store
            .node(&plan.repeater_node_id)
            .with_store_context("load repeater")?
            .ok_or_else(|| DomainError::not_found("repeater", &plan.repeater_node_id))?;

        if repeater.declared_templates().is_empty() {
            return Err(DomainError::Unprocessable(format!(
                "repeater {} declares no template nodes",
                repeater.id
            ))
            .into());
        }

        let ids = plan.template_ids();
        let templates = if ids.is_empty() {
            Vec::new()
        } else {
            self.load_templates(&ids, &repeater.tree_id, auth)?
        };

        let (structural, to_duplicate): (Vec<Node>, Vec<Node>) = templates
            .into_iter()
            .partition(|n| n.node_type.is_structural());
        debug!(
            "resolve: {} to duplicate, {} structural",
            to_duplicate.len(),
            structural.len()
        );

        Ok(ResolvedTemplates {
            repeater,
            to_duplicate,
            structural,
        })
    }

    /// Load templates from the repeater's tree, falling back to other trees the caller
    /// may access.
    pub fn load_templates(
        &self,
        template_ids: &[String],
        repeater_tree_id: &str,
        auth: &AuthContext,
    ) -> ApplicationResult<Vec<Node>> {
        let found = self
            .store
            .nodes(template_ids)
            .with_store_context("load templates")?;

        let in_tree: Vec<Node> = found
            .iter()
            .filter(|n| n.tree_id == repeater_tree_id)
            .cloned()
            .collect();
        if !in_tree.is_empty() {
            return Ok(in_tree);
        }
        if found.is_empty() {
            return Err(DomainError::not_found("template", template_ids.join(",")).into());
        }

        debug!(
            "load_templates: none in tree {}, checking {} cross-tree templates",
            repeater_tree_id,
            found.len()
        );
        if !auth.is_super_admin {
            for template in &found {
                let owner = self
                    .store
                    .tree(&template.tree_id)
                    .with_store_context("load template tree")?
                    .map(|t| t.organization_id);
                match owner {
                    Some(org) if auth.may_access(&org) => {}
                    other => {
                        return Err(DomainError::AccessDenied {
                            template_id: template.id.clone(),
                            owner: other.unwrap_or_else(|| "unknown".into()),
                        }
                        .into())
                    }
                }
            }
        }
        Ok(found)
    }
}
