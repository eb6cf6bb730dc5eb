//! Tests for TemplateResolver
//!
//! Templates are looked up in the repeater's tree first; cross-tree templates are only
//! returned to super-admins or members of the owning organization.

use std::sync::Arc;

use rstest::rstest;

use rsrepeat::application::services::TemplateResolver;
use rsrepeat::application::ApplicationError;
use rsrepeat::domain::{AuthContext, DomainError, DuplicationPlan, Node, NodeType, PlannedNode};
use rsrepeat::infrastructure::InMemoryTreeStore;
use rsrepeat::util::testing::{init_test_setup, TreeFixture, ORG_ID};

fn plan(templates: &[&str]) -> DuplicationPlan {
    DuplicationPlan {
        repeater_node_id: "R".into(),
        scope_id: "scope-1".into(),
        nodes: templates.iter().map(|t| PlannedNode::new(*t, 1)).collect(),
        variables: Vec::new(),
    }
}

fn resolver(store: Arc<InMemoryTreeStore>) -> TemplateResolver {
    init_test_setup();
    TemplateResolver::new(store)
}

/// Repeater in tree-1 (org-1); template `X` lives in tree-2 owned by org-2.
fn cross_tree() -> Arc<InMemoryTreeStore> {
    TreeFixture::new()
        .tree("tree-2", "org-2")
        .repeater("R", None, &["X"])
        .with_node(Node::new("X", None, "tree-2", NodeType::Branch))
        .build()
}

#[test]
fn given_templates_in_repeater_tree_when_resolving_then_split_by_structure() {
    // Arrange
    let store = TreeFixture::new()
        .repeater("R", None, &["T1", "S1"])
        .node("T1", None, NodeType::Branch)
        .node("S1", None, NodeType::Section)
        .build();
    let resolver = resolver(store);

    // Act
    let resolved = resolver
        .resolve(&plan(&["T1", "S1"]), &AuthContext::member_of(ORG_ID))
        .unwrap();

    // Assert
    assert_eq!(resolved.repeater.id, "R");
    assert_eq!(resolved.to_duplicate.len(), 1);
    assert!(resolved.template("T1").is_some());
    assert!(resolved.is_structural("S1"));
    assert!(resolved.template("S1").is_none());
}

#[test]
fn given_in_tree_and_foreign_templates_when_resolving_then_only_in_tree_returned() {
    // Arrange
    let store = TreeFixture::new()
        .tree("tree-2", "org-2")
        .repeater("R", None, &["T1", "X"])
        .node("T1", None, NodeType::Branch)
        .with_node(Node::new("X", None, "tree-2", NodeType::Branch))
        .build();
    let resolver = resolver(store);

    // Act
    let resolved = resolver
        .resolve(&plan(&["T1", "X"]), &AuthContext::member_of(ORG_ID))
        .unwrap();

    // Assert
    let ids: Vec<&str> = resolved.to_duplicate.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["T1"]);
}

#[rstest]
#[case::super_admin(AuthContext::super_admin())]
#[case::owning_org(AuthContext::member_of("org-2"))]
fn given_authorized_caller_when_resolving_cross_tree_then_templates_returned(
    #[case] auth: AuthContext,
) {
    // Arrange
    let resolver = resolver(cross_tree());

    // Act
    let resolved = resolver.resolve(&plan(&["X"]), &auth).unwrap();

    // Assert
    assert_eq!(resolved.to_duplicate[0].id, "X");
}

#[test]
fn given_foreign_org_when_resolving_cross_tree_then_access_denied() {
    // Arrange
    let resolver = resolver(cross_tree());

    // Act
    let err = resolver
        .resolve(&plan(&["X"]), &AuthContext::member_of(ORG_ID))
        .unwrap_err();

    // Assert
    match &err {
        ApplicationError::Domain(DomainError::AccessDenied { template_id, owner }) => {
            assert_eq!(template_id, "X");
            assert_eq!(owner, "org-2");
        }
        other => panic!("expected AccessDenied, got {other:?}"),
    }
    assert_eq!(err.status_hint(), 403);
}

#[test]
fn given_template_in_unknown_tree_when_resolving_then_access_denied() {
    // Arrange
    let store = TreeFixture::new()
        .repeater("R", None, &["X"])
        .with_node(Node::new("X", None, "tree-gone", NodeType::Branch))
        .build();
    let resolver = resolver(store);

    // Act
    let err = resolver
        .resolve(&plan(&["X"]), &AuthContext::member_of(ORG_ID))
        .unwrap_err();

    // Assert
    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::AccessDenied { ref owner, .. }) if owner == "unknown"
    ));
}

#[test]
fn given_no_template_exists_when_resolving_then_not_found() {
    // Arrange
    let store = TreeFixture::new().repeater("R", None, &["T1"]).build();
    let resolver = resolver(store);

    // Act
    let err = resolver
        .resolve(&plan(&["T1", "T2"]), &AuthContext::member_of(ORG_ID))
        .unwrap_err();

    // Assert
    assert_eq!(
        err.to_string(),
        DomainError::not_found("template", "T1,T2").to_string()
    );
    assert_eq!(err.status_hint(), 404);
}

#[test]
fn given_plan_with_variables_only_when_resolving_then_no_templates_loaded() {
    // Arrange
    let store = TreeFixture::new().repeater("R", None, &["T1"]).build();
    let resolver = resolver(store);

    // Act
    let resolved = resolver
        .resolve(&plan(&[]), &AuthContext::member_of(ORG_ID))
        .unwrap();

    // Assert
    assert!(resolved.to_duplicate.is_empty());
    assert!(resolved.structural.is_empty());
}
