//! Tests for the reference rewriting passes
//!
//! Exercised through full runs so the passes see real clone records and a populated
//! reconciliation map.

use std::sync::Arc;

use rsrepeat::application::{FixupPass, RunEvent};
use rsrepeat::config::Settings;
use rsrepeat::domain::{
    AuthContext, DuplicationPlan, LookupTable, NodeType, PlannedNode, PlannedVariable, Variable,
};
use rsrepeat::infrastructure::di::ServiceContainer;
use rsrepeat::infrastructure::traits::TreeStore;
use rsrepeat::infrastructure::InMemoryTreeStore;
use rsrepeat::util::testing::{init_test_setup, TreeFixture, ORG_ID};

fn plan(entries: &[(&str, u32)]) -> DuplicationPlan {
    DuplicationPlan {
        repeater_node_id: "R".into(),
        scope_id: "scope-1".into(),
        nodes: entries
            .iter()
            .map(|(template, suffix)| PlannedNode::new(*template, *suffix))
            .collect(),
        variables: Vec::new(),
    }
}

fn container(store: Arc<InMemoryTreeStore>, settings: Settings) -> ServiceContainer {
    init_test_setup();
    ServiceContainer::new(settings, store)
}

fn table(id: &str, owner: &str, linked: &[&str]) -> LookupTable {
    LookupTable {
        id: id.into(),
        node_id: owner.into(),
        name: id.to_lowercase(),
        columns: vec!["key".into(), "value".into()],
        rows: vec![vec!["a".into(), "1".into()]],
        source_node_ids: Vec::new(),
        linked_table_ids: linked.iter().map(|t| t.to_string()).collect(),
        lookup_variable_id: None,
    }
}

#[test]
fn given_display_nodes_enabled_when_variable_duplicated_then_display_node_created() {
    // Arrange
    let store = TreeFixture::new()
        .repeater("R", None, &["T1"])
        .node("T1", None, NodeType::Branch)
        .variable("V1", "T1", None)
        .build();
    let settings = Settings {
        create_display_nodes: true,
        ..Settings::default()
    };
    let container = container(store.clone(), settings);
    let mut plan = plan(&[("T1", 2)]);
    plan.variables.push(PlannedVariable {
        template_variable_id: "V1".into(),
        target_node_id: "T1-2".into(),
        planned_variable_id: Some("V1-copy".into()),
        planned_suffix: 2,
    });

    // Act
    let summary = container
        .duplication
        .run(&plan, &AuthContext::member_of(ORG_ID))
        .unwrap();

    // Assert
    assert!(store.variable("V1-copy").unwrap().is_some());
    let display = summary.node("V1-copy-display").unwrap();
    assert_eq!(display.node_type, NodeType::Display);
    assert_eq!(display.parent_id.as_deref(), Some("T1-2"));
    assert_eq!(display.metadata.display_for_variable.as_deref(), Some("V1-copy"));
    assert_eq!(display.metadata.copy_suffix, Some(2));
    assert!(!display.metadata.pending_recalculation);
}

#[test]
fn given_display_nodes_disabled_when_variable_duplicated_then_no_display_node() {
    // Arrange
    let store = TreeFixture::new()
        .repeater("R", None, &["T1"])
        .node("T1", None, NodeType::Branch)
        .variable("V1", "T1", None)
        .build();
    let container = container(store.clone(), Settings::default());
    let mut plan = plan(&[("T1", 1)]);
    plan.variables.push(PlannedVariable {
        template_variable_id: "V1".into(),
        target_node_id: "T1-1".into(),
        planned_variable_id: None,
        planned_suffix: 1,
    });

    // Act
    container
        .duplication
        .run(&plan, &AuthContext::member_of(ORG_ID))
        .unwrap();

    // Assert
    assert!(store.variable("V1-1").unwrap().is_some());
    assert!(store.node("V1-1-display").unwrap().is_none());
}

#[test]
fn given_lookup_variable_in_plan_when_run_then_only_table_pass_regenerates_it() {
    // Arrange
    let mut source = table("TB1", "T1", &[]);
    source.lookup_variable_id = Some("LV".into());
    let store = TreeFixture::new()
        .repeater("R", None, &["T1"])
        .node("T1", None, NodeType::Branch)
        .table(source)
        .with_variable(Variable {
            id: "LV".into(),
            node_id: "T1".into(),
            exposed_key: "lv".into(),
            display_name: "LV".into(),
            source_ref: Some("table:TB1".into()),
            computed_value: None,
            lookup: true,
        })
        .build();
    let container = container(store.clone(), Settings::default());
    let mut plan = plan(&[("T1", 1)]);
    plan.variables.push(PlannedVariable {
        template_variable_id: "LV".into(),
        target_node_id: "T1-1".into(),
        planned_variable_id: Some("LV-planned".into()),
        planned_suffix: 1,
    });

    // Act
    let summary = container
        .duplication
        .run(&plan, &AuthContext::member_of(ORG_ID))
        .unwrap();

    // Assert
    assert!(store.variable("LV-planned").unwrap().is_none());
    assert!(store.variable("LV-1").unwrap().unwrap().lookup);
    assert_eq!(summary.diagnostics.counters.fixup_warnings, 0);
}

#[test]
fn given_linked_tables_when_run_then_embedded_table_ids_are_remapped() {
    // Arrange
    let store = TreeFixture::new()
        .repeater("R", None, &["T1"])
        .node("T1", None, NodeType::Branch)
        .table(table("TB1", "T1", &[]))
        .table(table("TB2", "T1", &["TB1", "SHARED"]))
        .build();
    let container = container(store.clone(), Settings::default());

    // Act
    container
        .duplication
        .run(&plan(&[("T1", 3)]), &AuthContext::member_of(ORG_ID))
        .unwrap();

    // Assert
    let copy = store.table("TB2-3").unwrap().unwrap();
    assert_eq!(copy.node_id, "T1-3");
    assert_eq!(copy.linked_table_ids, vec!["TB1-3", "SHARED"]);
    assert!(store.table("TB1-3").unwrap().is_some());
}

#[test]
fn given_template_listed_twice_when_run_then_table_is_copied_once() {
    // Arrange
    let store = TreeFixture::new()
        .repeater("R", None, &["T1"])
        .node("T1", None, NodeType::Branch)
        .table(table("TB1", "T1", &[]))
        .build();
    let container = container(store.clone(), Settings::default());

    // Act
    let summary = container
        .duplication
        .run(&plan(&[("T1", 1), ("T1", 1)]), &AuthContext::member_of(ORG_ID))
        .unwrap();

    // Assert
    assert_eq!(summary.diagnostics.counters.clones_created, 1);
    assert_eq!(summary.diagnostics.counters.clones_reused, 1);
    assert_eq!(summary.diagnostics.counters.fixup_warnings, 0);
    assert_eq!(store.tables_for_node("T1-1").unwrap().len(), 1);
}

#[test]
fn given_parent_cloned_under_other_suffix_when_run_then_child_keeps_parent() {
    // Arrange
    let store = TreeFixture::new()
        .repeater("R", None, &["P", "C"])
        .node("P", None, NodeType::Branch)
        .node("C", Some("P"), NodeType::Branch)
        .build();
    let container = container(store.clone(), Settings::default());

    // Act
    let summary = container
        .duplication
        .run(&plan(&[("P", 1), ("C", 2)]), &AuthContext::member_of(ORG_ID))
        .unwrap();

    // Assert
    assert_eq!(store.node("C-2").unwrap().unwrap().parent_id.as_deref(), Some("P"));
    assert!(!summary
        .diagnostics
        .events
        .iter()
        .any(|e| matches!(e, RunEvent::FixupWarning { pass: FixupPass::ParentRehoming, .. })));
}
