//! Tests for SubtreeCloner

use std::sync::Arc;

use chrono::Utc;

use rsrepeat::application::services::{ResolvedTemplates, SubtreeCloner};
use rsrepeat::application::{ApplicationError, RunEvent, RunJournal};
use rsrepeat::config::Settings;
use rsrepeat::domain::{
    DuplicationPlan, NodeType, PlannedNode, PlannedVariable, ReconciliationMap, RuleKind, Variable,
};
use rsrepeat::infrastructure::traits::TreeStore;
use rsrepeat::infrastructure::InMemoryTreeStore;
use rsrepeat::util::testing::{init_test_setup, TreeFixture};

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

fn resolved(store: &InMemoryTreeStore, ids: &[&str]) -> ResolvedTemplates {
    ResolvedTemplates {
        repeater: store.node("R").unwrap().unwrap(),
        to_duplicate: ids
            .iter()
            .map(|id| store.node(id).unwrap().unwrap())
            .collect(),
        structural: Vec::new(),
    }
}

fn cloner(store: Arc<InMemoryTreeStore>, settings: Settings) -> SubtreeCloner {
    init_test_setup();
    SubtreeCloner::new(store, Arc::new(settings))
}

#[test]
fn given_descendant_covered_by_plan_when_cloning_then_descendant_is_left_to_its_entry() {
    // Arrange
    let store = TreeFixture::new()
        .repeater("R", None, &["T1", "T2"])
        .node("T1", None, NodeType::Branch)
        .field("C1", Some("T1"), "1")
        .node("T2", Some("T1"), NodeType::Branch)
        .build();
    let cloner = cloner(store.clone(), Settings::default());
    let plan = plan(&[("T1", 1)]);
    let mut reconciliation = ReconciliationMap::new();
    let journal = RunJournal::new();

    // Act
    let records = cloner
        .clone_all(
            &plan_with_t2(plan),
            &resolved(&store, &["T1"]),
            &mut reconciliation,
            &journal,
            Utc::now(),
        )
        .unwrap();

    // Assert
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].node_ids, vec!["T1-1", "C1-1"]);
    assert!(store.node("T2-1").unwrap().is_none());
    assert_eq!(reconciliation.resolve("C1-1"), Some("C1-1"));
    assert!(journal.events().contains(&RunEvent::PlanEntrySkipped {
        template_id: "T2".into(),
        reason: "template not resolved".into(),
    }));
}

/// Adds a `T2` entry without resolving it, so the cloner must skip it.
fn plan_with_t2(mut plan: DuplicationPlan) -> DuplicationPlan {
    plan.nodes.push(PlannedNode::new("T2", 1));
    plan
}

#[test]
fn given_template_variables_when_cloning_then_lookup_and_planned_variables_are_excluded() {
    // Arrange
    let store = TreeFixture::new()
        .repeater("R", None, &["T1"])
        .node("T1", None, NodeType::Branch)
        .rule("F1", "T1", RuleKind::Formula, &["2", "*", "3"])
        .variable("PLAIN", "T1", Some("formula:F1"))
        .variable("PLANNED", "T1", None)
        .with_variable(Variable {
            id: "LEGACY".into(),
            node_id: "T1".into(),
            exposed_key: "legacy".into(),
            display_name: "Rate (Lookup Table)".into(),
            source_ref: Some("table:TB".into()),
            computed_value: None,
            lookup: false,
        })
        .build();
    let cloner = cloner(store.clone(), Settings::default());
    let mut plan = plan(&[("T1", 5)]);
    plan.variables.push(PlannedVariable {
        template_variable_id: "PLANNED".into(),
        target_node_id: "T1-5".into(),
        planned_variable_id: None,
        planned_suffix: 5,
    });

    // Act
    cloner
        .clone_all(
            &plan,
            &resolved(&store, &["T1"]),
            &mut ReconciliationMap::new(),
            &RunJournal::new(),
            Utc::now(),
        )
        .unwrap();

    // Assert
    let plain = store.variable("PLAIN-5").unwrap().unwrap();
    assert_eq!(plain.node_id, "T1-5");
    assert_eq!(plain.exposed_key, "plain-5");
    assert_eq!(plain.source_ref.as_deref(), Some("formula:F1-5"));
    assert!(store.variable("PLANNED-5").unwrap().is_none());
    assert!(store.variable("LEGACY-5").unwrap().is_none());

    let clone = store.node("T1-5").unwrap().unwrap();
    assert_eq!(clone.linked_variable_ids, vec!["PLAIN-5"]);
    assert_eq!(clone.linked_formula_ids, vec!["F1-5"]);
}

#[test]
fn given_conflict_when_cloning_then_planned_id_resolves_to_reassigned_clone() {
    // Arrange
    let store = TreeFixture::new()
        .repeater("R", None, &["T1"])
        .node("T1", None, NodeType::Field)
        .node("T1-2", None, NodeType::Field)
        .build();
    let cloner = cloner(store.clone(), Settings::default());
    let mut reconciliation = ReconciliationMap::new();

    // Act
    let records = cloner
        .clone_all(
            &plan(&[("T1", 2)]),
            &resolved(&store, &["T1"]),
            &mut reconciliation,
            &RunJournal::new(),
            Utc::now(),
        )
        .unwrap();

    // Assert
    assert_eq!(records[0].root_id, "T1-1");
    assert_eq!(records[0].suffix, 1);
    assert_eq!(reconciliation.resolve("T1-1"), Some("T1-1"));
    assert_eq!(reconciliation.resolve("T1-2"), Some("T1-1"));
}

#[test]
fn given_no_free_suffix_within_attempts_when_cloning_then_clone_failure() {
    // Arrange
    let store = TreeFixture::new()
        .repeater("R", None, &["T1"])
        .node("T1", None, NodeType::Field)
        .node("T1-1", None, NodeType::Field)
        .node("T1-2", None, NodeType::Field)
        .build();
    let settings = Settings {
        max_suffix_attempts: 1,
        ..Settings::default()
    };
    let cloner = cloner(store.clone(), settings);
    let nodes_before = store.node_count();

    // Act
    let result = cloner.clone_all(
        &plan(&[("T1", 2)]),
        &resolved(&store, &["T1"]),
        &mut ReconciliationMap::new(),
        &RunJournal::new(),
        Utc::now(),
    );

    // Assert
    assert!(matches!(
        result,
        Err(ApplicationError::CloneFailure { ref template_id, .. }) if template_id == "T1"
    ));
    assert_eq!(store.node_count(), nodes_before);
}
