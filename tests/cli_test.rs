//! End-to-end tests of the `run` and `show` commands against snapshot files

use std::fs;
use std::path::Path;

use clap::Parser;
use tempfile::TempDir;

use rsrepeat::cli::{execute_command, Cli, CliError};
use rsrepeat::domain::NodeType;
use rsrepeat::exitcode;
use rsrepeat::infrastructure::traits::TreeStore;
use rsrepeat::infrastructure::{InMemoryTreeStore, TreeSnapshot};
use rsrepeat::util::testing::{init_test_setup, TreeFixture};

/// Snapshot with repeater `R` and template `T1 > C1`, plus a plan cloning `T1` as suffix 2.
fn write_inputs(dir: &Path) -> (String, String) {
    let snapshot = TreeFixture::new()
        .node("ROOT", None, NodeType::Branch)
        .repeater("R", Some("ROOT"), &["T1"])
        .node("T1", Some("ROOT"), NodeType::Branch)
        .field("C1", Some("T1"), "5");
    let store_path = dir.join("tree.json");
    snapshot.snapshot().save(&store_path).unwrap();

    let plan_path = dir.join("plan.json");
    fs::write(
        &plan_path,
        r#"{"repeaterNodeId": "R", "scopeId": "s1", "nodes": [{"templateNodeId": "T1", "plannedSuffix": 2}]}"#,
    )
    .unwrap();
    (
        plan_path.to_string_lossy().into_owned(),
        store_path.to_string_lossy().into_owned(),
    )
}

#[test]
fn given_plan_and_store_when_run_with_write_then_snapshot_contains_clone() {
    // Arrange
    init_test_setup();
    let dir = TempDir::new().unwrap();
    let (plan, store) = write_inputs(dir.path());
    let cli = Cli::parse_from([
        "rsrepeat", "run", plan.as_str(), "--store", store.as_str(), "--org", "org-1", "--write",
    ]);

    // Act
    execute_command(&cli).unwrap();

    // Assert
    let reloaded =
        InMemoryTreeStore::from_snapshot(TreeSnapshot::load(Path::new(&store)).unwrap());
    let clone = reloaded.node("T1-2").unwrap().unwrap();
    assert_eq!(clone.metadata.source_template_id.as_deref(), Some("T1"));
    assert!(reloaded.node("C1-2").unwrap().is_some());
}

#[test]
fn given_run_without_write_when_executed_then_snapshot_unchanged() {
    // Arrange
    init_test_setup();
    let dir = TempDir::new().unwrap();
    let (plan, store) = write_inputs(dir.path());
    let before = fs::read_to_string(&store).unwrap();
    let cli = Cli::parse_from(["rsrepeat", "run", plan.as_str(), "--store", store.as_str(), "--super-admin", "--json"]);

    // Act
    execute_command(&cli).unwrap();

    // Assert
    assert_eq!(fs::read_to_string(&store).unwrap(), before);
}

#[test]
fn given_unknown_repeater_when_run_then_noinput_exit_code() {
    // Arrange
    init_test_setup();
    let dir = TempDir::new().unwrap();
    let (_, store) = write_inputs(dir.path());
    let plan = dir.path().join("ghost.json");
    fs::write(&plan, r#"{"repeaterNodeId": "GHOST", "scopeId": "s1", "nodes": [{"templateNodeId": "T1", "plannedSuffix": 1}]}"#).unwrap();
    let cli = Cli::parse_from(["rsrepeat", "run", plan.to_str().unwrap(), "--store", store.as_str()]);

    // Act
    let err = execute_command(&cli).unwrap_err();

    // Assert
    assert_eq!(err.exit_code(), exitcode::NOINPUT);
}

#[test]
fn given_malformed_plan_when_run_then_dataerr_exit_code() {
    // Arrange
    init_test_setup();
    let dir = TempDir::new().unwrap();
    let (_, store) = write_inputs(dir.path());
    let plan = dir.path().join("broken.json");
    fs::write(&plan, "[1, 2").unwrap();
    let cli = Cli::parse_from(["rsrepeat", "run", plan.to_str().unwrap(), "--store", store.as_str()]);

    // Act
    let err = execute_command(&cli).unwrap_err();

    // Assert
    assert_eq!(err.exit_code(), exitcode::DATAERR);
}

#[test]
fn given_unknown_node_when_show_then_invalid_args() {
    // Arrange
    init_test_setup();
    let dir = TempDir::new().unwrap();
    let (_, store) = write_inputs(dir.path());
    let cli = Cli::parse_from(["rsrepeat", "show", "nope", "--store", store.as_str()]);

    // Act
    let result = execute_command(&cli);

    // Assert
    assert!(matches!(result, Err(CliError::InvalidArgs(_))));
}

#[test]
fn given_existing_node_when_show_then_ok() {
    // Arrange
    init_test_setup();
    let dir = TempDir::new().unwrap();
    let (_, store) = write_inputs(dir.path());
    let cli = Cli::parse_from(["rsrepeat", "show", "ROOT", "--store", store.as_str()]);

    // Act / Assert
    execute_command(&cli).unwrap();
}
