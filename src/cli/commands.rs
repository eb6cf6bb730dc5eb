//! Command dispatch and handlers

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::CommandFactory;
use clap_complete::{generate, Shell};
use termtree::Tree;
use tracing::{debug, instrument, Level};

use crate::application::services::DuplicationSummary;
use crate::application::StoreResultExt;
use crate::cli::args::{Cli, Commands, ConfigCommands};
use crate::cli::output;
use crate::cli::{CliError, CliResult};
use crate::config::{global_config_path, Settings};
use crate::domain::{AuthContext, DuplicationPlan, Node};
use crate::infrastructure::di::ServiceContainer;
use crate::infrastructure::traits::TreeStore;
use crate::infrastructure::{InMemoryTreeStore, InfraError, TreeSnapshot};

pub fn execute_command(cli: &Cli) -> CliResult<()> {
    let config = cli.config.as_deref();
    match &cli.command {
        Some(Commands::Run {
            plan,
            store,
            org,
            super_admin,
            json,
            write,
        }) => cmd_run(
            config,
            plan,
            store.as_deref(),
            auth_context(org.as_deref(), *super_admin),
            *json,
            *write,
        ),
        Some(Commands::Show { node_id, store }) => cmd_show(config, node_id, store.as_deref()),
        Some(Commands::Config { command }) => cmd_config(config, command),
        Some(Commands::Completion { shell }) => cmd_completion(*shell),
        None => Ok(()),
    }
}

fn auth_context(org: Option<&str>, super_admin: bool) -> AuthContext {
    match (super_admin, org) {
        (true, _) => AuthContext::super_admin(),
        (false, Some(org)) => AuthContext::member_of(org),
        (false, None) => AuthContext::default(),
    }
}

/// Snapshot path: `--store` wins over `store_path` from config.
fn resolve_store_path(explicit: Option<&Path>, settings: &Settings) -> CliResult<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| settings.store_path.clone())
        .ok_or_else(|| {
            CliError::Usage("no tree snapshot: pass --store or set store_path in config".into())
        })
}

fn load_plan(path: &Path) -> CliResult<DuplicationPlan> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| InfraError::io(format!("read plan {}", path.display()), e))?;
    let plan = serde_json::from_str(&content)
        .map_err(|e| InfraError::json(format!("parse plan {}", path.display()), e))?;
    Ok(plan)
}

#[instrument(skip(auth))]
fn cmd_run(
    config: Option<&Path>,
    plan_path: &Path,
    store: Option<&Path>,
    auth: AuthContext,
    json: bool,
    write: bool,
) -> CliResult<()> {
    let settings = Settings::load(config)?;
    let store_path = resolve_store_path(store, &settings)?;
    debug!("store_path: {:?}", store_path);

    let store = Arc::new(InMemoryTreeStore::from_snapshot(TreeSnapshot::load(
        &store_path,
    )?));
    let container = ServiceContainer::new(settings, store.clone());
    let plan = load_plan(plan_path)?;

    let summary = container.duplication.run(&plan, &auth)?;

    if json {
        let rendered = serde_json::to_string_pretty(&summary)
            .map_err(|e| InfraError::json("serialize summary", e))?;
        output::info(&rendered);
    } else {
        print_summary(&summary);
    }

    if write {
        store.snapshot().save(&store_path)?;
        output::action("Written", &store_path.display());
    }
    Ok(())
}

fn print_summary(summary: &DuplicationSummary) {
    if summary.duplicated.is_empty() {
        output::info("Nothing duplicated");
    } else {
        output::header(&format!("Duplicated {} template(s)", summary.count));
        for entry in &summary.duplicated {
            output::success(&format!(
                "{} ({}) from {}",
                entry.id,
                entry.label,
                entry.source_template_id.as_deref().unwrap_or("?")
            ));
        }
    }

    let counters = &summary.diagnostics.counters;
    output::detail(&format!(
        "run {}: {} created, {} reused, {} recalculated",
        summary.diagnostics.run_id,
        counters.clones_created,
        counters.clones_reused,
        counters.recalculated
    ));
    for event in summary
        .diagnostics
        .events
        .iter()
        .filter(|e| e.level() == Level::WARN)
    {
        output::warning(&serde_json::to_string(event).unwrap_or_else(|_| format!("{event:?}")));
    }
}

#[instrument]
fn cmd_show(config: Option<&Path>, node_id: &str, store: Option<&Path>) -> CliResult<()> {
    let settings = Settings::load(config)?;
    let store_path = resolve_store_path(store, &settings)?;
    let store = InMemoryTreeStore::from_snapshot(TreeSnapshot::load(&store_path)?);

    let root = store
        .node(node_id)
        .with_store_context("load node")?
        .ok_or_else(|| CliError::InvalidArgs(format!("node not found: {node_id}")))?;
    let mut visited = HashSet::new();
    let tree = render_subtree(&store, root, &mut visited)?;
    output::info(&tree);
    Ok(())
}

fn render_subtree(
    store: &dyn TreeStore,
    node: Node,
    visited: &mut HashSet<String>,
) -> CliResult<Tree<String>> {
    let mut tree = Tree::new(node_label(&node));
    if !visited.insert(node.id.clone()) {
        return Ok(tree);
    }
    let mut children = store.children(&node.id).with_store_context("load children")?;
    children.sort_by_key(|c| c.order);
    for child in children {
        tree.push(render_subtree(store, child, visited)?);
    }
    Ok(tree)
}

fn node_label(node: &Node) -> String {
    let mut label = format!("{} [{}] {}", node.id, node.node_type, node.label);
    if let Some(value) = node.effective_value() {
        label.push_str(&format!(" = {value}"));
    }
    if node.metadata.pending_recalculation {
        label.push_str(" (pending)");
    }
    label
}

fn cmd_config(config: Option<&Path>, command: &ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Show => {
            let settings = Settings::load(config)?;
            output::info(&settings.to_toml()?);
        }
        ConfigCommands::Path => {
            match global_config_path() {
                Some(path) => {
                    let state = if path.exists() { "" } else { " (not found)" };
                    output::action("Global", &format!("{}{state}", path.display()));
                }
                None => output::action("Global", "no config directory on this platform"),
            }
            if let Some(local) = config {
                output::action("Local", &local.display());
            }
        }
        ConfigCommands::Template => output::info(&Settings::template()),
    }
    Ok(())
}

fn cmd_completion(shell: Shell) -> CliResult<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}
