//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

/// Template subtree replication: clone repeater templates, rewire references, recalculate
#[derive(Parser, Debug)]
#[command(name = "rsrepeat")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-d info, -dd debug, -ddd trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Config file layered over the global config
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a duplication plan against a tree snapshot
    Run {
        /// Duplication plan (JSON)
        #[arg(value_hint = ValueHint::FilePath)]
        plan: PathBuf,

        /// Tree snapshot (default: store_path from config)
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        store: Option<PathBuf>,

        /// Organization of the caller
        #[arg(long, env = "RSREPEAT_ORG")]
        org: Option<String>,

        /// Run with super-admin rights (no organization check)
        #[arg(long)]
        super_admin: bool,

        /// Print the full summary as JSON
        #[arg(long)]
        json: bool,

        /// Write the updated snapshot back
        #[arg(short, long)]
        write: bool,
    },

    /// Show a node and its subtree
    Show {
        /// Node id
        node_id: String,

        /// Tree snapshot (default: store_path from config)
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        store: Option<PathBuf>,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Show config file locations
    Path,
    /// Print a commented config template
    Template,
}
