//! CLI module - Command-line interface definitions and handlers
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod commands;
pub mod output;

/// skillpack - package skill directories and run a verified skill registry
#[derive(Parser, Debug)]
#[command(name = "skillpack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Emit JSON on stdout for machine consumption
    #[arg(long, global = true)]
    pub robot: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (default: ~/.config/skillpack/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the ledger, registry database and blobs
    #[arg(long, global = true, env = "SKILLPACK_ROOT")]
    pub root: Option<PathBuf>,

    /// Identity used for registry operations
    #[arg(long, global = true, env = "SKILLPACK_ACTOR")]
    pub actor: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a skill manifest
    Validate(commands::validate::ValidateArgs),

    /// Build a tar artifact from a skill directory
    Pack(commands::pack::PackArgs),

    /// Print the SHA-256 digest of a file
    Hash(commands::hash::HashArgs),

    /// List the entries of a built artifact
    Inspect(commands::inspect::InspectArgs),

    /// Show locally recorded publishes of a skill
    History(commands::history::HistoryArgs),

    /// Registry operations: skills, versions and verification
    Registry(commands::registry::RegistryArgs),
}
