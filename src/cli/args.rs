//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// cacheguard - cache penetration and breakdown protection
///
/// Inspects configuration and runs the protection strategies against an
/// in-memory store to show how they behave under load.
#[derive(Parser, Debug)]
#[command(name = "cacheguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CACHEGUARD_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Run a protection scenario against an in-memory store
    Simulate(SimulateArgs),
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Arguments for the simulate command
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Scenario to run
    #[arg(value_enum)]
    pub scenario: Scenario,

    /// Concurrent callers
    #[arg(short = 'n', long, default_value_t = 10)]
    pub callers: usize,

    /// Simulated loader latency in milliseconds
    #[arg(long, default_value_t = 50)]
    pub loader_ms: u64,
}

/// Simulation scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Concurrent misses on one key under the mutex strategy
    Stampede,
    /// Stale hot key under the logical-expiration strategy
    Refresh,
    /// Repeated lookups of a nonexistent key under pass-through
    Penetration,
}
