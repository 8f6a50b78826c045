//! Clap derive structures for the `purecool` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// purecool -- configure and exercise Dyson Pure Cool fans
#[derive(Debug, Parser)]
#[command(
    name = "purecool",
    version,
    about = "Configure and exercise Dyson Pure Cool fans",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "PURECOOL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect and validate configuration
    #[command(alias = "cfg")]
    Config(ConfigArgs),

    /// Run every configured device against an in-memory fan and print its entities
    #[command(alias = "sim")]
    Simulate(SimulateArgs),
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved config file path
    Path,

    /// Print the effective configuration with credentials redacted
    Show,

    /// Load the config and resolve every device's credential
    Check,

    /// Store a device credential in the system keyring
    SetCredential {
        /// Device serial the credential belongs to
        #[arg(long)]
        serial: String,
    },
}

// ── Simulate ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Serial of the simulated fan when no devices are configured
    #[arg(long, default_value = "NK6-EU-MHA0000A")]
    pub serial: String,

    /// Refresh cycles to run after setup
    #[arg(long, default_value_t = 3)]
    pub cycles: u32,

    /// Turn continuous monitoring on through the entry options
    #[arg(long)]
    pub continuous_monitoring: bool,

    /// Make the fan refuse the connection
    #[arg(long, value_enum)]
    pub fail_connect: Option<FailMode>,

    /// Emit rendered entities as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FailMode {
    /// Reject the credential
    InvalidAuth,
    /// Be unreachable
    CannotConnect,
}
