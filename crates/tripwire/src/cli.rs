use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "tripwire",
    about = "Run a test suite and fail it if it sends unmocked HTTP requests"
)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the test command behind the guard
    Run(RunArgs),
    /// Check that the guard can bind its port and complete a handshake
    Check(CheckArgs),
    /// Manage tripwire configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ConfigSource {
    /// Load an additional config file on top of defaults
    #[arg(long = "config", value_name = "PATH")]
    pub extra_config: Option<PathBuf>,

    /// Ignore global and project config files
    #[arg(long)]
    pub no_config: bool,
}

#[derive(Args)]
pub struct RunArgs {
    /// Port to listen on (must match the test setup's base URL)
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Test runner executable; replaces the configured program and its base arguments
    #[arg(long, value_name = "PROGRAM")]
    pub runner: Option<String>,

    /// Set an environment variable for the test runner (KEY=VALUE; repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    #[command(flatten)]
    pub source: ConfigSource,

    /// Arguments passed through to the test runner unchanged (after `--`)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    pub test_args: Vec<String>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Port to check instead of the configured one
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    #[command(flatten)]
    pub source: ConfigSource,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub subcommand: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a starter config file
    Init {
        #[arg(long)]
        global: bool,
    },
    /// Print the effective merged configuration
    Show {
        #[arg(long, value_enum, default_value = "toml")]
        format: OutputFormat,

        #[command(flatten)]
        source: ConfigSource,
    },
}

#[derive(ValueEnum, Clone, Copy)]
pub enum OutputFormat {
    Toml,
    Json,
}
