//! Command line arguments.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// SHV RPC broker
#[derive(Parser, Debug)]
#[command(name = "shvbroker")]
#[command(version, about = "Silicon Heaven RPC broker")]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity, repeatable
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Decrease log verbosity, repeatable
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "verbose")]
    pub quiet: u8,

    /// Debug logging for a topic (module name or tracing target)
    #[arg(short = 'd', long = "debug", value_name = "TOPIC")]
    pub debug: Vec<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub dump_config: bool,
}
