//! CLI module for the trim pipeline
//!
//! This module handles command-line argument parsing and command execution.

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;

pub use args::{ProbeArgs, TrimArgs};

/// Trim a time window out of a video and re-encode it onto a fixed frame-rate grid
#[derive(Parser, Debug)]
#[command(name = "clipper")]
#[command(about = "Cut a time window out of a video and re-encode it as MP4")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// TOML configuration file with [pipeline] and [logging] tables
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trim a time window and re-encode it
    Trim(args::TrimArgs),
    /// Print the metadata the trim pipeline would use
    Probe(args::ProbeArgs),
}
