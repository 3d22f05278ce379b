//! Command-line interface definitions for kiln.

use clap::{Parser, Subcommand};

/// Incremental build driver.
#[derive(Parser)]
#[command(name = "kiln", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Suppress progress output; show only errors and the final summary.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable verbose output with timing and cache diagnostics.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Parallelism passed to package builds (0 or omitted = value from kiln.toml).
    #[arg(long, short = 'j', global = true)]
    pub jobs: Option<usize>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Build outdated packages, then every rule.
    Build,
    /// Build outdated packages only.
    Deps(DepsArgs),
    /// Remove build artifacts.
    Clean(CleanArgs),
    /// Report what a build would do, without building.
    Status,
}

/// Arguments for the `deps` subcommand.
#[derive(Parser)]
pub struct DepsArgs {
    /// Update git checkouts instead of building; packages whose sources
    /// moved are cleaned.
    #[arg(long)]
    pub update: bool,
}

/// Arguments for the `clean` subcommand.
#[derive(Parser)]
pub struct CleanArgs {
    /// Also clean every package build.
    #[arg(long)]
    pub packages: bool,
}
