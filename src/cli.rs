//! CLI argument parsing for nplusone

use crate::fingerprint::Dialect;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for scan reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable report (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "nplusone")]
#[command(version)]
#[command(about = "N+1 query detection from SQL query events", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output (stderr)
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the fingerprint of each query (stdin lines when none are given)
    Fingerprint {
        /// Query dialect (mysql, postgres or an alias such as pg, mariadb)
        #[arg(long, default_value = "mysql")]
        dialect: Dialect,

        /// Queries to fingerprint
        queries: Vec<String>,
    },

    /// Replay a JSON-lines query event log and report N+1 queries
    Scan {
        /// Event log, one JSON query event per line
        events: PathBuf,

        /// TOML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Override the repetition threshold
        #[arg(long, value_name = "N")]
        min_n_queries: Option<usize>,

        /// Override the query dialect
        #[arg(long)]
        dialect: Option<Dialect>,

        /// Report format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Exit with an error when N+1 queries are found
        #[arg(long)]
        fail_on_detect: bool,
    },
}
