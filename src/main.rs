use anyhow::{Context, Result};
use clap::Parser;
use nplusone::cli::{Cli, Command, OutputFormat};
use nplusone::config::Configuration;
use nplusone::fingerprint::{fingerprint, Dialect};
use nplusone::notifier::{self, Report};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Print one fingerprint per query, reading stdin lines when none are given
fn run_fingerprint(dialect: Dialect, queries: Vec<String>) -> Result<()> {
    let queries = if queries.is_empty() {
        io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<Vec<_>>>()
            .context("Failed to read queries from stdin")?
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .collect()
    } else {
        queries
    };

    for sql in &queries {
        println!("{}", fingerprint(sql, dialect)?);
    }
    Ok(())
}

fn load_config(
    path: Option<&Path>,
    min_n_queries: Option<usize>,
    dialect: Option<Dialect>,
) -> Result<Configuration> {
    let mut config = match path {
        Some(path) => Configuration::from_toml(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => Configuration::default(),
    };

    if let Some(n) = min_n_queries {
        config.min_n_queries = n;
    }
    if let Some(dialect) = dialect {
        config.dialect = dialect;
    }
    config.validate()?;

    Ok(config)
}

/// Replay an event log, print its report and fail if asked to
fn run_scan(
    events: PathBuf,
    config: Configuration,
    format: OutputFormat,
    fail_on_detect: bool,
) -> Result<()> {
    let file = File::open(&events)
        .with_context(|| format!("Failed to open event log: {}", events.display()))?;
    let findings = nplusone::replay::replay(BufReader::new(file), &config)?;
    let report = Report::new(findings, &config.backtrace_silencers);

    match format {
        OutputFormat::Text if report.is_empty() => println!("No N+1 queries detected."),
        OutputFormat::Text => print!("{}", report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if report.is_empty() {
        return Ok(());
    }

    notifier::dispatch(&report, &notifier::sinks_from_config(&config));

    if fail_on_detect || config.raise {
        anyhow::bail!("{} N+1 query finding(s) detected", report.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    match args.command {
        Command::Fingerprint { dialect, queries } => run_fingerprint(dialect, queries),
        Command::Scan {
            events,
            config,
            min_n_queries,
            dialect,
            format,
            fail_on_detect,
        } => {
            let config = load_config(config.as_deref(), min_n_queries, dialect)?;
            run_scan(events, config, format, fail_on_detect)
        }
    }
}
