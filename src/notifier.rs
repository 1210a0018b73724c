//! Reports and notification sinks
//!
//! All findings of one `finish()` form a single [`Report`], delivered to every
//! configured [`NotificationSink`]. Sinks are independent: one failing sink is
//! logged and the remaining sinks still receive the report.
//!
//! Report text format:
//!
//! ```text
//! N+1 queries detected:
//!   SELECT * FROM users WHERE id = 1
//!   SELECT * FROM users WHERE id = 2
//! Call stack:
//!   app/posts.rs:12:in `app::posts::render`
//!
//! ```

use crate::config::{Configuration, Pattern};
use crate::detection::Finding;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// Findings of one scan plus their rendered text
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    findings: Vec<Finding>,
    #[serde(skip)]
    text: String,
}

impl Report {
    /// Build a report; frames matching any silencer are left out of the text
    pub fn new(findings: Vec<Finding>, silencers: &[Pattern]) -> Self {
        let text = render(&findings, silencers);
        Self { findings, text }
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn render(findings: &[Finding], silencers: &[Pattern]) -> String {
    let mut out = String::new();

    for finding in findings {
        out.push_str("N+1 queries detected:\n");
        for sql in &finding.queries {
            out.push_str("  ");
            out.push_str(sql);
            out.push('\n');
        }

        out.push_str("Call stack:\n");
        for frame in finding
            .call_stack
            .iter()
            .filter(|frame| !silencers.iter().any(|s| s.found_in(frame)))
        {
            out.push_str("  ");
            out.push_str(frame);
            out.push('\n');
        }

        out.push('\n');
    }

    out
}

/// Receiver of detection reports
pub trait NotificationSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn notify(&self, report: &Report) -> Result<()>;
}

/// Deliver a report to every sink, logging (not propagating) sink failures
pub fn dispatch(report: &Report, sinks: &[Box<dyn NotificationSink>]) {
    for sink in sinks {
        if let Err(e) = sink.notify(report) {
            warn!(sink = sink.name(), error = %e, "notification sink failed");
        }
    }
}

/// Build the sinks enabled in a configuration
pub fn sinks_from_config(config: &Configuration) -> Vec<Box<dyn NotificationSink>> {
    let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();

    if config.tracing_logger {
        sinks.push(Box::new(TracingSink));
    }
    if config.stderr_logger {
        sinks.push(Box::new(StderrSink::default()));
    }
    if let Some(path) = &config.log_file {
        sinks.push(Box::new(FileSink::new(path.clone())));
    }

    sinks
}

/// Logs reports with `tracing::warn!`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn notify(&self, report: &Report) -> Result<()> {
        warn!(findings = report.len(), "{}", report.text());
        Ok(())
    }
}

/// Writes reports to stderr, red unless color is disabled
#[derive(Debug, Clone, Copy)]
pub struct StderrSink {
    pub color: bool,
}

impl Default for StderrSink {
    fn default() -> Self {
        Self { color: true }
    }
}

impl NotificationSink for StderrSink {
    fn name(&self) -> &str {
        "stderr"
    }

    fn notify(&self, report: &Report) -> Result<()> {
        let text = if self.color {
            red(report.text())
        } else {
            report.text().to_string()
        };
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "{}", text).context("Failed to write report to stderr")
    }
}

/// Wrap every line in bright-red ANSI escapes
pub fn red(text: &str) -> String {
    text.split('\n')
        .map(|line| format!("\x1b[91m{}\x1b[0m", line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Appends reports to a log file
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NotificationSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn notify(&self, report: &Report) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open report log: {}", self.path.display()))?;

        writeln!(file, "{}", report.text())
            .with_context(|| format!("Failed to write report log: {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn finding() -> Finding {
        Finding {
            queries: vec![
                "SELECT * FROM users WHERE id = 1".to_string(),
                "SELECT * FROM users WHERE id = 2".to_string(),
            ],
            call_stack: vec![
                "app/posts.rs:12".to_string(),
                "/rustc/library/std/src/rt.rs:90".to_string(),
            ],
        }
    }

    struct Collect(Arc<Mutex<Vec<String>>>);

    impl NotificationSink for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn notify(&self, report: &Report) -> Result<()> {
            self.0.lock().unwrap().push(report.text().to_string());
            Ok(())
        }
    }

    struct Failing;

    impl NotificationSink for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn notify(&self, _report: &Report) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_render_format() {
        let report = Report::new(vec![finding()], &[]);
        assert_eq!(
            report.text(),
            "N+1 queries detected:\n  SELECT * FROM users WHERE id = 1\n  SELECT * FROM users WHERE id = 2\nCall stack:\n  app/posts.rs:12\n  /rustc/library/std/src/rt.rs:90\n\n"
        );
        assert_eq!(report.to_string(), report.text());
        assert_eq!(report.len(), 1);
    }

    #[test]
    fn test_silencers_clean_stack_text_only() {
        let report = Report::new(vec![finding()], &[Pattern::literal("/rustc/")]);
        assert!(!report.text().contains("rt.rs"));
        assert!(report.text().contains("app/posts.rs:12"));
        assert_eq!(report.findings()[0].call_stack.len(), 2);
    }

    #[test]
    fn test_failing_sink_does_not_block_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Box<dyn NotificationSink>> =
            vec![Box::new(Failing), Box::new(Collect(seen.clone()))];

        dispatch(&Report::new(vec![finding()], &[]), &sinks);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nplusone.log");
        let sink = FileSink::new(&path);
        let report = Report::new(vec![finding()], &[]);

        sink.notify(&report).unwrap();
        sink.notify(&report).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("N+1 queries detected:").count(), 2);
    }

    #[test]
    fn test_file_sink_bad_path_errors() {
        let sink = FileSink::new("/nonexistent-dir/nplusone.log");
        assert!(sink.notify(&Report::new(vec![finding()], &[])).is_err());
    }

    #[test]
    fn test_red_wraps_each_line() {
        assert_eq!(red("a\nb"), "\x1b[91ma\x1b[0m\n\x1b[91mb\x1b[0m");
    }

    #[test]
    fn test_sinks_from_config() {
        let config = Configuration {
            tracing_logger: true,
            stderr_logger: true,
            log_file: Some(PathBuf::from("log/nplusone.log")),
            ..Configuration::default()
        };
        let names: Vec<String> = sinks_from_config(&config)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["tracing", "stderr", "file"]);

        let quiet = Configuration {
            tracing_logger: false,
            ..Configuration::default()
        };
        assert!(sinks_from_config(&quiet).is_empty());
    }
}
