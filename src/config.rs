//! Detector configuration
//!
//! Every knob is a named field; there is no dynamic lookup. A configuration
//! can be built in code (`Configuration::default()` plus struct update) or
//! loaded from TOML:
//!
//! ```toml
//! min_n_queries = 3
//! dialect = "postgres"
//! allow_stack_paths = ["app::reports::export", { regex = "^vendor::.*::bulk" }]
//! ignore_queries = [{ regex = "FROM \"schema_migrations\"" }]
//! raise = true
//! ```

use crate::error::{Error, Result};
use crate::fingerprint::Dialect;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A literal string or a regular expression
///
/// Literals compare for equality against query text and are searched as
/// substrings in stack frames. Regexes are searched in both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PatternSpec", into = "PatternSpec")]
pub enum Pattern {
    Literal(String),
    Regex(Regex),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PatternSpec {
    Literal(String),
    Regex { regex: String },
}

impl TryFrom<PatternSpec> for Pattern {
    type Error = String;

    fn try_from(spec: PatternSpec) -> std::result::Result<Self, Self::Error> {
        match spec {
            PatternSpec::Literal(text) => Ok(Pattern::Literal(text)),
            PatternSpec::Regex { regex } => Regex::new(&regex)
                .map(Pattern::Regex)
                .map_err(|e| format!("invalid pattern /{}/: {}", regex, e)),
        }
    }
}

impl From<Pattern> for PatternSpec {
    fn from(pattern: Pattern) -> Self {
        match pattern {
            Pattern::Literal(text) => PatternSpec::Literal(text),
            Pattern::Regex(regex) => PatternSpec::Regex {
                regex: regex.as_str().to_string(),
            },
        }
    }
}

impl Pattern {
    /// Create a literal pattern
    pub fn literal(text: impl Into<String>) -> Self {
        Pattern::Literal(text.into())
    }

    /// Compile a regex pattern
    pub fn regex(source: &str) -> Result<Self> {
        Regex::new(source)
            .map(Pattern::Regex)
            .map_err(|e| Error::Configuration(format!("invalid pattern /{}/: {}", source, e)))
    }

    /// Match against a whole value (query text)
    pub fn matches_whole(&self, text: &str) -> bool {
        match self {
            Pattern::Literal(literal) => literal == text,
            Pattern::Regex(regex) => regex.is_match(text),
        }
    }

    /// Search inside a value (stack frame)
    pub fn found_in(&self, text: &str) -> bool {
        match self {
            Pattern::Literal(literal) => text.contains(literal.as_str()),
            Pattern::Regex(regex) => regex.is_match(text),
        }
    }
}

/// Configuration for N+1 detection
///
/// # Example
/// ```
/// use nplusone::config::Configuration;
///
/// let config = Configuration::default();
/// assert_eq!(config.min_n_queries, 2);
/// assert!(!config.raise);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    /// Minimum number of same-shape queries from one call site to report
    ///
    /// Must be >= 1. A value of 1 reports every query, so 2 (the default) is
    /// the smallest useful threshold.
    pub min_n_queries: usize,

    /// SQL dialect used for fingerprinting
    pub dialect: Dialect,

    /// Stack frame patterns that exempt a call site from detection
    pub allow_stack_paths: Vec<Pattern>,

    /// Queries never aggregated
    pub ignore_queries: Vec<Pattern>,

    /// Make `pause()` a no-op
    pub ignore_pauses: bool,

    /// Return `Error::Detection` from `finish()` when findings exist
    pub raise: bool,

    /// Frames removed from rendered call stacks
    pub backtrace_silencers: Vec<Pattern>,

    /// Report through `tracing::warn!`
    pub tracing_logger: bool,

    /// Report on stderr in red
    pub stderr_logger: bool,

    /// Append reports to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            min_n_queries: 2,
            dialect: Dialect::MySql,
            allow_stack_paths: Vec::new(),
            ignore_queries: Vec::new(),
            ignore_pauses: false,
            raise: false,
            backtrace_silencers: Vec::new(),
            tracing_logger: true,
            stderr_logger: false,
            log_file: None,
        }
    }
}

impl Configuration {
    /// Load and validate a configuration file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Configuration = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.min_n_queries < 1 {
            return Err(Error::Configuration(format!(
                "min_n_queries must be >= 1, got {}",
                self.min_n_queries
            )));
        }

        Ok(())
    }
}
