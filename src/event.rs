//! Query events and call-site identification
//!
//! Every executed query is delivered as a [`QueryEvent`]. The call stack at
//! delivery time identifies the call site: stacks are hashed with SHA-256 into
//! a [`CallSiteKey`], so identical stacks always share a key.
//!
//! Native stacks are captured unresolved. Symbol resolution is the expensive
//! part of stack capture, so it only happens when a call site repeats and its
//! frames are actually kept (see [`CallStack::into_frames`]).

use backtrace::Backtrace;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Event name used by ORMs for schema-introspection queries
pub const SCHEMA_EVENT_NAME: &str = "SCHEMA";

/// A query executed by the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvent {
    /// Raw query text
    pub sql: String,

    /// Event name supplied by the ORM (e.g. "SCHEMA", "User Load")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Served from an in-process result cache
    #[serde(default)]
    pub cached: bool,

    /// Stack supplied by the host; captured at delivery time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_stack: Option<Vec<String>>,
}

impl QueryEvent {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            name: None,
            cached: false,
            call_stack: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    pub fn with_call_stack<I, S>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.call_stack = Some(frames.into_iter().map(Into::into).collect());
        self
    }

    /// Whether this is a schema-introspection query
    pub fn is_schema(&self) -> bool {
        self.name.as_deref() == Some(SCHEMA_EVENT_NAME)
    }
}

/// Stable identifier of a call site (hex SHA-256 of its stack)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallSiteKey(String);

impl CallSiteKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallSiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A captured call stack
#[derive(Debug, Clone)]
pub enum CallStack {
    /// Frames already rendered as text
    Frames(Vec<String>),
    /// Native backtrace, symbols not yet resolved
    Native(Backtrace),
}

impl CallStack {
    /// Derive the call-site key
    ///
    /// Text frames are hashed as written; native frames by instruction pointer.
    pub fn key(&self) -> CallSiteKey {
        let mut hasher = Sha256::new();
        match self {
            CallStack::Frames(frames) => {
                for frame in frames {
                    hasher.update(frame.as_bytes());
                    hasher.update(b"\n");
                }
            }
            CallStack::Native(backtrace) => {
                for frame in backtrace.frames() {
                    hasher.update((frame.ip() as usize).to_le_bytes());
                }
            }
        }
        CallSiteKey(hex::encode(hasher.finalize()))
    }

    /// Render the stack as text frames, resolving symbols if needed
    pub fn into_frames(self) -> Vec<String> {
        match self {
            CallStack::Frames(frames) => frames,
            CallStack::Native(mut backtrace) => {
                backtrace.resolve();
                render_backtrace(&backtrace)
            }
        }
    }
}

/// Format a resolved backtrace as `file:line:in `symbol`` lines
fn render_backtrace(backtrace: &Backtrace) -> Vec<String> {
    let mut frames = Vec::with_capacity(backtrace.frames().len());

    for frame in backtrace.frames() {
        let symbols = frame.symbols();
        if symbols.is_empty() {
            frames.push(format!("{:?}", frame.ip()));
            continue;
        }

        for symbol in symbols {
            let name = symbol
                .name()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "<unknown>".to_string());
            let line = match (symbol.filename(), symbol.lineno()) {
                (Some(file), Some(line)) => format!("{}:{}:in `{}`", file.display(), line, name),
                (Some(file), None) => format!("{}:in `{}`", file.display(), name),
                _ => format!("{:?}:in `{}`", frame.ip(), name),
            };
            frames.push(line);
        }
    }

    frames
}

/// Strategy for capturing the stack of the code executing a query
pub trait StackCapture: Send + Sync {
    fn capture(&self) -> CallStack;
}

/// Captures the native stack with the `backtrace` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktraceCapture;

impl StackCapture for BacktraceCapture {
    fn capture(&self) -> CallStack {
        CallStack::Native(Backtrace::new_unresolved())
    }
}
