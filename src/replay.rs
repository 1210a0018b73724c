//! Offline replay of recorded query events
//!
//! An event log holds one JSON [`QueryEvent`] per line:
//!
//! ```text
//! {"sql": "SELECT * FROM users WHERE id = 1", "call_stack": ["app/posts.rs:12"]}
//! {"sql": "SELECT * FROM users WHERE id = 2", "call_stack": ["app/posts.rs:12"]}
//! {"sql": "SELECT attname FROM pg_attribute", "name": "SCHEMA"}
//! ```
//!
//! The whole log is treated as one scan. Events without a `call_stack` all
//! share the empty call site.

use crate::config::Configuration;
use crate::detection::{DetectionEngine, Finding};
use crate::error::{Error, Result};
use crate::event::{CallStack, QueryEvent};
use crate::filter::EventFilter;
use crate::scan::ScanContext;
use std::io::BufRead;
use tracing::debug;

/// Replay an event log and return its findings
///
/// Blank lines are skipped.
///
/// # Errors
///
/// Fails on unreadable input, on a line that is not a valid event, or when
/// detection fails.
pub fn replay<R: BufRead>(reader: R, config: &Configuration) -> Result<Vec<Finding>> {
    let ctx = aggregate(reader, config)?;
    debug!(
        queries = ctx.total_queries(),
        call_sites = ctx.call_sites().count(),
        "event log replayed"
    );
    DetectionEngine::new(config).process(&ctx)
}

fn aggregate<R: BufRead>(reader: R, config: &Configuration) -> Result<ScanContext> {
    let filter = EventFilter::from(config);
    let mut ctx = ScanContext::with_min_queries(config.min_n_queries);

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let event: QueryEvent = serde_json::from_str(&line).map_err(|e| Error::InvalidEvent {
            line: index + 1,
            reason: e.to_string(),
        })?;
        if !filter.is_eligible(&event) {
            continue;
        }

        let stack = CallStack::Frames(event.call_stack.unwrap_or_default());
        ctx.record(event.sql, stack);
    }

    Ok(ctx)
}
