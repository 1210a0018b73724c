//! Query event filtering
//!
//! Decides which executed queries take part in N+1 aggregation.
//! A query is skipped when:
//! - it is a schema-introspection query (event name `SCHEMA`)
//! - it is not a read (no `SELECT` marker)
//! - it was served from an in-process result cache
//! - it matches a configured `ignore_queries` pattern

use crate::config::{Configuration, Pattern};
use crate::event::QueryEvent;

/// Marker that identifies read queries
const READ_MARKER: &str = "SELECT";

/// Filter that determines which query events are aggregated
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Queries never aggregated
    ignore_queries: Vec<Pattern>,
}

impl EventFilter {
    /// Create a filter with no ignore patterns
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter ignoring the given query patterns
    pub fn with_ignored(ignore_queries: Vec<Pattern>) -> Self {
        Self { ignore_queries }
    }

    /// Check if a query event should be aggregated
    pub fn is_eligible(&self, event: &QueryEvent) -> bool {
        !event.is_schema()
            && event.sql.contains(READ_MARKER)
            && !event.cached
            && !self.is_ignored(&event.sql)
    }

    fn is_ignored(&self, sql: &str) -> bool {
        self.ignore_queries.iter().any(|p| p.matches_whole(sql))
    }
}

impl From<&Configuration> for EventFilter {
    fn from(config: &Configuration) -> Self {
        Self::with_ignored(config.ignore_queries.clone())
    }
}
