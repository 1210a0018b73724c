use crate::event::{CallSiteKey, CallStack};
use std::collections::HashMap;

/// Aggregation state of one scan in one execution context
///
/// A context is owned by exactly one thread and never shared, so its maps
/// need no locking. `active` is separate from the context's existence: a
/// paused scan keeps everything it accumulated and only stops recording.
///
/// # Example
///
/// ```
/// use nplusone::event::CallStack;
/// use nplusone::scan::ScanContext;
///
/// let mut ctx = ScanContext::new();
/// let stack = || CallStack::Frames(vec!["app/posts.rs:12".to_string()]);
///
/// ctx.record("SELECT * FROM users WHERE id = 1", stack());
/// ctx.record("SELECT * FROM users WHERE id = 2", stack());
///
/// let key = stack().key();
/// assert_eq!(ctx.count(&key), 2);
/// assert_eq!(ctx.queries(&key).len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ScanContext {
    active: bool,
    counters: HashMap<CallSiteKey, usize>,
    query_log: HashMap<CallSiteKey, Vec<String>>,
    call_stacks: HashMap<CallSiteKey, Vec<String>>,
    /// Call sites in first-seen order
    call_sites: Vec<CallSiteKey>,
    /// Occurrence count from which a call site's stack is kept
    keep_stack_from: usize,
}

impl Default for ScanContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanContext {
    /// Create an active, empty context for the default threshold of 2
    pub fn new() -> Self {
        Self::with_min_queries(2)
    }

    /// Create an active, empty context for a detection threshold
    ///
    /// Stacks are kept from the second occurrence of a call site, or from
    /// the first when the threshold is 1 so that every reportable call site
    /// can be checked against the allow-list.
    pub fn with_min_queries(min_n_queries: usize) -> Self {
        Self {
            active: true,
            counters: HashMap::new(),
            query_log: HashMap::new(),
            call_stacks: HashMap::new(),
            call_sites: Vec::new(),
            keep_stack_from: min_n_queries.clamp(1, 2),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop recording, keeping accumulated state
    pub fn pause(&mut self) {
        self.active = false;
    }

    /// Resume recording
    pub fn resume(&mut self) {
        self.active = true;
    }

    pub(crate) fn set_active(&mut self, active: bool) -> bool {
        std::mem::replace(&mut self.active, active)
    }

    /// Record one query at a call site
    ///
    /// Returns the call site's new count, or `None` if the context is paused.
    /// The stack is kept (and resolved) only once the call site could be
    /// reported: from the second occurrence on, or the first at threshold 1.
    pub fn record(&mut self, sql: impl Into<String>, stack: CallStack) -> Option<usize> {
        if !self.active {
            return None;
        }

        let key = stack.key();
        let count = self.counters.entry(key.clone()).or_insert(0);
        *count += 1;
        let count = *count;

        if count == 1 {
            self.call_sites.push(key.clone());
        }

        self.query_log.entry(key.clone()).or_default().push(sql.into());

        if count >= self.keep_stack_from && !self.call_stacks.contains_key(&key) {
            self.call_stacks.insert(key, stack.into_frames());
        }

        Some(count)
    }

    /// Occurrences recorded for a call site
    pub fn count(&self, key: &CallSiteKey) -> usize {
        self.counters.get(key).copied().unwrap_or(0)
    }

    /// Raw queries recorded for a call site, in arrival order
    pub fn queries(&self, key: &CallSiteKey) -> &[String] {
        self.query_log.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Stack frames of a call site that reached the stack-keeping count
    pub fn call_stack(&self, key: &CallSiteKey) -> Option<&[String]> {
        self.call_stacks.get(key).map(Vec::as_slice)
    }

    /// Call sites in the order they were first seen
    pub fn call_sites(&self) -> impl Iterator<Item = &CallSiteKey> {
        self.call_sites.iter()
    }

    /// Total number of recorded queries
    pub fn total_queries(&self) -> usize {
        self.counters.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.call_sites.is_empty()
    }
}
