//! N+1 detection over a finished scan
//!
//! For every call site that reached the threshold, its queries are grouped by
//! fingerprint. Groups that themselves reach the threshold become findings,
//! unless any frame of the call site's stack is allow-listed.
//!
//! Output order is deterministic: call sites in first-seen order, and within a
//! call site fingerprint groups in first-seen order.

use crate::config::Configuration;
use crate::error::Result;
use crate::event::CallSiteKey;
use crate::fingerprint::fingerprint;
use crate::scan::ScanContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// ORM internals that legitimately repeat similar queries
///
/// Eager-loading (preloaders, batch loaders) and uniqueness validation issue
/// one query per association or record by design and are never reported.
pub const DEFAULT_ALLOW_LIST: &[&str] = &[
    "active_record/associations/preloader",
    "active_record/validations/uniqueness",
    "sea_orm::query::loader",
    "diesel::associations",
];

/// One cluster of same-shape queries issued from one call site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Raw queries sharing a fingerprint, in arrival order
    pub queries: Vec<String>,
    /// Stack of the call site that issued them
    pub call_stack: Vec<String>,
}

/// Turns scan state into findings
#[derive(Debug, Clone, Copy)]
pub struct DetectionEngine<'a> {
    config: &'a Configuration,
}

impl<'a> DetectionEngine<'a> {
    pub fn new(config: &'a Configuration) -> Self {
        Self { config }
    }

    /// Produce findings for a scan
    ///
    /// # Errors
    ///
    /// Any fingerprinting error fails the whole run; a query that cannot be
    /// fingerprinted is never silently left out of grouping.
    pub fn process(&self, ctx: &ScanContext) -> Result<Vec<Finding>> {
        let threshold = self.config.min_n_queries;
        let mut findings = Vec::new();

        for key in ctx.call_sites() {
            if ctx.count(key) < threshold {
                continue;
            }

            let groups = self.group_by_fingerprint(ctx.queries(key))?;
            let repeated: Vec<Vec<String>> = groups
                .into_iter()
                .filter(|queries| queries.len() >= threshold)
                .collect();

            if repeated.is_empty() {
                continue;
            }

            let call_stack = ctx.call_stack(key).unwrap_or(&[]);
            if self.is_allowed(call_stack) {
                debug!(call_site = %short(key), "skipping allow-listed call site");
                continue;
            }

            for queries in repeated {
                findings.push(Finding {
                    queries,
                    call_stack: call_stack.to_vec(),
                });
            }
        }

        debug!(
            call_sites = ctx.call_sites().count(),
            findings = findings.len(),
            "detection finished"
        );
        Ok(findings)
    }

    /// Group queries by fingerprint, preserving first-seen order
    fn group_by_fingerprint(&self, queries: &[String]) -> Result<Vec<Vec<String>>> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<String>> = Vec::new();

        for sql in queries {
            let fp = fingerprint(sql, self.config.dialect)?;
            match index.get(&fp) {
                Some(&i) => groups[i].push(sql.clone()),
                None => {
                    index.insert(fp, groups.len());
                    groups.push(vec![sql.clone()]);
                }
            }
        }

        Ok(groups)
    }

    /// Whether any frame matches a configured or built-in allow pattern
    fn is_allowed(&self, call_stack: &[String]) -> bool {
        call_stack.iter().any(|frame| {
            self.config
                .allow_stack_paths
                .iter()
                .any(|pattern| pattern.found_in(frame))
                || DEFAULT_ALLOW_LIST.iter().any(|path| frame.contains(path))
        })
    }
}

fn short(key: &CallSiteKey) -> &str {
    key.as_str().get(..12).unwrap_or(key.as_str())
}
