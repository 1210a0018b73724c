//! nplusone - N+1 query detection for database-backed applications
//!
//! This library observes the queries an application executes, groups them by
//! call site and query shape, and reports clusters of near-identical queries
//! issued from the same place: the N+1 pattern.
//!
//! # Quick start
//!
//! ```
//! use nplusone::config::Configuration;
//! use nplusone::event::QueryEvent;
//! use nplusone::instrument::QueryEventBus;
//! use nplusone::scan::Detector;
//! use std::sync::Arc;
//!
//! let bus = Arc::new(QueryEventBus::new());
//! let detector = Detector::builder(Configuration::default())
//!     .with_bus(bus.clone())
//!     .build()?;
//!
//! detector.scan();
//! for id in 1..=2 {
//!     let sql = format!("SELECT * FROM comments WHERE post_id = {}", id);
//!     bus.publish(&QueryEvent::new(sql).with_call_stack(["app/feed.rs:30"]));
//! }
//! let findings = detector.finish()?;
//! assert_eq!(findings.len(), 1);
//! # Ok::<(), nplusone::Error>(())
//! ```

pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod event;
pub mod filter;
pub mod fingerprint;
pub mod instrument;
pub mod notifier;
pub mod replay;
pub mod scan;

pub use config::{Configuration, Pattern};
pub use detection::Finding;
pub use error::{Error, Result};
pub use scan::Detector;
