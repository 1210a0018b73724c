//! Scan lifecycle
//!
//! A scan aggregates the queries executed on one thread between `scan()` and
//! `finish()`. [`ScanContext`] holds the aggregation state; [`Detector`]
//! drives the lifecycle, listens on the query event bus and reports findings.

mod context;
mod controller;

pub use context::ScanContext;
pub use controller::{Detector, DetectorBuilder};
