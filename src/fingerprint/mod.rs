//! Query fingerprinting
//!
//! A fingerprint is the canonical shape of a query: literals, value lists,
//! comments and formatting are normalized away so that queries differing only
//! in their parameters compare equal.
//!
//! Two strategies exist because literal and comment syntax differ per dialect:
//! - **MySQL-like:** ordered text rewriting, no parser (see [`mysql`])
//! - **Postgres-like:** parser-backed normalization (see [`postgres`]), only
//!   available with the `postgres` feature. Without it fingerprinting fails
//!   with [`Error::MissingDependency`] rather than degrading to text rules.
//!
//! # Example
//!
//! ```
//! use nplusone::fingerprint::{fingerprint, Dialect};
//!
//! let a = fingerprint("SELECT * FROM users WHERE id = 1", Dialect::MySql)?;
//! let b = fingerprint("SELECT * FROM users WHERE id = 2", Dialect::MySql)?;
//! assert_eq!(a, b);
//! assert_eq!(a, "select * from users where id = ?");
//! # Ok::<(), nplusone::Error>(())
//! ```

pub mod mysql;
pub mod postgres;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SQL dialect family used to pick a fingerprint strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dialect {
    /// MySQL, MariaDB and wire-compatible servers
    MySql,
    /// PostgreSQL and derivatives
    Postgres,
}

impl Dialect {
    /// Resolve a database adapter/driver name (e.g. "Mysql2", "PostGIS", "sqlx-postgres")
    ///
    /// Unknown adapters are a configuration error; there is no default guess.
    pub fn from_adapter_name(adapter: &str) -> Result<Self> {
        let adapter = adapter.to_ascii_lowercase();

        if ["mysql", "maria", "trilogy"].iter().any(|m| adapter.contains(m)) {
            Ok(Dialect::MySql)
        } else if adapter.contains("postg") || adapter == "pg" {
            Ok(Dialect::Postgres)
        } else {
            Err(Error::Configuration(format!(
                "unknown query dialect for adapter '{}'",
                adapter
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mysql2" | "mariadb" | "trilogy" => Ok(Dialect::MySql),
            "postgres" | "postgresql" | "pg" | "postgis" => Ok(Dialect::Postgres),
            other => Err(Error::Configuration(format!(
                "unknown query dialect '{}' (expected mysql or postgres)",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Dialect {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Dialect> for String {
    fn from(dialect: Dialect) -> Self {
        dialect.as_str().to_string()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the fingerprint of a raw query
///
/// Pure and deterministic: identical input always yields identical output.
///
/// # Errors
///
/// - [`Error::Fingerprint`] if the normalizer cannot process the query
/// - [`Error::MissingDependency`] if the dialect's normalizer is not compiled in
pub fn fingerprint(sql: &str, dialect: Dialect) -> Result<String> {
    match dialect {
        Dialect::MySql => Ok(mysql::fingerprint(sql)),
        Dialect::Postgres => postgres::fingerprint(sql),
    }
}
