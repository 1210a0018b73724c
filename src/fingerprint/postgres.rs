//! Parser-backed fingerprints for Postgres-like dialects
//!
//! Queries are parsed with `sqlparser` (Postgres dialect) and the syntax tree
//! is normalized before hashing:
//! - every literal (and signed literal) becomes a `?` placeholder
//! - `IN (...)` lists keep a single element
//! - multi-row `VALUES` keep their first row
//!
//! The canonical rendering of the normalized tree is hashed with SHA-256 and
//! the first 8 bytes are hex-encoded, so fingerprints are 16 characters and
//! insensitive to keyword case and formatting.

use crate::error::{Error, Result};

#[cfg(feature = "postgres")]
mod normalize {
    use sqlparser::ast::{Expr, Query, SetExpr, UnaryOperator, Value, VisitMut, VisitorMut};
    use std::ops::ControlFlow;

    pub(super) struct LiteralStripper;

    impl VisitorMut for LiteralStripper {
        type Break = ();

        fn post_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
            if let SetExpr::Values(values) = query.body.as_mut() {
                values.rows.truncate(1);
            }
            ControlFlow::Continue(())
        }

        fn post_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
            let literal = match expr {
                Expr::Value(_) => true,
                Expr::UnaryOp {
                    op: UnaryOperator::Minus | UnaryOperator::Plus,
                    expr: inner,
                } => matches!(inner.as_ref(), Expr::Value(_)),
                Expr::InList { list, .. } => {
                    list.truncate(1);
                    false
                }
                _ => false,
            };

            if literal {
                *expr = Expr::Value(Value::Placeholder("?".to_string()).with_empty_span());
            }
            ControlFlow::Continue(())
        }
    }

    pub(super) fn strip_literals<T: VisitMut>(tree: &mut T) {
        let _ = tree.visit(&mut LiteralStripper);
    }
}

/// Fingerprint a Postgres-like query
#[cfg(feature = "postgres")]
pub fn fingerprint(sql: &str) -> Result<String> {
    use sha2::{Digest, Sha256};
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    let mut statements =
        Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| Error::Fingerprint {
            query: sql.to_string(),
            reason: e.to_string(),
        })?;

    if statements.is_empty() {
        return Err(Error::Fingerprint {
            query: sql.to_string(),
            reason: "no statement found".to_string(),
        });
    }

    normalize::strip_literals(&mut statements);

    let canonical = statements
        .iter()
        .map(|statement| statement.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    let digest = Sha256::digest(canonical.as_bytes());

    Ok(hex::encode(&digest[..8]))
}

/// Fingerprint a Postgres-like query
///
/// Always fails: the crate was built without the `postgres` feature.
#[cfg(not(feature = "postgres"))]
pub fn fingerprint(_sql: &str) -> Result<String> {
    Err(Error::MissingDependency {
        capability: "Postgres query normalization (rebuild with the `postgres` feature)"
            .to_string(),
    })
}
