//! Property-based tests for fingerprinting and detection
//!
//! Properties covered:
//! 1. Fingerprints are deterministic and never panic on arbitrary input
//! 2. Literal values never change a fingerprint
//! 3. IN-lists and multi-row VALUES collapse regardless of length
//! 4. A call site repeating a query shape N times yields one finding of N

use nplusone::config::Configuration;
use nplusone::detection::DetectionEngine;
use nplusone::event::CallStack;
use nplusone::fingerprint::{fingerprint, mysql, Dialect};
use nplusone::scan::ScanContext;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_mysql_fingerprint_deterministic(sql in ".{0,200}") {
        // Property: same input, same output, no panics
        prop_assert_eq!(mysql::fingerprint(&sql), mysql::fingerprint(&sql));
    }

    #[test]
    fn prop_numeric_literals_ignored(a in any::<u32>(), b in any::<u32>()) {
        let fa = mysql::fingerprint(&format!("SELECT * FROM users WHERE id = {}", a));
        let fb = mysql::fingerprint(&format!("SELECT * FROM users WHERE id = {}", b));
        prop_assert_eq!(&fa, &fb);
        prop_assert_eq!(fa, "select * from users where id = ?");
    }

    #[test]
    fn prop_string_literals_ignored(value in "[a-zA-Z0-9 _@.]{0,30}") {
        let sql = format!("SELECT * FROM users WHERE email = '{}' LIMIT 1", value);
        prop_assert_eq!(
            mysql::fingerprint(&sql),
            "select * from users where email = ? limit ?"
        );
    }

    #[test]
    fn prop_in_list_length_ignored(ids in prop::collection::vec(any::<u16>(), 1..30)) {
        let list = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ");
        let sql = format!("SELECT * FROM posts WHERE user_id IN ({})", list);
        prop_assert_eq!(mysql::fingerprint(&sql), "select * from posts where user_id in(?+)");
    }

    #[test]
    fn prop_multi_row_values_collapse(rows in 1usize..20) {
        let values = (0..rows).map(|i| format!("({}, 'n{}')", i, i)).collect::<Vec<_>>().join(", ");
        let sql = format!("INSERT INTO tags (id, name) VALUES {}", values);
        prop_assert_eq!(
            mysql::fingerprint(&sql),
            mysql::fingerprint("INSERT INTO tags (id, name) VALUES (1, 'a')")
        );
    }
}

#[cfg(feature = "postgres")]
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_postgres_literals_ignored(a in any::<i32>(), name in "[a-z]{1,12}") {
        let fa = fingerprint(
            &format!("SELECT * FROM users WHERE id = {} AND name = '{}'", a, name),
            Dialect::Postgres,
        ).unwrap();
        let fb = fingerprint("SELECT * FROM users WHERE id = 1 AND name = 'x'", Dialect::Postgres).unwrap();
        prop_assert_eq!(fa, fb);
    }

    #[test]
    fn prop_postgres_in_list_length_ignored(ids in prop::collection::vec(1u32..10_000, 1..20)) {
        let list = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ");
        let fa = fingerprint(&format!("SELECT * FROM posts WHERE id IN ({})", list), Dialect::Postgres).unwrap();
        let fb = fingerprint("SELECT * FROM posts WHERE id IN (7)", Dialect::Postgres).unwrap();
        prop_assert_eq!(fa, fb);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_repeated_shape_one_finding(n in 2usize..40, threshold in 1usize..40) {
        let mut ctx = ScanContext::with_min_queries(threshold);
        for i in 0..n {
            ctx.record(
                format!("SELECT * FROM comments WHERE post_id = {}", i),
                CallStack::Frames(vec!["app/feed.rs:10".to_string()]),
            );
        }
        let config = Configuration {
            min_n_queries: threshold,
            ..Configuration::default()
        };

        let findings = DetectionEngine::new(&config).process(&ctx).unwrap();
        if n >= threshold {
            prop_assert_eq!(findings.len(), 1);
            prop_assert_eq!(findings[0].queries.len(), n);
        } else {
            prop_assert!(findings.is_empty());
        }
    }
}
