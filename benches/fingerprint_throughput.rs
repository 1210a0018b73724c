/// Fingerprint and detection throughput
///
/// Fingerprinting runs once per recorded query at finish time, so its cost
/// bounds how long `finish()` takes on request-sized scans.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nplusone::config::Configuration;
use nplusone::detection::DetectionEngine;
use nplusone::event::CallStack;
use nplusone::fingerprint::{mysql, Dialect};
use nplusone::scan::ScanContext;
use std::time::Duration;

const QUERIES: &[&str] = &[
    "SELECT * FROM users WHERE id = 42",
    "SELECT `posts`.* FROM `posts` WHERE `posts`.`user_id` IN (1, 2, 3, 4, 5, 6, 7, 8)",
    "SELECT name FROM tags WHERE slug = 'rust' AND created_at > '2024-01-01' ORDER BY name ASC LIMIT 10",
    "INSERT INTO audit (a, b) VALUES (1, 'x'), (2, 'y'), (3, 'z')",
    "/* controller:posts */ SELECT COUNT(*) FROM comments WHERE post_id = 0x1F",
];

fn bench_mysql_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("mysql_fingerprint");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(QUERIES.len() as u64));

    group.bench_function("mixed_queries", |b| {
        b.iter(|| {
            for sql in QUERIES {
                black_box(mysql::fingerprint(black_box(sql)));
            }
        });
    });

    group.finish();
}

#[cfg(feature = "postgres")]
fn bench_postgres_fingerprint(c: &mut Criterion) {
    use nplusone::fingerprint::postgres;

    let mut group = c.benchmark_group("postgres_fingerprint");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    group.bench_function("select_in_list", |b| {
        b.iter(|| {
            black_box(postgres::fingerprint(black_box(
                "SELECT * FROM posts WHERE user_id IN (1, 2, 3, 4) AND state = 'live'",
            )))
        });
    });

    group.finish();
}

#[cfg(not(feature = "postgres"))]
fn bench_postgres_fingerprint(_c: &mut Criterion) {}

fn bench_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("detection");
    group.measurement_time(Duration::from_secs(5));

    for size in [10usize, 100, 1000].iter() {
        let mut ctx = ScanContext::new();
        for i in 0..*size {
            let site = format!("app/site_{}.rs:1", i % 10);
            ctx.record(
                format!("SELECT * FROM users WHERE id = {}", i),
                CallStack::Frames(vec![site]),
            );
        }
        let config = Configuration {
            dialect: Dialect::MySql,
            ..Configuration::default()
        };

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &ctx, |b, ctx| {
            let engine = DetectionEngine::new(&config);
            b.iter(|| black_box(engine.process(ctx)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_mysql_fingerprint,
    bench_postgres_fingerprint,
    bench_detection
);
criterion_main!(benches);
