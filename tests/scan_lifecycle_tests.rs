// Scan lifecycle against the process-wide query event bus
//
// These tests share QueryEventBus::global() and assert on its listener
// count, so they run serially.

use nplusone::config::{Configuration, Pattern};
use nplusone::event::QueryEvent;
use nplusone::instrument::QueryEventBus;
use nplusone::notifier::{NotificationSink, Report};
use nplusone::{Detector, Error};
use serial_test::serial;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Collect(Arc<Mutex<Vec<String>>>);

impl NotificationSink for Collect {
    fn name(&self) -> &str {
        "collect"
    }

    fn notify(&self, report: &Report) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(report.text().to_string());
        Ok(())
    }
}

fn quiet() -> Configuration {
    Configuration {
        tracing_logger: false,
        ..Configuration::default()
    }
}

/// Simulates an ORM loading comments one post at a time
fn load_comments_per_post(post_ids: &[u32]) {
    for id in post_ids {
        QueryEventBus::global().publish(
            &QueryEvent::new(format!("SELECT * FROM comments WHERE post_id = {}", id))
                .with_name("Comment Load")
                .with_call_stack(["app/controllers/posts.rs:42", "app/main.rs:7"]),
        );
    }
}

#[test]
#[serial]
fn test_global_bus_detection() {
    let sink = Collect::default();
    let detector = Detector::builder(quiet())
        .with_sink(sink.clone())
        .build()
        .unwrap();

    let before = QueryEventBus::global().listener_count();
    detector
        .scan_with(|| load_comments_per_post(&[1, 2, 3]))
        .unwrap();
    assert!(!detector.is_scanning());
    assert_eq!(QueryEventBus::global().listener_count(), before + 1);

    let reports = sink.0.lock().unwrap().clone();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].contains("SELECT * FROM comments WHERE post_id = 3"));
    assert!(reports[0].contains("app/controllers/posts.rs:42"));

    assert!(detector.unsubscribe());
    assert_eq!(QueryEventBus::global().listener_count(), before);
}

#[test]
#[serial]
fn test_raise_surfaces_report_from_scan_with() {
    let config = Configuration {
        raise: true,
        ..quiet()
    };
    let detector = Detector::new(config).unwrap();

    let err = detector
        .scan_with(|| load_comments_per_post(&[1, 2]))
        .unwrap_err();

    match &err {
        Error::Detection(report) => {
            assert_eq!(report.findings()[0].queries.len(), 2);
            assert!(err.to_string().starts_with("N+1 queries detected:"));
        }
        other => panic!("expected detection error, got {}", other),
    }
    drop(detector);
}

#[test]
#[serial]
fn test_allow_listed_call_site_not_reported() {
    let config = Configuration {
        allow_stack_paths: vec![Pattern::literal("app/controllers/posts.rs")],
        raise: true,
        ..quiet()
    };
    let detector = Detector::new(config).unwrap();

    detector
        .scan_with(|| load_comments_per_post(&[1, 2, 3, 4]))
        .unwrap();
    detector.unsubscribe();
}

#[test]
#[serial]
fn test_dropped_detector_leaves_global_bus() {
    let before = QueryEventBus::global().listener_count();
    {
        let detector = Detector::new(quiet()).unwrap();
        detector.scan();
        assert_eq!(QueryEventBus::global().listener_count(), before + 1);
        detector.finish().unwrap();
    }
    assert_eq!(QueryEventBus::global().listener_count(), before);
}

#[test]
#[serial]
fn test_request_style_lifecycle() {
    let config = Configuration {
        min_n_queries: 3,
        ignore_queries: vec![Pattern::literal("SELECT 1")],
        ..quiet()
    };
    let detector = Detector::new(config).unwrap();

    for request in 0..3u32 {
        detector.scan();
        QueryEventBus::global().publish(&QueryEvent::new("SELECT 1"));
        QueryEventBus::global().publish(&QueryEvent::new("SELECT 1"));
        QueryEventBus::global().publish(&QueryEvent::new("SELECT 1"));
        detector.pause_during(|| load_comments_per_post(&[1, 2, 3]));
        load_comments_per_post(&[request, request + 1]);

        assert!(detector.finish().unwrap().is_empty());
    }
    detector.unsubscribe();
}
