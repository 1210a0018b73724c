use super::ScanContext;
use crate::config::Configuration;
use crate::detection::{DetectionEngine, Finding};
use crate::error::{Error, Result};
use crate::event::{BacktraceCapture, CallStack, QueryEvent, StackCapture};
use crate::filter::EventFilter;
use crate::instrument::{QueryEventBus, QueryListener, SubscriptionId};
use crate::notifier::{self, NotificationSink, Report};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, trace, warn};

static NEXT_DETECTOR_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Scan contexts of the current thread, keyed by detector id
    static SCANS: RefCell<HashMap<u64, ScanContext>> = RefCell::new(HashMap::new());
}

struct Inner {
    id: u64,
    config: Configuration,
    filter: EventFilter,
    capture: Box<dyn StackCapture>,
    sinks: Vec<Box<dyn NotificationSink>>,
    bus: Arc<QueryEventBus>,
    subscribed: AtomicBool,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let subscription = self
            .subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = subscription {
            self.bus.unsubscribe(id);
        }

        let _ = SCANS.try_with(|scans| {
            if let Ok(mut scans) = scans.try_borrow_mut() {
                scans.remove(&self.id);
            }
        });
    }
}

/// Bus listener forwarding events to its detector
///
/// Holds a weak handle so the bus never keeps a detector alive.
struct ScanListener {
    detector: Weak<Inner>,
}

impl QueryListener for ScanListener {
    fn on_query(&self, event: &QueryEvent) {
        if let Some(inner) = self.detector.upgrade() {
            Detector { inner }.observe(event);
        }
    }
}

/// N+1 scan controller
///
/// A detector owns a configuration, its notification sinks and a handle to a
/// [`QueryEventBus`]. Scans are per thread: `scan()` on one thread never sees
/// queries published on another. Cloning a detector shares it.
///
/// # Example
///
/// ```
/// use nplusone::config::Configuration;
/// use nplusone::event::QueryEvent;
/// use nplusone::instrument::QueryEventBus;
/// use nplusone::scan::Detector;
/// use std::sync::Arc;
///
/// let bus = Arc::new(QueryEventBus::new());
/// let config = Configuration {
///     tracing_logger: false,
///     ..Configuration::default()
/// };
/// let detector = Detector::builder(config).with_bus(bus.clone()).build().unwrap();
///
/// detector.scan();
/// for id in 1..=3 {
///     let sql = format!("SELECT * FROM users WHERE id = {}", id);
///     bus.publish(&QueryEvent::new(sql).with_call_stack(["app/posts.rs:12"]));
/// }
/// let findings = detector.finish().unwrap();
///
/// assert_eq!(findings.len(), 1);
/// assert_eq!(findings[0].queries.len(), 3);
/// ```
#[derive(Clone)]
pub struct Detector {
    inner: Arc<Inner>,
}

/// Builder for [`Detector`]
pub struct DetectorBuilder {
    config: Configuration,
    sinks: Vec<Box<dyn NotificationSink>>,
    capture: Option<Box<dyn StackCapture>>,
    bus: Option<Arc<QueryEventBus>>,
}

impl DetectorBuilder {
    /// Add a sink next to the ones enabled in the configuration
    pub fn with_sink(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn with_capture(mut self, capture: impl StackCapture + 'static) -> Self {
        self.capture = Some(Box::new(capture));
        self
    }

    /// Listen on a private bus instead of the process-wide one
    pub fn with_bus(mut self, bus: Arc<QueryEventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// # Errors
    ///
    /// Fails if the configuration does not validate.
    pub fn build(self) -> Result<Detector> {
        self.config.validate()?;

        let mut sinks = notifier::sinks_from_config(&self.config);
        sinks.extend(self.sinks);

        let inner = Inner {
            id: NEXT_DETECTOR_ID.fetch_add(1, Ordering::Relaxed),
            filter: EventFilter::from(&self.config),
            config: self.config,
            capture: self
                .capture
                .unwrap_or_else(|| Box::new(BacktraceCapture) as Box<dyn StackCapture>),
            sinks,
            bus: self.bus.unwrap_or_else(QueryEventBus::global),
            subscribed: AtomicBool::new(false),
            subscription: Mutex::new(None),
        };

        Ok(Detector {
            inner: Arc::new(inner),
        })
    }
}

/// Runs `finish()` if the scan body unwinds
struct FinishGuard<'a> {
    detector: &'a Detector,
    armed: bool,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.detector.finish() {
            warn!(error = %e, "scan body panicked; findings could not be returned");
        }
    }
}

/// Restores the active flag after a scoped pause
struct RestoreGuard {
    id: u64,
    previous: bool,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        let _ = SCANS.try_with(|scans| {
            if let Some(ctx) = scans.borrow_mut().get_mut(&self.id) {
                ctx.set_active(previous);
            }
        });
    }
}

impl Detector {
    /// Detector on the process-wide bus with default stack capture
    pub fn new(config: Configuration) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: Configuration) -> DetectorBuilder {
        DetectorBuilder {
            config,
            sinks: Vec::new(),
            capture: None,
            bus: None,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    /// Start a scan on the current thread
    ///
    /// A no-op while a scan is active, so nested scans never reset counters.
    /// A paused scan is discarded and replaced.
    pub fn scan(&self) {
        self.start();
    }

    /// Run `body` inside a scan, finishing it however `body` exits
    ///
    /// If a scan is already active, `body` runs under it and nothing is
    /// finished here. If `body` panics, the scan is still finished and its
    /// report dispatched before the panic continues.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Detection`] when findings exist and `raise` is set, or
    /// any fingerprinting error from detection.
    pub fn scan_with<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        if !self.start() {
            return Ok(body());
        }

        let mut guard = FinishGuard {
            detector: self,
            armed: true,
        };
        let value = body();
        guard.armed = false;

        self.finish()?;
        Ok(value)
    }

    /// Stop recording without discarding the scan
    pub fn pause(&self) {
        if self.inner.config.ignore_pauses {
            debug!(detector = self.inner.id, "pause ignored");
            return;
        }
        self.with_context(|ctx| ctx.pause());
    }

    /// Run `body` with recording paused, restoring the previous state after
    pub fn pause_during<T, F>(&self, body: F) -> T
    where
        F: FnOnce() -> T,
    {
        if self.inner.config.ignore_pauses {
            return body();
        }

        let previous = self.with_context(|ctx| ctx.set_active(false));
        let _guard = previous.map(|previous| RestoreGuard {
            id: self.inner.id,
            previous,
        });

        body()
    }

    pub fn resume(&self) {
        self.with_context(|ctx| ctx.resume());
    }

    /// Finish the current thread's scan and report its findings
    ///
    /// Without an active scan this does nothing. Otherwise the scan is
    /// removed, detection runs and a non-empty report goes to every sink.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Detection`] carrying the report when findings exist
    /// and `raise` is set. Fingerprinting errors propagate.
    pub fn finish(&self) -> Result<Vec<Finding>> {
        let id = self.inner.id;
        let ctx = SCANS.with(|scans| {
            let mut scans = scans.borrow_mut();
            match scans.get(&id) {
                Some(ctx) if ctx.is_active() => scans.remove(&id),
                _ => None,
            }
        });

        let Some(ctx) = ctx else {
            return Ok(Vec::new());
        };

        let config = &self.inner.config;
        let findings = DetectionEngine::new(config).process(&ctx)?;
        debug!(
            detector = id,
            queries = ctx.total_queries(),
            findings = findings.len(),
            "scan finished"
        );

        if findings.is_empty() {
            return Ok(findings);
        }

        let report = Report::new(findings, &config.backtrace_silencers);
        notifier::dispatch(&report, &self.inner.sinks);

        if config.raise {
            return Err(Error::Detection(Box::new(report)));
        }
        Ok(report.into_findings())
    }

    /// Aggregate one query event into the current thread's scan
    pub fn observe(&self, event: &QueryEvent) {
        if !self.is_scanning() || !self.inner.filter.is_eligible(event) {
            return;
        }

        let stack = match &event.call_stack {
            Some(frames) => CallStack::Frames(frames.clone()),
            None => self.inner.capture.capture(),
        };

        let count = self.with_context(|ctx| ctx.record(event.sql.as_str(), stack));
        if let Some(Some(count)) = count {
            trace!(detector = self.inner.id, count, sql = %event.sql, "query recorded");
        }
    }

    /// Remove the bus listener; returns false if none was registered
    pub fn unsubscribe(&self) -> bool {
        let mut subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.subscribed.store(false, Ordering::Release);

        match subscription.take() {
            Some(id) => {
                debug!(detector = self.inner.id, "unsubscribed from query events");
                self.inner.bus.unsubscribe(id)
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscribed.load(Ordering::Acquire)
    }

    /// Whether the current thread has an active scan
    pub fn is_scanning(&self) -> bool {
        self.with_context(|ctx| ctx.is_active()).unwrap_or(false)
    }

    /// Install a fresh context unless one is active; true if a scan started
    fn start(&self) -> bool {
        self.subscribe();

        let id = self.inner.id;
        let min_n_queries = self.inner.config.min_n_queries;
        let started = SCANS.with(|scans| {
            let mut scans = scans.borrow_mut();
            match scans.get(&id) {
                Some(ctx) if ctx.is_active() => false,
                _ => {
                    scans.insert(id, ScanContext::with_min_queries(min_n_queries));
                    true
                }
            }
        });

        if started {
            debug!(detector = id, "scan started");
        }
        started
    }

    /// Register the bus listener once
    ///
    /// The flag is a lock-free fast path; registration itself and every write
    /// of the flag happen under the `subscription` lock, so the flag is true
    /// exactly while a listener id is held.
    fn subscribe(&self) {
        if self.inner.subscribed.load(Ordering::Acquire) {
            return;
        }

        let mut subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscription.is_some() {
            return;
        }

        let listener = Arc::new(ScanListener {
            detector: Arc::downgrade(&self.inner),
        });
        *subscription = Some(self.inner.bus.subscribe(listener));
        self.inner.subscribed.store(true, Ordering::Release);
        debug!(detector = self.inner.id, "subscribed to query events");
    }

    fn with_context<R>(&self, f: impl FnOnce(&mut ScanContext) -> R) -> Option<R> {
        SCANS.with(|scans| scans.borrow_mut().get_mut(&self.inner.id).map(f))
    }
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("sinks", &self.inner.sinks.len())
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
