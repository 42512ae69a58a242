use std::sync::atomic::{AtomicU64, Ordering};

///
/// Event
///

#[derive(Clone, Copy, Debug)]
pub enum Event {
    /// One statement handed to the store.
    Statement,

    /// One query execution (any shape).
    Query,

    /// One completed flush with its write counts.
    Flush {
        inserts: u64,
        updates: u64,
        deletes: u64,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink: Sync {
    fn record(&self, event: &Event);
}

///
/// NoopSink
///

pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&self, _event: &Event) {}
}

/// Default sink; drops every event.
pub static NOOP_SINK: &dyn MetricsSink = &NoopSink;

///
/// EventReport
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EventReport {
    pub statements: u64,
    pub queries: u64,
    pub flushes: u64,
    pub writes: u64,
}

///
/// CountingSink
///
/// Atomic counters, mainly for tests and diagnostics snapshots.
///

#[derive(Debug, Default)]
pub struct CountingSink {
    statements: AtomicU64,
    queries: AtomicU64,
    flushes: AtomicU64,
    writes: AtomicU64,
}

impl CountingSink {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            statements: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn report(&self) -> EventReport {
        EventReport {
            statements: self.statements.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.statements.store(0, Ordering::Relaxed);
        self.queries.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }
}

impl MetricsSink for CountingSink {
    fn record(&self, event: &Event) {
        match event {
            Event::Statement => {
                self.statements.fetch_add(1, Ordering::Relaxed);
            }
            Event::Query => {
                self.queries.fetch_add(1, Ordering::Relaxed);
            }
            Event::Flush {
                inserts,
                updates,
                deletes,
            } => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                self.writes
                    .fetch_add(inserts + updates + deletes, Ordering::Relaxed);
            }
        }
    }
}
