//! Observability: lightweight event counters behind a sink trait.
//!
//! Sessions report statement, query, and flush events to a sink; the
//! default sink drops everything. Structured logging is separate and
//! goes through `tracing`.

pub mod sink;

pub use sink::{CountingSink, Event, EventReport, MetricsSink, NOOP_SINK};
