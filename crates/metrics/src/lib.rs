//! Metrics facade for the gateway's own components.
//!
//! Thin wrapper over the `metrics` crate facade, following
//! `crates/metrics/src/recorder.rs`'s initialization pattern. When the
//! `prometheus` feature is enabled, counters/gauges are exported in
//! Prometheus text format; otherwise all `metrics` macro calls are no-ops.

mod definitions;
mod recorder;

pub use definitions::*;
pub use recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics};

pub use metrics::{counter, gauge, histogram};
