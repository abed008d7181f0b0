//! Lightweight in-process metrics.
//!
//! Counters and gauges are plain atomics behind `DashMap` label sets. The
//! bridge binary renders them as Prometheus-style text on shutdown.

pub mod metrics;

pub use metrics::{BusMetrics, CounterVec, GaugeVec, HistogramVec};
