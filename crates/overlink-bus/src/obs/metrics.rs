//! Minimal labelled metrics registry for the bus.
//!
//! Labels are flattened into sorted key vectors so rendering order is
//! deterministic. Histogram buckets are fixed in microseconds (integer math).

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn label_str(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Sorted snapshot so two renders of the same state are byte-identical.
fn sorted<V, T>(map: &DashMap<LabelKey, V>, f: impl Fn(&V) -> T) -> Vec<(LabelKey, T)> {
    let mut rows: Vec<(LabelKey, T)> = map.iter().map(|r| (r.key().clone(), f(r.value()))).collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        let counter = self
            .map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(v, Ordering::Relaxed);
    }

    /// Current value for an exact label set (0 if never touched).
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sum across every label set.
    pub fn total(&self) -> u64 {
        self.map.iter().map(|r| r.value().load(Ordering::Relaxed)).sum()
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for (key, val) in sorted(&self.map, |c| c.load(Ordering::Relaxed)) {
            let _ = writeln!(out, "{}{{{}}} {}", name, label_str(&key), val);
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<LabelKey, AtomicI64>,
}

impl GaugeVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn dec(&self, labels: &[(&str, &str)]) {
        self.add(labels, -1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: i64) {
        let gauge = self
            .map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0));
        gauge.fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> i64 {
        self.map
            .get(&label_key(labels))
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for (key, val) in sorted(&self.map, |g| g.load(Ordering::Relaxed)) {
            let _ = writeln!(out, "{}{{{}}} {}", name, label_str(&key), val);
        }
    }
}

// 50us, 100us, 500us, 1ms, 5ms, 10ms, 50ms, 100ms
const BUCKETS_MICROS: [u64; 8] = [50, 100, 500, 1_000, 5_000, 10_000, 50_000, 100_000];

#[derive(Default)]
struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; BUCKETS_MICROS.len()],
}

#[derive(Default)]
pub struct HistogramVec {
    map: DashMap<LabelKey, AtomicHistogram>,
}

impl HistogramVec {
    /// Observe a duration into cumulative buckets (microsecond scale).
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        let hist = self.map.entry(label_key(labels)).or_default();
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.fetch_add(micros, Ordering::Relaxed);
        for (i, &b) in BUCKETS_MICROS.iter().enumerate() {
            if micros <= b {
                hist.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|h| h.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        let rows = sorted(&self.map, |h| {
            let buckets: Vec<u64> = h.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
            (buckets, h.count.load(Ordering::Relaxed), h.sum.load(Ordering::Relaxed))
        });
        for (key, (buckets, count, sum)) in rows {
            let labels = label_str(&key);
            let prefix = if labels.is_empty() { String::new() } else { format!("{},", labels) };
            for (le, n) in BUCKETS_MICROS.iter().zip(buckets) {
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, n);
            }
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);
            let _ = writeln!(out, "{}_sum{{{}}} {}", name, labels, sum);
            let _ = writeln!(out, "{}_count{{{}}} {}", name, labels, count);
        }
    }
}

/// Everything the shells record. One instance is shared by all shells of a process.
#[derive(Default)]
pub struct BusMetrics {
    /// transport, type
    pub frames_sent: CounterVec,
    /// transport, type
    pub frames_received: CounterVec,
    /// transport, code
    pub send_failures: CounterVec,
    /// transport, code
    pub decode_errors: CounterVec,
    /// type
    pub handler_failures: CounterVec,
    /// type, outcome
    pub unrouted: CounterVec,
    /// transport
    pub connection_failures: CounterVec,
    /// transport
    pub peers_connected: GaugeVec,
    /// type; microseconds
    pub dispatch_duration: HistogramVec,
}

impl BusMetrics {
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.frames_sent.render("overlink_frames_sent_total", &mut out);
        self.frames_received.render("overlink_frames_received_total", &mut out);
        self.send_failures.render("overlink_send_failures_total", &mut out);
        self.decode_errors.render("overlink_decode_errors_total", &mut out);
        self.handler_failures.render("overlink_handler_failures_total", &mut out);
        self.unrouted.render("overlink_unrouted_total", &mut out);
        self.connection_failures.render("overlink_connection_failures_total", &mut out);
        self.peers_connected.render("overlink_peers_connected", &mut out);
        self.dispatch_duration.render("overlink_dispatch_duration_micros", &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_order_does_not_matter() {
        let c = CounterVec::default();
        c.inc(&[("transport", "registry"), ("type", "CAMERA_DATA")]);
        c.inc(&[("type", "CAMERA_DATA"), ("transport", "registry")]);
        assert_eq!(c.get(&[("transport", "registry"), ("type", "CAMERA_DATA")]), 2);
        assert_eq!(c.total(), 2);
    }

    #[test]
    fn render_is_prometheus_text() {
        let m = BusMetrics::default();
        m.frames_sent.inc(&[("transport", "stream_server"), ("type", "OVERLAY_CONTROL")]);
        m.peers_connected.inc(&[("transport", "registry")]);
        m.peers_connected.inc(&[("transport", "registry")]);
        m.peers_connected.dec(&[("transport", "registry")]);
        m.dispatch_duration.observe(&[("type", "CAMERA_DATA")], Duration::from_micros(70));

        let text = m.render();
        assert!(text.contains(
            "overlink_frames_sent_total{transport=\"stream_server\",type=\"OVERLAY_CONTROL\"} 1"
        ));
        assert!(text.contains("overlink_peers_connected{transport=\"registry\"} 1"));
        assert!(text.contains("overlink_dispatch_duration_micros_bucket{type=\"CAMERA_DATA\",le=\"50\"} 0"));
        assert!(text.contains("overlink_dispatch_duration_micros_bucket{type=\"CAMERA_DATA\",le=\"100\"} 1"));
        assert!(text.contains("overlink_dispatch_duration_micros_count{type=\"CAMERA_DATA\"} 1"));
    }
}
