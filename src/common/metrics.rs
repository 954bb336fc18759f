//! Metrics collection
//!
//! Prometheus-compatible counters, gauges and latency histograms for plan
//! submission. The registry is owned by the coordinator and rendered by the
//! `/metrics` endpoint.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as microseconds for precision
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per plan kind
#[derive(Debug, Default)]
pub struct PlanMetrics {
    pub total: Counter,
    pub failed: Counter,
    pub latency: Histogram,
}

/// Coordinator metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    plans: Mutex<BTreeMap<&'static str, Arc<PlanMetrics>>>,

    pub rejected_before_consensus: Counter,

    pub applied_index: Gauge,
    pub registered_nodes: Gauge,
    pub storage_groups: Gauge,
    pub region_groups: Gauge,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            plans: Mutex::new(BTreeMap::new()),
            rejected_before_consensus: Counter::new(),
            applied_index: Gauge::new(),
            registered_nodes: Gauge::new(),
            storage_groups: Gauge::new(),
            region_groups: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for a plan kind
    pub fn plan(&self, kind: &'static str) -> Arc<PlanMetrics> {
        let mut plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
        plans.entry(kind).or_default().clone()
    }

    /// Record one executed plan
    pub fn record_plan(&self, kind: &'static str, duration: Duration, success: bool) {
        let metrics = self.plan(kind);
        metrics.total.inc();
        metrics.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            metrics.failed.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let gauges: [(&str, &str, u64); 5] = [
            ("tsmeta_applied_index", "Last applied command log index", self.applied_index.get()),
            ("tsmeta_registered_nodes", "Nodes in the registry", self.registered_nodes.get()),
            ("tsmeta_storage_groups", "Storage groups in the catalog", self.storage_groups.get()),
            ("tsmeta_region_groups", "Allocated region groups", self.region_groups.get()),
            ("tsmeta_uptime_seconds", "Server uptime in seconds", self.uptime_seconds()),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        out.push_str("# HELP tsmeta_plans_rejected_total Plans rejected before consensus\n");
        out.push_str("# TYPE tsmeta_plans_rejected_total counter\n");
        let _ = writeln!(
            out,
            "tsmeta_plans_rejected_total {}",
            self.rejected_before_consensus.get()
        );

        let plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());

        out.push_str("# HELP tsmeta_plans_total Executed plans per kind\n");
        out.push_str("# TYPE tsmeta_plans_total counter\n");
        for (kind, m) in plans.iter() {
            let _ = writeln!(out, "tsmeta_plans_total{{plan=\"{}\"}} {}", kind, m.total.get());
        }

        out.push_str("# HELP tsmeta_plans_failed_total Failed plans per kind\n");
        out.push_str("# TYPE tsmeta_plans_failed_total counter\n");
        for (kind, m) in plans.iter() {
            let _ = writeln!(
                out,
                "tsmeta_plans_failed_total{{plan=\"{}\"}} {}",
                kind,
                m.failed.get()
            );
        }

        out.push_str("# HELP tsmeta_plan_duration_ms Plan execution time in milliseconds\n");
        out.push_str("# TYPE tsmeta_plan_duration_ms histogram\n");
        for (kind, m) in plans.iter() {
            for (le, count) in m.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "tsmeta_plan_duration_ms_bucket{{plan=\"{}\",le=\"{}\"}} {}",
                    kind, le, count
                );
            }
            let _ = writeln!(
                out,
                "tsmeta_plan_duration_ms_sum{{plan=\"{}\"}} {}",
                kind,
                m.latency.sum()
            );
            let _ = writeln!(
                out,
                "tsmeta_plan_duration_ms_count{{plan=\"{}\"}} {}",
                kind,
                m.latency.count()
            );
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();

        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(50_000.0);

        assert_eq!(hist.count(), 3);

        let buckets = hist.get_buckets();
        assert_eq!(buckets.len(), LATENCY_BUCKETS.len() + 1);
        assert_eq!(buckets.last().unwrap().1, 3);
        assert_eq!(buckets[1], (5.0, 1));
    }

    #[test]
    fn test_record_plan() {
        let registry = MetricsRegistry::new();

        registry.record_plan("SetStorageGroup", Duration::from_millis(3), true);
        registry.record_plan("SetStorageGroup", Duration::from_millis(7), false);

        let m = registry.plan("SetStorageGroup");
        assert_eq!(m.total.get(), 2);
        assert_eq!(m.failed.get(), 1);

        let text = registry.to_prometheus();
        assert!(text.contains("tsmeta_plans_total{plan=\"SetStorageGroup\"} 2"));
        assert!(text.contains("tsmeta_plans_failed_total{plan=\"SetStorageGroup\"} 1"));
    }
}
