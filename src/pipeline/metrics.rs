// src/pipeline/metrics.rs
//
// Lock-free pipeline counters. Shared by Arc across handlers; the
// summary snapshot is serialized into the shutdown log line.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub positions_processed: AtomicU64,
    pub crossings_admitted: AtomicU64,
    pub crossings_suppressed: AtomicU64,
    pub returns_confirmed: AtomicU64,
    pub discrete_alerts_admitted: AtomicU64,
    pub discrete_alerts_rejected: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notifications_failed: AtomicU64,
    pub violations_committed: AtomicU64,
    pub violations_skipped: AtomicU64,
    pub collaborator_errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub positions_processed: u64,
    pub crossings_admitted: u64,
    pub crossings_suppressed: u64,
    pub returns_confirmed: u64,
    pub discrete_alerts_admitted: u64,
    pub discrete_alerts_rejected: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub violations_committed: u64,
    pub violations_skipped: u64,
    pub collaborator_errors: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            positions_processed: self.positions_processed.load(Ordering::Relaxed),
            crossings_admitted: self.crossings_admitted.load(Ordering::Relaxed),
            crossings_suppressed: self.crossings_suppressed.load(Ordering::Relaxed),
            returns_confirmed: self.returns_confirmed.load(Ordering::Relaxed),
            discrete_alerts_admitted: self.discrete_alerts_admitted.load(Ordering::Relaxed),
            discrete_alerts_rejected: self.discrete_alerts_rejected.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            violations_committed: self.violations_committed.load(Ordering::Relaxed),
            violations_skipped: self.violations_skipped.load(Ordering::Relaxed),
            collaborator_errors: self.collaborator_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reflects_counts() {
        let m = PipelineMetrics::new();
        PipelineMetrics::incr(&m.positions_processed);
        PipelineMetrics::incr(&m.positions_processed);
        PipelineMetrics::add(&m.notifications_sent, 3);

        let s = m.summary();
        assert_eq!(s.positions_processed, 2);
        assert_eq!(s.notifications_sent, 3);
        assert_eq!(s.crossings_admitted, 0);
    }

    #[test]
    fn summary_serializes() {
        let m = PipelineMetrics::new();
        let json = serde_json::to_string(&m.summary()).unwrap();
        assert!(json.contains("\"positions_processed\":0"));
    }
}
