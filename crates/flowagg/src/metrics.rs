//! Ambient counters (§4.12). No external exporter is wired up — the spec's
//! Non-goals exclude dashboards/alerting — but the bookkeeping itself is
//! ordinary observability, not a dashboard, so it stays.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub flows_dropped_malformed: AtomicU64,
    pub flows_dropped_skew: AtomicU64,
    pub delta_switched_synthesized: AtomicU64,
    pub panes_fired_on_time: AtomicU64,
    pub panes_fired_late: AtomicU64,
    pub panes_evicted: AtomicU64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            flows_dropped_malformed: self.flows_dropped_malformed.load(Ordering::Relaxed),
            flows_dropped_skew: self.flows_dropped_skew.load(Ordering::Relaxed),
            delta_switched_synthesized: self.delta_switched_synthesized.load(Ordering::Relaxed),
            panes_fired_on_time: self.panes_fired_on_time.load(Ordering::Relaxed),
            panes_fired_late: self.panes_fired_late.load(Ordering::Relaxed),
            panes_evicted: self.panes_evicted.load(Ordering::Relaxed),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub flows_dropped_malformed: u64,
    pub flows_dropped_skew: u64,
    pub delta_switched_synthesized: u64,
    pub panes_fired_on_time: u64,
    pub panes_fired_late: u64,
    pub panes_evicted: u64,
}
