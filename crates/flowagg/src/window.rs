//! Window type and the window assigner (§4.3).

use log::warn;

use crate::flow::FlowRecord;
use crate::ratelimit::RateLimiter;

/// A half-open event-time interval `[start, end)`, aligned to
/// `start ≡ 0 mod size_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Window {
    pub fn containing(start_ms: i64, size_ms: i64) -> Window {
        Window {
            start_ms,
            end_ms: start_ms + size_ms,
        }
    }

    pub fn contains_instant(&self, t: i64) -> bool {
        t >= self.start_ms && t < self.end_ms
    }

    pub fn contains_interval(&self, start: i64, end: i64) -> bool {
        self.start_ms <= start && end < self.end_ms
    }
}

/// Emit one `(window_start, flow)` pair for every window the flow's active
/// interval overlaps, per the §4.3 algorithm. `current_input_timestamp_ms`
/// and `max_flow_duration_ms` bound how far back a single laggard can drag
/// the watermark: an assignment older than the skew guard is dropped.
pub fn assign_windows<'a>(
    flow: &'a FlowRecord,
    window_size_ms: i64,
    current_input_timestamp_ms: i64,
    max_flow_duration_ms: i64,
    skew_limiter: &RateLimiter,
) -> Vec<(i64, &'a FlowRecord)> {
    let delta = flow.delta_switched_ms();
    let last = flow.last_switched_ms;

    let mut out = Vec::new();
    let mut t = div_floor(delta, window_size_ms) * window_size_ms;
    let skew_floor = current_input_timestamp_ms - max_flow_duration_ms;

    while t <= last {
        if t < skew_floor {
            if skew_limiter.allow() {
                warn!(
                    "dropping flow assignment to window {} for skew: older than {}ms before current input timestamp",
                    t, max_flow_duration_ms
                );
            }
        } else {
            out.push((t, flow));
        }
        t += window_size_ms;
    }
    out
}

fn div_floor(a: i64, b: i64) -> i64 {
    let d = a / b;
    let r = a % b;
    if (r != 0) && ((r < 0) != (b < 0)) {
        d - 1
    } else {
        d
    }
}
