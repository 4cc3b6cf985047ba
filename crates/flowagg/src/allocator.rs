//! Proportional byte allocator (§4.4).
//!
//! Splits a flow's byte count across the windows it spans by time overlap,
//! so that summing the allocator's output across every window a flow spans
//! reproduces (up to floor-rounding) the flow's original `num_bytes`.

use log::warn;

use crate::bytes::BytesInOut;
use crate::flow::FlowRecord;
use crate::ratelimit::RateLimiter;
use crate::window::Window;

/// Allocate `flow`'s bytes to `window`, or `None` if the flow does not
/// overlap the window (or the flow is malformed: negative duration).
pub fn allocate(
    window: Window,
    flow: &FlowRecord,
    malformed_limiter: &RateLimiter,
) -> Option<BytesInOut> {
    let (delta, last) = flow.active_interval();
    let duration = last - delta;

    if duration < 0 {
        if malformed_limiter.allow() {
            warn!(
                "dropping flow with negative duration ({}ms): delta={} last={}",
                duration, delta, last
            );
        }
        return None;
    }

    if duration == 0 {
        return if window.contains_interval(delta, last) {
            Some(BytesInOut::from_flow(flow, 1.0))
        } else {
            None
        };
    }

    let overlap = last.min(window.end_ms) - delta.max(window.start_ms);
    if overlap <= 0 {
        return None;
    }

    let m = overlap as f64 / duration as f64;
    Some(BytesInOut::from_flow(flow, m))
}
