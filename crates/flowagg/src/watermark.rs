//! Watermark tracking and the pane trigger engine (§4.8).
//!
//! `WatermarkTracker` turns per-partition observed timestamps into a
//! monotonic global watermark; `TriggerEngine` owns one accumulator per
//! `(window, key)` and decides when to fire on-time and late panes.

use std::collections::{BTreeMap, HashMap};

use crate::bytes::BytesInOut;
use crate::key::CompoundKey;
use crate::window::Window;

/// Per-partition watermarks, combined as their minimum (the global watermark
/// can only advance as fast as the slowest partition).
#[derive(Debug, Default)]
pub struct WatermarkTracker {
    max_input_delay_ms: i64,
    max_seen_event_time_ms: HashMap<i32, i64>,
}

impl WatermarkTracker {
    pub fn new(max_input_delay_ms: i64) -> Self {
        WatermarkTracker {
            max_input_delay_ms,
            max_seen_event_time_ms: HashMap::new(),
        }
    }

    /// Record an observed event time for `partition`. Per-partition max is
    /// monotone by construction: an out-of-order record within a partition
    /// never moves that partition's watermark backwards.
    pub fn observe(&mut self, partition: i32, event_time_ms: i64) {
        let entry = self.max_seen_event_time_ms.entry(partition).or_insert(i64::MIN);
        if event_time_ms > *entry {
            *entry = event_time_ms;
        }
    }

    /// The global watermark: the minimum of `maxSeenEventTime - maxInputDelayMs`
    /// across all partitions observed so far. `None` until at least one
    /// partition has been observed.
    pub fn global_watermark_ms(&self) -> Option<i64> {
        self.max_seen_event_time_ms
            .values()
            .map(|&t| t - self.max_input_delay_ms)
            .min()
    }
}

/// One firing of a window: the complete accumulated state for every key
/// seen so far in `window` (accumulating mode — not an incremental delta).
#[derive(Debug, Clone)]
pub struct Pane {
    pub window: Window,
    pub is_late: bool,
    pub entries: Vec<(CompoundKey, BytesInOut)>,
}

#[derive(Debug, Default)]
struct PaneState {
    accumulator: HashMap<CompoundKey, BytesInOut>,
    on_time_fired: bool,
    /// Processing-time instant the first late arrival landed since the last
    /// late pane fired; coalesces late bursts into one late firing.
    late_pending_since_ms: Option<i64>,
}

/// Owns per-(window, key) pane state for one grouping branch. Keys within a
/// window are owned exclusively by that window's map; there is no
/// cross-window aliasing (§9).
pub struct TriggerEngine {
    window_size_ms: i64,
    allowed_lateness_ms: i64,
    late_processing_delay_ms: i64,
    windows: BTreeMap<i64, PaneState>,
}

impl TriggerEngine {
    pub fn new(window_size_ms: i64, allowed_lateness_ms: i64, late_processing_delay_ms: i64) -> Self {
        TriggerEngine {
            window_size_ms,
            allowed_lateness_ms,
            late_processing_delay_ms,
            windows: BTreeMap::new(),
        }
    }

    fn window_end_ms(&self, window_start_ms: i64) -> i64 {
        window_start_ms + self.window_size_ms
    }

    /// Accumulate `bytes` for `key` in the window starting at
    /// `window_start_ms`. Returns `false` when the window has already
    /// passed allowed lateness and the element is dropped (invariant 10).
    pub fn ingest(
        &mut self,
        window_start_ms: i64,
        key: CompoundKey,
        bytes: BytesInOut,
        watermark_ms: i64,
        now_ms: i64,
    ) -> bool {
        let window_end_ms = self.window_end_ms(window_start_ms);
        if watermark_ms > window_end_ms + self.allowed_lateness_ms {
            return false;
        }

        let pane = self.windows.entry(window_start_ms).or_default();
        *pane.accumulator.entry(key).or_insert(BytesInOut::IDENTITY) += bytes;
        if pane.on_time_fired && pane.late_pending_since_ms.is_none() {
            pane.late_pending_since_ms = Some(now_ms);
        }
        true
    }

    /// Advance the watermark, firing on-time and coalesced late panes and
    /// evicting windows whose allowed lateness has elapsed. Returns the
    /// fired panes and the number of windows evicted in this call.
    pub fn advance(&mut self, watermark_ms: i64, now_ms: i64) -> (Vec<Pane>, usize) {
        let mut fired = Vec::new();
        let mut to_evict = Vec::new();

        for (&window_start_ms, pane) in self.windows.iter_mut() {
            let window_end_ms = window_start_ms + self.window_size_ms;

            if !pane.on_time_fired && watermark_ms >= window_end_ms {
                pane.on_time_fired = true;
                fired.push(Pane {
                    window: Window {
                        start_ms: window_start_ms,
                        end_ms: window_end_ms,
                    },
                    is_late: false,
                    entries: snapshot(&pane.accumulator),
                });
            } else if pane.on_time_fired {
                if let Some(since_ms) = pane.late_pending_since_ms {
                    let within_lateness = watermark_ms <= window_end_ms + self.allowed_lateness_ms;
                    if now_ms - since_ms >= self.late_processing_delay_ms && within_lateness {
                        pane.late_pending_since_ms = None;
                        fired.push(Pane {
                            window: Window {
                                start_ms: window_start_ms,
                                end_ms: window_end_ms,
                            },
                            is_late: true,
                            entries: snapshot(&pane.accumulator),
                        });
                    }
                }
            }

            if watermark_ms > window_end_ms + self.allowed_lateness_ms {
                to_evict.push(window_start_ms);
            }
        }

        let evicted = to_evict.len();
        for window_start_ms in to_evict {
            self.windows.remove(&window_start_ms);
        }

        (fired, evicted)
    }

    pub fn open_window_count(&self) -> usize {
        self.windows.len()
    }
}

fn snapshot(accumulator: &HashMap<CompoundKey, BytesInOut>) -> Vec<(CompoundKey, BytesInOut)> {
    accumulator.iter().map(|(k, v)| (k.clone(), *v)).collect()
}
