//! `BytesInOut` — the commutative monoid every downstream aggregate sums.

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::flow::{Direction, FlowRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytesInOut {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl BytesInOut {
    pub const IDENTITY: BytesInOut = BytesInOut {
        bytes_in: 0,
        bytes_out: 0,
    };

    pub fn total(&self) -> u64 {
        self.bytes_in + self.bytes_out
    }

    /// Derive a `BytesInOut` from a flow scaled by overlap multiplier `m`,
    /// per §4.4: `m` is applied to `num_bytes` and routed entirely to
    /// `bytes_in` or `bytes_out` depending on `direction` — never both
    /// (invariant 3).
    pub fn from_flow(flow: &FlowRecord, m: f64) -> BytesInOut {
        debug_assert!((0.0..=1.0).contains(&m), "overlap multiplier out of range");
        let scaled = (flow.num_bytes as f64 * m).floor() as u64;
        match flow.direction {
            Direction::Ingress => BytesInOut {
                bytes_in: scaled,
                bytes_out: 0,
            },
            Direction::Egress => BytesInOut {
                bytes_in: 0,
                bytes_out: scaled,
            },
        }
    }
}

impl Add for BytesInOut {
    type Output = BytesInOut;

    fn add(self, rhs: Self) -> Self::Output {
        BytesInOut {
            bytes_in: self.bytes_in + rhs.bytes_in,
            bytes_out: self.bytes_out + rhs.bytes_out,
        }
    }
}

impl AddAssign for BytesInOut {
    fn add_assign(&mut self, rhs: Self) {
        self.bytes_in += rhs.bytes_in;
        self.bytes_out += rhs.bytes_out;
    }
}
