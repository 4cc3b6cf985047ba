//! In-memory flow record and its binary wire codec.
//!
//! A [`FlowRecord`] is the decoded form of whatever a NetFlow/IPFIX/sFlow
//! exporter put on the wire; the upstream source-wire decoder is out of
//! scope here (see crate docs) — this module only owns the in-memory shape
//! and the length-prefixed framing used to move it across the bus.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Applications arrive with this name when the exporter left the field blank.
pub const UNKNOWN_APPLICATION: &str = "__unknown__";

/// Identity of the device that emitted a flow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Exporter {
    pub foreign_source: String,
    pub foreign_id: String,
    pub node_id: i64,
    pub location: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ingress,
    Egress,
}

/// An immutable flow record. Created on ingest, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub exporter: Exporter,
    pub input_snmp: u32,
    pub output_snmp: u32,
    pub src_address: IpAddr,
    pub dst_address: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub application: String,
    pub num_bytes: u64,
    pub first_switched_ms: i64,
    /// `None` means the exporter never populated this field; callers should
    /// treat that as a field the origin's comment warns "should always be
    /// populated" and fall back to `first_switched_ms` (see
    /// [`FlowRecord::delta_switched_ms`]).
    pub delta_switched_ms: Option<i64>,
    pub last_switched_ms: i64,
    pub direction: Direction,
}

impl FlowRecord {
    /// `deltaSwitched`, defaulting to `firstSwitched` when absent.
    pub fn delta_switched_ms(&self) -> i64 {
        self.delta_switched_ms.unwrap_or(self.first_switched_ms)
    }

    /// Whether this record's `delta_switched_ms` was synthesized from
    /// `first_switched_ms` rather than populated by the exporter.
    pub fn delta_switched_synthesized(&self) -> bool {
        self.delta_switched_ms.is_none()
    }

    /// The flow's active interval, `[deltaSwitched, lastSwitched]`.
    pub fn active_interval(&self) -> (i64, i64) {
        (self.delta_switched_ms(), self.last_switched_ms)
    }

    /// Duration of the active interval. Can be negative for malformed input;
    /// callers are responsible for rejecting that case.
    pub fn duration_ms(&self) -> i64 {
        self.last_switched_ms - self.delta_switched_ms()
    }

    /// Application name with the empty-string-to-unknown normalisation
    /// from the data model applied.
    pub fn application(&self) -> &str {
        if self.application.is_empty() {
            UNKNOWN_APPLICATION
        } else {
            &self.application
        }
    }

    /// Basic structural sanity the decoder cannot fully guarantee: a
    /// negative byte count or an active interval running backwards in time.
    /// Malformed flows are dropped by the caller, never a hard error here.
    pub fn is_well_formed(&self) -> bool {
        self.duration_ms() >= 0
    }
}

/// Encode a flow record as a big-endian u32 length prefix followed by its
/// JSON payload. Mirrors the framing the bus already uses for opaque
/// message values; keeping the payload itself in JSON (rather than a custom
/// binary struct layout) means the codec does not need to track a schema
/// version independently of the decoded `FlowRecord` shape.
pub fn encode(flow: &FlowRecord) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(flow)?;
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a single length-prefixed flow record from the front of `buf`,
/// returning the record and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(FlowRecord, usize), CodecError> {
    if buf.len() < 4 {
        return Err(CodecError::Truncated);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let end = 4 + len;
    if buf.len() < end {
        return Err(CodecError::Truncated);
    }
    let flow: FlowRecord = serde_json::from_slice(&buf[4..end])?;
    Ok((flow, end))
}
