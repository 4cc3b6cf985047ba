//! Error taxonomy.
//!
//! Per-record problems (malformed flows, skew violations) are never
//! represented here — §7 absorbs those locally as a drop + counter + a
//! rate-limited log line. `FlowAggError` is reserved for faults that
//! propagate to the runtime: configuration, source, sink and codec errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame is truncated")]
    Truncated,
    #[error("payload of {0} bytes exceeds the u32 length prefix")]
    PayloadTooLarge(usize),
    #[error("malformed flow JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source disconnected: {0}")]
    Disconnected(String),
    #[error("failed to decode a record from the bus: {0}")]
    Codec(#[from] CodecError),
}

/// Sink failures distinguish transient (retry with backoff) from permanent
/// (fatal, per §7) so the pipeline runner knows which ones to propagate.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transient sink failure: {0}")]
    Transient(String),
    #[error("permanent sink failure: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, SinkError::Permanent(_))
    }
}

#[derive(Debug, Error)]
pub enum FlowAggError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}
