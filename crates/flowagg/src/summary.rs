//! Summary builder (§4.7) — projects a grouped `(window, key, bytes)` result
//! into the flat `FlowSummary` record the sinks persist.

use serde::{Deserialize, Serialize};

use crate::bytes::BytesInOut;
use crate::key::CompoundKey;
use crate::window::Window;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregationType {
    Total,
    Topk,
}

/// Bit-exact JSON shape from §6. Field names intentionally diverge from
/// Rust naming conventions (`@timestamp`) to match the sink's document
/// schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSummary {
    #[serde(rename = "@timestamp")]
    pub timestamp: i64,
    pub range_start: i64,
    pub range_end: i64,
    pub ranking: i64,
    pub grouped_by: String,
    pub grouped_by_key: String,
    pub aggregation_type: AggregationType,
    pub bytes_ingress: u64,
    pub bytes_egress: u64,
    pub bytes_total: u64,

    #[serde(rename = "exporter.foreign_source", skip_serializing_if = "Option::is_none")]
    pub exporter_foreign_source: Option<String>,
    #[serde(rename = "exporter.foreign_id", skip_serializing_if = "Option::is_none")]
    pub exporter_foreign_id: Option<String>,
    #[serde(rename = "exporter.node_id", skip_serializing_if = "Option::is_none")]
    pub exporter_node_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_key: Option<String>,
}

impl FlowSummary {
    /// `"{timestamp}_{groupedBy}_{groupedByKey}_{aggregationType}_{ranking}"`
    /// — the upsert id that makes late re-firings idempotent (invariant 8).
    pub fn id(&self) -> String {
        let agg = match self.aggregation_type {
            AggregationType::Total => "TOTAL",
            AggregationType::Topk => "TOPK",
        };
        format!(
            "{}_{}_{}_{}_{}",
            self.timestamp, self.grouped_by, self.grouped_by_key, agg, self.ranking
        )
    }
}

/// Build one summary from a grouped result. `ranking` is 0 for TOTAL, or the
/// 1-based position within the (window, outerKey) top-K list.
pub fn build(
    window: Window,
    key: &CompoundKey,
    bytes: BytesInOut,
    aggregation_type: AggregationType,
    ranking: i64,
) -> FlowSummary {
    let mut summary = FlowSummary {
        timestamp: window.end_ms,
        range_start: window.start_ms,
        range_end: window.end_ms,
        ranking,
        grouped_by: key.grouped_by().to_string(),
        grouped_by_key: key.grouped_by_key(),
        aggregation_type,
        bytes_ingress: bytes.bytes_in,
        bytes_egress: bytes.bytes_out,
        bytes_total: bytes.total(),
        exporter_foreign_source: None,
        exporter_foreign_id: None,
        exporter_node_id: None,
        if_index: None,
        application: None,
        host_address: None,
        conversation_key: None,
    };

    // Visitor over the tagged variant: flatten whichever fields apply.
    match key {
        CompoundKey::ExporterInterface { exporter, if_index } => {
            flatten_exporter(&mut summary, exporter);
            summary.if_index = Some(*if_index);
        }
        CompoundKey::ExporterInterfaceApplication {
            exporter,
            if_index,
            application,
        } => {
            flatten_exporter(&mut summary, exporter);
            summary.if_index = Some(*if_index);
            summary.application = Some(application.clone());
        }
        CompoundKey::ExporterInterfaceHost {
            exporter,
            if_index,
            address,
        } => {
            flatten_exporter(&mut summary, exporter);
            summary.if_index = Some(*if_index);
            summary.host_address = Some(address.to_string());
        }
        CompoundKey::ExporterInterfaceConversation {
            exporter,
            if_index,
            application,
            ..
        } => {
            flatten_exporter(&mut summary, exporter);
            summary.if_index = Some(*if_index);
            summary.application = Some(application.clone());
            summary.conversation_key = Some(key.grouped_by_key());
        }
    }

    summary
}

fn flatten_exporter(summary: &mut FlowSummary, exporter: &crate::key::ExporterKey) {
    summary.exporter_foreign_source = Some(exporter.foreign_source.clone());
    summary.exporter_foreign_id = Some(exporter.foreign_id.clone());
    summary.exporter_node_id = Some(exporter.node_id);
}
