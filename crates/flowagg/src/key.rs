//! Compound grouping keys.
//!
//! One tagged variant per grouping dimension. `groupedByKey()` produces the
//! deterministic string encoding used both as part of the sink document id
//! and as the tertiary top-K tiebreak; `outerKey()` projects any variant
//! down to its `ExporterInterface` prefix, the axis top-K partitions on.

use std::cmp::Ordering;
use std::net::IpAddr;

use crate::flow::{Exporter, FlowRecord};

/// The `(exporter, interface)` prefix shared by every variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExporterKey {
    pub foreign_source: String,
    pub foreign_id: String,
    pub node_id: i64,
}

impl ExporterKey {
    fn from_exporter(exporter: &Exporter) -> Self {
        Self {
            foreign_source: exporter.foreign_source.clone(),
            foreign_id: exporter.foreign_id.clone(),
            node_id: exporter.node_id,
        }
    }

    fn encode(&self) -> String {
        format!("{}|{}|{}", self.foreign_source, self.foreign_id, self.node_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompoundKey {
    ExporterInterface {
        exporter: ExporterKey,
        if_index: u32,
    },
    ExporterInterfaceApplication {
        exporter: ExporterKey,
        if_index: u32,
        application: String,
    },
    ExporterInterfaceHost {
        exporter: ExporterKey,
        if_index: u32,
        address: IpAddr,
    },
    ExporterInterfaceConversation {
        exporter: ExporterKey,
        if_index: u32,
        protocol: u8,
        smaller_addr: IpAddr,
        larger_addr: IpAddr,
        smaller_port: u16,
        larger_port: u16,
        application: String,
    },
}

impl CompoundKey {
    pub fn exporter_interface(flow: &FlowRecord, if_index: u32) -> Self {
        CompoundKey::ExporterInterface {
            exporter: ExporterKey::from_exporter(&flow.exporter),
            if_index,
        }
    }

    pub fn exporter_interface_application(flow: &FlowRecord, if_index: u32) -> Self {
        CompoundKey::ExporterInterfaceApplication {
            exporter: ExporterKey::from_exporter(&flow.exporter),
            if_index,
            application: flow.application().to_string(),
        }
    }

    /// `address` is whichever endpoint the host branch is currently
    /// attributing bytes to (src for egress-style accounting, dst for
    /// ingress-style — the pipeline decides which, this just builds the key).
    pub fn exporter_interface_host(flow: &FlowRecord, if_index: u32, address: IpAddr) -> Self {
        CompoundKey::ExporterInterfaceHost {
            exporter: ExporterKey::from_exporter(&flow.exporter),
            if_index,
            address,
        }
    }

    /// Builds the conversation key with endpoints canonicalised so both
    /// directions of a bidirectional conversation hash equal (invariant 5).
    pub fn exporter_interface_conversation(flow: &FlowRecord, if_index: u32) -> Self {
        let (smaller_addr, smaller_port, larger_addr, larger_port) = canonicalise_endpoints(
            flow.src_address,
            flow.src_port,
            flow.dst_address,
            flow.dst_port,
        );
        CompoundKey::ExporterInterfaceConversation {
            exporter: ExporterKey::from_exporter(&flow.exporter),
            if_index,
            protocol: flow.protocol,
            smaller_addr,
            larger_addr,
            smaller_port,
            larger_port,
            application: flow.application().to_string(),
        }
    }

    /// The `ExporterInterface` projection this key belongs to.
    pub fn outer_key(&self) -> CompoundKey {
        let (exporter, if_index) = match self {
            CompoundKey::ExporterInterface { exporter, if_index } => (exporter, *if_index),
            CompoundKey::ExporterInterfaceApplication {
                exporter, if_index, ..
            } => (exporter, *if_index),
            CompoundKey::ExporterInterfaceHost {
                exporter, if_index, ..
            } => (exporter, *if_index),
            CompoundKey::ExporterInterfaceConversation {
                exporter, if_index, ..
            } => (exporter, *if_index),
        };
        CompoundKey::ExporterInterface {
            exporter: exporter.clone(),
            if_index,
        }
    }

    /// Tag string naming the variant, used as `grouped_by` in the output.
    pub fn grouped_by(&self) -> &'static str {
        match self {
            CompoundKey::ExporterInterface { .. } => "exporterInterface",
            CompoundKey::ExporterInterfaceApplication { .. } => "exporterInterfaceApplication",
            CompoundKey::ExporterInterfaceHost { .. } => "exporterInterfaceHost",
            CompoundKey::ExporterInterfaceConversation { .. } => {
                "exporterInterfaceConversation"
            }
        }
    }

    /// Deterministic string encoding of the variant's fields.
    pub fn grouped_by_key(&self) -> String {
        match self {
            CompoundKey::ExporterInterface { exporter, if_index } => {
                format!("{}|{}", exporter.encode(), if_index)
            }
            CompoundKey::ExporterInterfaceApplication {
                exporter,
                if_index,
                application,
            } => format!("{}|{}|{}", exporter.encode(), if_index, application),
            CompoundKey::ExporterInterfaceHost {
                exporter,
                if_index,
                address,
            } => format!("{}|{}|{}", exporter.encode(), if_index, address),
            CompoundKey::ExporterInterfaceConversation {
                exporter,
                if_index,
                protocol,
                smaller_addr,
                larger_addr,
                smaller_port,
                larger_port,
                application,
            } => format!(
                "{}|{}|{}|{}:{}|{}:{}|{}",
                exporter.encode(),
                if_index,
                protocol,
                smaller_addr,
                smaller_port,
                larger_addr,
                larger_port,
                application
            ),
        }
    }
}

/// Total order over the encoded form, used for stable tiebreaking.
impl PartialOrd for CompoundKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CompoundKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.grouped_by(), self.grouped_by_key()).cmp(&(other.grouped_by(), other.grouped_by_key()))
    }
}

fn canonicalise_endpoints(
    src_addr: IpAddr,
    src_port: u16,
    dst_addr: IpAddr,
    dst_port: u16,
) -> (IpAddr, u16, IpAddr, u16) {
    if (src_addr, src_port) <= (dst_addr, dst_port) {
        (src_addr, src_port, dst_addr, dst_port)
    } else {
        (dst_addr, dst_port, src_addr, src_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Direction;

    fn flow(src: &str, src_port: u16, dst: &str, dst_port: u16) -> FlowRecord {
        FlowRecord {
            exporter: Exporter {
                foreign_source: "Routers".into(),
                foreign_id: "edge-1".into(),
                node_id: 1,
                location: "Default".into(),
                categories: vec![],
            },
            input_snmp: 1,
            output_snmp: 2,
            src_address: src.parse().unwrap(),
            dst_address: dst.parse().unwrap(),
            src_port,
            dst_port,
            protocol: 6,
            application: "HTTP".into(),
            num_bytes: 100,
            first_switched_ms: 0,
            delta_switched_ms: Some(0),
            last_switched_ms: 1000,
            direction: Direction::Ingress,
        }
    }

    #[test]
    fn reverse_conversations_canonicalise_equal() {
        let a = flow("10.0.0.1", 1000, "10.0.0.2", 80);
        let b = flow("10.0.0.2", 80, "10.0.0.1", 1000);

        let key_a = CompoundKey::exporter_interface_conversation(&a, 1);
        let key_b = CompoundKey::exporter_interface_conversation(&b, 1);

        assert_eq!(key_a, key_b);
        assert_eq!(key_a.grouped_by_key(), key_b.grouped_by_key());
    }

    #[test]
    fn outer_key_projects_to_exporter_interface() {
        let a = flow("10.0.0.1", 1000, "10.0.0.2", 80);
        let key = CompoundKey::exporter_interface_application(&a, 3);
        assert_eq!(
            key.outer_key(),
            CompoundKey::ExporterInterface {
                exporter: ExporterKey::from_exporter(&a.exporter),
                if_index: 3,
            }
        );
    }

    #[test]
    fn grouped_by_key_is_deterministic() {
        let a = flow("10.0.0.1", 1000, "10.0.0.2", 80);
        let key = CompoundKey::exporter_interface_host(&a, 1, a.src_address);
        assert_eq!(key.grouped_by_key(), key.grouped_by_key());
    }

    #[test]
    fn tiebreak_order_is_total_and_lexicographic() {
        let a = flow("10.0.0.1", 1000, "10.0.0.2", 80);
        let k1 = CompoundKey::exporter_interface_host(&a, 1, "10.0.0.1".parse().unwrap());
        let k2 = CompoundKey::exporter_interface_host(&a, 1, "10.0.0.2".parse().unwrap());
        assert!(k1 < k2);
    }
}
