//! End-to-end scenarios driving the pipeline through a synthetic source and
//! a capturing document sink, without any real Kafka/Elasticsearch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use flowagg::config::Config;
use flowagg::error::{SinkError, SourceError};
use flowagg::flow::{Direction, Exporter, FlowRecord};
use flowagg::pipeline::{Clock, Pipeline};
use flowagg::sink::{DocumentSink, IndexStrategy};
use flowagg::source::{FlowSource, SourceRecord};
use flowagg::testutil::FlowGenerator;

struct FixedClock(AtomicI64);
impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

struct VecSource {
    records: Mutex<VecDeque<SourceRecord>>,
}

#[async_trait]
impl FlowSource for VecSource {
    async fn poll(&mut self) -> Result<Option<SourceRecord>, SourceError> {
        Ok(self.records.lock().unwrap().pop_front())
    }
    async fn commit(&mut self, _partition: i32, _offset: i64) -> Result<(), SourceError> {
        Ok(())
    }
}

struct CapturingSink {
    docs: Mutex<Vec<(String, String, Value)>>,
}

#[async_trait]
impl DocumentSink for CapturingSink {
    async fn upsert(&self, index: &str, doc_id: &str, document: Value) -> Result<(), SinkError> {
        self.docs
            .lock()
            .unwrap()
            .push((index.to_string(), doc_id.to_string(), document));
        Ok(())
    }
}

fn test_config(top_k: usize) -> Config {
    Config {
        bootstrap_servers: "kafka:9092".into(),
        flow_source_topic: "flows".into(),
        flow_dest_topic: None,
        group_id: "flowagg".into(),
        auto_commit: true,
        elastic_url: "http://localhost:9200".into(),
        elastic_user: None,
        elastic_password: None,
        elastic_flow_index: "netflow".into(),
        elastic_index_strategy: IndexStrategy::Daily,
        fixed_window_size_ms: 60_000,
        max_flow_duration_ms: 900_000,
        default_max_input_delay_ms: 0,
        late_processing_delay_ms: 1_000,
        allowed_lateness_ms: 14_400_000,
        top_k,
    }
}

fn flow(exporter_id: &str, src: &str, dst: &str, delta_ms: i64, last_ms: i64, num_bytes: u64, direction: Direction) -> FlowRecord {
    FlowRecord {
        exporter: Exporter {
            foreign_source: "Routers".into(),
            foreign_id: exporter_id.into(),
            node_id: 1,
            location: "Default".into(),
            categories: vec![],
        },
        input_snmp: 1,
        output_snmp: 2,
        src_address: src.parse().unwrap(),
        dst_address: dst.parse().unwrap(),
        src_port: 1000,
        dst_port: 80,
        protocol: 6,
        application: "HTTP".into(),
        num_bytes,
        first_switched_ms: delta_ms,
        delta_switched_ms: Some(delta_ms),
        last_switched_ms: last_ms,
        direction,
    }
}

fn record(partition: i32, offset: i64, event_time_ms: i64, flow: FlowRecord) -> SourceRecord {
    SourceRecord {
        partition,
        offset,
        event_time_ms,
        flow,
    }
}

async fn drive(pipeline: &mut Pipeline) {
    while pipeline.step_for_test().await {}
}

#[tokio::test]
async fn s1_flow_spanning_two_windows_is_split_proportionally() {
    let f = flow("edge-1", "10.0.0.1", "10.0.0.2", 1_000, 61_000, 120, Direction::Ingress);
    let source = VecSource {
        records: Mutex::new(
            vec![
                record(0, 0, 61_000, f),
                // drive the watermark past both window ends
                record(0, 1, 130_000, flow("edge-1", "10.0.0.1", "10.0.0.2", 125_000, 125_000, 1, Direction::Ingress)),
            ]
            .into(),
        ),
    };
    let sink = Arc::new(CapturingSink { docs: Mutex::new(Vec::new()) });
    let mut pipeline = Pipeline::new(test_config(10), Box::new(source), sink.clone(), None)
        .with_clock(Box::new(FixedClock(AtomicI64::new(0))));

    drive(&mut pipeline).await;

    let docs = sink.docs.lock().unwrap();
    let total: u64 = docs
        .iter()
        .filter(|(_, id, _)| id.contains("_exporterInterface_") && id.contains("_TOTAL_"))
        .map(|(_, _, d)| d["bytes_total"].as_u64().unwrap())
        .sum();
    assert_eq!(total, 120);
}

#[tokio::test]
async fn s3_top_k_branch_ranks_applications_by_total_bytes() {
    let mut flows = Vec::new();
    for (i, bytes) in [500u64, 300, 100].into_iter().enumerate() {
        let mut f = flow(
            "edge-1",
            "10.0.0.1",
            "10.0.0.2",
            0,
            1_000,
            bytes,
            Direction::Ingress,
        );
        f.application = format!("app-{i}");
        flows.push(f);
    }
    let mut records: Vec<SourceRecord> = flows
        .into_iter()
        .enumerate()
        .map(|(i, f)| record(0, i as i64, 1_000, f))
        .collect();
    records.push(record(
        0,
        99,
        130_000,
        flow("edge-1", "10.0.0.1", "10.0.0.2", 125_000, 125_000, 1, Direction::Ingress),
    ));

    let source = VecSource { records: Mutex::new(records.into()) };
    let sink = Arc::new(CapturingSink { docs: Mutex::new(Vec::new()) });
    let mut pipeline = Pipeline::new(test_config(2), Box::new(source), sink.clone(), None)
        .with_clock(Box::new(FixedClock(AtomicI64::new(0))));

    drive(&mut pipeline).await;

    let docs = sink.docs.lock().unwrap();
    let mut topk_totals: Vec<u64> = docs
        .iter()
        .filter(|(_, id, _)| id.contains("_exporterInterfaceApplication_") && id.contains("_TOPK_"))
        .map(|(_, _, d)| d["bytes_total"].as_u64().unwrap())
        .collect();
    topk_totals.sort_unstable();
    // top_k = 2 bounds the branch to the two largest totals, not all three.
    assert_eq!(topk_totals, vec![300, 500]);
}

#[tokio::test]
async fn s4_bidirectional_conversation_combines_into_a_single_key() {
    let forward = flow("edge-1", "10.0.0.1", "10.0.0.2", 0, 1_000, 50, Direction::Ingress);
    let mut reverse = flow("edge-1", "10.0.0.2", "10.0.0.1", 0, 1_000, 30, Direction::Egress);
    reverse.src_port = 80;
    reverse.dst_port = 1000;

    let source = VecSource {
        records: Mutex::new(
            vec![
                record(0, 0, 1_000, forward),
                record(0, 1, 1_000, reverse),
                record(0, 2, 130_000, flow("edge-1", "10.0.0.1", "10.0.0.2", 125_000, 125_000, 1, Direction::Ingress)),
            ]
            .into(),
        ),
    };
    let sink = Arc::new(CapturingSink { docs: Mutex::new(Vec::new()) });
    let mut pipeline = Pipeline::new(test_config(10), Box::new(source), sink.clone(), None)
        .with_clock(Box::new(FixedClock(AtomicI64::new(0))));

    drive(&mut pipeline).await;

    let docs = sink.docs.lock().unwrap();
    let conversation_docs: Vec<_> = docs
        .iter()
        .filter(|(_, id, _)| id.contains("_exporterInterfaceConversation_"))
        .collect();
    // Both directions fold into one conversation key, so there is exactly
    // one on-time summary rather than two.
    assert_eq!(conversation_docs.len(), 1);
    assert_eq!(conversation_docs[0].2["bytes_total"], 80);
}

#[tokio::test]
async fn synthetic_flow_stream_drains_without_panicking() {
    let mut generator = FlowGenerator::new(11);
    let flows = generator.next_batch(200, 0, 120_000, 30_000);
    let mut records: Vec<SourceRecord> = flows
        .into_iter()
        .enumerate()
        .map(|(i, f)| record((i % 3) as i32, i as i64, f.last_switched_ms, f))
        .collect();
    // Drive the watermark well past every generated window.
    records.push(record(0, 9_999, 10_000_000, flow("edge-1", "10.0.0.1", "10.0.0.2", 9_800_000, 9_800_000, 1, Direction::Ingress)));
    records.push(record(1, 9_998, 10_000_000, flow("edge-1", "10.0.0.1", "10.0.0.2", 9_800_000, 9_800_000, 1, Direction::Ingress)));
    records.push(record(2, 9_997, 10_000_000, flow("edge-1", "10.0.0.1", "10.0.0.2", 9_800_000, 9_800_000, 1, Direction::Ingress)));

    let source = VecSource { records: Mutex::new(records.into()) };
    let sink = Arc::new(CapturingSink { docs: Mutex::new(Vec::new()) });
    let mut pipeline = Pipeline::new(test_config(5), Box::new(source), sink.clone(), None)
        .with_clock(Box::new(FixedClock(AtomicI64::new(0))));

    drive(&mut pipeline).await;

    assert!(!sink.docs.lock().unwrap().is_empty());
}
