//! Pipeline runner (§4.10): wires the window assigner, allocator, per-key
//! combiner, watermark/trigger engine and top-K operator into the four
//! parallel grouping branches described in §2, and drives sink writes.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use log::{error, info, warn};

use crate::allocator;
use crate::bytes::BytesInOut;
use crate::config::Config;
use crate::error::SinkError;
use crate::flow::{Direction, FlowRecord};
use crate::key::CompoundKey;
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::sink::{to_document, DocumentSink, TopicSink};
use crate::source::{FlowSource, SourceRecord};
use crate::summary::{self, AggregationType};
use crate::topk;
use crate::watermark::{Pane, TriggerEngine, WatermarkTracker};
use crate::window::{self, Window};

/// One of the four grouping dimensions from §2's data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    ExporterInterface,
    Application,
    Host,
    Conversation,
}

impl Branch {
    const ALL: [Branch; 4] = [
        Branch::ExporterInterface,
        Branch::Application,
        Branch::Host,
        Branch::Conversation,
    ];

    fn aggregation_type(self) -> AggregationType {
        match self {
            Branch::ExporterInterface => AggregationType::Total,
            _ => AggregationType::Topk,
        }
    }
}

/// Abstracts the processing-time clock so the trigger engine's late-pane
/// coalescing is deterministic in tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// The interface identity every branch groups by. Always `input_snmp`,
/// never switched on direction: the conversation branch must see the same
/// key for both legs of a bidirectional conversation (§9, S4), and a flow's
/// `input_snmp`/`output_snmp` pair otherwise names two different physical
/// interfaces that don't have a natural shared identity to merge on.
fn if_index_for(flow: &FlowRecord) -> u32 {
    flow.input_snmp
}

fn host_address_for(flow: &FlowRecord) -> std::net::IpAddr {
    match flow.direction {
        Direction::Ingress => flow.src_address,
        Direction::Egress => flow.dst_address,
    }
}

fn key_for_branch(branch: Branch, flow: &FlowRecord, if_index: u32) -> CompoundKey {
    match branch {
        Branch::ExporterInterface => CompoundKey::exporter_interface(flow, if_index),
        Branch::Application => CompoundKey::exporter_interface_application(flow, if_index),
        Branch::Host => {
            CompoundKey::exporter_interface_host(flow, if_index, host_address_for(flow))
        }
        Branch::Conversation => CompoundKey::exporter_interface_conversation(flow, if_index),
    }
}

/// Owns one [`TriggerEngine`] per branch; each engine's pane state belongs
/// exclusively to the worker driving that branch (§5).
pub struct Pipeline {
    config: Config,
    source: Box<dyn FlowSource>,
    document_sink: Arc<dyn DocumentSink>,
    topic_sink: Option<Arc<dyn TopicSink>>,
    metrics: Arc<Metrics>,
    clock: Box<dyn Clock>,
    watermark: WatermarkTracker,
    engines: [TriggerEngine; 4],
    malformed_limiter: RateLimiter,
    skew_limiter: RateLimiter,
}

impl Pipeline {
    pub fn new(
        config: Config,
        source: Box<dyn FlowSource>,
        document_sink: Arc<dyn DocumentSink>,
        topic_sink: Option<Arc<dyn TopicSink>>,
    ) -> Self {
        let window_size_ms = config.fixed_window_size_ms;
        let allowed_lateness_ms = config.allowed_lateness_ms;
        let late_processing_delay_ms = config.late_processing_delay_ms;
        let watermark = WatermarkTracker::new(config.default_max_input_delay_ms);

        Pipeline {
            config,
            source,
            document_sink,
            topic_sink,
            metrics: Arc::new(Metrics::default()),
            clock: Box::new(SystemClock),
            watermark,
            engines: std::array::from_fn(|_| {
                TriggerEngine::new(window_size_ms, allowed_lateness_ms, late_processing_delay_ms)
            }),
            malformed_limiter: RateLimiter::new(20, std::time::Duration::from_secs(10)),
            skew_limiter: RateLimiter::new(20, std::time::Duration::from_secs(10)),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Swap the processing-time clock. The default is wall-clock time;
    /// deterministic clocks are useful for driving the trigger engine in
    /// tests without sleeping.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Pull and process one record end to end (ingest, fire any now-ready
    /// panes, write them to the sinks). Returns `false` once the source has
    /// no more records, so callers can drain a bounded source in a loop.
    /// Exposed only for integration tests driving the pipeline without a
    /// real source/shutdown signal.
    #[cfg(feature = "testutil")]
    pub async fn step_for_test(&mut self) -> bool {
        match self.source.poll().await {
            Ok(Some(record)) => {
                self.ingest(&record);
                let fired = self.fire_ready_panes();
                for (branch, pane) in fired {
                    let _ = self.emit_pane(branch, pane).await;
                }
                true
            }
            _ => false,
        }
    }

    /// Validate and fan one record into the four branch engines. Malformed
    /// flows are dropped with a counter bump and a rate-limited warning
    /// (§7); never returned as an error.
    fn ingest(&mut self, record: &SourceRecord) {
        let flow = &record.flow;

        if !flow.is_well_formed() {
            Metrics::inc(&self.metrics.flows_dropped_malformed);
            if self.malformed_limiter.allow() {
                warn!("dropping malformed flow: negative active-interval duration");
            }
            return;
        }

        if flow.delta_switched_synthesized() {
            Metrics::inc(&self.metrics.delta_switched_synthesized);
        }

        let windows = window::assign_windows(
            flow,
            self.config.fixed_window_size_ms,
            record.event_time_ms,
            self.config.max_flow_duration_ms,
            &self.skew_limiter,
        );
        if windows.is_empty() {
            Metrics::inc(&self.metrics.flows_dropped_skew);
        }

        self.watermark.observe(record.partition, record.event_time_ms);
        let watermark_ms = self.watermark.global_watermark_ms().unwrap_or(i64::MIN);
        let now_ms = self.clock.now_ms();

        let if_index = if_index_for(flow);

        for (window_start, flow_ref) in windows {
            let window = Window::containing(window_start, self.config.fixed_window_size_ms);
            let Some(bytes) = allocator::allocate(window, flow_ref, &self.malformed_limiter) else {
                continue;
            };

            for (branch, engine) in Branch::ALL.iter().zip(self.engines.iter_mut()) {
                let key = key_for_branch(*branch, flow_ref, if_index);
                engine.ingest(window_start, key, bytes, watermark_ms, now_ms);
            }
        }
    }

    /// Advance all four branch trigger engines and collect the panes ready
    /// to fire right now.
    fn fire_ready_panes(&mut self) -> Vec<(Branch, Pane)> {
        let watermark_ms = self.watermark.global_watermark_ms().unwrap_or(i64::MIN);
        let now_ms = self.clock.now_ms();

        let mut fired = Vec::new();
        for (branch, engine) in Branch::ALL.iter().zip(self.engines.iter_mut()) {
            let (panes, evicted) = engine.advance(watermark_ms, now_ms);
            for _ in 0..evicted {
                Metrics::inc(&self.metrics.panes_evicted);
            }
            for pane in panes {
                if pane.is_late {
                    Metrics::inc(&self.metrics.panes_fired_late);
                } else {
                    Metrics::inc(&self.metrics.panes_fired_on_time);
                }
                fired.push((*branch, pane));
            }
        }
        fired
    }

    /// Build summaries for a fired pane and write them to the sinks. TOTAL
    /// branches emit every entry unranked; TOPK branches re-key by outer
    /// key and rank within each outer-key group (§4.6, §4.7). Each summary's
    /// write is retried with backoff (see [`with_retry`]) before the pane as
    /// a whole is considered acknowledged.
    async fn emit_pane(&self, branch: Branch, pane: Pane) -> Result<(), SinkError> {
        let summaries = build_summaries(branch, &pane, self.config.top_k);

        stream::iter(summaries)
            .map(|summary| {
                let document_sink = self.document_sink.clone();
                let topic_sink = self.topic_sink.clone();
                let index_strategy = self.config.elastic_index_strategy;
                let base_index = self.config.elastic_flow_index.clone();
                async move {
                    let index = index_strategy.index_name(&base_index, summary.timestamp);
                    let doc_id = summary.id();
                    let document = to_document(&summary)?;
                    with_retry(|| {
                        let document_sink = document_sink.clone();
                        let topic_sink = topic_sink.clone();
                        let index = index.clone();
                        let doc_id = doc_id.clone();
                        let document = document.clone();
                        async move { write_summary(&document_sink, &topic_sink, &index, &doc_id, document).await }
                    })
                    .await
                }
            })
            .buffer_unordered(16)
            .try_for_each(|()| futures::future::ready(Ok(())))
            .await
    }

    /// Main run loop (§4.10): pull from the source, fan into the branches,
    /// fire ready panes, and commit offsets once the sink has acknowledged.
    /// Stops pulling when `shutdown` resolves, drains in-flight state, and
    /// fires every pane whose window is already complete before returning.
    pub async fn run(mut self, mut shutdown: impl std::future::Future<Output = ()> + Unpin) -> color_eyre::eyre::Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, draining in-flight panes");
                    break;
                }
                polled = self.source.poll() => {
                    match polled {
                        Ok(Some(record)) => {
                            let partition = record.partition;
                            let offset = record.offset;
                            self.ingest(&record);

                            // `emit_pane` only returns `Err` once a summary's
                            // write is either permanent or has exhausted its
                            // retries (`with_retry`), i.e. the pane's data is
                            // not durably in the sink. Either way the offset
                            // for this record must not be committed, and the
                            // pipeline cannot make forward progress on its
                            // own, so it surfaces the failure to the runtime
                            // (§7) rather than retrying a no-longer-current
                            // pane firing.
                            let fired = self.fire_ready_panes();
                            for (branch, pane) in fired {
                                if let Err(e) = self.emit_pane(branch, pane).await {
                                    error!(
                                        "sink write for offset {offset} did not succeed, aborting without committing: {e}"
                                    );
                                    return Err(e.into());
                                }
                            }

                            if !self.config.auto_commit {
                                self.source.commit(partition, offset).await?;
                            }
                        }
                        Ok(None) => {
                            // No record currently available; yield so the
                            // watermark can still be driven by a timer in a
                            // fuller deployment. Here we just retry.
                            tokio::task::yield_now().await;
                        }
                        Err(e) => {
                            warn!("source error, reconnect/backoff is the adapter's responsibility: {e}");
                        }
                    }
                }
            }
        }

        // Drain: fire whatever panes are already complete before exiting.
        let fired = self.fire_ready_panes();
        for (branch, pane) in fired {
            self.emit_pane(branch, pane).await?;
        }
        Ok(())
    }
}

/// Upsert one summary's document and, if configured, mirror it onto the
/// output topic.
async fn write_summary(
    document_sink: &Arc<dyn DocumentSink>,
    topic_sink: &Option<Arc<dyn TopicSink>>,
    index: &str,
    doc_id: &str,
    document: serde_json::Value,
) -> Result<(), SinkError> {
    document_sink.upsert(index, doc_id, document.clone()).await?;
    if let Some(topic_sink) = topic_sink {
        topic_sink.send(document).await?;
    }
    Ok(())
}

/// Bounded attempts for a transient sink failure before surfacing it to the
/// runtime (§7).
const MAX_SINK_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 5_000;

/// Retries `attempt` with exponential backoff (doubling, capped) on a
/// transient [`SinkError`], up to `MAX_SINK_ATTEMPTS` tries total. A
/// permanent error is never retried. Once the attempt budget is exhausted,
/// the last transient error is returned rather than swallowed, so the caller
/// can surface it to the runtime instead of silently dropping the write.
async fn with_retry<F, Fut>(mut attempt: F) -> Result<(), SinkError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), SinkError>>,
{
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    let mut attempt_no = 1u32;
    loop {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_permanent() => return Err(e),
            Err(e) if attempt_no >= MAX_SINK_ATTEMPTS => {
                warn!("sink write failed after {attempt_no} attempts, surfacing to runtime: {e}");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "transient sink failure (attempt {attempt_no}/{MAX_SINK_ATTEMPTS}), retrying in {backoff_ms}ms: {e}"
                );
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                attempt_no += 1;
            }
        }
    }
}

fn build_summaries(branch: Branch, pane: &Pane, top_k: usize) -> Vec<summary::FlowSummary> {
    let aggregation_type = branch.aggregation_type();

    match aggregation_type {
        AggregationType::Total => pane
            .entries
            .iter()
            .map(|(key, bytes)| summary::build(pane.window, key, *bytes, AggregationType::Total, 0))
            .collect(),
        AggregationType::Topk => {
            let mut by_outer: std::collections::HashMap<CompoundKey, Vec<(CompoundKey, BytesInOut)>> =
                std::collections::HashMap::new();
            for (key, bytes) in &pane.entries {
                by_outer.entry(key.outer_key()).or_default().push((key.clone(), *bytes));
            }

            let mut summaries = Vec::new();
            for (_, entries) in by_outer {
                let ranked = topk::compute_topk(entries, top_k);
                for (rank, (key, bytes)) in ranked.into_iter().enumerate() {
                    summaries.push(summary::build(
                        pane.window,
                        &key,
                        bytes,
                        AggregationType::Topk,
                        (rank + 1) as i64,
                    ));
                }
            }
            summaries
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Exporter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    struct FixedClock(AtomicI64);
    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct VecSource {
        records: Mutex<std::collections::VecDeque<SourceRecord>>,
    }

    #[async_trait]
    impl FlowSource for VecSource {
        async fn poll(&mut self) -> Result<Option<SourceRecord>, crate::error::SourceError> {
            Ok(self.records.lock().unwrap().pop_front())
        }
        async fn commit(&mut self, _partition: i32, _offset: i64) -> Result<(), crate::error::SourceError> {
            Ok(())
        }
    }

    struct CapturingSink {
        docs: Mutex<Vec<(String, String, serde_json::Value)>>,
    }

    #[async_trait]
    impl DocumentSink for CapturingSink {
        async fn upsert(&self, index: &str, doc_id: &str, document: serde_json::Value) -> Result<(), SinkError> {
            self.docs
                .lock()
                .unwrap()
                .push((index.to_string(), doc_id.to_string(), document));
            Ok(())
        }
    }

    /// A sink that fails transiently (or, if `permanent`, fatally) on its
    /// first `fail_times` calls before succeeding, for exercising
    /// [`with_retry`].
    struct FlakySink {
        calls: std::sync::atomic::AtomicUsize,
        fail_times: usize,
        permanent: bool,
        docs: Mutex<Vec<(String, String, serde_json::Value)>>,
    }

    #[async_trait]
    impl DocumentSink for FlakySink {
        async fn upsert(&self, index: &str, doc_id: &str, document: serde_json::Value) -> Result<(), SinkError> {
            let call_no = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(SinkError::Permanent("simulated permanent failure".into()));
            }
            if call_no < self.fail_times {
                return Err(SinkError::Transient("simulated transient failure".into()));
            }
            self.docs
                .lock()
                .unwrap()
                .push((index.to_string(), doc_id.to_string(), document));
            Ok(())
        }
    }

    fn flow(delta_ms: i64, last_ms: i64, num_bytes: u64) -> FlowRecord {
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
            src_address: "10.0.0.1".parse().unwrap(),
            dst_address: "10.0.0.2".parse().unwrap(),
            src_port: 1000,
            dst_port: 80,
            protocol: 6,
            application: "HTTP".into(),
            num_bytes,
            first_switched_ms: delta_ms,
            delta_switched_ms: Some(delta_ms),
            last_switched_ms: last_ms,
            direction: Direction::Ingress,
        }
    }

    fn config() -> Config {
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
            elastic_index_strategy: crate::sink::IndexStrategy::Daily,
            fixed_window_size_ms: 60_000,
            max_flow_duration_ms: 900_000,
            default_max_input_delay_ms: 0,
            late_processing_delay_ms: 1_000,
            allowed_lateness_ms: 14_400_000,
            top_k: 10,
        }
    }

    #[tokio::test]
    async fn s2_two_flows_same_key_combine_into_one_total_summary() {
        let f1 = flow(0, 1_000, 100);
        let mut f2 = flow(0, 1_000, 50);
        f2.direction = Direction::Egress;

        let source = VecSource {
            records: Mutex::new(
                vec![
                    SourceRecord {
                        partition: 0,
                        offset: 0,
                        event_time_ms: 1_000,
                        flow: f1,
                    },
                    SourceRecord {
                        partition: 0,
                        offset: 1,
                        event_time_ms: 1_000,
                        flow: f2,
                    },
                    // Push the watermark past window end so the on-time pane fires.
                    SourceRecord {
                        partition: 0,
                        offset: 2,
                        event_time_ms: 60_001,
                        flow: flow(60_000, 60_000, 1),
                    },
                ]
                .into(),
            ),
        };

        let sink = Arc::new(CapturingSink {
            docs: Mutex::new(Vec::new()),
        });

        let mut pipeline = Pipeline::new(config(), Box::new(source), sink.clone(), None);
        pipeline.clock = Box::new(FixedClock(AtomicI64::new(0)));

        while let Ok(Some(record)) = pipeline.source.poll().await {
            pipeline.ingest(&record);
            let fired = pipeline.fire_ready_panes();
            for (branch, pane) in fired {
                pipeline.emit_pane(branch, pane).await.unwrap();
            }
        }

        let docs = sink.docs.lock().unwrap();
        let total_docs: Vec<_> = docs
            .iter()
            .filter(|(_, id, _)| id.contains("_TOTAL_"))
            .collect();
        assert!(!total_docs.is_empty());
        let (_, _, doc) = total_docs
            .iter()
            .find(|(_, _, d)| d["grouped_by"] == "exporterInterface")
            .expect("exporter-interface TOTAL summary present");
        assert_eq!(doc["bytes_ingress"], 100);
        assert_eq!(doc["bytes_egress"], 50);
        assert_eq!(doc["bytes_total"], 150);
    }

    fn single_entry_pane() -> Pane {
        let key = CompoundKey::exporter_interface(&flow(0, 1_000, 100), 1);
        Pane {
            window: Window::containing(0, 60_000),
            is_late: false,
            entries: vec![(
                key,
                BytesInOut {
                    bytes_in: 100,
                    bytes_out: 0,
                },
            )],
        }
    }

    #[tokio::test]
    async fn transient_sink_failures_are_retried_until_success() {
        let sink = Arc::new(FlakySink {
            calls: Default::default(),
            fail_times: 2,
            permanent: false,
            docs: Mutex::new(Vec::new()),
        });
        let source = VecSource {
            records: Mutex::new(std::collections::VecDeque::new()),
        };
        let pipeline = Pipeline::new(config(), Box::new(source), sink.clone(), None);

        pipeline
            .emit_pane(Branch::ExporterInterface, single_entry_pane())
            .await
            .expect("succeeds once the retry budget reaches the sink's third call");

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.docs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn permanent_sink_failure_is_surfaced_without_retrying() {
        let sink = Arc::new(FlakySink {
            calls: Default::default(),
            fail_times: 0,
            permanent: true,
            docs: Mutex::new(Vec::new()),
        });
        let source = VecSource {
            records: Mutex::new(std::collections::VecDeque::new()),
        };
        let pipeline = Pipeline::new(config(), Box::new(source), sink.clone(), None);

        let err = pipeline
            .emit_pane(Branch::ExporterInterface, single_entry_pane())
            .await
            .unwrap_err();

        assert!(err.is_permanent());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_the_retry_budget_surfaces_the_transient_error() {
        let sink = Arc::new(FlakySink {
            calls: Default::default(),
            fail_times: usize::MAX,
            permanent: false,
            docs: Mutex::new(Vec::new()),
        });
        let source = VecSource {
            records: Mutex::new(std::collections::VecDeque::new()),
        };
        let pipeline = Pipeline::new(config(), Box::new(source), sink.clone(), None);

        let err = pipeline
            .emit_pane(Branch::ExporterInterface, single_entry_pane())
            .await
            .unwrap_err();

        assert!(!err.is_permanent());
        assert_eq!(sink.calls.load(Ordering::SeqCst), MAX_SINK_ATTEMPTS as usize);
        assert!(sink.docs.lock().unwrap().is_empty());
    }
}
