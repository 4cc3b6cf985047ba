//! Source contract (§4.9) and a Kafka-backed implementation.
//!
//! The core only needs pull-with-timestamps, commit, and a timestamp policy
//! that turns observed timestamps into a per-partition watermark; everything
//! else about the bus (partition assignment, rebalancing, wire decoding
//! upstream of `FlowRecord`) is the adapter's concern.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{Message, TopicPartitionList};

use crate::error::SourceError;
use crate::flow::{self, FlowRecord};

/// One pulled record: its partition/offset for commit bookkeeping, the
/// event time the timestamp policy assigned it, and the decoded flow.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub partition: i32,
    pub offset: i64,
    pub event_time_ms: i64,
    pub flow: FlowRecord,
}

/// Computes a record's event time and tracks the maximum allowed lateness
/// used to derive a watermark from observed timestamps (§4.9). The default
/// policy treats the flow's `last_switched_ms` as the event time, which is
/// what the window assigner keys off of.
pub trait TimestampPolicy: Send + Sync {
    fn event_time_ms(&self, flow: &FlowRecord) -> i64;
    fn max_input_delay_ms(&self) -> i64;
}

pub struct BoundedLatenessPolicy {
    pub max_input_delay_ms: i64,
}

impl TimestampPolicy for BoundedLatenessPolicy {
    fn event_time_ms(&self, flow: &FlowRecord) -> i64 {
        flow.last_switched_ms
    }

    fn max_input_delay_ms(&self) -> i64 {
        self.max_input_delay_ms
    }
}

#[async_trait]
pub trait FlowSource: Send {
    /// Pull the next available record, or `None` if none is currently
    /// available (the caller should keep polling).
    async fn poll(&mut self) -> Result<Option<SourceRecord>, SourceError>;

    /// Commit an offset for a partition. Only called after the
    /// corresponding window's results have been acknowledged by the sink
    /// when `auto_commit` is disabled.
    async fn commit(&mut self, partition: i32, offset: i64) -> Result<(), SourceError>;
}

/// Kafka-backed source: a `StreamConsumer` pulling length-prefixed flow
/// records, with manual offset commit when `auto_commit` is disabled.
pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
    timestamp_policy: Box<dyn TimestampPolicy>,
    auto_commit: bool,
}

impl KafkaSource {
    pub fn new(
        bootstrap_servers: &str,
        group_id: &str,
        topic: &str,
        auto_commit: bool,
        timestamp_policy: Box<dyn TimestampPolicy>,
    ) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", auto_commit.to_string())
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| SourceError::Disconnected(e.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| SourceError::Disconnected(e.to_string()))?;

        Ok(KafkaSource {
            consumer,
            topic: topic.to_string(),
            timestamp_policy,
            auto_commit,
        })
    }
}

#[async_trait]
impl FlowSource for KafkaSource {
    async fn poll(&mut self) -> Result<Option<SourceRecord>, SourceError> {
        use futures::StreamExt;

        let message = match self.consumer.stream().next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(SourceError::Disconnected(e.to_string())),
            None => return Ok(None),
        };

        let payload = message
            .payload()
            .ok_or_else(|| SourceError::Disconnected("empty payload".to_string()))?;
        let (flow, _) = flow::decode(payload)?;
        let event_time_ms = self.timestamp_policy.event_time_ms(&flow);

        Ok(Some(SourceRecord {
            partition: message.partition(),
            offset: message.offset(),
            event_time_ms,
            flow,
        }))
    }

    async fn commit(&mut self, partition: i32, offset: i64) -> Result<(), SourceError> {
        if self.auto_commit {
            return Ok(());
        }
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, partition, rdkafka::Offset::Offset(offset + 1))
            .map_err(|e| SourceError::Disconnected(e.to_string()))?;
        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Async)
            .map_err(|e| SourceError::Disconnected(e.to_string()))
    }
}
