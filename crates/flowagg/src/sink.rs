//! Sink contracts (§4.9) and their concrete adapters.
//!
//! The document sink is keyed on `docId` for idempotent upsert (so late
//! re-firings overwrite rather than duplicate, invariant 8); the topic sink
//! is a plain append-only write with the key ignored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use elasticsearch::http::transport::Transport;
use elasticsearch::{Elasticsearch, IndexParts};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;

use crate::error::SinkError;

/// Index naming strategy (§6): `"{baseIndex}-yyyy-MM-dd[-HH]"` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IndexStrategy {
    Daily,
    Hourly,
    Monthly,
}

impl std::fmt::Display for IndexStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IndexStrategy::Daily => "daily",
            IndexStrategy::Hourly => "hourly",
            IndexStrategy::Monthly => "monthly",
        };
        f.write_str(name)
    }
}

impl IndexStrategy {
    pub fn index_name(&self, base_index: &str, timestamp_ms: i64) -> String {
        let dt: DateTime<Utc> = DateTime::from_timestamp_millis(timestamp_ms).unwrap_or_else(Utc::now);
        let suffix = match self {
            IndexStrategy::Daily => dt.format("%Y-%m-%d").to_string(),
            IndexStrategy::Hourly => dt.format("%Y-%m-%d-%H").to_string(),
            IndexStrategy::Monthly => dt.format("%Y-%m").to_string(),
        };
        format!("{base_index}-{suffix}")
    }
}

#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn upsert(&self, index: &str, doc_id: &str, document: serde_json::Value) -> Result<(), SinkError>;
}

#[async_trait]
pub trait TopicSink: Send + Sync {
    async fn send(&self, payload: serde_json::Value) -> Result<(), SinkError>;
}

/// Elasticsearch-backed document sink. Upsert semantics are implemented via
/// the `Index` API with an explicit document id: indexing a document under
/// an id that already exists replaces it, matching the idempotence the core
/// requires.
pub struct ElasticsearchSink {
    client: Elasticsearch,
}

impl ElasticsearchSink {
    pub fn new(url: &str, user: Option<&str>, password: Option<&str>) -> Result<Self, SinkError> {
        let mut transport_builder = Transport::builder(
            elasticsearch::http::transport::SingleNodeConnectionPool::new(
                url.parse().map_err(|e| SinkError::Permanent(format!("invalid elastic url: {e}")))?,
            ),
        );
        if let (Some(user), Some(password)) = (user, password) {
            transport_builder = transport_builder.auth(elasticsearch::auth::Credentials::Basic(
                user.to_string(),
                password.to_string(),
            ));
        }
        let transport = transport_builder
            .build()
            .map_err(|e| SinkError::Permanent(format!("failed to build elastic transport: {e}")))?;
        Ok(ElasticsearchSink {
            client: Elasticsearch::new(transport),
        })
    }
}

#[async_trait]
impl DocumentSink for ElasticsearchSink {
    async fn upsert(&self, index: &str, doc_id: &str, document: serde_json::Value) -> Result<(), SinkError> {
        let response = self
            .client
            .index(IndexParts::IndexId(index, doc_id))
            .body(document)
            .send()
            .await
            .map_err(|e| SinkError::Transient(e.to_string()))?;

        if response.status_code().is_client_error() && response.status_code().as_u16() != 409 {
            return Err(SinkError::Permanent(format!(
                "elasticsearch rejected upsert: {}",
                response.status_code()
            )));
        }
        if response.status_code().is_server_error() {
            return Err(SinkError::Transient(format!(
                "elasticsearch server error: {}",
                response.status_code()
            )));
        }
        Ok(())
    }
}

/// Kafka-backed topic sink for the optional `flowDestTopic` output.
pub struct KafkaTopicSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaTopicSink {
    pub fn new(bootstrap_servers: &str, topic: &str) -> Result<Self, SinkError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .create()
            .map_err(|e| SinkError::Permanent(e.to_string()))?;
        Ok(KafkaTopicSink {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl TopicSink for KafkaTopicSink {
    async fn send(&self, payload: serde_json::Value) -> Result<(), SinkError> {
        let body = serde_json::to_vec(&payload).map_err(|e| SinkError::Permanent(e.to_string()))?;
        let record: FutureRecord<(), Vec<u8>> = FutureRecord::to(&self.topic).payload(&body);
        self.producer
            .send(record, std::time::Duration::from_secs(5))
            .await
            .map(|_| ())
            .map_err(|(e, _)| SinkError::Transient(e.to_string()))
    }
}

pub fn to_document<T: Serialize>(value: &T) -> Result<serde_json::Value, SinkError> {
    serde_json::to_value(value).map_err(|e| SinkError::Permanent(e.to_string()))
}
