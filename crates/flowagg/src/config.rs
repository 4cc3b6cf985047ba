//! Configuration (§6, §4.11): CLI-parsed and validated once at startup into
//! an immutable [`Config`]. Mirrors the teacher's `clap::Parser` derive
//! style rather than a config-file format.

use clap::Parser;

use crate::error::ConfigError;
use crate::sink::IndexStrategy;

fn default_fixed_window_size_ms() -> i64 {
    60_000
}
fn default_max_flow_duration_ms() -> i64 {
    900_000
}
fn default_max_input_delay_ms() -> i64 {
    300_000
}
fn default_late_processing_delay_ms() -> i64 {
    60_000
}
fn default_allowed_lateness_ms() -> i64 {
    14_400_000
}
fn default_top_k() -> usize {
    10
}

#[derive(Debug, Clone, Parser)]
#[command(name = "flowagg", about = "Streaming aggregator for network flow telemetry")]
pub struct CliArgs {
    #[arg(long, env = "FLOWAGG_BOOTSTRAP_SERVERS")]
    pub bootstrap_servers: String,

    #[arg(long, env = "FLOWAGG_FLOW_SOURCE_TOPIC")]
    pub flow_source_topic: String,

    #[arg(long, env = "FLOWAGG_FLOW_DEST_TOPIC")]
    pub flow_dest_topic: Option<String>,

    #[arg(long, env = "FLOWAGG_GROUP_ID")]
    pub group_id: String,

    #[arg(long, env = "FLOWAGG_AUTO_COMMIT", default_value_t = false)]
    pub auto_commit: bool,

    #[arg(long, env = "FLOWAGG_ELASTIC_URL")]
    pub elastic_url: String,

    #[arg(long, env = "FLOWAGG_ELASTIC_USER")]
    pub elastic_user: Option<String>,

    #[arg(long, env = "FLOWAGG_ELASTIC_PASSWORD")]
    pub elastic_password: Option<String>,

    #[arg(long, env = "FLOWAGG_ELASTIC_FLOW_INDEX")]
    pub elastic_flow_index: String,

    #[arg(long, env = "FLOWAGG_ELASTIC_INDEX_STRATEGY", value_enum, default_value_t = IndexStrategy::Daily)]
    pub elastic_index_strategy: IndexStrategy,

    #[arg(long, env = "FLOWAGG_FIXED_WINDOW_SIZE_MS", default_value_t = default_fixed_window_size_ms())]
    pub fixed_window_size_ms: i64,

    #[arg(long, env = "FLOWAGG_MAX_FLOW_DURATION_MS", default_value_t = default_max_flow_duration_ms())]
    pub max_flow_duration_ms: i64,

    #[arg(long, env = "FLOWAGG_DEFAULT_MAX_INPUT_DELAY_MS", default_value_t = default_max_input_delay_ms())]
    pub default_max_input_delay_ms: i64,

    #[arg(long, env = "FLOWAGG_LATE_PROCESSING_DELAY_MS", default_value_t = default_late_processing_delay_ms())]
    pub late_processing_delay_ms: i64,

    #[arg(long, env = "FLOWAGG_ALLOWED_LATENESS_MS", default_value_t = default_allowed_lateness_ms())]
    pub allowed_lateness_ms: i64,

    #[arg(long, env = "FLOWAGG_TOP_K", default_value_t = default_top_k())]
    pub top_k: usize,
}

/// Validated, immutable configuration. Read-only after startup (§5).
#[derive(Debug, Clone)]
pub struct Config {
    pub bootstrap_servers: String,
    pub flow_source_topic: String,
    pub flow_dest_topic: Option<String>,
    pub group_id: String,
    pub auto_commit: bool,
    pub elastic_url: String,
    pub elastic_user: Option<String>,
    pub elastic_password: Option<String>,
    pub elastic_flow_index: String,
    pub elastic_index_strategy: IndexStrategy,
    pub fixed_window_size_ms: i64,
    pub max_flow_duration_ms: i64,
    pub default_max_input_delay_ms: i64,
    pub late_processing_delay_ms: i64,
    pub allowed_lateness_ms: i64,
    pub top_k: usize,
}

impl TryFrom<CliArgs> for Config {
    type Error = ConfigError;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::Invalid("bootstrapServers must not be empty".into()));
        }
        if args.fixed_window_size_ms <= 0 {
            return Err(ConfigError::Invalid("fixedWindowSizeMs must be positive".into()));
        }
        if args.max_flow_duration_ms <= 0 {
            return Err(ConfigError::Invalid("maxFlowDurationMs must be positive".into()));
        }
        if args.allowed_lateness_ms < args.late_processing_delay_ms {
            return Err(ConfigError::Invalid(
                "allowedLatenessMs must be >= lateProcessingDelayMs".into(),
            ));
        }
        if args.top_k == 0 {
            return Err(ConfigError::Invalid("topK must be at least 1".into()));
        }

        Ok(Config {
            bootstrap_servers: args.bootstrap_servers,
            flow_source_topic: args.flow_source_topic,
            flow_dest_topic: args.flow_dest_topic,
            group_id: args.group_id,
            auto_commit: args.auto_commit,
            elastic_url: args.elastic_url,
            elastic_user: args.elastic_user,
            elastic_password: args.elastic_password,
            elastic_flow_index: args.elastic_flow_index,
            elastic_index_strategy: args.elastic_index_strategy,
            fixed_window_size_ms: args.fixed_window_size_ms,
            max_flow_duration_ms: args.max_flow_duration_ms,
            default_max_input_delay_ms: args.default_max_input_delay_ms,
            late_processing_delay_ms: args.late_processing_delay_ms,
            allowed_lateness_ms: args.allowed_lateness_ms,
            top_k: args.top_k,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs {
            bootstrap_servers: "kafka:9092".into(),
            flow_source_topic: "flows".into(),
            flow_dest_topic: None,
            group_id: "flowagg".into(),
            auto_commit: false,
            elastic_url: "http://localhost:9200".into(),
            elastic_user: None,
            elastic_password: None,
            elastic_flow_index: "netflow".into(),
            elastic_index_strategy: IndexStrategy::Daily,
            fixed_window_size_ms: default_fixed_window_size_ms(),
            max_flow_duration_ms: default_max_flow_duration_ms(),
            default_max_input_delay_ms: default_max_input_delay_ms(),
            late_processing_delay_ms: default_late_processing_delay_ms(),
            allowed_lateness_ms: default_allowed_lateness_ms(),
            top_k: default_top_k(),
        }
    }

    #[test]
    fn valid_config_converts_cleanly() {
        let config = Config::try_from(base_args()).unwrap();
        assert_eq!(config.top_k, 10);
    }

    #[test]
    fn empty_bootstrap_servers_is_fatal() {
        let mut args = base_args();
        args.bootstrap_servers = "  ".into();
        assert!(Config::try_from(args).is_err());
    }

    #[test]
    fn zero_top_k_is_fatal() {
        let mut args = base_args();
        args.top_k = 0;
        assert!(Config::try_from(args).is_err());
    }

    #[test]
    fn lateness_shorter_than_late_processing_delay_is_fatal() {
        let mut args = base_args();
        args.allowed_lateness_ms = 10;
        args.late_processing_delay_ms = 100;
        assert!(Config::try_from(args).is_err());
    }
}
