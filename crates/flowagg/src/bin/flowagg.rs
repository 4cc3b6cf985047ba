use std::sync::Arc;

use color_eyre::eyre::{Context as _, Result};
use log::info;

use flowagg::config::{CliArgs, Config};
use flowagg::pipeline::Pipeline;
use flowagg::sink::{ElasticsearchSink, KafkaTopicSink};
use flowagg::source::{BoundedLatenessPolicy, KafkaSource};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let args: CliArgs = clap::Parser::parse();
    let config = Config::try_from(args).wrap_err("invalid configuration")?;

    let timestamp_policy = Box::new(BoundedLatenessPolicy {
        max_input_delay_ms: config.default_max_input_delay_ms,
    });
    let source = KafkaSource::new(
        &config.bootstrap_servers,
        &config.group_id,
        &config.flow_source_topic,
        config.auto_commit,
        timestamp_policy,
    )
    .wrap_err("failed to start the flow source")?;

    let document_sink = Arc::new(
        ElasticsearchSink::new(
            &config.elastic_url,
            config.elastic_user.as_deref(),
            config.elastic_password.as_deref(),
        )
        .wrap_err("failed to construct the elasticsearch sink")?,
    );

    let topic_sink = match &config.flow_dest_topic {
        Some(topic) => Some(Arc::new(
            KafkaTopicSink::new(&config.bootstrap_servers, topic)
                .wrap_err("failed to construct the topic sink")?,
        ) as Arc<dyn flowagg::sink::TopicSink>),
        None => None,
    };

    let pipeline = Pipeline::new(config, Box::new(source), document_sink, topic_sink);

    let shutdown = Box::pin(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    info!("flowagg starting");
    pipeline.run(shutdown).await?;
    info!("flowagg shut down cleanly");
    Ok(())
}
