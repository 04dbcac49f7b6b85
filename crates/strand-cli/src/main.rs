//! strand - runs a small demo graph against the in-memory broker.
//!
//! ```text
//! Greeter::emit ──words──► Shout::apply ──greetings──► outbound (InMemoryBroker)
//! ```
//!
//! `--config` points at a runtime configuration (JSON). Without it the
//! `greetings` channel runs with defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use strand_core::app::{RuntimeBuilder, RuntimeConfig};
use strand_core::domain::{BoxError, ChannelName, HealthReport, Message};
use strand_core::impls::InMemoryBroker;
use strand_core::observability::GraphStatus;
use strand_core::outbound::OutgoingChannelConfig;
use strand_core::weave::{BindingRecord, Invoker};

const OUTGOING: &str = "greetings";

#[derive(Debug, Parser)]
#[command(name = "strand", about = "Weave a demo graph and deliver it to an in-memory broker")]
struct Cli {
    /// Runtime configuration file (JSON).
    #[arg(long, env = "STRAND_CONFIG")]
    config: Option<PathBuf>,

    /// Number of greetings to emit.
    #[arg(long, default_value_t = 3)]
    count: usize,

    /// Seconds to wait for delivery before giving up.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

struct Greeter {
    names: Vec<String>,
}

struct Shout;

#[derive(Serialize)]
struct Summary {
    delivered: usize,
    status: GraphStatus,
    liveness: HealthReport,
    readiness: HealthReport,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_path(path)?,
        None => RuntimeConfig::default(),
    }
    .with_env_overrides();
    let outgoing = config
        .outgoing
        .entry(ChannelName::from(OUTGOING))
        .or_insert_with(|| OutgoingChannelConfig::new(OUTGOING));
    let topic = outgoing.topic_or_channel().to_string();

    let broker = InMemoryBroker::new().with_topics([topic.clone()]);
    let names = (1..=cli.count).map(|i| format!("strand-{i}")).collect();

    let graph = RuntimeBuilder::new()
        .config(config)
        .owner_instance("Greeter", Greeter { names })?
        .owner_instance("Shout", Shout)?
        .declare(
            BindingRecord::builder("Greeter", "emit")
                .outgoing("words")
                .invoker(Invoker::publisher(|greeter: Arc<Greeter>| {
                    let messages: Vec<Message> = greeter
                        .names
                        .iter()
                        .map(|name| Message::new(format!("hello, {name}")))
                        .collect();
                    stream::iter(messages).boxed()
                }))
                .build()?,
        )?
        .declare(
            BindingRecord::builder("Shout", "apply")
                .incoming("words")
                .outgoing(OUTGOING)
                .invoker(Invoker::processor(|_: Arc<Shout>, message: Message| async move {
                    let text = message.payload().value().as_str().unwrap_or_default().to_uppercase();
                    Ok::<Message, BoxError>(message.with_payload(text))
                }))
                .build()?,
        )?
        .broker_factory(broker.clone())
        .build()?
        .start()
        .await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(cli.timeout);
    while broker.records(&topic).len() < cli.count && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    for record in broker.records(&topic) {
        info!(topic = %record.topic, value = %record.value, "delivered");
    }

    let summary = Summary {
        delivered: broker.records(&topic).len(),
        status: graph.status(),
        liveness: graph.liveness(),
        readiness: graph.readiness().await,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !graph.shutdown(Duration::from_secs(5)).await {
        tracing::warn!("outbound channels did not drain before the deadline");
    }
    Ok(())
}
