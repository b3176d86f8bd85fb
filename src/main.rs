//! Edge gateway stream pipeline (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!     Client stream                ┌──────────────────────────────────────────────┐
//!     ─────────────────────────────┼─▶ StreamInitializer                          │
//!                                  │     expiry → close → reset → codec → errors  │
//!                                  │     → cleaner → content-length → metrics     │
//!                                  │              │                               │
//!                                  │              ▼                               │
//!                                  │     ChainDispatchHandler                     │
//!                                  │              │                               │
//!                                  │              ▼                               │
//!                                  │     inbound FilterChainRunner                │
//!                                  │              │                               │
//!                                  │              ▼                               │
//!     Next stage                   │     ChannelStage                             │
//!     ◀────────────────────────────┼──────────────┘                               │
//!                                  │                                              │
//!                                  │  config (TOML + hot reload) · observability  │
//!                                  └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use hyper::header::{HeaderName, HeaderValue};
use std::path::PathBuf;
use std::sync::Arc;

use edge_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use edge_gateway::filter::{
    ChainDispatchHandler, ChannelStage, Filter, FilterChain, FilterChainRunner, FilterOutcome, FilterSwitches,
    FilterType, StageEvent,
};
use edge_gateway::message::Message;
use edge_gateway::net::attributes::CHANNEL_CONFIG;
use edge_gateway::net::{Connection, Pipeline, SharedStreamHandlers, Stream, StreamInitializer};
use edge_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(about = "Stream pipeline and filter chain engine of the edge gateway", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "edge-gateway.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Tags each request with the exchange UUID.
struct RequestIdFilter;

impl Filter for RequestIdFilter {
    fn name(&self) -> &str {
        "request_id"
    }

    fn filter_type(&self) -> FilterType {
        FilterType::Inbound
    }

    fn should_filter(&self, message: &Message) -> bool {
        !message.headers().contains_key(&REQUEST_ID)
    }

    fn apply(&self, mut message: Message) -> FilterOutcome {
        let uuid = message.context().uuid().to_string();
        match HeaderValue::from_str(&uuid) {
            Ok(value) => {
                message.headers_mut().insert(REQUEST_ID, value);
            }
            Err(e) => tracing::warn!(error = %e, "Could not encode request id"),
        }
        FilterOutcome::Continue(message)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    logging::init_logging(&config.observability);

    tracing::info!("edge-gateway v0.1.0 starting");
    tracing::info!(
        path = ?cli.config,
        max_requests_per_connection = config.stream.max_requests_per_connection,
        disabled_filters = config.filters.disabled.len(),
        "Configuration loaded"
    );

    if cli.check {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let switches = Arc::new(FilterSwitches::new());
    switches.apply(config.filters.disabled.iter().cloned());

    let (stage, mut stage_rx) = ChannelStage::new();
    let chain = FilterChain::new(vec![Arc::new(switches.wrap(RequestIdFilter)) as Arc<dyn Filter>])?;
    let runner = Arc::new(FilterChainRunner::new(chain, Arc::new(stage)));

    tokio::spawn(async move {
        while let Some(event) = stage_rx.recv().await {
            match event {
                StageEvent::Message(message) => tracing::info!(
                    uuid = %message.context().uuid(),
                    path = ?message.path(),
                    "Request passed inbound filters"
                ),
                StageEvent::Chunk(_, chunk) => tracing::debug!(bytes = chunk.len(), "Body chunk passed inbound filters"),
            }
        }
    });

    let initializer = build_initializer(&config, runner);
    let connection = Arc::new(Connection::new());
    let (layout, _layout_rx) = Stream::new(&connection, 1);
    initializer(&connection).attach(&layout)?;
    tracing::info!(handlers = ?layout.handler_names(), "Stream pipeline layout");

    let (watcher, mut updates) = ConfigWatcher::new(&cli.config, &config);
    let _watcher = watcher.run()?;

    loop {
        tokio::select! {
            Some(filters) = updates.recv() => {
                switches.apply(filters.disabled);
                tracing::info!("Filter switches reloaded");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Per-connection initializer factory sharing the stateless handlers and the inbound runner.
fn build_initializer(
    config: &GatewayConfig,
    runner: Arc<FilterChainRunner>,
) -> impl Fn(&Arc<Connection>) -> Arc<StreamInitializer> {
    let shared = SharedStreamHandlers::default();
    let stream_config = Arc::new(config.stream.clone());

    move |connection: &Arc<Connection>| {
        connection.attributes().set(CHANNEL_CONFIG, Arc::clone(&stream_config));
        let runner = Arc::clone(&runner);
        Arc::new(StreamInitializer::new(
            Arc::clone(connection),
            shared.clone(),
            Arc::new(move |_: &Stream, pipeline: &mut Pipeline| {
                pipeline.add_last("filter_chain", Arc::new(ChainDispatchHandler::new(runner.clone())))
            }),
        ))
    }
}
