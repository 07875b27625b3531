//! mqrpc command-line entry point
//!
//! Three roles share one wiring: `request` sends a single request and
//! prints the correlated response, `respond` serves requests until
//! interrupted, `listen` subscribes to the data namespace and prints
//! whatever the processor delivers.

use clap::{Parser, Subcommand};
use mqrpc::client::RequestResponseClient;
use mqrpc::config::ServiceConfig;
use mqrpc::dispatch::{work_queue, InboundDispatcher, MessageProcessor, MessageSink, RequestHandler};
use mqrpc::observability::{init_default_logging, FlowMetrics};
use mqrpc::protocol::{InboundMessage, QosLevel, TopicSet};
use mqrpc::transport::{MqttTransport, Transport};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Request/response messaging over MQTT
#[derive(Parser)]
#[command(name = "mqrpc")]
#[command(about = "Correlation-based request/response over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one request and print the correlated response
    Request {
        /// JSON object to send as the request body
        payload: String,

        /// Override the configured timeout (seconds)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Serve inbound requests until interrupted
    Respond {
        /// Static JSON reply; omitted means echo the request back
        #[arg(long)]
        reply: Option<String>,
    },
    /// Print messages arriving on the data namespace
    Listen,
    /// Validate the configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Request { payload, timeout } => run_request(config, payload, timeout).await,
        Commands::Respond { reply } => run_respond(config, reply).await,
        Commands::Listen => run_listen(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {e}");
        process::exit(1);
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<ServiceConfig, BoxError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ServiceConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["mqrpc.toml", "config/mqrpc.toml"];
            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(ServiceConfig::load_from_file(&path)?);
                }
            }
            Err("No configuration file found; provide one with -c/--config or create mqrpc.toml"
                .into())
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything a running role needs, wired and connected.
struct Service {
    transport: Arc<MqttTransport>,
    client: Arc<RequestResponseClient<MqttTransport>>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    metrics: Arc<FlowMetrics>,
    config: ServiceConfig,
}

async fn connect_service(config: ServiceConfig) -> Result<Service, BoxError> {
    let topics = TopicSet::new(&config.topics.root);
    let mut transport = MqttTransport::new(
        &config.client.id,
        config.broker.clone(),
        config.broker_credentials(),
        topics.clone(),
    )?;

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    transport.set_message_sender(inbound_tx);

    info!(broker = %config.broker.url, client_id = %config.client.id, "Connecting");
    transport.connect().await?;

    let transport = Arc::new(transport);
    let metrics = Arc::new(FlowMetrics::new());
    let client = Arc::new(RequestResponseClient::new(
        &config.client.id,
        transport.clone(),
        topics,
        config.flow.publish_rate,
        metrics.clone(),
    ));

    Ok(Service {
        transport,
        client,
        inbound_rx,
        metrics,
        config,
    })
}

/// Stop the dispatcher/processor tasks, then disconnect the transport.
async fn shutdown_service(
    service_transport: Arc<MqttTransport>,
    client: Arc<RequestResponseClient<MqttTransport>>,
    metrics: Arc<FlowMetrics>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
) {
    let _ = stop_tx.send(true);
    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .is_err()
        {
            warn!("Worker task did not stop in time");
        }
    }

    info!(metrics = ?metrics.snapshot(), "Final counters");

    drop(client);
    match Arc::try_unwrap(service_transport) {
        Ok(mut transport) => {
            if let Err(e) = transport.disconnect().await {
                warn!("Graceful disconnect failed: {e}");
            }
        }
        Err(_) => warn!("Transport still shared at shutdown, skipping graceful disconnect"),
    }
}

async fn run_request(
    config: ServiceConfig,
    payload: String,
    timeout_secs: Option<u64>,
) -> Result<(), BoxError> {
    let body: Value = serde_json::from_str(&payload)?;
    let timeout =
        Duration::from_secs(timeout_secs.unwrap_or(config.flow.default_timeout_secs));

    let service = connect_service(config).await?;
    let reply_topic = service
        .client
        .topics()
        .reply_topic(service.client.client_id());
    service
        .transport
        .subscribe(&reply_topic, QosLevel::AtLeastOnce)
        .await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let (work_tx, work_rx) = work_queue(service.config.flow.queue_capacity);
    let dispatcher = InboundDispatcher::new(service.client.clone(), None, work_tx);
    let processor = MessageProcessor::new(
        Arc::new(DiscardSink),
        service.config.flow.process_rate,
        service.metrics.clone(),
    );
    let tasks = vec![
        tokio::spawn(dispatcher.run(service.inbound_rx, stop_rx.clone())),
        tokio::spawn(processor.run(work_rx, stop_rx)),
    ];

    let result = service.client.request(body, timeout).await;

    shutdown_service(
        service.transport,
        service.client,
        service.metrics,
        stop_tx,
        tasks,
    )
    .await;

    let response = result?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_respond(config: ServiceConfig, reply: Option<String>) -> Result<(), BoxError> {
    let reply = reply.map(|s| serde_json::from_str(&s)).transpose()?;

    let service = connect_service(config).await?;
    let request_topic = service.client.topics().request_topic();
    service
        .transport
        .subscribe(&request_topic, QosLevel::AtLeastOnce)
        .await?;

    let handler: Arc<dyn RequestHandler> = Arc::new(CannedHandler { reply });
    run_until_interrupted(service, Some(handler), Arc::new(DiscardSink)).await
}

async fn run_listen(config: ServiceConfig) -> Result<(), BoxError> {
    let service = connect_service(config).await?;
    let data_wildcard = format!("{}/data/#", service.client.topics().root());
    service
        .transport
        .subscribe(&data_wildcard, QosLevel::AtLeastOnce)
        .await?;

    run_until_interrupted(service, None, Arc::new(PrintSink)).await
}

async fn run_until_interrupted(
    service: Service,
    handler: Option<Arc<dyn RequestHandler>>,
    sink: Arc<dyn MessageSink>,
) -> Result<(), BoxError> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (work_tx, work_rx) = work_queue(service.config.flow.queue_capacity);

    let dispatcher = InboundDispatcher::new(service.client.clone(), handler, work_tx);
    let processor =
        MessageProcessor::new(sink, service.config.flow.process_rate, service.metrics.clone());

    let tasks = vec![
        tokio::spawn(dispatcher.run(service.inbound_rx, stop_rx.clone())),
        tokio::spawn(processor.run(work_rx, stop_rx)),
    ];

    info!("Running; press Ctrl-C to stop");
    signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    shutdown_service(
        service.transport,
        service.client,
        service.metrics,
        stop_tx,
        tasks,
    )
    .await;
    Ok(())
}

fn handle_config_command(config: ServiceConfig, show: bool) -> Result<(), BoxError> {
    config.validate()?;
    println!("Configuration is valid");
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

/// Replies with a fixed body, or echoes the request when none is set.
struct CannedHandler {
    reply: Option<Value>,
}

#[async_trait::async_trait]
impl RequestHandler for CannedHandler {
    async fn handle(&self, request: Value) -> Result<Value, BoxError> {
        Ok(match &self.reply {
            Some(reply) => reply.clone(),
            None => json!({"echo": request}),
        })
    }
}

/// Prints delivered messages to stdout; used by `listen`.
struct PrintSink;

#[async_trait::async_trait]
impl MessageSink for PrintSink {
    async fn deliver(&self, topic: &str, message: Value) {
        println!("{topic} {message}");
    }
}

/// Sink for roles that only care about correlated responses.
struct DiscardSink;

#[async_trait::async_trait]
impl MessageSink for DiscardSink {
    async fn deliver(&self, topic: &str, _message: Value) {
        info!(topic = %topic, "Ignoring uncorrelated message");
    }
}
