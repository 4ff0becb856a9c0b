//! CLI for fanbus
//!
//! Subcommands:
//! - `server`: run the WebSocket broker server
//! - `publish`: publish one message onto a topic
//! - `tail`: listen on a topic and log every message seen
//!
//! `publish` and `tail` connect with `broker.transport` from the configuration.
//! The exit status is non-zero when loading the configuration or the command
//! fails.

use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use fanbus::broker::Broker;
use fanbus::config::{Settings, load_config};
use fanbus::server::start_broker_server;
use fanbus::utils::logging;
use fanbus::{Bus, BusError, ConnectionOptions, HandlerError, ListenOptions, Message, WILDCARD, handler_fn};
use serde_json::{Map, Value};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "fanbus")]
enum Command {
    /// Start the WebSocket broker server
    Server,
    /// Publish a single message
    Publish {
        #[arg(long)]
        topic: String,
        /// Message type handlers are resolved by
        #[arg(long = "type")]
        message_type: String,
        /// JSON object used as the message data
        #[arg(long, default_value = "{}")]
        data: String,
    },
    /// Log every message published on a topic
    Tail {
        #[arg(long)]
        topic: String,
        /// Overrides `dispatch.max_concurrent_handlers`
        #[arg(long)]
        max_concurrent_handlers: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.logging.level);

    let result = match cmd {
        Command::Server => run_server(&config).await,
        Command::Publish {
            topic,
            message_type,
            data,
        } => run_publish(&config, &topic, &message_type, &data).await,
        Command::Tail {
            topic,
            max_concurrent_handlers,
        } => run_tail(&config, &topic, max_concurrent_handlers).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: &Settings) -> Result<(), BusError> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let broker = Arc::new(Mutex::new(Broker::new()));

    tokio::select! {
        result = start_broker_server(addr, broker, config.server.clone()) => {
            result?;
            error!("Broker server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }
    Ok(())
}

async fn run_publish(
    config: &Settings,
    topic: &str,
    message_type: &str,
    data: &str,
) -> Result<(), BusError> {
    let data: Map<String, Value> = serde_json::from_str(data)?;
    let message = data
        .into_iter()
        .fold(Message::new(message_type), |message, (key, value)| {
            message.with_data(key, value)
        });

    let bus = Bus::for_transport(config.broker.transport);
    let context = bus
        .create_context(topic, &ConnectionOptions::from(&config.broker))
        .await?;
    context.publish(&message).await?;
    info!(topic, message_type, "published");
    bus.dispose_context(&context).await
}

async fn run_tail(
    config: &Settings,
    topic: &str,
    max_concurrent_handlers: Option<u16>,
) -> Result<(), BusError> {
    let bus = Bus::for_transport(config.broker.transport);
    let context = bus
        .create_context(topic, &ConnectionOptions::from(&config.broker))
        .await?;

    context.subscribe(
        WILDCARD,
        Arc::new(handler_fn(|message: Message| async move {
            let data = Value::Object(message.data().clone());
            info!(message_type = message.message_type(), %data, "received");
            Ok::<_, HandlerError>(Vec::new())
        })),
    );

    let mut options = ListenOptions::from(&config.dispatch);
    if max_concurrent_handlers.is_some() {
        options.max_concurrent_handlers = max_concurrent_handlers;
    }

    tokio::select! {
        // only ends on its own when the broker drops the connection
        result = context.listen(options) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            bus.dispose_context(&context).await?;
        }
    }
    Ok(())
}
