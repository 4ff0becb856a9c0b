use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use std::sync::{Arc, Mutex};

use crate::broker::Broker;
use crate::config::ServerSettings;
use crate::server::session::Session;
use crate::transport::memory::lock;
use crate::transport::message::{ClientFrame, ServerFrame};
use crate::utils::error::{BrokerError, TransportError};

/// Binds `addr` and serves the broker until the listener fails.
pub async fn start_broker_server(
    addr: String,
    broker: Arc<Mutex<Broker>>,
    settings: ServerSettings,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Broker server listening on ws://{}", addr);
    serve(listener, broker, settings).await;
    Ok(())
}

/// Accepts connections on an already bound listener.
pub async fn serve(listener: TcpListener, broker: Arc<Mutex<Broker>>, settings: ServerSettings) {
    while let Ok((stream, peer)) = listener.accept().await {
        let broker = broker.clone();
        let settings = settings.clone();

        spawn(async move {
            if let Err(e) = handle_connection(stream, broker, &settings).await {
                warn!(%peer, "connection ended with error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    broker: Arc<Mutex<Broker>>,
    settings: &ServerSettings,
) -> Result<(), TransportError> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let mut session = Session::new(tx);

    // Forward queued frames to the socket
    let session_id = session.id.clone();
    spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!("Failed to send frame to {}: {}", session_id, e);
                break;
            }
        }
        debug!("Send loop closed for {}", session_id);
    });

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(session = %session.id, "read failed: {e}");
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }

        let text = msg.to_text()?;
        match serde_json::from_str::<ClientFrame>(text) {
            Ok(ClientFrame::Login { username, password }) => {
                if session.authenticated {
                    session.send(&ServerFrame::error(None, "already authenticated"));
                    continue;
                }
                if username != settings.username || password != settings.password {
                    warn!(session = %session.id, %username, "login rejected");
                    session.send(&ServerFrame::error(None, "invalid credentials"));
                    break;
                }

                let connection = lock(&broker)?.open_connection();
                info!(session = %session.id, %username, %connection, "client logged in");
                session.connection = Some(connection);
                session.authenticated = true;
                session.send(&ServerFrame::LoginOk {});
            }

            Ok(frame) if !session.authenticated => {
                warn!(session = %session.id, "request before login");
                session.send(&ServerFrame::error(frame.request(), "must authenticate first"));
                break;
            }

            Ok(frame) => {
                let request = frame.request();
                let reply = execute(&broker, &session, frame)
                    .unwrap_or_else(|e| ServerFrame::error(request, e.to_string()));
                session.send(&reply);
            }

            Err(err) => {
                let excerpt: String = text.chars().take(100).collect();
                warn!(session = %session.id, "invalid client frame: {err} | {excerpt}");
                session.send(&ServerFrame::error(None, format!("invalid frame: {err}")));
            }
        }
    }

    if let Some(connection) = session.connection.take() {
        lock(&broker)?.close_connection(&connection)?;
    }
    info!(session = %session.id, "client disconnected");
    Ok(())
}

/// Runs one request against the broker on behalf of a logged-in session.
fn execute(
    broker: &Mutex<Broker>,
    session: &Session,
    frame: ClientFrame,
) -> Result<ServerFrame, TransportError> {
    let connection = session
        .connection
        .as_deref()
        .ok_or(TransportError::ConnectionClosed)?;
    let mut broker = lock(broker)?;

    // channel ids are broker-wide; a session may only use its own
    if let Some(channel) = frame.channel() {
        if broker.channel_owner(channel) != Some(connection) {
            return Err(BrokerError::UnknownChannel(channel).into());
        }
    }

    let reply = match frame {
        ClientFrame::Login { .. } => ServerFrame::error(None, "already authenticated"),

        ClientFrame::OpenChannel { request } => {
            let channel = broker.open_channel(connection)?;
            ServerFrame::Ok {
                request,
                channel: Some(channel),
                queue: None,
            }
        }

        ClientFrame::CloseChannel { request, channel } => {
            broker.close_channel(channel)?;
            ServerFrame::ok(request)
        }

        ClientFrame::DeclareTopic {
            request,
            channel,
            topic,
        } => {
            broker.declare_topic(channel, &topic)?;
            ServerFrame::ok(request)
        }

        ClientFrame::DeclareQueue { request, channel } => {
            let queue = broker.declare_exclusive_queue(channel)?;
            ServerFrame::Ok {
                request,
                channel: None,
                queue: Some(queue),
            }
        }

        ClientFrame::BindQueue {
            request,
            channel,
            queue,
            topic,
        } => {
            broker.bind_queue(channel, &queue, &topic)?;
            ServerFrame::ok(request)
        }

        ClientFrame::Prefetch {
            request,
            channel,
            limit,
        } => {
            broker.set_prefetch(channel, limit)?;
            ServerFrame::ok(request)
        }

        ClientFrame::Publish {
            request,
            channel,
            topic,
            payload,
        } => {
            let routed = broker.publish(channel, &topic, payload.into_bytes())?;
            debug!(session = %session.id, %topic, routed, "published");
            ServerFrame::ok(request)
        }

        ClientFrame::Consume {
            request,
            channel,
            queue,
        } => {
            let mut deliveries = broker.consume(channel, &queue)?;
            let sender = session.sender.clone();
            spawn(async move {
                while let Some(delivery) = deliveries.recv().await {
                    let frame = ServerFrame::Deliver {
                        queue: queue.clone(),
                        tag: delivery.tag,
                        payload: String::from_utf8_lossy(&delivery.payload).into_owned(),
                        published_at: delivery.published_at,
                    };
                    let Ok(text) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if sender.send(WsMessage::text(text)).is_err() {
                        break;
                    }
                }
            });
            ServerFrame::ok(request)
        }

        ClientFrame::Ack {
            request,
            channel,
            tag,
        } => {
            broker.ack(channel, tag)?;
            ServerFrame::ok(request)
        }
    };
    Ok(reply)
}
