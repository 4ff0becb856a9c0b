//! WebSocket transport
//!
//! Client side of the broker server protocol (see [`super::message`]):
//! - `connect` opens `ws://host:port` and logs in with the given credentials
//! - one writer task drains an outbox into the socket, one reader task routes
//!   `ok`/`error` replies to the waiting request and `deliver` frames to the
//!   consumer registered for that queue
//! - when the socket goes away every waiting request fails with
//!   `ConnectionClosed` and every delivery stream ends

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use super::message::{ClientFrame, RequestId, ServerFrame};
use super::{
    Channel, Connection, ConnectionOptions, Delivery, DeliveryStream, DeliveryTag, QueueId,
    Transport,
};
use crate::broker::ChannelId;
use crate::utils::error::TransportError;

type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// How long `close` waits for the server to finish the closing handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn Connection>, TransportError> {
        let url = format!("ws://{}:{}", options.host, options.port);
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionRefused(format!("{url}: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let login = ClientFrame::Login {
            username: options.username.clone(),
            password: options.password.clone(),
        };
        sink.send(WsMessage::text(encode(&login)?)).await?;

        match next_frame(&mut source).await? {
            ServerFrame::LoginOk {} => {}
            ServerFrame::Error { message, .. } => {
                debug!(%url, "login rejected: {message}");
                return Err(TransportError::AuthenticationFailed(options.username.clone()));
            }
            other => {
                return Err(TransportError::Protocol(format!(
                    "unexpected frame during login: {other:?}"
                )));
            }
        }

        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<WsMessage>();
        tokio::spawn(async move {
            while let Some(msg) = outbox_rx.recv().await {
                let closing = msg.is_close();
                if let Err(e) = sink.send(msg).await {
                    debug!("websocket send failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let shared = Arc::new(Shared {
            outbox,
            pending: Mutex::new(HashMap::new()),
            consumers: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
        });
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), source));
        *guard(&shared.reader) = Some(reader);

        debug!(%url, user = %options.username, "websocket connection established");
        Ok(Arc::new(WsConnection { shared }))
    }
}

fn encode(frame: &ClientFrame) -> Result<String, TransportError> {
    serde_json::to_string(frame).map_err(|e| TransportError::Protocol(e.to_string()))
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads until the next text frame and decodes it.
async fn next_frame(source: &mut WsSource) -> Result<ServerFrame, TransportError> {
    while let Some(msg) = source.next().await {
        let msg = msg?;
        if msg.is_close() {
            break;
        }
        if msg.is_text() {
            let text = msg.to_text()?;
            return serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()));
        }
    }
    Err(TransportError::ConnectionClosed)
}

async fn read_loop(shared: Arc<Shared>, mut source: WsSource) {
    loop {
        match next_frame(&mut source).await {
            Ok(frame) => shared.dispatch(frame),
            Err(TransportError::Protocol(e)) => warn!("ignoring malformed frame: {e}"),
            Err(TransportError::ConnectionClosed) => break,
            Err(e) => {
                debug!("websocket read failed: {e}");
                break;
            }
        }
    }
    shared.shutdown();
}

struct Reply {
    channel: Option<ChannelId>,
    queue: Option<QueueId>,
}

struct Shared {
    outbox: mpsc::UnboundedSender<WsMessage>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Result<Reply, TransportError>>>>,
    consumers: Mutex<HashMap<QueueId, mpsc::UnboundedSender<Delivery>>>,
    next_request: AtomicU64,
    closed: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    async fn request(
        &self,
        build: impl FnOnce(RequestId) -> ClientFrame,
    ) -> Result<Reply, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let id = self.next_request.fetch_add(1, Ordering::SeqCst) + 1;
        let text = encode(&build(id))?;
        let (tx, rx) = oneshot::channel();
        guard(&self.pending).insert(id, tx);

        // shutdown may have drained `pending` before the insert above
        if self.closed.load(Ordering::SeqCst) || self.outbox.send(WsMessage::text(text)).is_err() {
            guard(&self.pending).remove(&id);
            return Err(TransportError::ConnectionClosed);
        }

        rx.await.map_err(|_| TransportError::ConnectionClosed)?
    }

    fn resolve(&self, request: RequestId, result: Result<Reply, TransportError>) {
        match guard(&self.pending).remove(&request) {
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => warn!(request, "reply for unknown request"),
        }
    }

    fn dispatch(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Ok {
                request,
                channel,
                queue,
            } => self.resolve(request, Ok(Reply { channel, queue })),
            ServerFrame::Error {
                request: Some(request),
                message,
            } => self.resolve(request, Err(TransportError::Rejected(message))),
            ServerFrame::Error {
                request: None,
                message,
            } => warn!("broker reported: {message}"),
            ServerFrame::Deliver {
                queue,
                tag,
                payload,
                published_at,
            } => {
                let consumers = guard(&self.consumers);
                match consumers.get(&queue) {
                    Some(sender) => {
                        let _ = sender.send(Delivery {
                            tag,
                            payload: payload.into_bytes(),
                            published_at,
                        });
                    }
                    None => warn!(%queue, tag, "delivery for unknown consumer"),
                }
            }
            ServerFrame::LoginOk {} => warn!("unexpected login_ok after login"),
        }
    }

    /// Fails every waiting request and ends every delivery stream.
    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for (_, waiter) in guard(&self.pending).drain() {
            let _ = waiter.send(Err(TransportError::ConnectionClosed));
        }
        guard(&self.consumers).clear();
    }
}

struct WsConnection {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, TransportError> {
        let reply = self
            .shared
            .request(|request| ClientFrame::OpenChannel { request })
            .await?;
        let id = reply
            .channel
            .ok_or_else(|| TransportError::Protocol("open_channel reply without channel id".into()))?;
        Ok(Arc::new(WsChannel {
            shared: Arc::clone(&self.shared),
            id,
            consuming: Mutex::new(Vec::new()),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.shutdown();
        let _ = self.shared.outbox.send(WsMessage::Close(None));

        let reader = guard(&self.shared.reader).take();
        if let Some(mut reader) = reader {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut reader).await.is_err() {
                debug!("server did not finish the closing handshake in time");
                reader.abort();
            }
        }
        Ok(())
    }
}

struct WsChannel {
    shared: Arc<Shared>,
    id: ChannelId,
    /// Queues this channel consumes, so `close` can end their streams.
    consuming: Mutex<Vec<QueueId>>,
}

#[async_trait]
impl Channel for WsChannel {
    async fn declare_fanout_topic(&self, name: &str) -> Result<(), TransportError> {
        self.shared
            .request(|request| ClientFrame::DeclareTopic {
                request,
                channel: self.id,
                topic: name.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn declare_exclusive_queue(&self) -> Result<QueueId, TransportError> {
        let reply = self
            .shared
            .request(|request| ClientFrame::DeclareQueue {
                request,
                channel: self.id,
            })
            .await?;
        reply
            .queue
            .ok_or_else(|| TransportError::Protocol("declare_queue reply without queue".into()))
    }

    async fn bind_queue(&self, queue: &str, topic: &str) -> Result<(), TransportError> {
        self.shared
            .request(|request| ClientFrame::BindQueue {
                request,
                channel: self.id,
                queue: queue.to_string(),
                topic: topic.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn set_unacknowledged_limit(&self, limit: u16) -> Result<(), TransportError> {
        self.shared
            .request(|request| ClientFrame::Prefetch {
                request,
                channel: self.id,
                limit,
            })
            .await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let payload = String::from_utf8(payload)
            .map_err(|e| TransportError::Protocol(format!("payload is not UTF-8: {e}")))?;
        self.shared
            .request(|request| ClientFrame::Publish {
                request,
                channel: self.id,
                topic: topic.to_string(),
                payload,
            })
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError> {
        // registered first so deliveries racing the reply are not lost
        let (sender, receiver) = mpsc::unbounded_channel();
        guard(&self.shared.consumers).insert(queue.to_string(), sender);

        let result = self
            .shared
            .request(|request| ClientFrame::Consume {
                request,
                channel: self.id,
                queue: queue.to_string(),
            })
            .await;

        if let Err(e) = result {
            guard(&self.shared.consumers).remove(queue);
            return Err(e);
        }
        guard(&self.consuming).push(queue.to_string());
        Ok(receiver)
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), TransportError> {
        self.shared
            .request(|request| ClientFrame::Ack {
                request,
                channel: self.id,
                tag,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared
            .request(|request| ClientFrame::CloseChannel {
                request,
                channel: self.id,
            })
            .await?;

        let queues = std::mem::take(&mut *guard(&self.consuming));
        let mut consumers = guard(&self.shared.consumers);
        for queue in &queues {
            consumers.remove(queue);
        }
        Ok(())
    }
}
