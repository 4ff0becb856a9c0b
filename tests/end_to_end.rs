use std::sync::{Arc, Mutex};
use std::time::Duration;

use fanbus::broker::Broker;
use fanbus::config::ServerSettings;
use fanbus::server::serve;
use fanbus::transport::message::{ClientFrame, ServerFrame};
use fanbus::{
    Bus, BusError, ConnectionOptions, HandlerError, ListenOptions, Message, TransportError,
    handler_fn,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::accept_async;
use tungstenite::protocol::Message as WsMessage;

async fn start_server() -> (Arc<Mutex<Broker>>, u16) {
    let broker = Arc::new(Mutex::new(Broker::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let settings = ServerSettings {
        host: "127.0.0.1".to_string(),
        port,
        username: "guest".to_string(),
        password: "guest".to_string(),
    };
    tokio::spawn(serve(listener, Arc::clone(&broker), settings));
    (broker, port)
}

#[tokio::test]
async fn pubsub_end_to_end_over_websocket() {
    let (broker, port) = start_server().await;
    let options = ConnectionOptions::new("127.0.0.1", port);
    let bus = Bus::websocket();

    let worker = bus.create_context("orders", &options).await.unwrap();
    let auditor = bus.create_context("orders", &options).await.unwrap();
    let trace: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    worker.subscribe(
        "order_placed",
        Arc::new(handler_fn(|message: Message| async move {
            let id = message.get("id").cloned().unwrap_or_default();
            Ok::<_, HandlerError>(vec![Message::new("order_confirmed").with_data("id", id)])
        })),
    );

    let seen = Arc::clone(&trace);
    auditor.subscribe(
        "order_confirmed",
        Arc::new(handler_fn(move |message: Message| {
            let seen = Arc::clone(&seen);
            async move {
                let id = message.get("id").cloned().unwrap_or_default();
                seen.lock().unwrap().push(format!("confirmed {id}"));
                Ok::<_, HandlerError>(Vec::new())
            }
        })),
    );

    worker
        .spawn_listener(ListenOptions::new().max_concurrent_handlers(1))
        .await
        .unwrap();
    auditor.spawn_listener(ListenOptions::new()).await.unwrap();

    auditor
        .publish(&Message::new("order_placed").with_data("id", 7))
        .await
        .unwrap();

    for _ in 0..200 {
        if !trace.lock().unwrap().is_empty() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*trace.lock().unwrap(), ["confirmed 7"]);

    bus.dispose_context(&worker).await.unwrap();
    bus.dispose_context(&auditor).await.unwrap();

    for _ in 0..200 {
        if broker.lock().unwrap().queue_count() == 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(broker.lock().unwrap().queue_count(), 0);
}

/// Answers every request of one client with a plain `ok` and hangs up right
/// after the client starts consuming.
async fn start_flaky_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Ok(text) = msg.to_text() else { continue };
            let Ok(frame) = serde_json::from_str::<ClientFrame>(text) else {
                continue;
            };
            let reply = match &frame {
                ClientFrame::Login { .. } => ServerFrame::LoginOk {},
                ClientFrame::OpenChannel { request } => ServerFrame::Ok {
                    request: *request,
                    channel: Some(1),
                    queue: None,
                },
                ClientFrame::DeclareQueue { request, .. } => ServerFrame::Ok {
                    request: *request,
                    channel: None,
                    queue: Some("flaky".to_string()),
                },
                other => ServerFrame::ok(other.request().unwrap()),
            };
            let text = serde_json::to_string(&reply).unwrap();
            ws.send(WsMessage::text(text)).await.unwrap();
            if matches!(frame, ClientFrame::Consume { .. }) {
                break;
            }
        }
        // dropping the socket without a closing handshake
    });
    port
}

#[tokio::test]
async fn listen_fails_when_the_server_goes_away() {
    let port = start_flaky_server().await;
    let bus = Bus::websocket();
    let context = bus
        .create_context("orders", &ConnectionOptions::new("127.0.0.1", port))
        .await
        .unwrap();

    let result = timeout(Duration::from_secs(5), context.listen(ListenOptions::new()))
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(BusError::Transport(TransportError::ConnectionClosed))
    ));
}
