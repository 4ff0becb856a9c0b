use std::sync::{Arc, Mutex};
use std::time::Duration;

use fanbus::transport::{AmqpTransport, Transport};
use fanbus::{
    Bus, ConnectionOptions, HandlerError, ListenOptions, Message, TransportError, handler_fn,
};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn connect_to_a_closed_port_is_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let result = timeout(
        Duration::from_secs(30),
        AmqpTransport::new().connect(&ConnectionOptions::new("127.0.0.1", port)),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(TransportError::ConnectionRefused(_))));
}

/// Needs RabbitMQ on localhost:5672 with the stock guest account.
#[tokio::test]
#[ignore]
async fn round_trip_through_rabbitmq() {
    let bus = Bus::amqp();
    let options = ConnectionOptions::default();
    let worker = bus.create_context("fanbus.tests", &options).await.unwrap();
    let auditor = bus.create_context("fanbus.tests", &options).await.unwrap();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    worker.subscribe(
        "order_placed",
        Arc::new(handler_fn(|message: Message| async move {
            let id = message.get("id").cloned().unwrap_or_default();
            Ok::<_, HandlerError>(vec![Message::new("order_confirmed").with_data("id", id)])
        })),
    );
    let trace = Arc::clone(&seen);
    auditor.subscribe(
        "order_confirmed",
        Arc::new(handler_fn(move |message: Message| {
            let trace = Arc::clone(&trace);
            async move {
                let id = message.get("id").cloned().unwrap_or_default();
                trace.lock().unwrap().push(format!("confirmed {id}"));
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

    for _ in 0..500 {
        if !seen.lock().unwrap().is_empty() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*seen.lock().unwrap(), ["confirmed 7"]);

    bus.dispose_context(&worker).await.unwrap();
    bus.dispose_context(&auditor).await.unwrap();
}
