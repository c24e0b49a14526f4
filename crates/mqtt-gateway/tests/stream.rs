//! End-to-end tests for the `/ws` stream.
//!
//! A real listener on `127.0.0.1:0`, the broadcast dispatcher, and the
//! inbound bridge are wired exactly as `main` wires them.  Broker messages
//! are injected through [`InboundBridge::on_message`] from a separate thread,
//! standing in for the MQTT thread.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gateway_core::ConnectionRegistry;
use mqtt_gateway::application::{run_broadcast_dispatcher, BroadcastQueue, InboundBridge};
use mqtt_gateway::infrastructure::serve;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::{gateway_with, FakePublisher};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Running {
    addr: SocketAddr,
    bridge: Arc<InboundBridge>,
    registry: Arc<ConnectionRegistry>,
    _stop: oneshot::Sender<()>,
}

async fn start_gateway() -> Running {
    let gw = gateway_with(FakePublisher::subscribed());
    let (queue, queue_rx) = BroadcastQueue::new();
    tokio::spawn(run_broadcast_dispatcher(queue_rx, Arc::clone(&gw.registry)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(serve(listener, gw.facade, async move {
        let _ = stop_rx.await;
    }));

    Running {
        addr,
        bridge: Arc::new(InboundBridge::new(gw.state, queue)),
        registry: gw.registry,
        _stop: stop_tx,
    }
}

async fn open_stream(gw: &Running) -> Client {
    let expected = gw.registry.len() + 1;
    let (client, _) = connect_async(format!("ws://{}/ws", gw.addr)).await.unwrap();
    wait_for_streams(&gw.registry, expected).await;
    client
}

async fn wait_for_streams(registry: &ConnectionRegistry, count: usize) {
    timeout(Duration::from_secs(5), async {
        while registry.len() != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {count} live stream(s), have {}", registry.len()));
}

/// Delivers a broker message from another OS thread, like the MQTT thread.
async fn deliver_from_broker_thread(gw: &Running, topic: &'static str, raw: &'static [u8]) {
    let bridge = Arc::clone(&gw.bridge);
    tokio::task::spawn_blocking(move || {
        std::thread::spawn(move || {
            bridge.on_message(topic, raw);
        })
        .join()
        .unwrap();
    })
    .await
    .unwrap();
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no frame within 5 s")
            .expect("stream ended")
            .unwrap();
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_stream_receives_broker_message() {
    // Arrange
    let gw = start_gateway().await;
    let mut client = open_stream(&gw).await;

    // Act
    deliver_from_broker_thread(&gw, "sensor/dht11/dados", br#"{"temp":22,"hum":55}"#).await;

    // Assert
    let pushed = next_json(&mut client).await;
    assert_eq!(
        pushed,
        json!({
            "topic": "sensor/dht11/dados",
            "payload": {"temp": 22, "hum": 55},
            "status": "updated"
        })
    );
}

#[tokio::test]
async fn test_every_stream_receives_each_message_in_order() {
    let gw = start_gateway().await;
    let mut first = open_stream(&gw).await;
    let mut second = open_stream(&gw).await;

    deliver_from_broker_thread(&gw, "t", b"1").await;
    deliver_from_broker_thread(&gw, "t", b"2").await;

    for client in [&mut first, &mut second] {
        assert_eq!(next_json(client).await["payload"], json!(1));
        assert_eq!(next_json(client).await["payload"], json!(2));
    }
}

#[tokio::test]
async fn test_client_close_unregisters_stream() {
    // Arrange
    let gw = start_gateway().await;
    let mut client = open_stream(&gw).await;

    // Act
    client.send(WsMessage::Close(None)).await.unwrap();

    // Assert
    wait_for_streams(&gw.registry, 0).await;
}

#[tokio::test]
async fn test_dropped_client_does_not_affect_others() {
    let gw = start_gateway().await;
    let dropped = open_stream(&gw).await;
    let mut kept = open_stream(&gw).await;

    drop(dropped);
    wait_for_streams(&gw.registry, 1).await;
    deliver_from_broker_thread(&gw, "t", br#"{"n":1}"#).await;

    assert_eq!(next_json(&mut kept).await["payload"], json!({"n": 1}));
}

#[tokio::test]
async fn test_client_text_frames_are_ignored() {
    let gw = start_gateway().await;
    let mut client = open_stream(&gw).await;

    client.send(WsMessage::Text("hello".into())).await.unwrap();
    deliver_from_broker_thread(&gw, "t", b"\"still here\"").await;

    assert_eq!(next_json(&mut client).await["payload"], json!("still here"));
    assert_eq!(gw.registry.len(), 1);
}
