#![allow(dead_code)]

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use quickchat_config::{GatewayConfig, LoggingConfig};
use quickchat_server::Gateway;
use quickchat_server::event_log::MemoryLog;
use quickchat_server::fabric::MemoryFabricHub;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, WebSocketStream};

pub const TOPIC: &str = "chats";

pub struct TestApp {
    pub address: String,
    pub gateway: Gateway,
}

pub struct TestClient {
    pub ws: WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
}

/// Start a gateway on an ephemeral port, attached to `hub` and appending to `log`
pub async fn spawn_app(hub: &MemoryFabricHub, log: &MemoryLog) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let (fabric, deliveries) = hub.attach();
    let gateway = Gateway::new(
        GatewayConfig::default(),
        LoggingConfig::default(),
        TOPIC,
        Arc::new(fabric),
        Arc::new(log.clone()),
    );
    gateway.spawn_relay(deliveries);

    tokio::spawn(quickchat_server::run_websocket_server(
        gateway.clone(),
        listener,
    ));

    TestApp { address, gateway }
}

impl TestApp {
    /// Wait until `count` sessions are registered on this gateway
    pub async fn wait_for_sessions(&self, count: usize) {
        let gateway = self.gateway.clone();
        wait_until(move || gateway.stats().sessions == count).await;
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

impl TestClient {
    pub async fn connect(server_addr: &str, room: &str) -> Result<Self> {
        let url = format!("ws://{}/?room={}", server_addr, room);
        let (ws, _) = connect_async(url).await?;
        Ok(Self { ws })
    }

    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.ws.send(WsMessage::Text(text.to_string())).await?;
        Ok(())
    }

    pub async fn send_json(&mut self, value: &Value) -> Result<()> {
        self.send_text(&value.to_string()).await
    }

    /// Next text frame as JSON, or None on close or after `timeout`
    pub async fn recv_json(&mut self, timeout: Duration) -> Result<Option<Value>> {
        loop {
            let next = match tokio::time::timeout(timeout, self.ws.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(None),
            };
            match next {
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(serde_json::from_str(&text)?)),
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(anyhow::anyhow!(e)),
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
