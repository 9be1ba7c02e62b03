//! Authenticated WebSocket to the cloud relay (spec §4.10). Maintains
//! signed identity, bounded reconnect, periodic ping, a remote-client
//! counter, and admission control that suppresses high-volume state
//! traffic when no remote client is attached.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::sync::ClientSyncCoordinator;

/// Message `type`s always allowed through admission control, even with no
/// remote clients attached (spec §4.10 Outbound).
const ALWAYS_ALLOWED: &[&str] = &["identity", "register", "subscribe", "heartbeat", "ping"];

pub enum AuthMode {
    Jwt { secret: String },
    Keypair { private_key_pem: String, public_key_pem: String },
}

pub struct UpstreamTunnel {
    cfg: Config,
    coordinator: ClientSyncCoordinator,
    boat_id: String,
    auth: AuthMode,
    remote_client_count: Arc<AtomicI64>,
}

impl UpstreamTunnel {
    pub fn new(cfg: Config, coordinator: ClientSyncCoordinator, boat_id: String, auth: AuthMode) -> Self {
        Self { cfg, coordinator, boat_id, auth, remote_client_count: Arc::new(AtomicI64::new(0)) }
    }

    pub async fn run(self) {
        let mut attempts = 0u32;
        loop {
            match self.connect_and_serve().await {
                Ok(()) => {
                    tracing::warn!("upstream tunnel closed, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "upstream tunnel error");
                }
            }

            attempts += 1;
            if attempts > self.cfg.vps_max_retries {
                tracing::error!("upstream tunnel exhausted max-retries, stopping");
                return;
            }
            tokio::time::sleep(self.cfg.vps_reconnect_interval).await;
        }
    }

    fn jwt_token(&self) -> Option<String> {
        match &self.auth {
            AuthMode::Jwt { secret } => crate::auth::issue_jwt(secret, &self.boat_id, self.cfg.token_expiry).ok(),
            AuthMode::Keypair { .. } => None,
        }
    }

    async fn connect_and_serve(&self) -> Result<()> {
        let url = self.cfg.upstream_url(self.jwt_token().as_deref())?;
        tracing::info!(%url, "connecting to upstream relay");

        let ws_stream = tokio::time::timeout(self.cfg.vps_connection_timeout, tokio_tungstenite::connect_async(&url))
            .await
            .map_err(|_| RelayError::TransportDown("connect timed out".into()))?
            .map_err(|e| RelayError::TransportDown(e.to_string()))?
            .0;

        let (mut write, mut read) = ws_stream.split();

        self.send_handshake(&mut write).await?;

        let transport_name = "upstream".to_string();
        let (tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
        let remote_count = self.remote_client_count.clone();
        let should_send: crate::sync::ShouldSend = Arc::new(move |payload: &Value| {
            let msg_type = payload.get("type").and_then(|v| v.as_str()).unwrap_or("");
            if ALWAYS_ALLOWED.contains(&msg_type) {
                return true;
            }
            remote_count.load(Ordering::SeqCst) > 0
        });
        self.coordinator.register_transport(transport_name.clone(), tx.clone(), Some(should_send)).await;

        let register_key_tx = tx.clone();
        if let AuthMode::Keypair { public_key_pem, .. } = &self.auth {
            let public_key_pem = public_key_pem.clone();
            let boat_id = self.boat_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let _ = register_key_tx.send(json!({
                    "type": "register-key",
                    "boatId": boat_id,
                    "publicKey": public_key_pem,
                    "timestamp": chrono::Utc::now().timestamp_millis(),
                }));
            });
        }

        let ping_interval = self.cfg.vps_ping_interval;
        let result = tokio::select! {
            r = self.writer_loop(&mut write, &mut outbound_rx, ping_interval) => r,
            r = self.reader_loop(&mut read, &tx) => r,
        };

        self.coordinator.unregister_transport(&transport_name).await;
        result
    }

    async fn send_handshake(
        &self,
        write: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    ) -> Result<()> {
        let register = json!({"type": "register", "boatIds": [self.boat_id], "role": "boat-server"});
        write
            .send(Message::Text(register.to_string()))
            .await
            .map_err(|e| RelayError::TransportDown(e.to_string()))?;

        let timestamp = chrono::Utc::now().timestamp_millis();
        let signature = match &self.auth {
            AuthMode::Keypair { private_key_pem, .. } => {
                Some(crate::auth::sign_identity(private_key_pem, &self.boat_id, timestamp)?)
            }
            AuthMode::Jwt { .. } => None,
        };
        let identity = json!({
            "type": "identity",
            "boatId": self.boat_id,
            "role": "boat-server",
            "timestamp": timestamp,
            "time": chrono::Utc::now().to_rfc3339(),
            "signature": signature,
        });
        write
            .send(Message::Text(identity.to_string()))
            .await
            .map_err(|e| RelayError::TransportDown(e.to_string()))?;
        Ok(())
    }

    async fn writer_loop(
        &self,
        write: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
        outbound_rx: &mut mpsc::UnboundedReceiver<Value>,
        ping_interval: Duration,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(ping_interval);
        loop {
            tokio::select! {
                biased;

                payload = outbound_rx.recv() => {
                    let Some(payload) = payload else { return Ok(()) };
                    write.send(Message::Text(payload.to_string())).await
                        .map_err(|e| RelayError::TransportDown(e.to_string()))?;
                }

                _ = ticker.tick() => {
                    let ping = json!({"type": "ping", "timestamp": chrono::Utc::now().timestamp_millis()});
                    write.send(Message::Text(ping.to_string())).await
                        .map_err(|e| RelayError::TransportDown(e.to_string()))?;
                }
            }
        }
    }

    async fn reader_loop(
        &self,
        read: &mut (impl futures_util::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
        reply_tx: &mpsc::UnboundedSender<Value>,
    ) -> Result<()> {
        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| RelayError::TransportDown(e.to_string()))?;
            let Message::Text(text) = msg else { continue };
            let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
                tracing::warn!("dropping malformed upstream frame");
                continue;
            };

            match parsed.get("type").and_then(|v| v.as_str()) {
                Some("pong") => {}
                Some("connectionStatus") => {
                    if let Some(count) = parsed.get("clientCount").and_then(|v| v.as_i64()) {
                        self.remote_client_count.store(count, Ordering::SeqCst);
                    }
                }
                Some("register-key-response") => {
                    let success = parsed.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
                    tracing::info!(success, "register-key response received");
                }
                _ => {
                    if let Some(ack) = self.coordinator.handle_inbound(parsed).await {
                        let _ = reply_tx.send(ack);
                    }
                }
            }
        }
        Ok(())
    }
}
