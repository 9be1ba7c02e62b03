//! Normalizes inbound client commands and fans outbound state events to
//! every registered transport (spec §4.8): a connection-registry-plus-
//! broadcast pattern generalized from a single WebSocket upgrade handler
//! to an arbitrary transport set (`DirectServer`, `UpstreamTunnel`).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use crate::bus::{BusEvent, StateBus};
use crate::commands::CommandRouter;
use crate::persistence::Journaler;

pub type ShouldSend = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

struct TransportHandle {
    sender: mpsc::UnboundedSender<Value>,
    should_send: Option<ShouldSend>,
}

#[derive(Clone)]
pub struct ClientSyncCoordinator {
    bus: StateBus,
    transports: Arc<Mutex<HashMap<String, TransportHandle>>>,
    journaler: Option<Arc<dyn Journaler>>,
}

impl ClientSyncCoordinator {
    pub fn new(bus: StateBus) -> Self {
        Self { bus, transports: Arc::new(Mutex::new(HashMap::new())), journaler: None }
    }

    /// Attaches an out-of-scope persistence sink (spec §1: "the core emits
    /// patches that a journaler may consume; correctness of the core does
    /// not depend on durability"). Every committed patch is handed to it as
    /// it's published; a dropped/slow journaler never blocks fan-out since
    /// `record` is synchronous and fire-and-forget by contract.
    pub fn with_journaler(mut self, journaler: Arc<dyn Journaler>) -> Self {
        self.journaler = Some(journaler);
        self
    }

    /// Subscribes once to the bus and fans every event out to all
    /// registered transports. Spawn this once at startup; it runs forever.
    pub async fn run_publish_loop(self) {
        let mut rx = self.bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => self.publish(event).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "client sync coordinator lagged behind the state bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    async fn publish(&self, event: BusEvent) {
        if let BusEvent::Patch { patch, .. } = &event {
            if let Some(journaler) = &self.journaler {
                if let Ok(value) = serde_json::to_value(patch) {
                    journaler.record(&value);
                }
            }
        }

        let payload = match &event {
            BusEvent::Patch { seq, patch } => {
                json!({"type": "state:patch", "data": patch, "timestamp": now_ms(), "seq": seq})
            }
            BusEvent::FullUpdate { seq, snapshot } => {
                json!({"type": "state:full-update", "data": snapshot, "timestamp": now_ms(), "seq": seq})
            }
            BusEvent::Tide { payload } => json!({"type": "tide:update", "data": payload}),
            BusEvent::Weather { payload } => json!({"type": "weather:update", "data": payload}),
            BusEvent::ClientCountUpdate { count } => json!({"type": "client-count:update", "count": count}),
        };

        let transports = self.transports.lock().await;
        for (name, handle) in transports.iter() {
            if let Some(pred) = &handle.should_send {
                if !pred(&payload) {
                    continue;
                }
            }
            if handle.sender.send(payload.clone()).is_err() {
                tracing::warn!(transport = %name, "failed to publish to transport, dropping this send");
            }
        }
    }

    pub async fn register_transport(&self, name: String, sender: mpsc::UnboundedSender<Value>, should_send: Option<ShouldSend>) {
        self.transports.lock().await.insert(name, TransportHandle { sender, should_send });
    }

    pub async fn unregister_transport(&self, name: &str) {
        self.transports.lock().await.remove(name);
    }

    /// On connect: bump `clientCount` and push the current full snapshot to
    /// just that client (spec §4.8).
    pub async fn handle_client_connection(&self, transport_name: &str) {
        let (snapshot, seq) = self.bus.register_client().await;
        let transports = self.transports.lock().await;
        if let Some(handle) = transports.get(transport_name) {
            let _ = handle
                .sender
                .send(json!({"type": "state:full-update", "data": snapshot, "timestamp": now_ms(), "seq": seq}));
        }
    }

    pub fn handle_client_disconnection(&self) {
        self.bus.unregister_client();
    }

    /// Accepts a raw inbound frame, normalizes legacy shapes, and dispatches
    /// it. Returns the ack/response frame to send back to the originating
    /// connection, if any.
    pub async fn handle_inbound(&self, raw: Value) -> Option<Value> {
        let normalized = normalize_legacy(raw);
        self.dispatch(normalized).await
    }

    async fn dispatch(&self, msg: Value) -> Option<Value> {
        let msg_type = msg.get("type").and_then(|v| v.as_str())?.to_string();
        let data = msg.get("data").cloned().unwrap_or(msg.clone());

        match msg_type.as_str() {
            "test" => Some(json!({"type": "test:ack", "success": true})),

            "state:request-full-update" | "get-full-state" | "request-full-state" => {
                let (snapshot, seq) = self.bus.current_snapshot().await;
                let request_id = msg.get("requestId").cloned();
                Some(json!({
                    "type": "state:full-update",
                    "data": snapshot,
                    "seq": seq,
                    "requestId": request_id,
                }))
            }

            // inbound passthrough: another peer's broadcast arriving via a
            // transport that relays it; fan out unchanged, ack nothing.
            "state:full-update" | "state:patch" => None,

            "anchor:update" => Some(CommandRouter::anchor_update(&self.bus, data).await),
            "anchor:reset" => Some(CommandRouter::anchor_reset(&self.bus).await),

            "bluetooth:toggle" => Some(CommandRouter::bluetooth_toggle(&self.bus, &data).await),
            "bluetooth:scan" => Some(CommandRouter::bluetooth_scan(&self.bus, &data).await),
            "bluetooth:select-device" => Some(CommandRouter::bluetooth_select_device(&self.bus, &data).await),
            "bluetooth:deselect-device" => Some(CommandRouter::bluetooth_deselect_device(&self.bus).await),
            "bluetooth:rename-device" => Some(CommandRouter::bluetooth_rename_device(&self.bus, &data).await),
            "bluetooth:update-metadata" => Some(CommandRouter::bluetooth_update_metadata(&self.bus, &data).await),

            "tide:update" => Some(CommandRouter::tide_update(&self.bus, data).await),
            "weather:update" => Some(CommandRouter::weather_update(&self.bus, data).await),

            _ => {
                tracing::debug!(msg_type, "unhandled inbound command type");
                None
            }
        }
    }
}

/// Normalizes the two legacy command shapes (spec §4.8) into a single
/// `{type, ...payload}` form. Frames already in canonical form pass
/// through unchanged.
fn normalize_legacy(raw: Value) -> Value {
    if let Some(service_name) = raw.get("serviceName").and_then(|v| v.as_str()) {
        if service_name == "state" {
            if let Some(action) = raw.get("action").and_then(|v| v.as_str()) {
                let mut out = raw.get("data").cloned().unwrap_or(json!({}));
                if let Value::Object(ref mut map) = out {
                    map.insert("type".to_string(), json!(action));
                }
                return out;
            }
        }
    }

    if raw.get("type").and_then(|v| v.as_str()) == Some("command") {
        if let (Some(service), Some(action)) =
            (raw.get("service").and_then(|v| v.as_str()), raw.get("action").and_then(|v| v.as_str()))
        {
            let combined_type = format!("{service}:{action}");
            let mut out = raw.get("data").cloned().unwrap_or(json!({}));
            if let Value::Object(ref mut map) = out {
                map.insert("type".to_string(), json!(combined_type));
            }
            return out;
        }
    }

    raw
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::UnitPreferences;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJournaler(Arc<AtomicUsize>);

    impl Journaler for CountingJournaler {
        fn record(&self, _patch: &Value) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn journaler_sees_every_published_patch() {
        let bus = crate::bus::StateBus::new(UnitPreferences::default());
        let count = Arc::new(AtomicUsize::new(0));
        let coordinator =
            ClientSyncCoordinator::new(bus.clone()).with_journaler(Arc::new(CountingJournaler(count.clone())));
        let publish_task = tokio::spawn(coordinator.clone().run_publish_loop());

        bus.commit(vec![crate::ingest::Update::VesselName("Aria".into())]).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        publish_task.abort();
    }

    #[test]
    fn normalizes_service_name_shape() {
        let raw = json!({"serviceName": "state", "action": "bluetooth:toggle", "data": {"enabled": true}});
        let normalized = normalize_legacy(raw);
        assert_eq!(normalized["type"], "bluetooth:toggle");
        assert_eq!(normalized["enabled"], true);
    }

    #[test]
    fn normalizes_service_action_shape() {
        let raw = json!({"type": "command", "service": "bluetooth", "action": "scan", "data": {"scanning": true}});
        let normalized = normalize_legacy(raw);
        assert_eq!(normalized["type"], "bluetooth:scan");
        assert_eq!(normalized["scanning"], true);
    }

    #[test]
    fn canonical_shape_passes_through() {
        let raw = json!({"type": "test"});
        assert_eq!(normalize_legacy(raw.clone()), raw);
    }
}
