//! Typed, idempotent command mutators and their shaped acks (spec §4.11).
//! `ClientSyncCoordinator` owns the dispatch table; this module is the
//! thin delegate it calls into once a command's `type` has been resolved
//! and validated.

use chrono::Utc;
use serde_json::{json, Value};

use crate::bus::{AnchorStatePatch, StateBus};
use crate::state::BluetoothDevice;

pub struct CommandRouter;

impl CommandRouter {
    /// `anchor:update` — idempotent: applying the same anchor-drop payload
    /// twice commits the same anchor subtree both times.
    pub async fn anchor_update(bus: &StateBus, data: Value) -> Value {
        match serde_json::from_value::<AnchorStatePatch>(data) {
            Ok(patch) => {
                let undeployed = patch.anchor_deployed == Some(false);
                bus.update_anchor_state(patch).await;
                if undeployed {
                    bus.resolve_alerts_by_category("anchor", Utc::now().timestamp_millis()).await;
                }
                json!({"type": "anchor:update:ack", "success": true, "timestamp": now_ms()})
            }
            Err(e) => error_ack("anchor:update:ack", &e.to_string()),
        }
    }

    /// `anchor:reset` — a second reset is a no-op against an already-empty
    /// anchor subtree (spec §4.11); history is preserved per the open
    /// question resolution recorded in DESIGN.md.
    pub async fn anchor_reset(bus: &StateBus) -> Value {
        bus.reset_anchor_state().await;
        bus.resolve_alerts_by_category("anchor", Utc::now().timestamp_millis()).await;
        json!({"type": "anchor:reset:ack", "success": true, "timestamp": now_ms()})
    }

    pub async fn bluetooth_toggle(bus: &StateBus, data: &Value) -> Value {
        let Some(enabled) = data.get("enabled").and_then(|v| v.as_bool()) else {
            return error_ack("bluetooth:response", "missing boolean field 'enabled'");
        };
        bus.toggle_bluetooth(enabled).await;
        bluetooth_ack("toggle")
    }

    pub async fn bluetooth_scan(bus: &StateBus, data: &Value) -> Value {
        let scanning = data.get("scanning").and_then(|v| v.as_bool()).unwrap_or(true);
        bus.update_bluetooth_scanning_status(scanning).await;
        bluetooth_ack("scan")
    }

    pub async fn bluetooth_select_device(bus: &StateBus, data: &Value) -> Value {
        let Some(device_id) = data.get("deviceId").and_then(|v| v.as_str()) else {
            return error_ack("bluetooth:response", "missing field 'deviceId'");
        };
        bus.set_bluetooth_device_selected(Some(device_id.to_string())).await;
        bluetooth_ack("select-device")
    }

    pub async fn bluetooth_deselect_device(bus: &StateBus) -> Value {
        bus.set_bluetooth_device_selected(None).await;
        bluetooth_ack("deselect-device")
    }

    pub async fn bluetooth_rename_device(bus: &StateBus, data: &Value) -> Value {
        let (Some(id), Some(name)) =
            (data.get("deviceId").and_then(|v| v.as_str()), data.get("name").and_then(|v| v.as_str()))
        else {
            return error_ack("bluetooth:response", "missing fields 'deviceId'/'name'");
        };
        bus.update_bluetooth_device_metadata(BluetoothDevice {
            id: id.to_string(),
            name: Some(name.to_string()),
            metadata: None,
        })
        .await;
        bluetooth_ack("rename-device")
    }

    pub async fn bluetooth_update_metadata(bus: &StateBus, data: &Value) -> Value {
        let Some(id) = data.get("deviceId").and_then(|v| v.as_str()) else {
            return error_ack("bluetooth:response", "missing field 'deviceId'");
        };
        bus.update_bluetooth_device_metadata(BluetoothDevice {
            id: id.to_string(),
            name: None,
            metadata: data.get("metadata").cloned(),
        })
        .await;
        bluetooth_ack("update-metadata")
    }

    pub async fn tide_update(bus: &StateBus, data: Value) -> Value {
        bus.update_tide(data).await;
        json!({"type": "tide:update:ack", "success": true})
    }

    pub async fn weather_update(bus: &StateBus, data: Value) -> Value {
        bus.update_weather(data).await;
        json!({"type": "weather:update:ack", "success": true})
    }
}

fn bluetooth_ack(action: &str) -> Value {
    json!({"type": "bluetooth:response", "action": action, "success": true})
}

fn error_ack(ack_type: &str, error: &str) -> Value {
    json!({"type": ack_type, "success": false, "error": error})
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
