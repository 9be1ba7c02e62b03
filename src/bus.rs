//! The single publication point for committed state (spec §4.7).
//!
//! All mutation — batch commits, command-driven mutators, derivation
//! output — funnels through [`StateBus::commit`] and the typed mutators
//! below, which all take the same commit lock so patches are totally
//! ordered: a single-writer `Arc<Mutex<...>>` pattern, generalized to
//! emit RFC-6902 patches instead of re-broadcasting the whole struct
//! every tick.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use crate::derive::DerivationEngine;
use crate::ingest::Update;
use crate::state::document::StateDocument;
use crate::state::path::CanonicalPath;
use crate::state::{AnchorState, BluetoothDevice};
use crate::units::UnitPreferences;

/// An event a subscriber (in practice, `ClientSyncCoordinator`) cares
/// about. Spec §4.7 models these as four separate `on*` subscriptions;
/// they share one ordered channel here so a subscriber sees them in the
/// same order they were produced, which per spec §5 is required anyway.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Patch { seq: u64, patch: crate::state::document::Patch },
    FullUpdate { seq: u64, snapshot: Value },
    Tide { payload: Value },
    Weather { payload: Value },
    ClientCountUpdate { count: u64 },
}

struct Inner {
    doc: StateDocument,
}

#[derive(Clone)]
pub struct StateBus {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<BusEvent>,
    commit_seq: Arc<AtomicU64>,
    client_count: Arc<AtomicI64>,
}

impl StateBus {
    pub fn new(prefs: UnitPreferences) -> Self {
        let doc = StateDocument::new(prefs);
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(Inner { doc })),
            events,
            commit_seq: Arc::new(AtomicU64::new(0)),
            client_count: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    pub fn commit_seq(&self) -> u64 {
        self.commit_seq.load(Ordering::SeqCst)
    }

    pub async fn current_snapshot(&self) -> (Value, u64) {
        let inner = self.inner.lock().await;
        (inner.doc.snapshot(), self.commit_seq())
    }

    /// Applies a drained batch of producer updates, runs derivation, and
    /// emits the resulting patch. Spec §4.5/§4.6: derivation ops appear
    /// after raw-ingest ops in the same patch.
    pub async fn commit(&self, batch: Vec<Update>) {
        let mut inner = self.inner.lock().await;
        let before_derive = inner.doc.snapshot();

        for update in batch {
            apply_update(&mut inner.doc, update);
        }

        let prev_tree = inner.doc.tree().clone();
        DerivationEngine::derive(&mut inner.doc, &prev_tree);

        let after = inner.doc.snapshot();
        let patch = StateDocument::diff(&before_derive, &after);
        if patch.is_empty() {
            return;
        }

        let seq = self.commit_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(BusEvent::Patch { seq, patch });
    }

    pub async fn emit_full_update_heartbeat(&self) {
        let inner = self.inner.lock().await;
        let seq = self.commit_seq();
        let _ = self.events.send(BusEvent::FullUpdate { seq, snapshot: inner.doc.snapshot() });
    }

    pub async fn register_client(&self) -> (Value, u64) {
        self.client_count.fetch_add(1, Ordering::SeqCst);
        self.publish_client_count();
        self.current_snapshot().await
    }

    pub fn unregister_client(&self) {
        let prev = self.client_count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some((c - 1).max(0)));
        if prev.is_ok() {
            self.publish_client_count();
        }
    }

    fn publish_client_count(&self) {
        let count = self.client_count.load(Ordering::SeqCst).max(0) as u64;
        let _ = self.events.send(BusEvent::ClientCountUpdate { count });
    }

    async fn commit_direct(&self, f: impl FnOnce(&mut StateDocument)) {
        let mut inner = self.inner.lock().await;
        let before = inner.doc.snapshot();
        f(&mut inner.doc);
        let prev_tree = inner.doc.tree().clone();
        DerivationEngine::derive(&mut inner.doc, &prev_tree);
        let after = inner.doc.snapshot();
        let patch = StateDocument::diff(&before, &after);
        if patch.is_empty() {
            return;
        }
        let seq = self.commit_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(BusEvent::Patch { seq, patch });
    }

    /// spec §4.7 `updateAnchorState`. Idempotent: re-applying the same
    /// anchor-drop payload yields the same committed subtree.
    pub async fn update_anchor_state(&self, patch: AnchorStatePatch) {
        self.commit_direct(|doc| patch.apply(&mut doc.tree_mut().anchor)).await;
    }

    /// spec §4.7 `resetAnchorState` / open question: preserve `history` as
    /// a log rather than wipe it, matching "clears all *anchor state*"
    /// read narrowly as the deployment/geometry fields, not the breadcrumb
    /// trail the user may still want after weighing anchor.
    pub async fn reset_anchor_state(&self) {
        self.commit_direct(|doc| {
            let history = std::mem::take(&mut doc.tree_mut().anchor.history);
            doc.tree_mut().anchor = AnchorState::default();
            doc.tree_mut().anchor.history = history;
        })
        .await;
    }

    pub async fn update_tide(&self, payload: Value) {
        self.commit_direct(|doc| doc.tree_mut().tide = Some(payload.clone())).await;
        let _ = self.events.send(BusEvent::Tide { payload });
    }

    pub async fn update_weather(&self, payload: Value) {
        self.commit_direct(|doc| doc.tree_mut().weather = Some(payload.clone())).await;
        let _ = self.events.send(BusEvent::Weather { payload });
    }

    pub async fn toggle_bluetooth(&self, enabled: bool) {
        self.commit_direct(|doc| doc.tree_mut().bluetooth.enabled = enabled).await;
    }

    pub async fn update_bluetooth_scanning_status(&self, scanning: bool) {
        self.commit_direct(|doc| doc.tree_mut().bluetooth.scanning = scanning).await;
    }

    pub async fn set_bluetooth_device_selected(&self, device_id: Option<String>) {
        self.commit_direct(|doc| doc.tree_mut().bluetooth.selected_device_id = device_id).await;
    }

    /// Merges into any existing device record rather than replacing it
    /// wholesale, so a `rename-device` followed by an `update-metadata` (or
    /// vice versa) doesn't clobber the field the other call set.
    pub async fn update_bluetooth_device_metadata(&self, device: BluetoothDevice) {
        self.commit_direct(move |doc| {
            let devices = &mut doc.tree_mut().bluetooth.devices;
            let entry = devices
                .entry(device.id.clone())
                .or_insert_with(|| BluetoothDevice { id: device.id.clone(), name: None, metadata: None });
            if device.name.is_some() {
                entry.name = device.name.clone();
            }
            if device.metadata.is_some() {
                entry.metadata = device.metadata.clone();
            }
        })
        .await;
    }

    pub async fn resolve_alerts_by_trigger(&self, trigger: &str, now_ms: i64) {
        let trigger = trigger.to_string();
        self.commit_direct(move |doc| {
            for alert in doc.tree_mut().alerts.active.iter_mut() {
                if alert.trigger == trigger && !alert.acknowledged && alert.resolved_at.is_none() {
                    alert.resolved_at = Some(now_ms);
                }
            }
        })
        .await;
    }

    pub async fn resolve_alerts_by_category(&self, category: &str, now_ms: i64) {
        let category = category.to_string();
        self.commit_direct(move |doc| {
            for alert in doc.tree_mut().alerts.active.iter_mut() {
                if alert.category == category
                    && alert.auto_resolvable
                    && !alert.acknowledged
                    && alert.resolved_at.is_none()
                {
                    alert.resolved_at = Some(now_ms);
                }
            }
        })
        .await;
    }
}

/// Partial update for `anchor:update` (spec §6 domain update shape).
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorStatePatch {
    pub anchor_deployed: Option<bool>,
    pub anchor_drop_location: Option<crate::state::AnchorDropLocation>,
    pub anchor_location: Option<crate::state::AnchorLocation>,
    pub rode: Option<crate::state::Rode>,
    pub critical_range: Option<crate::state::RangeSpec>,
    pub warning_range: Option<crate::state::RangeSpec>,
}

impl AnchorStatePatch {
    fn apply(&self, anchor: &mut AnchorState) {
        if let Some(v) = self.anchor_deployed {
            anchor.anchor_deployed = v;
            if !v {
                // spec §8 property 6: undeploying clears drag/ais-warning
                // state and unacknowledged auto-resolvable anchor alerts
                // (the latter handled by the caller via resolve_alerts_by_category).
                anchor.dragging = false;
                anchor.ais_warning = false;
                anchor.rode_circle_violation = false;
            }
        }
        if let Some(v) = self.anchor_drop_location.clone() {
            anchor.anchor_drop_location = Some(v);
        }
        if let Some(v) = self.anchor_location.clone() {
            anchor.anchor_location = Some(v);
        }
        if let Some(v) = self.rode.clone() {
            anchor.rode = Some(v);
        }
        if let Some(v) = self.critical_range.clone() {
            anchor.critical_range = Some(v);
        }
        if let Some(v) = self.warning_range.clone() {
            anchor.warning_range = Some(v);
        }
    }
}

fn apply_update(doc: &mut StateDocument, update: Update) {
    match update {
        Update::Scalar { path, si_value, source } => {
            tracing::debug!(?path, si_value, %source, "applying scalar update");
            doc.set_si(path, si_value);
        }
        Update::Position { lat, lon, timestamp, source } => {
            tracing::debug!(lat, lon, %source, "applying position update");
            doc.set_position(lat, lon, timestamp);
        }
        Update::VesselName(name) => doc.set_vessel_name(name),
        Update::VesselMmsi(mmsi) => doc.set_vessel_mmsi(mmsi),
        Update::AisUpsert(target) => doc.upsert_ais_target(target),
        Update::AisRemove(mmsi) => doc.remove_ais_target(&mmsi),
        Update::AisReplaceAll(targets) => {
            let existing: Vec<String> = doc.tree().ais_targets.keys().cloned().collect();
            for mmsi in existing {
                doc.remove_ais_target(&mmsi);
            }
            for (_, target) in targets {
                doc.upsert_ais_target(target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_produces_monotonic_seq() {
        let bus = StateBus::new(UnitPreferences::default());
        bus.commit(vec![Update::VesselName("Aria".into())]).await;
        assert_eq!(bus.commit_seq(), 1);
        bus.commit(vec![Update::VesselName("Aria II".into())]).await;
        assert_eq!(bus.commit_seq(), 2);
    }

    #[tokio::test]
    async fn client_count_floors_at_zero() {
        let bus = StateBus::new(UnitPreferences::default());
        bus.unregister_client();
        assert_eq!(bus.client_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reset_anchor_state_preserves_history() {
        let bus = StateBus::new(UnitPreferences::default());
        bus.update_anchor_state(AnchorStatePatch { anchor_deployed: Some(true), ..Default::default() }).await;
        {
            let mut inner = bus.inner.lock().await;
            inner.doc.tree_mut().anchor.history.push(crate::state::Breadcrumb {
                position: crate::state::LatLon { latitude: 1.0, longitude: 2.0 },
                time: 1,
            });
        }
        bus.reset_anchor_state().await;
        let inner = bus.inner.lock().await;
        assert!(!inner.doc.tree().anchor.anchor_deployed);
        assert_eq!(inner.doc.tree().anchor.history.len(), 1);
    }
}
