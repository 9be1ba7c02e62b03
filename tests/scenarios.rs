//! End-to-end scenarios S1-S6 (spec §8), driven in-process against
//! `StateBus` + `ClientSyncCoordinator` the way `DirectServer`/`UpstreamTunnel`
//! would, without opening a real socket or spawning the binary.

use serde_json::{json, Value};
use tokio::sync::mpsc;

use boat_relay::bus::{BusEvent, StateBus};
use boat_relay::ingest::Update;
use boat_relay::state::path::CanonicalPath;
use boat_relay::sync::ClientSyncCoordinator;
use boat_relay::units::UnitPreferences;

fn has_patch_setting(patch: &boat_relay::state::document::Patch, pointer_suffix: &str, expected: &Value) -> bool {
    patch.iter().any(|op| match op {
        boat_relay::state::document::PatchOp::Add { path, value }
        | boat_relay::state::document::PatchOp::Replace { path, value } => {
            path.ends_with(pointer_suffix) && value == expected
        }
        _ => false,
    })
}

async fn drain_patches(rx: &mut tokio::sync::broadcast::Receiver<BusEvent>) -> Vec<boat_relay::state::document::Patch> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let BusEvent::Patch { patch, .. } = event {
            out.push(patch);
        }
    }
    out
}

/// S1. Anchor deploy + drag, then undeploy clears dragging.
#[tokio::test]
async fn s1_anchor_deploy_and_drag() {
    let bus = StateBus::new(UnitPreferences::default());
    let coordinator = ClientSyncCoordinator::new(bus.clone());
    let mut events = bus.subscribe();

    bus.commit(vec![Update::Position { lat: 40.7128, lon: -74.0060, timestamp: None, source: "test".to_string() }]).await;
    drain_patches(&mut events).await;

    let ack = coordinator
        .handle_inbound(json!({
            "type": "anchor:update",
            "data": {
                "anchorDeployed": true,
                "anchorDropLocation": {"position": {"latitude": 40.7128, "longitude": -74.0060}, "time": 0},
                "rode": {"amount": 30, "units": "m"},
            }
        }))
        .await
        .expect("anchor:update produces an ack");
    assert_eq!(ack["type"], "anchor:update:ack");
    assert_eq!(ack["success"], true);
    drain_patches(&mut events).await;

    // Boat drags ~840m west of the drop point.
    bus.commit(vec![Update::Position { lat: 40.7128, lon: -74.0160, timestamp: None, source: "test".to_string() }]).await;
    let patches = drain_patches(&mut events).await;
    assert!(
        patches.iter().any(|p| has_patch_setting(p, "/anchor/dragging", &json!(true))),
        "expected a patch setting anchor.dragging=true, got {patches:?}"
    );

    let (snapshot, _) = bus.current_snapshot().await;
    let alerts = snapshot["alerts"]["active"].as_array().expect("alerts.active is an array");
    assert!(
        alerts.iter().any(|a| a["trigger"] == "anchor_dragging" && a["level"] == "critical" && a["resolvedAt"].is_null()),
        "expected an unresolved critical anchor_dragging alert, got {alerts:?}"
    );

    let ack = coordinator
        .handle_inbound(json!({"type": "anchor:update", "data": {"anchorDeployed": false}}))
        .await
        .expect("anchor:update produces an ack");
    assert_eq!(ack["success"], true);

    let (snapshot, _) = bus.current_snapshot().await;
    assert_eq!(snapshot["anchor"]["dragging"], false);
}

/// S2. Critical-range alert creates then resolves as the boat re-enters range.
#[tokio::test]
async fn s2_critical_range_resolve() {
    let bus = StateBus::new(UnitPreferences::default());
    let coordinator = ClientSyncCoordinator::new(bus.clone());

    bus.commit(vec![Update::Position { lat: 0.0, lon: 0.0, timestamp: None, source: "test".to_string() }]).await;

    coordinator
        .handle_inbound(json!({
            "type": "anchor:update",
            "data": {
                "anchorDeployed": true,
                "anchorDropLocation": {"position": {"latitude": 0.0, "longitude": 0.0}, "time": 0},
                "criticalRange": {"r": 50, "units": "m"},
            }
        }))
        .await;

    // ~60m east of the drop point.
    bus.commit(vec![Update::Position { lat: 0.0, lon: 0.00054, timestamp: None, source: "test".to_string() }]).await;
    let (snapshot, _) = bus.current_snapshot().await;
    let alerts = snapshot["alerts"]["active"].as_array().unwrap().clone();
    assert!(alerts.iter().any(|a| a["trigger"] == "critical_range" && a["resolvedAt"].is_null()));

    // Back within range.
    bus.commit(vec![Update::Position { lat: 0.0, lon: 0.0, timestamp: None, source: "test".to_string() }]).await;
    let (snapshot, _) = bus.current_snapshot().await;
    let alerts = snapshot["alerts"]["active"].as_array().unwrap();
    assert!(alerts.iter().any(|a| a["trigger"] == "critical_range" && !a["resolvedAt"].is_null()));
}

/// S3. High AIS churn emits a single wholesale replace of `ais.targets`; the
/// dual `aisTargets` alias stays in sync with it (spec §3).
#[tokio::test]
async fn s3_ais_high_churn_replace() {
    use boat_relay::state::{AISTarget, AisPosition};

    let bus = StateBus::new(UnitPreferences::default());
    let mut targets = std::collections::HashMap::new();
    for (mmsi, lon) in [("B", 1.0), ("C", 2.0), ("D", 3.0), ("E", 4.0), ("F", 5.0)] {
        targets.insert(
            mmsi.to_string(),
            AISTarget {
                mmsi: mmsi.to_string(),
                name: None,
                callsign: None,
                position: AisPosition { latitude: 0.0, longitude: lon, timestamp: 0 },
                sog: None,
                cog: None,
                heading: None,
                dimensions: None,
                last_updated: 0,
            },
        );
    }
    bus.commit(vec![Update::AisReplaceAll(targets)]).await;

    let (snapshot, _) = bus.current_snapshot().await;
    let via_ais = snapshot["ais"]["targets"].as_object().unwrap();
    let via_alias = snapshot["aisTargets"].as_object().unwrap();
    assert_eq!(via_ais.len(), 5);
    assert_eq!(via_ais, via_alias);
}

/// S4. High apparent wind alert fires above threshold, resolves below it.
#[tokio::test]
async fn s4_wind_alert_threshold() {
    let bus = StateBus::new(UnitPreferences::default());

    // 13.5 m/s ~= 26.24 kts, above the 25kt threshold.
    bus.commit(vec![Update::Scalar { path: CanonicalPath::EnvironmentWindSpeedApparent, si_value: 13.5, source: "test".to_string() }])
        .await;
    let (snapshot, _) = bus.current_snapshot().await;
    let alerts = snapshot["alerts"]["active"].as_array().unwrap().clone();
    assert!(alerts
        .iter()
        .any(|a| a["trigger"] == "high_apparent_wind" && a["level"] == "warning" && a["resolvedAt"].is_null()));

    // 11.5 m/s ~= 22.35 kts, below threshold.
    bus.commit(vec![Update::Scalar { path: CanonicalPath::EnvironmentWindSpeedApparent, si_value: 11.5, source: "test".to_string() }])
        .await;
    let (snapshot, _) = bus.current_snapshot().await;
    let alerts = snapshot["alerts"]["active"].as_array().unwrap();
    assert!(alerts.iter().any(|a| a["trigger"] == "high_apparent_wind" && !a["resolvedAt"].is_null()));
}

/// S5. Upstream admission control: with no remote clients, only the
/// always-allowed message types are let through; once a remote client
/// attaches, ordinary state traffic passes too.
#[tokio::test]
async fn s5_upstream_admission_control() {
    let bus = StateBus::new(UnitPreferences::default());
    let coordinator = ClientSyncCoordinator::new(bus.clone());
    let publish_task = tokio::spawn(coordinator.clone().run_publish_loop());

    let remote_client_count = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0));
    let gate = remote_client_count.clone();
    let should_send: boat_relay::sync::ShouldSend = std::sync::Arc::new(move |payload: &Value| {
        let msg_type = payload.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if ["identity", "register", "subscribe", "heartbeat", "ping"].contains(&msg_type) {
            return true;
        }
        gate.load(std::sync::atomic::Ordering::SeqCst) > 0
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    coordinator.register_transport("upstream".to_string(), tx, Some(should_send)).await;

    bus.commit(vec![Update::VesselName("Aria".into())]).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err(), "state:patch should be suppressed with zero remote clients");

    remote_client_count.store(1, std::sync::atomic::Ordering::SeqCst);
    bus.commit(vec![Update::VesselName("Aria II".into())]).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let forwarded = rx.try_recv().expect("state:patch should be forwarded once a remote client is attached");
    assert_eq!(forwarded["type"], "state:patch");

    publish_task.abort();
}

/// S6. `anchor:reset` acks and wipes the anchor subtree (history preserved
/// per DESIGN.md's open-question resolution), resolving anchor-category
/// auto-resolvable alerts.
#[tokio::test]
async fn s6_anchor_reset_ack() {
    let bus = StateBus::new(UnitPreferences::default());
    let coordinator = ClientSyncCoordinator::new(bus.clone());

    bus.commit(vec![Update::Position { lat: 0.0, lon: 0.0, timestamp: None, source: "test".to_string() }]).await;
    coordinator
        .handle_inbound(json!({
            "type": "anchor:update",
            "data": {
                "anchorDeployed": true,
                "anchorDropLocation": {"position": {"latitude": 0.0, "longitude": 0.0}, "time": 0},
                "criticalRange": {"r": 10, "units": "m"},
            }
        }))
        .await;
    bus.commit(vec![Update::Position { lat: 0.0, lon: 0.01, timestamp: None, source: "test".to_string() }]).await;

    let ack = coordinator.handle_inbound(json!({"type": "anchor:reset"})).await.expect("anchor:reset acks");
    assert_eq!(ack["type"], "anchor:reset:ack");
    assert_eq!(ack["success"], true);

    let (snapshot, _) = bus.current_snapshot().await;
    assert_eq!(snapshot["anchor"]["anchorDeployed"], false);
    assert!(snapshot["anchor"]["anchorDropLocation"].is_null());

    let alerts = snapshot["alerts"]["active"].as_array().unwrap();
    assert!(
        alerts.iter().all(|a| a["category"] != "anchor" || !a["resolvedAt"].is_null()),
        "expected all anchor-category alerts resolved, got {alerts:?}"
    );

    // A second reset is a no-op: still acks success, anchor subtree unchanged.
    let ack2 = coordinator.handle_inbound(json!({"type": "anchor:reset"})).await.expect("second reset still acks");
    assert_eq!(ack2["success"], true);
}
