use std::path::Path;

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use boat_relay::bus::StateBus;
use boat_relay::config::Config;
use boat_relay::ingest::ais::AISExtractor;
use boat_relay::ingest::signalk::SignalKIngestor;
use boat_relay::persistence;
use boat_relay::sync::ClientSyncCoordinator;
use boat_relay::transport::direct::DirectServer;
use boat_relay::transport::upstream::{AuthMode, UpstreamTunnel};

const APP_UUID_PATH: &str = ".app-uuid";
const PRIVATE_KEY_PATH: &str = "keys/private.pem";
const PUBLIC_KEY_PATH: &str = "keys/public.pem";
const UNIT_PREFS_PATH: &str = "unit-preferences.json";

/// Update channel depth between producers (SignalK, AIS) and the batch
/// coordinator. Generous since the coordinator drains once per tick and a
/// full channel would otherwise backpressure a reconnecting ingestor.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "boat_relay=info".into()))
        .init();

    info!("boat relay v{} starting", env!("CARGO_PKG_VERSION"));

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "startup configuration error");
            std::process::exit(1);
        }
    };

    let boat_id = match persistence::load_or_create_app_uuid(Path::new(APP_UUID_PATH)).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "failed to load or create boat identity");
            std::process::exit(1);
        }
    };
    info!(boat_id = %boat_id, "boat identity loaded");

    let unit_prefs = persistence::load_unit_preferences(Path::new(UNIT_PREFS_PATH)).await;

    let auth_mode = if cfg.uses_jwt_auth() {
        AuthMode::Jwt { secret: cfg.token_secret.clone().expect("checked by uses_jwt_auth") }
    } else {
        match persistence::load_keypair(Path::new(PRIVATE_KEY_PATH), Path::new(PUBLIC_KEY_PATH)).await {
            Some((private_key_pem, public_key_pem)) => AuthMode::Keypair { private_key_pem, public_key_pem },
            None => {
                tracing::error!("no TOKEN_SECRET set and no keypair found at keys/private.pem + keys/public.pem");
                std::process::exit(1);
            }
        }
    };

    let bus = StateBus::new(unit_prefs);
    let mut coordinator = ClientSyncCoordinator::new(bus.clone());
    if let Ok(journal_path) = std::env::var("PATCH_JOURNAL_PATH") {
        info!(path = %journal_path, "patch journaling enabled");
        coordinator = coordinator.with_journaler(std::sync::Arc::new(persistence::FileJournaler::new(journal_path)));
    }
    let publish_task = tokio::spawn(coordinator.clone().run_publish_loop());

    let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);

    let signalk_task = tokio::spawn(SignalKIngestor::new(cfg.clone(), update_tx.clone()).run());
    let ais_task = tokio::spawn(AISExtractor::new(&cfg, update_tx.clone()).with_self_mmsi(None).run());
    let batch_task = tokio::spawn(boat_relay::batch::BatchCoordinator::new(update_rx, bus.clone()).run());

    let direct_task = tokio::spawn(DirectServer::new(cfg.direct_ws_port, coordinator.clone()).run());
    let upstream_task =
        tokio::spawn(UpstreamTunnel::new(cfg.clone(), coordinator.clone(), boat_id.clone(), auth_mode).run());

    info!("boat relay running");
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining in-flight commits");

    // Stop accepting new producer input first; anything already queued on
    // the batch coordinator's channel still gets committed once its
    // receiver drains to empty and observes the closed sender.
    signalk_task.abort();
    ais_task.abort();
    drop(update_tx);
    let _ = batch_task.await;

    direct_task.abort();
    upstream_task.abort();
    publish_task.abort();

    info!("shutdown complete");
}
