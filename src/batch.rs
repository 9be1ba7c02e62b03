//! Coalesces producer updates on a tick and commits them through the
//! [`crate::bus::StateBus`] (spec §4.5).

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::bus::StateBus;
use crate::ingest::Update;
use crate::state::path::CanonicalPath;

const DEFAULT_TICK: Duration = Duration::from_millis(1000);
const FULL_UPDATE_HEARTBEAT: Duration = Duration::from_secs(30);

/// Coalescing key: later values for the same key replace earlier ones
/// within a tick (spec §4.5). Non-scalar updates (AIS, vessel identity)
/// each get their own singleton key since they don't share a `CanonicalPath`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CoalesceKey {
    Path(CanonicalPath),
    Position,
    VesselName,
    VesselMmsi,
    Ais(String),
    AisReplaceAll,
}

pub struct BatchCoordinator {
    rx: mpsc::Receiver<Update>,
    bus: StateBus,
    tick: Duration,
}

impl BatchCoordinator {
    pub fn new(rx: mpsc::Receiver<Update>, bus: StateBus) -> Self {
        Self { rx, bus, tick: DEFAULT_TICK }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick);
        let mut heartbeat = tokio::time::interval(FULL_UPDATE_HEARTBEAT);
        let mut pending: HashMap<CoalesceKey, Update> = HashMap::new();

        loop {
            tokio::select! {
                biased;

                maybe_update = self.rx.recv() => {
                    match maybe_update {
                        Some(update) => {
                            pending.insert(coalesce_key(&update), update);
                        }
                        None => {
                            tracing::info!("batch coordinator input channel closed, draining and stopping");
                            self.drain_and_commit(&mut pending).await;
                            return;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.drain_and_commit(&mut pending).await;
                }

                _ = heartbeat.tick() => {
                    self.bus.emit_full_update_heartbeat().await;
                }
            }
        }
    }

    async fn drain_and_commit(&mut self, pending: &mut HashMap<CoalesceKey, Update>) {
        if pending.is_empty() {
            return;
        }
        let batch: Vec<Update> = pending.drain().map(|(_, v)| v).collect();
        self.bus.commit(batch).await;
    }
}

fn coalesce_key(update: &Update) -> CoalesceKey {
    match update {
        Update::Scalar { path, .. } => CoalesceKey::Path(*path),
        Update::Position { .. } => CoalesceKey::Position,
        Update::VesselName(_) => CoalesceKey::VesselName,
        Update::VesselMmsi(_) => CoalesceKey::VesselMmsi,
        Update::AisUpsert(t) => CoalesceKey::Ais(t.mmsi.clone()),
        Update::AisRemove(mmsi) => CoalesceKey::Ais(mmsi.clone()),
        Update::AisReplaceAll(_) => CoalesceKey::AisReplaceAll,
    }
}
