//! Periodic AIS target extraction (spec §4.4): a tick-driven task
//! (`tokio::time::interval`) with a diffing step for deciding
//! replace-vs-patch against the previous poll's targets.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::state::AISTarget;

use super::Update;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Above this fraction of changed/total targets (or this absolute count),
/// ship one wholesale replace instead of per-target patches.
const CHURN_RATIO_THRESHOLD: f64 = 0.3;
const CHURN_COUNT_THRESHOLD: usize = 20;

#[derive(Debug, Deserialize)]
struct VesselsResponse(HashMap<String, VesselEntry>);

#[derive(Debug, Deserialize)]
struct VesselEntry {
    mmsi: Option<String>,
    name: Option<ValueWrapper<String>>,
    #[serde(rename = "communication")]
    communication: Option<Communication>,
    navigation: Option<VesselNavigation>,
}

#[derive(Debug, Deserialize)]
struct Communication {
    #[serde(rename = "callsignVhf")]
    callsign_vhf: Option<ValueWrapper<String>>,
}

#[derive(Debug, Deserialize)]
struct VesselNavigation {
    position: Option<ValueWrapper<LatLonRaw>>,
    #[serde(rename = "speedOverGround")]
    speed_over_ground: Option<ValueWrapper<f64>>,
    #[serde(rename = "courseOverGroundTrue")]
    course_over_ground_true: Option<ValueWrapper<f64>>,
    #[serde(rename = "headingTrue")]
    heading_true: Option<ValueWrapper<f64>>,
}

#[derive(Debug, Deserialize)]
struct LatLonRaw {
    latitude: f64,
    longitude: f64,
}

/// SignalK's REST API wraps most leaf values as `{value, timestamp, ...}`.
#[derive(Debug, Deserialize)]
struct ValueWrapper<T> {
    value: T,
}

pub struct AISExtractor {
    vessels_url: String,
    self_mmsi: Option<String>,
    tx: mpsc::Sender<Update>,
    prior: HashMap<String, AISTarget>,
    poll_interval: Duration,
}

impl AISExtractor {
    pub fn new(cfg: &Config, tx: mpsc::Sender<Update>) -> Self {
        Self {
            vessels_url: cfg.ais_vessels_url(),
            self_mmsi: None,
            tx,
            prior: HashMap::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_self_mmsi(mut self, mmsi: Option<String>) -> Self {
        self.self_mmsi = mmsi;
        self
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client builds");

        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once(&client).await {
                tracing::warn!(error = %e, "ais poll failed, keeping prior snapshot");
            }
        }
    }

    async fn poll_once(&mut self, client: &reqwest::Client) -> Result<(), reqwest::Error> {
        let body: VesselsResponse = client.get(&self.vessels_url).send().await?.json().await?;
        let now = chrono::Utc::now().timestamp_millis();

        let mut fresh = HashMap::new();
        for (context_id, entry) in body.0 {
            let mmsi = entry.mmsi.clone().unwrap_or_else(|| extract_mmsi_from_context(&context_id));
            if self.self_mmsi.as_deref() == Some(mmsi.as_str()) {
                continue;
            }
            let Some(nav) = entry.navigation else { continue };
            let Some(pos) = nav.position else { continue };

            fresh.insert(
                mmsi.clone(),
                AISTarget {
                    mmsi: mmsi.clone(),
                    name: entry.name.map(|w| w.value),
                    callsign: entry.communication.and_then(|c| c.callsign_vhf).map(|w| w.value),
                    position: crate::state::AisPosition {
                        latitude: pos.value.latitude,
                        longitude: pos.value.longitude,
                        timestamp: now,
                    },
                    sog: nav.speed_over_ground.map(|w| w.value),
                    cog: nav.course_over_ground_true.map(|w| w.value),
                    heading: nav.heading_true.map(|w| w.value),
                    dimensions: None,
                    last_updated: now,
                },
            );
        }

        self.diff_and_emit(fresh).await;
        Ok(())
    }

    async fn diff_and_emit(&mut self, fresh: HashMap<String, AISTarget>) {
        let mut added = 0usize;
        let mut removed = 0usize;
        let mut updated = 0usize;

        for (mmsi, target) in &fresh {
            match self.prior.get(mmsi) {
                None => added += 1,
                Some(old) if old.differs_materially(target) => updated += 1,
                Some(_) => {}
            }
        }
        for mmsi in self.prior.keys() {
            if !fresh.contains_key(mmsi) {
                removed += 1;
            }
        }

        let total_changes = added + removed + updated;
        let total_new = fresh.len().max(1);
        let ratio = total_changes as f64 / total_new as f64;

        if total_changes == 0 {
            self.prior = fresh;
            return;
        }

        if ratio > CHURN_RATIO_THRESHOLD || total_changes > CHURN_COUNT_THRESHOLD {
            tracing::info!(added, removed, updated, "ais churn exceeds threshold, replacing ais.targets wholesale");
            let _ = self.tx.send(Update::AisReplaceAll(fresh.clone())).await;
        } else {
            for (mmsi, target) in &fresh {
                match self.prior.get(mmsi) {
                    None => {
                        let _ = self.tx.send(Update::AisUpsert(target.clone())).await;
                    }
                    Some(old) if old.differs_materially(target) => {
                        let _ = self.tx.send(Update::AisUpsert(target.clone())).await;
                    }
                    Some(_) => {}
                }
            }
            for mmsi in self.prior.keys() {
                if !fresh.contains_key(mmsi) {
                    let _ = self.tx.send(Update::AisRemove(mmsi.clone())).await;
                }
            }
        }

        self.prior = fresh;
    }
}

fn extract_mmsi_from_context(context_id: &str) -> String {
    context_id.rsplit('.').next().unwrap_or(context_id).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AisPosition;

    fn target(mmsi: &str, lat: f64) -> AISTarget {
        AISTarget {
            mmsi: mmsi.to_string(),
            name: None,
            callsign: None,
            position: AisPosition { latitude: lat, longitude: 0.0, timestamp: 0 },
            sog: None,
            cog: None,
            heading: None,
            dimensions: None,
            last_updated: 0,
        }
    }

    #[tokio::test]
    async fn high_churn_emits_single_replace() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut extractor = AISExtractor {
            vessels_url: String::new(),
            self_mmsi: None,
            tx,
            prior: HashMap::from([
                ("A".to_string(), target("A", 1.0)),
                ("B".to_string(), target("B", 1.0)),
                ("C".to_string(), target("C", 1.0)),
            ]),
            poll_interval: DEFAULT_POLL_INTERVAL,
        };

        let fresh = HashMap::from([
            ("B".to_string(), target("B", 2.0)),
            ("C".to_string(), target("C", 1.0)),
            ("D".to_string(), target("D", 1.0)),
            ("E".to_string(), target("E", 1.0)),
            ("F".to_string(), target("F", 1.0)),
        ]);

        extractor.diff_and_emit(fresh).await;
        match rx.recv().await {
            Some(Update::AisReplaceAll(map)) => assert_eq!(map.len(), 5),
            other => panic!("expected AisReplaceAll, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn low_churn_emits_per_target_patches() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut extractor = AISExtractor {
            vessels_url: String::new(),
            self_mmsi: None,
            tx,
            prior: HashMap::from([
                ("A".to_string(), target("A", 1.0)),
                ("B".to_string(), target("B", 1.0)),
            ]),
            poll_interval: DEFAULT_POLL_INTERVAL,
        };

        let fresh =
            HashMap::from([("A".to_string(), target("A", 1.0)), ("B".to_string(), target("B", 1.5))]);

        extractor.diff_and_emit(fresh).await;
        match rx.recv().await {
            Some(Update::AisUpsert(t)) => assert_eq!(t.mmsi, "B"),
            other => panic!("expected AisUpsert, got {other:?}"),
        }
    }
}
