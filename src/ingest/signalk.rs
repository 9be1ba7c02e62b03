//! Discovers and subscribes to a SignalK server, translating delta frames
//! into canonical [`Update`]s for the batch queue (spec §4.3), over the
//! WebSocket transport the discovery document advertises.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::state::path::CanonicalPath;

use super::Update;

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    endpoints: std::collections::HashMap<String, EndpointSet>,
}

#[derive(Debug, Deserialize)]
struct EndpointSet {
    #[serde(rename = "signalk-ws")]
    signalk_ws: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaFrame {
    #[serde(default)]
    updates: Vec<DeltaUpdate>,
}

#[derive(Debug, Deserialize)]
struct DeltaUpdate {
    #[serde(rename = "$source")]
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    values: Vec<DeltaValue>,
}

#[derive(Debug, Deserialize)]
struct DeltaValue {
    path: String,
    value: serde_json::Value,
}

pub struct SignalKIngestor {
    cfg: Config,
    tx: mpsc::Sender<Update>,
    /// last-known magnetic variation, radians, for heading derivation.
    last_variation: Option<f64>,
    last_heading_magnetic: Option<f64>,
    last_heading_true: Option<f64>,
    /// last-known apparent wind angle, radians, for wind direction derivation.
    last_wind_angle_apparent: Option<f64>,
}

impl SignalKIngestor {
    pub fn new(cfg: Config, tx: mpsc::Sender<Update>) -> Self {
        Self {
            cfg,
            tx,
            last_variation: None,
            last_heading_magnetic: None,
            last_heading_true: None,
            last_wind_angle_apparent: None,
        }
    }

    /// Fetch the discovery document and extract the `signalk-ws` endpoint
    /// (spec §4.3 step 1).
    async fn discover_ws_endpoint(&self) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| RelayError::DiscoveryFailed(e.to_string()))?;

        let doc: DiscoveryDocument = client
            .get(&self.cfg.signalk_url)
            .send()
            .await
            .map_err(|e| RelayError::DiscoveryFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| RelayError::DiscoveryFailed(e.to_string()))?;

        doc.endpoints
            .get("v1")
            .and_then(|e| e.signalk_ws.clone())
            .ok_or(RelayError::EndpointMissing)
    }

    /// Runs forever, reconnecting with a fixed delay up to
    /// `max_reconnect_attempts`; stops (logging a fatal error) on
    /// exhaustion, per spec §4.3.
    pub async fn run(mut self) {
        let mut attempts = 0u32;
        loop {
            match self.connect_and_stream().await {
                Ok(()) => {
                    tracing::warn!("signalk connection closed cleanly, reconnecting");
                    attempts = 0;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "signalk connection lost");
                }
            }

            attempts += 1;
            if attempts > self.cfg.max_reconnect_attempts {
                tracing::error!("signalk ingestor exhausted reconnect attempts, stopping");
                return;
            }
            tokio::time::sleep(self.cfg.reconnect_delay).await;
        }
    }

    async fn connect_and_stream(&mut self) -> Result<()> {
        let ws_url = self.discover_ws_endpoint().await?;
        tracing::info!(%ws_url, "connecting to signalk");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(|e| RelayError::TransportDown(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = json!({
            "context": "*",
            "subscribe": [{"path": "*", "period": self.cfg.update_interval.as_millis() as u64}],
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| RelayError::TransportDown(e.to_string()))?;

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| RelayError::TransportDown(e.to_string()))?;
            let Message::Text(text) = msg else { continue };
            if let Err(e) = self.handle_frame(&text).await {
                tracing::warn!(error = %e, "dropping malformed signalk frame");
            }
        }
        Ok(())
    }

    async fn handle_frame(&mut self, text: &str) -> Result<()> {
        let frame: DeltaFrame =
            serde_json::from_str(text).map_err(|e| RelayError::ParseFailed(e.to_string()))?;

        for update in frame.updates {
            let source = update.source.clone().unwrap_or_else(|| "signalk".to_string());
            for value in update.values {
                if value.path.starts_with("notifications.") {
                    // Notification refresh is handled by the alert pipeline
                    // directly off committed state, not queued here.
                    continue;
                }
                self.emit_canonical(&value.path, &value.value, source.clone()).await;
            }
        }
        Ok(())
    }

    async fn emit_canonical(&mut self, sk_path: &str, value: &serde_json::Value, source: String) {
        if sk_path == "navigation.position" {
            if let (Some(lat), Some(lon)) = (
                value.get("latitude").and_then(|v| v.as_f64()),
                value.get("longitude").and_then(|v| v.as_f64()),
            ) {
                let _ = self.tx.send(Update::Position { lat, lon, timestamp: None, source }).await;
            }
            return;
        }
        if sk_path == "name" {
            if let Some(s) = value.as_str() {
                let _ = self.tx.send(Update::VesselName(s.to_string())).await;
            }
            return;
        }
        if sk_path == "mmsi" {
            if let Some(s) = value.as_str() {
                let _ = self.tx.send(Update::VesselMmsi(s.to_string())).await;
            }
            return;
        }

        let Some(canonical) = CanonicalPath::from_signalk(sk_path) else { return };
        let Some(num) = value.as_f64() else { return };

        let _ = self.tx.send(Update::Scalar { path: canonical, si_value: num, source: source.clone() }).await;

        // Special multi-field transforms (spec §4.3) only recompute the side
        // that didn't just arrive — not on every unrelated scalar, and not
        // both directions at once (which would just echo the input back).
        match canonical {
            CanonicalPath::NavigationVariation => {
                self.last_variation = Some(num);
                if let Some(mag) = self.last_heading_magnetic {
                    self.derive_true_from_magnetic(mag, num, source).await;
                }
            }
            CanonicalPath::NavigationHeadingMagnetic => {
                self.last_heading_magnetic = Some(num);
                if let Some(var) = self.last_variation {
                    self.derive_true_from_magnetic(num, var, source).await;
                }
            }
            CanonicalPath::NavigationHeadingTrue => {
                self.last_heading_true = Some(num);
                if let Some(var) = self.last_variation {
                    self.derive_magnetic_from_true(num, var, source.clone()).await;
                }
                self.derive_wind_direction(source).await;
            }
            CanonicalPath::EnvironmentWindAngleApparent => {
                self.last_wind_angle_apparent = Some(num);
                self.derive_wind_direction(source).await;
            }
            _ => {}
        }
    }

    /// Spec §4.3: "when magnetic heading arrives and variation is known,
    /// true heading is derived (and vice versa)". `last_heading_true` is
    /// updated (for [`Self::derive_wind_direction`]'s benefit) but this
    /// never derives magnetic back from it — that would just echo `mag`.
    async fn derive_true_from_magnetic(&mut self, mag: f64, var: f64, source: String) {
        let true_heading = crate::units::normalize_radians(mag + var);
        self.last_heading_true = Some(true_heading);
        let _ = self
            .tx
            .send(Update::Scalar {
                path: CanonicalPath::NavigationHeadingTrue,
                si_value: true_heading,
                source: source.clone(),
            })
            .await;
        self.derive_wind_direction(source).await;
    }

    /// The "(and vice versa)" half of the same transform: true heading
    /// arrived directly (not derived) and variation is known.
    async fn derive_magnetic_from_true(&mut self, true_h: f64, var: f64, source: String) {
        let mag_heading = crate::units::normalize_radians(true_h - var);
        let _ = self
            .tx
            .send(Update::Scalar { path: CanonicalPath::NavigationHeadingMagnetic, si_value: mag_heading, source })
            .await;
    }

    /// Spec §4.3: "when apparent wind angle arrives and true heading is
    /// known, apparent wind direction is derived".
    async fn derive_wind_direction(&mut self, source: String) {
        if let (Some(angle), Some(heading)) = (self.last_wind_angle_apparent, self.last_heading_true) {
            let direction = crate::units::normalize_radians(heading + angle);
            let _ = self
                .tx
                .send(Update::Scalar {
                    path: CanonicalPath::EnvironmentWindDirectionTrue,
                    si_value: direction,
                    source,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeEnv;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            node_env: NodeEnv::Development,
            vps_host: "localhost".into(),
            vps_ws_port: 8080,
            vps_path: "/relay".into(),
            vps_ping_interval: Duration::from_millis(25_000),
            vps_connection_timeout: Duration::from_millis(30_000),
            vps_reconnect_interval: Duration::from_millis(5_000),
            vps_max_retries: 10,
            signalk_url: "http://localhost:3000/signalk".into(),
            signalk_token: None,
            reconnect_delay: Duration::from_millis(3_000),
            max_reconnect_attempts: 20,
            update_interval: Duration::from_millis(1_000),
            token_secret: None,
            token_expiry: Duration::from_secs(3600),
            direct_ws_port: 3000,
        }
    }

    #[tokio::test]
    async fn heading_magnetic_plus_variation_derives_true() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut ingestor = SignalKIngestor::new(test_config(), tx);

        ingestor.emit_canonical("navigation.magneticVariation", &serde_json::json!(0.1), "test".to_string()).await;
        rx.recv().await; // the raw variation scalar update

        ingestor.emit_canonical("navigation.headingMagnetic", &serde_json::json!(1.0), "test".to_string()).await;
        rx.recv().await; // the raw headingMagnetic scalar update

        match rx.recv().await {
            Some(Update::Scalar { path: CanonicalPath::NavigationHeadingTrue, si_value, .. }) => {
                assert!((si_value - 1.1).abs() < 1e-9);
            }
            other => panic!("expected derived true heading, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wind_direction_derives_once_both_inputs_known() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut ingestor = SignalKIngestor::new(test_config(), tx);

        // heading true arrives first; no wind angle yet, so nothing queued.
        ingestor.emit_canonical("navigation.headingTrue", &serde_json::json!(0.5), "test".to_string()).await;
        rx.recv().await; // raw headingTrue scalar

        // apparent wind angle arrives; both inputs now known.
        ingestor.emit_canonical("environment.wind.angleApparent", &serde_json::json!(0.2), "test".to_string()).await;
        rx.recv().await; // raw windAngleApparent scalar

        match rx.recv().await {
            Some(Update::Scalar { path: CanonicalPath::EnvironmentWindDirectionTrue, si_value, .. }) => {
                assert!((si_value - 0.7).abs() < 1e-9);
            }
            other => panic!("expected derived wind direction, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrelated_scalar_does_not_re_emit_heading() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut ingestor = SignalKIngestor::new(test_config(), tx);

        ingestor.emit_canonical("navigation.magneticVariation", &serde_json::json!(0.1), "test".to_string()).await;
        rx.recv().await;
        ingestor.emit_canonical("navigation.headingMagnetic", &serde_json::json!(1.0), "test".to_string()).await;
        rx.recv().await; // raw
        rx.recv().await; // derived true heading

        ingestor.emit_canonical("environment.depth.belowTransducer", &serde_json::json!(4.2), "test".to_string()).await;
        match rx.recv().await {
            Some(Update::Scalar { path: CanonicalPath::EnvironmentDepth, .. }) => {}
            other => panic!("expected only the raw depth update, got {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "depth update should not re-trigger heading derivation");
    }
}
