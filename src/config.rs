use std::time::Duration;

use crate::error::{RelayError, Result};

/// Centralized environment configuration (spec §6). The env surface here
/// is large enough that collecting it into one struct, validated once at
/// startup, is worth the extra indirection over scattering
/// `std::env::var` calls inline at point of use.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_env: NodeEnv,

    pub vps_host: String,
    pub vps_ws_port: u16,
    pub vps_path: String,
    pub vps_ping_interval: Duration,
    pub vps_connection_timeout: Duration,
    pub vps_reconnect_interval: Duration,
    pub vps_max_retries: u32,

    pub signalk_url: String,
    pub signalk_token: Option<String>,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub update_interval: Duration,

    pub token_secret: Option<String>,
    pub token_expiry: Duration,

    pub direct_ws_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEnv {
    Production,
    Development,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let node_env = match std::env::var("NODE_ENV").as_deref() {
            Ok("production") => NodeEnv::Production,
            _ => NodeEnv::Development,
        };

        let signalk_url = std::env::var("SIGNALK_URL")
            .map_err(|_| RelayError::ConfigMissing("SIGNALK_URL".into()))?;

        let vps_host = std::env::var("VPS_HOST")
            .map_err(|_| RelayError::ConfigMissing("VPS_HOST".into()))?;

        Ok(Self {
            node_env,
            vps_host,
            vps_ws_port: env_u16("VPS_WS_PORT", 443),
            vps_path: std::env::var("VPS_PATH").unwrap_or_else(|_| "/relay".to_string()),
            vps_ping_interval: Duration::from_millis(env_u64("VPS_PING_INTERVAL", 25_000)),
            vps_connection_timeout: Duration::from_millis(env_u64("VPS_CONNECTION_TIMEOUT", 30_000)),
            vps_reconnect_interval: Duration::from_millis(env_u64("VPS_RECONNECT_INTERVAL", 5_000)),
            vps_max_retries: env_u64("VPS_MAX_RETRIES", 10) as u32,

            signalk_url,
            signalk_token: std::env::var("SIGNALK_TOKEN").ok(),
            reconnect_delay: Duration::from_millis(env_u64("RECONNECT_DELAY", 3_000)),
            max_reconnect_attempts: env_u64("MAX_RECONNECT_ATTEMPTS", 20) as u32,
            update_interval: Duration::from_millis(env_u64("UPDATE_INTERVAL", 1_000)),

            token_secret: std::env::var("TOKEN_SECRET").ok(),
            token_expiry: Duration::from_secs(env_u64("TOKEN_EXPIRY", 3600)),

            direct_ws_port: env_u16("DIRECT_WS_PORT", 3000),
        })
    }

    /// production forces wss and forbids ports other than 80/443 (spec §4.10).
    pub fn upstream_url(&self, token: Option<&str>) -> Result<String> {
        let scheme = match self.node_env {
            NodeEnv::Production => "wss",
            NodeEnv::Development => {
                if self.vps_ws_port == 443 {
                    "wss"
                } else {
                    "ws"
                }
            }
        };

        if self.node_env == NodeEnv::Production
            && self.vps_ws_port != 80
            && self.vps_ws_port != 443
        {
            return Err(RelayError::ConfigMissing(format!(
                "production VPS_WS_PORT must be 80 or 443, got {}",
                self.vps_ws_port
            )));
        }

        let mut url = format!("{scheme}://{}:{}{}", self.vps_host, self.vps_ws_port, self.vps_path);
        if let Some(t) = token {
            url.push_str(&format!("?token={t}"));
        }
        Ok(url)
    }

    pub fn uses_jwt_auth(&self) -> bool {
        self.token_secret.is_some()
    }

    /// The SignalK REST endpoint for the full vessels snapshot, derived
    /// from the discovery document URL (spec §4.4 "periodically pulls the
    /// `/vessels` snapshot").
    pub fn ais_vessels_url(&self) -> String {
        let base = self.signalk_url.trim_end_matches('/');
        format!("{base}/vessels")
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(node_env: NodeEnv, vps_ws_port: u16) -> Config {
        Config {
            node_env,
            vps_host: "relay.example.com".into(),
            vps_ws_port,
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

    #[test]
    fn production_forces_wss_and_rejects_nonstandard_ports() {
        let cfg = base_config(NodeEnv::Production, 8080);
        assert!(matches!(cfg.upstream_url(None), Err(RelayError::ConfigMissing(_))));

        let cfg = base_config(NodeEnv::Production, 443);
        assert!(cfg.upstream_url(None).unwrap().starts_with("wss://"));
    }

    #[test]
    fn development_permits_plain_ws_on_any_port() {
        let cfg = base_config(NodeEnv::Development, 8080);
        let url = cfg.upstream_url(None).unwrap();
        assert!(url.starts_with("ws://"));
        assert!(url.contains(":8080"));
    }

    #[test]
    fn token_is_appended_as_query_param() {
        let cfg = base_config(NodeEnv::Development, 443);
        let url = cfg.upstream_url(Some("abc123")).unwrap();
        assert!(url.ends_with("?token=abc123"));
    }

    #[test]
    fn ais_vessels_url_appends_path_regardless_of_trailing_slash() {
        let mut cfg = base_config(NodeEnv::Development, 443);
        cfg.signalk_url = "http://localhost:3000/signalk/".into();
        assert_eq!(cfg.ais_vessels_url(), "http://localhost:3000/signalk/vessels");
    }
}
