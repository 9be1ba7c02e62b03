//! Narrow file-backed persistence: the few things spec §6 requires to
//! survive a restart (app identity, keypair, unit preferences). Durable
//! state storage and replay are explicitly out of scope (spec §1
//! Non-goals); the [`Journaler`] trait exists only so a caller who wants an
//! audit trail can plug one in without this crate depending on a database
//! driver.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{RelayError, Result};
use crate::units::UnitPreferences;

/// Reads `.app-uuid` (a single UUID line), creating and persisting a fresh
/// one on first run.
pub async fn load_or_create_app_uuid(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(contents.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = uuid::Uuid::new_v4().to_string();
            tokio::fs::write(path, &id)
                .await
                .map_err(|e| RelayError::ConfigMissing(format!("writing {}: {e}", path.display())))?;
            Ok(id)
        }
        Err(e) => Err(RelayError::ConfigMissing(format!("reading {}: {e}", path.display()))),
    }
}

/// Reads the PEM keypair used for keypair-based upstream identity. Absent
/// files mean the deployment relies on `TOKEN_SECRET`/JWT auth instead.
pub async fn load_keypair(
    private_key_path: impl AsRef<Path>,
    public_key_path: impl AsRef<Path>,
) -> Option<(String, String)> {
    let private_key = tokio::fs::read_to_string(private_key_path).await.ok()?;
    let public_key = tokio::fs::read_to_string(public_key_path).await.ok()?;
    Some((private_key, public_key))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnitPreferencesFile(UnitPreferences);

pub async fn load_unit_preferences(path: impl AsRef<Path>) -> UnitPreferences {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            serde_json::from_str::<UnitPreferencesFile>(&contents).map(|f| f.0).unwrap_or_default()
        }
        Err(_) => UnitPreferences::default(),
    }
}

pub async fn save_unit_preferences(path: impl AsRef<Path>, prefs: &UnitPreferences) -> Result<()> {
    let json = serde_json::to_string_pretty(&UnitPreferencesFile(*prefs))?;
    tokio::fs::write(path, json).await.map_err(|e| RelayError::ConfigMissing(e.to_string()))
}

/// Out-of-scope hook for a durable audit trail. The default `NullJournaler`
/// drops every entry; `FileJournaler` is provided for operators who want a
/// flat append-only log without pulling in a database dependency.
pub trait Journaler: Send + Sync {
    fn record(&self, patch: &serde_json::Value);
}

pub struct NullJournaler;

impl Journaler for NullJournaler {
    fn record(&self, _patch: &serde_json::Value) {}
}

pub struct FileJournaler {
    path: PathBuf,
}

impl FileJournaler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn append(&self, patch: &serde_json::Value) -> Result<()> {
        let mut line = serde_json::to_string(patch)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| RelayError::ConfigMissing(e.to_string()))?;
        file.write_all(line.as_bytes()).await.map_err(|e| RelayError::ConfigMissing(e.to_string()))
    }
}

impl Journaler for FileJournaler {
    /// `Journaler::record` is synchronous (spec: durability is a non-goal,
    /// callers must never block on it); the actual write is handed off to a
    /// spawned task rather than done inline.
    fn record(&self, patch: &serde_json::Value) {
        let path = self.path.clone();
        let mut line = match serde_json::to_string(patch) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "journaler failed to serialize patch, dropping entry");
                return;
            }
        };
        line.push('\n');
        tokio::spawn(async move {
            match tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(line.as_bytes()).await {
                        tracing::warn!(error = %e, "journaler write failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "journaler failed to open patch log"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn app_uuid_is_created_once_and_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".app-uuid");

        let first = load_or_create_app_uuid(&path).await.unwrap();
        let second = load_or_create_app_uuid(&path).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unit_preferences_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit-preferences.json");

        save_unit_preferences(&path, &UnitPreferences::IMPERIAL).await.unwrap();
        let loaded = load_unit_preferences(&path).await;
        assert_eq!(loaded, UnitPreferences::IMPERIAL);
    }

    #[tokio::test]
    async fn missing_unit_preferences_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        assert_eq!(load_unit_preferences(&path).await, UnitPreferences::default());
    }

    #[tokio::test]
    async fn file_journaler_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patches.jsonl");
        let journaler = FileJournaler::new(&path);

        journaler.append(&serde_json::json!({"op": "replace"})).await.unwrap();
        journaler.append(&serde_json::json!({"op": "add"})).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
