//! Producers that feed the [`crate::batch::BatchCoordinator`] queue.

pub mod ais;
pub mod signalk;

use crate::state::path::CanonicalPath;
use crate::state::AISTarget;

/// One raw update destined for the batch queue (spec §4.3/§4.4). `source`
/// is carried through for logging only; it never reaches the wire.
#[derive(Debug, Clone)]
pub enum Update {
    Scalar { path: CanonicalPath, si_value: f64, source: String },
    Position { lat: f64, lon: f64, timestamp: Option<i64>, source: String },
    VesselName(String),
    VesselMmsi(String),
    AisUpsert(AISTarget),
    AisRemove(String),
    /// AIS diff policy (spec §4.4) decided the churn was big enough to ship
    /// a single wholesale replace instead of per-target patches.
    AisReplaceAll(std::collections::HashMap<String, AISTarget>),
}
