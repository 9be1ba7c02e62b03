//! Boat-side telemetry relay: SignalK ingestion, derived anchor/geofence
//! state, and fan-out to local and cloud-relay clients.
//!
//! Split into a library (this crate) and a thin `main.rs` binary, so
//! `tests/` can exercise `StateBus`, `DerivationEngine`, and
//! `ClientSyncCoordinator` in-process rather than only through the
//! running binary.

pub mod auth;
pub mod batch;
pub mod bus;
pub mod commands;
pub mod config;
pub mod derive;
pub mod error;
pub mod ingest;
pub mod persistence;
pub mod state;
pub mod sync;
pub mod transport;
pub mod units;
