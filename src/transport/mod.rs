//! Outbound surfaces that register with [`crate::sync::ClientSyncCoordinator`].

pub mod direct;
pub mod upstream;
