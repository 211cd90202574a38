//! # kvmlink-registry
//!
//! Directory-service client for the relay host.
//!
//! Remote operators find devices by asking a directory service which
//! relay host exposes which device. This crate discovers the host's
//! overlay address, announces the currently running relays once per
//! session, and emits periodic liveness heartbeats so the directory can
//! tell "temporarily unreachable" from "was never announced."
//!
//! Everything here is best-effort: a missing overlay address suspends
//! announcements, and transport failures are logged and absorbed. The
//! relays themselves keep working either way.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod identity;

pub use client::{RegistryClient, RegistryError, start_heartbeat};
pub use identity::{DEFAULT_OVERLAY_PREFIX, OverlayIdentity};
