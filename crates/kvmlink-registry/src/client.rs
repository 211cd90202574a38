//! Registration and heartbeat client for the directory service.

use std::sync::Arc;
use std::time::Duration;

use kvmlink_relay::{RelayEntry, RelayManager};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::identity::OverlayIdentity;

/// Errors talking to the directory service.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Transport-level failure
    #[error("directory request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Directory answered with a non-success status
    #[error("directory rejected request with status {0}")]
    BadStatus(reqwest::StatusCode),
}

/// One announced device within a [`RegistrationRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Device address on its private LAN
    pub kvm_local_ip: String,
    /// Device control/signaling port
    pub kvm_port: u16,
    /// Display name
    pub kvm_name: String,
    /// TCP rendezvous port on the relay host
    pub relay_port: u16,
    /// UDP media rendezvous port on the relay host
    pub udp_relay_port: u16,
}

/// Snapshot of every live relay, announced once per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationRecord {
    /// Announced devices
    pub devices: Vec<DeviceRecord>,
    /// The relay host's overlay address
    pub relay_zt_ip: String,
    /// Free-text location tag
    pub location: String,
}

/// Periodic liveness announcement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRecord {
    /// The relay host's overlay address
    pub relay_zt_ip: String,
}

/// Client for the external directory service.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    /// Create a client for the directory at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::RequestFailed`] if the HTTP client
    /// cannot be constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Announce the currently running relays.
    ///
    /// Skips silently when there are no entries or no overlay identity.
    /// Failures are logged and otherwise ignored; the host application
    /// simply calls this again next session.
    pub async fn register(
        &self,
        entries: &[Arc<RelayEntry>],
        identity: Option<OverlayIdentity>,
        location: &str,
    ) {
        if entries.is_empty() {
            debug!("no running relays, skipping registration");
            return;
        }
        let Some(identity) = identity else {
            debug!("no overlay identity, skipping registration");
            return;
        };

        let record = RegistrationRecord {
            devices: entries
                .iter()
                .map(|entry| DeviceRecord {
                    kvm_local_ip: entry.device_ip.to_string(),
                    kvm_port: entry.device_port,
                    kvm_name: entry.device_name.clone(),
                    relay_port: entry.tcp_listen_port,
                    udp_relay_port: entry.udp_listen_port,
                })
                .collect(),
            relay_zt_ip: identity.to_string(),
            location: location.to_string(),
        };

        match self.post_registration(&record).await {
            Ok(()) => info!(devices = record.devices.len(), "registered with directory"),
            Err(e) => warn!(error = %e, "registration failed"),
        }
    }

    /// Send one liveness heartbeat.
    ///
    /// # Errors
    ///
    /// Returns the transport or status error; the heartbeat loop
    /// swallows it.
    pub async fn heartbeat(&self, identity: OverlayIdentity) -> Result<(), RegistryError> {
        let record = HeartbeatRecord {
            relay_zt_ip: identity.to_string(),
        };
        let response = self
            .http
            .post(format!("{}/api/heartbeat", self.base_url))
            .json(&record)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RegistryError::BadStatus(response.status()));
        }
        Ok(())
    }

    async fn post_registration(&self, record: &RegistrationRecord) -> Result<(), RegistryError> {
        let response = self
            .http
            .post(format!("{}/api/register", self.base_url))
            .json(record)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RegistryError::BadStatus(response.status()));
        }
        Ok(())
    }
}

/// Spawn the heartbeat loop.
///
/// Every `interval`, if at least one relay is running and the overlay
/// identity is discoverable, posts a [`HeartbeatRecord`]. Transport
/// errors are logged and swallowed; the loop never stops itself.
pub fn start_heartbeat(
    client: Arc<RegistryClient>,
    manager: Arc<RelayManager>,
    overlay_prefix: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            if manager.relay_count() == 0 {
                continue;
            }
            let Some(identity) = OverlayIdentity::discover(&overlay_prefix) else {
                debug!("heartbeat suspended, no overlay identity");
                continue;
            };
            if let Err(e) = client.heartbeat(identity).await {
                warn!(error = %e, "heartbeat failed");
            }
        }
    })
}
