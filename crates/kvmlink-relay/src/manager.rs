//! Relay manager: the owner of the per-device entry table.
//!
//! All lifecycle mutation (start, stop, stop-all) goes through the
//! manager. Relay tasks never touch the table; they only hold the
//! `Arc<RelayEntry>` for their own device, whose single mutable field
//! (the learned media port) carries its own synchronization so unrelated
//! devices never serialize through a shared lock.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::{DeviceKey, RelayEntry};
use crate::error::{RelayError, Result};
use crate::media::MediaRelay;
use crate::ports::PortBands;
use crate::stream::StreamRelay;

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct RelayManagerConfig {
    /// Rendezvous port bands
    pub bands: PortBands,
    /// Connect timeout for the device leg of relayed TCP connections
    pub connect_timeout: Duration,
}

impl Default for RelayManagerConfig {
    fn default() -> Self {
        Self {
            bands: PortBands::default(),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Running relay pair for one device.
struct RelayHandle {
    entry: Arc<RelayEntry>,
    stream: StreamRelay,
    media: MediaRelay,
}

/// Read-only projection of one entry for display and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySnapshot {
    /// Device address on the private LAN
    pub device_ip: Ipv4Addr,
    /// Device control/signaling port
    pub device_port: u16,
    /// Display name
    pub device_name: String,
    /// TCP rendezvous port
    pub tcp_listen_port: u16,
    /// UDP rendezvous port
    pub udp_listen_port: u16,
    /// Learned device-side media port, if any
    pub udp_target_port: Option<u16>,
    /// Externally reachable URL, present once the overlay address is known
    pub url: Option<String>,
    /// Datagrams forwarded toward the device
    pub datagrams_to_device: u64,
    /// Datagrams forwarded back toward the remote peer
    pub datagrams_to_peer: u64,
}

/// Orchestrates port allocation and the stream/media relay pair per
/// device.
pub struct RelayManager {
    config: RelayManagerConfig,
    entries: DashMap<DeviceKey, RelayHandle>,
    /// Serializes start/stop calls from the host application. Never held
    /// by relay tasks.
    lifecycle: Mutex<()>,
}

impl RelayManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new(config: RelayManagerConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            lifecycle: Mutex::new(()),
        }
    }

    /// Start relaying a device, or return the existing rendezvous port.
    ///
    /// Idempotent per `(device_ip, device_port)`: a second call returns
    /// the already-allocated TCP port without creating a duplicate.
    /// Walks the candidate ladder and returns the first pair that binds
    /// on both legs.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AllocationFailed`] when every candidate
    /// pair fails to bind; no entry is left behind in that case.
    pub async fn start_relay(
        &self,
        device_ip: Ipv4Addr,
        device_port: u16,
        device_name: &str,
    ) -> Result<u16> {
        let _guard = self.lifecycle.lock().await;

        let key = (device_ip, device_port);
        if let Some(existing) = self.entries.get(&key) {
            return Ok(existing.entry.tcp_listen_port);
        }

        for pair in self.config.bands.candidates(device_ip, device_port) {
            let entry = Arc::new(RelayEntry::new(
                device_ip,
                device_port,
                device_name,
                pair.tcp,
                pair.udp,
            ));

            let stream = match StreamRelay::start(entry.clone(), self.config.connect_timeout).await
            {
                Ok(stream) => stream,
                Err(RelayError::PortConflict(port)) => {
                    debug!(port, "candidate in use, trying next");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let media = match MediaRelay::start(entry.clone()).await {
                Ok(media) => media,
                Err(RelayError::PortConflict(port)) => {
                    debug!(port, "udp candidate in use, trying next pair");
                    stream.stop();
                    continue;
                }
                Err(e) => {
                    stream.stop();
                    return Err(e);
                }
            };

            info!(
                device = %device_ip,
                device_port,
                tcp = pair.tcp,
                udp = pair.udp,
                "relay started"
            );
            self.entries.insert(key, RelayHandle { entry, stream, media });
            return Ok(pair.tcp);
        }

        warn!(device = %device_ip, device_port, "all rendezvous candidates in use");
        Err(RelayError::AllocationFailed {
            device_ip,
            device_port,
        })
    }

    /// Stop relaying a device. Unknown keys are a no-op.
    ///
    /// Closes the listening sockets only; connections already being
    /// spliced drain naturally.
    pub async fn stop_relay(&self, device_ip: Ipv4Addr, device_port: u16) {
        let _guard = self.lifecycle.lock().await;
        if let Some((_, handle)) = self.entries.remove(&(device_ip, device_port)) {
            handle.stream.stop();
            handle.media.stop();
            handle.entry.mark_stopped();
            info!(device = %device_ip, device_port, "relay stopped");
        }
    }

    /// Stop every relay. Used on host application shutdown.
    pub async fn stop_all(&self) {
        let _guard = self.lifecycle.lock().await;
        let keys: Vec<DeviceKey> = self.entries.iter().map(|h| h.entry.key()).collect();
        for key in keys {
            if let Some((_, handle)) = self.entries.remove(&key) {
                handle.stream.stop();
                handle.media.stop();
                handle.entry.mark_stopped();
            }
        }
        info!("all relays stopped");
    }

    /// Snapshot of every running entry, with the reachable URL derived
    /// from the overlay address when one is known.
    #[must_use]
    pub fn list_relays(&self, overlay_ip: Option<Ipv4Addr>) -> Vec<RelaySnapshot> {
        self.entries
            .iter()
            .map(|handle| {
                let entry = &handle.entry;
                let (to_device, to_peer) = entry.datagram_counts();
                RelaySnapshot {
                    device_ip: entry.device_ip,
                    device_port: entry.device_port,
                    device_name: entry.device_name.clone(),
                    tcp_listen_port: entry.tcp_listen_port,
                    udp_listen_port: entry.udp_listen_port,
                    udp_target_port: entry.udp_target_port(),
                    url: overlay_ip.map(|ip| format!("http://{ip}:{}", entry.tcp_listen_port)),
                    datagrams_to_device: to_device,
                    datagrams_to_peer: to_peer,
                }
            })
            .collect()
    }

    /// Shared handles to every running entry, for registration.
    #[must_use]
    pub fn running_entries(&self) -> Vec<Arc<RelayEntry>> {
        self.entries.iter().map(|h| h.entry.clone()).collect()
    }

    /// Number of running relays.
    #[must_use]
    pub fn relay_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn start_is_idempotent_per_device() {
        let manager = RelayManager::new(RelayManagerConfig::default());
        let ip: Ipv4Addr = "127.0.0.21".parse().unwrap();

        let first = manager.start_relay(ip, 9100, "kvm-21").await.unwrap();
        let second = manager.start_relay(ip, 9100, "kvm-21").await.unwrap();
        assert_eq!(first, 19021);
        assert_eq!(first, second);
        assert_eq!(manager.relay_count(), 1);

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn conflict_advances_to_next_pair() {
        // Occupy the first TCP candidate so the ladder moves on.
        let _blocker = TcpListener::bind(("0.0.0.0", 19041)).await.unwrap();

        let manager = RelayManager::new(RelayManagerConfig::default());
        let ip: Ipv4Addr = "127.0.0.41".parse().unwrap();
        let port = manager.start_relay(ip, 9100, "kvm-41").await.unwrap();
        assert_eq!(port, 20041);

        let snapshot = &manager.list_relays(None)[0];
        assert_eq!(snapshot.tcp_listen_port, 20041);
        assert_eq!(snapshot.udp_listen_port, 30041);

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn exhausted_ladder_reports_allocation_failure() {
        let _b0 = TcpListener::bind(("0.0.0.0", 19051)).await.unwrap();
        let _b1 = TcpListener::bind(("0.0.0.0", 20051)).await.unwrap();
        let _b2 = TcpListener::bind(("0.0.0.0", 21051)).await.unwrap();

        let manager = RelayManager::new(RelayManagerConfig::default());
        let ip: Ipv4Addr = "127.0.0.51".parse().unwrap();
        let err = manager.start_relay(ip, 9100, "kvm-51").await.unwrap_err();
        assert!(matches!(err, RelayError::AllocationFailed { .. }));
        assert_eq!(manager.relay_count(), 0);
    }

    #[tokio::test]
    async fn stop_unknown_key_is_noop() {
        let manager = RelayManager::new(RelayManagerConfig::default());
        manager
            .stop_relay("127.0.0.61".parse().unwrap(), 9100)
            .await;
        assert_eq!(manager.relay_count(), 0);
    }

    #[tokio::test]
    async fn url_is_derived_from_overlay_address() {
        let manager = RelayManager::new(RelayManagerConfig::default());
        let ip: Ipv4Addr = "127.0.0.71".parse().unwrap();
        manager.start_relay(ip, 9100, "kvm-71").await.unwrap();

        let without = &manager.list_relays(None)[0];
        assert_eq!(without.url, None);

        let overlay: Ipv4Addr = "10.147.17.5".parse().unwrap();
        let with = &manager.list_relays(Some(overlay))[0];
        assert_eq!(with.url.as_deref(), Some("http://10.147.17.5:19071"));

        manager.stop_all().await;
    }
}
