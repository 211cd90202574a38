//! Relay entry state shared between the manager and relay tasks.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

/// Identity key for a relayed device: `(device_ip, device_port)`.
///
/// Never changes after the entry is created.
pub type DeviceKey = (Ipv4Addr, u16);

/// State for one relayed device.
///
/// Shared as `Arc<RelayEntry>` between the manager's entry table and the
/// stream/media relay tasks. The tasks hold the `Arc`, never a copy:
/// [`udp_target_port`](Self::udp_target_port) must be observed fresh on
/// every inbound datagram, since the device picks a new ephemeral media
/// port for each negotiated session.
#[derive(Debug)]
pub struct RelayEntry {
    /// Device address on the private LAN
    pub device_ip: Ipv4Addr,
    /// Device control/signaling port
    pub device_port: u16,
    /// Display name reported to the directory service
    pub device_name: String,
    /// Externally reachable control/signaling rendezvous port
    pub tcp_listen_port: u16,
    /// Externally reachable media rendezvous port
    pub udp_listen_port: u16,
    /// Device-side media port, learned at runtime; 0 = not yet learned.
    ///
    /// Written by the port-learning control path, read on the datagram
    /// hot path. Last write wins; never reset to 0 while running.
    udp_target_port: AtomicU16,
    /// Lifecycle flag, cleared when the manager stops the entry
    running: AtomicBool,
    /// Datagrams forwarded toward the device
    datagrams_to_device: AtomicU64,
    /// Datagrams forwarded back toward the remote peer
    datagrams_to_peer: AtomicU64,
}

impl RelayEntry {
    /// Create a new running entry with an unlearned media target port.
    #[must_use]
    pub fn new(
        device_ip: Ipv4Addr,
        device_port: u16,
        device_name: impl Into<String>,
        tcp_listen_port: u16,
        udp_listen_port: u16,
    ) -> Self {
        Self {
            device_ip,
            device_port,
            device_name: device_name.into(),
            tcp_listen_port,
            udp_listen_port,
            udp_target_port: AtomicU16::new(0),
            running: AtomicBool::new(true),
            datagrams_to_device: AtomicU64::new(0),
            datagrams_to_peer: AtomicU64::new(0),
        }
    }

    /// Identity key of this entry.
    #[must_use]
    pub fn key(&self) -> DeviceKey {
        (self.device_ip, self.device_port)
    }

    /// Current device-side media port, if learned.
    #[must_use]
    pub fn udp_target_port(&self) -> Option<u16> {
        match self.udp_target_port.load(Ordering::Acquire) {
            0 => None,
            port => Some(port),
        }
    }

    /// Record a newly reported device-side media port. Last write wins.
    pub fn set_udp_target_port(&self, port: u16) {
        debug_assert_ne!(port, 0);
        self.udp_target_port.store(port, Ordering::Release);
    }

    /// Whether the manager still considers this entry live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Mark the entry stopped. Called only by the manager.
    pub(crate) fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Count one datagram forwarded to the device.
    pub(crate) fn count_to_device(&self) {
        self.datagrams_to_device.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one datagram forwarded back to the remote peer.
    pub(crate) fn count_to_peer(&self) {
        self.datagrams_to_peer.fetch_add(1, Ordering::Relaxed);
    }

    /// Forwarding counters: `(to_device, to_peer)`.
    #[must_use]
    pub fn datagram_counts(&self) -> (u64, u64) {
        (
            self.datagrams_to_device.load(Ordering::Relaxed),
            self.datagrams_to_peer.load(Ordering::Relaxed),
        )
    }
}
