//! UDP media relay.
//!
//! Forwards best-effort media datagrams between the remote peer and the
//! device. The device-side destination port is not configured; it is
//! learned through the control path intercepted by the stream relay and
//! read fresh from the [`RelayEntry`] on every datagram.
//!
//! One remote peer controls a device at a time, so a single
//! "last external sender" slot is all the return-path state the relay
//! keeps. Datagrams arriving before the target port is learned (or
//! before any external sender is known) are dropped: media is lossy and
//! stale packets are worthless, so there is no queueing.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::entry::RelayEntry;
use crate::error::{RelayError, Result};

/// Maximum UDP datagram size.
const MAX_DATAGRAM: usize = 65535;

/// Forwarder for one device's media rendezvous port.
#[derive(Debug)]
pub struct MediaRelay {
    forward_task: JoinHandle<()>,
}

impl MediaRelay {
    /// Bind the entry's UDP rendezvous port and start forwarding.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PortConflict`] when the port is already
    /// bound, so the manager can advance to the next candidate pair.
    pub async fn start(entry: Arc<RelayEntry>) -> Result<Self> {
        let port = entry.udp_listen_port;
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|_| RelayError::PortConflict(port))?;

        debug!(port, device = %entry.device_ip, "media relay listening");
        let forward_task = tokio::spawn(forward_loop(socket, entry));
        Ok(Self { forward_task })
    }

    /// Close the socket and stop forwarding.
    pub fn stop(&self) {
        self.forward_task.abort();
    }
}

async fn forward_loop(socket: UdpSocket, entry: Arc<RelayEntry>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut last_sender: Option<SocketAddr> = None;

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "media relay receive failed");
                continue;
            }
        };
        let data = &buf[..len];
        let target_port = entry.udp_target_port();

        if is_from_device(src, &entry, target_port) {
            // Device-side media, return it to the active peer if known.
            if let Some(peer) = last_sender {
                if socket.send_to(data, peer).await.is_ok() {
                    entry.count_to_peer();
                }
            }
        } else if let Some(port) = target_port {
            // Admin-side media; the newest sender owns the return path.
            let device = SocketAddr::V4(SocketAddrV4::new(entry.device_ip, port));
            if socket.send_to(data, device).await.is_ok() {
                entry.count_to_device();
            }
            last_sender = Some(src);
        }
        // Target port not learned yet: drop silently.
    }
}

/// A datagram is device-side when it originates from the device's
/// address at the currently learned media port.
fn is_from_device(src: SocketAddr, entry: &RelayEntry, target_port: Option<u16>) -> bool {
    src.ip() == std::net::IpAddr::V4(entry.device_ip) && Some(src.port()) == target_port
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> RelayEntry {
        RelayEntry::new("192.168.68.50".parse().unwrap(), 80, "kvm", 18050, 28050)
    }

    #[test]
    fn device_match_requires_learned_port() {
        let e = entry();
        let src: SocketAddr = "192.168.68.50:55123".parse().unwrap();
        assert!(!is_from_device(src, &e, e.udp_target_port()));

        e.set_udp_target_port(55123);
        assert!(is_from_device(src, &e, e.udp_target_port()));
    }

    #[test]
    fn device_match_requires_exact_source() {
        let e = entry();
        e.set_udp_target_port(55123);
        let wrong_port: SocketAddr = "192.168.68.50:55124".parse().unwrap();
        let wrong_ip: SocketAddr = "192.168.68.51:55123".parse().unwrap();
        assert!(!is_from_device(wrong_port, &e, e.udp_target_port()));
        assert!(!is_from_device(wrong_ip, &e, e.udp_target_port()));
    }
}
