//! TCP stream relay with in-band port learning.
//!
//! Fronts a device's control/signaling web service at the TCP rendezvous
//! port. Every accepted connection is previewed: a request for the
//! reserved control path is answered locally and updates the entry's
//! media target port; anything else is treated as an opaque byte stream
//! and spliced to the device.
//!
//! Stopping the relay closes the listening socket only. Connections
//! already being spliced keep their own sockets and drain naturally.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::entry::RelayEntry;
use crate::error::{RelayError, Result};

/// Reserved control path intercepted by the relay, never forwarded.
///
/// The remote peer reports the device's negotiated media port here:
/// `GET /_relay/set-media-port?port=<uint16>`.
pub const CONTROL_PATH: &str = "/_relay/set-media-port";

/// Fixed success response for the control path. The peer only checks for
/// HTTP success, so this stays stable.
const CONTROL_OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";

/// Response for a control request with a missing or unparsable port.
const CONTROL_BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Bytes read from a new connection before deciding how to handle it.
const PREVIEW_LIMIT: usize = 1024;

/// Classification of a new inbound connection.
enum Preview {
    /// Control-path request; payload is the parsed `port` parameter
    Control(Option<u16>),
    /// Opaque traffic to be spliced to the device
    Opaque,
}

/// Listener half of a per-device relay.
///
/// Owns the accept-loop task; dropping or stopping it closes the
/// listening socket, which is the cancellation mechanism.
#[derive(Debug)]
pub struct StreamRelay {
    accept_task: JoinHandle<()>,
}

impl StreamRelay {
    /// Bind the entry's TCP rendezvous port and start accepting.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PortConflict`] when the port is already
    /// bound, so the manager can advance to the next candidate.
    pub async fn start(entry: Arc<RelayEntry>, connect_timeout: Duration) -> Result<Self> {
        let port = entry.tcp_listen_port;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|_| RelayError::PortConflict(port))?;

        debug!(port, device = %entry.device_ip, "stream relay listening");
        let accept_task = tokio::spawn(accept_loop(listener, entry, connect_timeout));
        Ok(Self { accept_task })
    }

    /// Close the listening socket. In-flight connections are not touched.
    pub fn stop(&self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, entry: Arc<RelayEntry>, connect_timeout: Duration) {
    loop {
        match listener.accept().await {
            Ok((inbound, peer)) => {
                let entry = entry.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(inbound, peer, entry, connect_timeout).await {
                        debug!(%peer, error = %e, "relayed connection ended with error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Handle one inbound connection: intercept the control path or splice
/// everything else to the device.
async fn handle_connection(
    mut inbound: TcpStream,
    peer: SocketAddr,
    entry: Arc<RelayEntry>,
    connect_timeout: Duration,
) -> Result<()> {
    let preview = read_preview(&mut inbound).await?;

    match classify(&preview) {
        Preview::Control(Some(port)) => {
            entry.set_udp_target_port(port);
            debug!(%peer, port, device = %entry.device_ip, "media target port learned");
            inbound.write_all(CONTROL_OK).await?;
            inbound.shutdown().await?;
            Ok(())
        }
        Preview::Control(None) => {
            inbound.write_all(CONTROL_BAD_REQUEST).await?;
            inbound.shutdown().await?;
            Ok(())
        }
        Preview::Opaque => splice_to_device(inbound, peer, entry, preview, connect_timeout).await,
    }
}

/// Read the start of the request until the first line is complete, EOF,
/// or the preview limit is reached. May include bytes past the first
/// line; they are replayed to the device for opaque connections.
async fn read_preview(inbound: &mut TcpStream) -> Result<Vec<u8>> {
    let mut preview = Vec::with_capacity(256);
    let mut buf = [0u8; 256];

    while !preview.windows(2).any(|w| w == b"\r\n") && preview.len() < PREVIEW_LIMIT {
        let n = inbound.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        preview.extend_from_slice(&buf[..n]);
    }
    Ok(preview)
}

/// Decide whether a previewed connection is a control request.
fn classify(preview: &[u8]) -> Preview {
    let line_end = preview
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(preview.len());
    let Ok(line) = std::str::from_utf8(&preview[..line_end]) else {
        return Preview::Opaque;
    };

    let mut parts = line.split_whitespace();
    if parts.next() != Some("GET") {
        return Preview::Opaque;
    }
    let Some(target) = parts.next() else {
        return Preview::Opaque;
    };
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if !path.starts_with(CONTROL_PATH) {
        return Preview::Opaque;
    }

    let port = query
        .split('&')
        .find_map(|kv| kv.strip_prefix("port="))
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|p| *p != 0);
    Preview::Control(port)
}

/// Open the device leg and splice bidirectionally until both directions
/// drain. EOF on one side half-closes the other side's write direction,
/// so buffered data in flight still arrives.
async fn splice_to_device(
    inbound: TcpStream,
    peer: SocketAddr,
    entry: Arc<RelayEntry>,
    preview: Vec<u8>,
    connect_timeout: Duration,
) -> Result<()> {
    let device_addr = SocketAddr::V4(SocketAddrV4::new(entry.device_ip, entry.device_port));

    let outbound = tokio::time::timeout(connect_timeout, TcpStream::connect(device_addr))
        .await
        .map_err(|_| RelayError::UpstreamConnectFailed {
            addr: device_addr,
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|e| RelayError::UpstreamConnectFailed {
            addr: device_addr,
            source: e,
        })?;

    // Forwarded traffic includes latency-sensitive control input.
    let _ = inbound.set_nodelay(true);
    let _ = outbound.set_nodelay(true);

    let (mut peer_rd, mut peer_wr) = inbound.into_split();
    let (mut dev_rd, mut dev_wr) = outbound.into_split();

    debug!(%peer, device = %device_addr, "splicing connection");

    let to_device = tokio::spawn(async move {
        let mut result = dev_wr.write_all(&preview).await;
        if result.is_ok() {
            result = tokio::io::copy(&mut peer_rd, &mut dev_wr).await.map(|_| ());
        }
        let _ = dev_wr.shutdown().await;
        result
    });
    let to_peer = tokio::spawn(async move {
        let result = tokio::io::copy(&mut dev_rd, &mut peer_wr).await;
        let _ = peer_wr.shutdown().await;
        result
    });

    let _ = tokio::join!(to_device, to_peer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_port(line: &str) -> Option<u16> {
        match classify(line.as_bytes()) {
            Preview::Control(port) => port,
            Preview::Opaque => panic!("expected control request"),
        }
    }

    #[test]
    fn parses_control_request() {
        let port = classify_port("GET /_relay/set-media-port?port=55123 HTTP/1.1\r\nHost: x\r\n");
        assert_eq!(port, Some(55123));
    }

    #[test]
    fn parses_port_among_other_parameters() {
        let port = classify_port("GET /_relay/set-media-port?session=3&port=60001 HTTP/1.1\r\n");
        assert_eq!(port, Some(60001));
    }

    #[test]
    fn control_request_without_port_is_rejected_not_forwarded() {
        assert_eq!(classify_port("GET /_relay/set-media-port HTTP/1.1\r\n"), None);
        assert_eq!(
            classify_port("GET /_relay/set-media-port?port=junk HTTP/1.1\r\n"),
            None
        );
        assert_eq!(
            classify_port("GET /_relay/set-media-port?port=0 HTTP/1.1\r\n"),
            None
        );
        assert_eq!(
            classify_port("GET /_relay/set-media-port?port=70000 HTTP/1.1\r\n"),
            None
        );
    }

    #[test]
    fn ordinary_requests_are_opaque() {
        assert!(matches!(
            classify(b"GET /stream HTTP/1.1\r\nHost: kvm\r\n"),
            Preview::Opaque
        ));
        assert!(matches!(
            classify(b"POST /_relay/set-media-port?port=1 HTTP/1.1\r\n"),
            Preview::Opaque
        ));
        assert!(matches!(classify(b"\x16\x03\x01\x02\x00binary"), Preview::Opaque));
        assert!(matches!(classify(b""), Preview::Opaque));
    }
}
