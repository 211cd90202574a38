//! Error types for relay operations.

use thiserror::Error;

/// Errors produced while starting, running, or stopping relays
#[derive(Debug, Error)]
pub enum RelayError {
    /// A rendezvous port candidate was already bound on this host
    #[error("port {0} already in use")]
    PortConflict(u16),

    /// Every candidate in the retry ladder failed to bind
    #[error("no rendezvous port available for {device_ip}:{device_port}")]
    AllocationFailed {
        /// Device address the allocation was attempted for
        device_ip: std::net::Ipv4Addr,
        /// Device service port
        device_port: u16,
    },

    /// Outbound connection to the device failed for one relayed connection
    #[error("upstream connect to {addr} failed: {source}")]
    UpstreamConnectFailed {
        /// Device address the connection was headed for
        addr: std::net::SocketAddr,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// I/O error outside the bind/connect paths
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
