//! # kvmlink-relay
//!
//! Per-device relay infrastructure for the kvmlink overlay gateway.
//!
//! Each KVM device on the private LAN gets a pair of rendezvous ports on
//! this host: a TCP port that fronts the device's control/signaling web
//! service, and a companion UDP port that fronts its real-time media
//! stream. Remote operators connect to the rendezvous ports over the
//! overlay network; the relay splices TCP byte streams to the device and
//! forwards media datagrams to whichever ephemeral port the device's
//! current media session is using.
//!
//! The device-side media port is not known at startup. It is learned at
//! runtime through an in-band control request intercepted on the TCP
//! rendezvous port (see [`stream`]), and can be re-learned at any time
//! when the device negotiates a new session.
//!
//! ## Example
//!
//! ```no_run
//! use kvmlink_relay::{RelayManager, RelayManagerConfig};
//!
//! # async fn example() -> Result<(), kvmlink_relay::RelayError> {
//! let manager = RelayManager::new(RelayManagerConfig::default());
//! let device_ip = "192.168.68.100".parse().unwrap();
//! let port = manager.start_relay(device_ip, 80, "rack-1 kvm").await?;
//! println!("device reachable via rendezvous port {port}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod error;
pub mod manager;
pub mod media;
pub mod ports;
pub mod stream;

pub use entry::{DeviceKey, RelayEntry};
pub use error::RelayError;
pub use manager::{RelayManager, RelayManagerConfig, RelaySnapshot};
pub use ports::{PortBands, PortPair, RETRY_OFFSETS};
pub use stream::CONTROL_PATH;
