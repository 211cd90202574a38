//! Overlay identity discovery.
//!
//! The relay host's stable overlay address is whichever local interface
//! address falls inside the overlay network's managed range. Discovery
//! is cheap and repeatable, so callers re-check on demand rather than
//! caching a value that goes stale when the overlay service restarts.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use tracing::debug;

/// Default address prefix of the overlay-managed range.
pub const DEFAULT_OVERLAY_PREFIX: &str = "10.147.";

/// This host's stable overlay address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayIdentity(pub Ipv4Addr);

impl fmt::Display for OverlayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl OverlayIdentity {
    /// Find the local interface address matching the overlay prefix.
    ///
    /// Returns `None` when no interface is in the overlay range, which
    /// suspends registration and heartbeats but is never an error.
    #[must_use]
    pub fn discover(prefix: &str) -> Option<Self> {
        let interfaces = get_if_addrs::get_if_addrs().ok()?;
        let found = interfaces.into_iter().find_map(|iface| match iface.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() && ip.to_string().starts_with(prefix) => Some(ip),
            _ => None,
        });

        match found {
            Some(ip) => {
                debug!(%ip, "overlay identity discovered");
                Some(Self(ip))
            }
            None => {
                debug!(prefix, "no interface in overlay range");
                None
            }
        }
    }

    /// The overlay address itself.
    #[must_use]
    pub fn ip(&self) -> Ipv4Addr {
        self.0
    }
}
