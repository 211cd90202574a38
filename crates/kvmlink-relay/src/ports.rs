//! Rendezvous port allocation.
//!
//! Maps a device address to a deterministic rendezvous port pair so that
//! externally published relay addresses stay stable across restarts. The
//! last octet of the device's IPv4 address selects the offset within the
//! band; devices serving plain HTTP (port 80) land in the primary TCP
//! band, everything else in the alternate band. The UDP media port always
//! mirrors the TCP port's offset within the UDP band.
//!
//! Pure arithmetic, no I/O. Conflict handling (the +1000/+2000 retry
//! ladder) is driven by the [`manager`](crate::manager), which tries to
//! bind each candidate in order.

use std::net::Ipv4Addr;

/// Retry offsets applied to a candidate pair when binding fails.
///
/// The same offset is applied to both the TCP and UDP leg of an attempt,
/// so the pair published to peers always shares one offset.
pub const RETRY_OFFSETS: [u16; 3] = [0, 1000, 2000];

/// Base ports for the rendezvous bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBands {
    /// TCP band for devices serving on port 80
    pub tcp_base: u16,
    /// TCP band for devices serving on any other port
    pub alt_tcp_base: u16,
    /// UDP media band; offsets mirror the TCP candidate's offset from `tcp_base`
    pub udp_base: u16,
}

impl Default for PortBands {
    fn default() -> Self {
        Self {
            tcp_base: 18000,
            alt_tcp_base: 19000,
            udp_base: 28000,
        }
    }
}

/// One TCP/UDP rendezvous port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    /// Control/signaling rendezvous port
    pub tcp: u16,
    /// Media rendezvous port
    pub udp: u16,
}

impl PortBands {
    /// First candidate pair for a device, before any conflict retry.
    ///
    /// Deterministic: the same `(device_ip, device_port)` always yields
    /// the same pair.
    #[must_use]
    pub fn first_candidate(&self, device_ip: Ipv4Addr, device_port: u16) -> PortPair {
        let last = u16::from(device_ip.octets()[3]);
        let tcp = if device_port == 80 {
            self.tcp_base + last
        } else {
            self.alt_tcp_base + last
        };
        PortPair {
            tcp,
            udp: self.udp_for(tcp),
        }
    }

    /// All candidate pairs for a device, in ladder order.
    #[must_use]
    pub fn candidates(&self, device_ip: Ipv4Addr, device_port: u16) -> Vec<PortPair> {
        let first = self.first_candidate(device_ip, device_port);
        RETRY_OFFSETS
            .iter()
            .map(|off| PortPair {
                tcp: first.tcp + off,
                udp: first.udp + off,
            })
            .collect()
    }

    /// UDP media port paired with a TCP candidate: same offset from
    /// `tcp_base`, transposed into the UDP band.
    fn udp_for(&self, tcp_candidate: u16) -> u16 {
        tcp_candidate - self.tcp_base + self.udp_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bands() -> PortBands {
        PortBands::default()
    }

    #[test]
    fn http_device_lands_in_primary_band() {
        let pair = bands().first_candidate("192.168.68.100".parse().unwrap(), 80);
        assert_eq!(pair.tcp, 18100);
        assert_eq!(pair.udp, 28100);
    }

    #[test]
    fn non_http_device_lands_in_alternate_band() {
        let pair = bands().first_candidate("192.168.68.100".parse().unwrap(), 8080);
        assert_eq!(pair.tcp, 19100);
        assert_eq!(pair.udp, 29100);
    }

    #[test]
    fn ladder_keeps_tcp_and_udp_offsets_paired() {
        let candidates = bands().candidates("10.0.0.7".parse().unwrap(), 80);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0], PortPair { tcp: 18007, udp: 28007 });
        assert_eq!(candidates[1], PortPair { tcp: 19007, udp: 29007 });
        assert_eq!(candidates[2], PortPair { tcp: 20007, udp: 30007 });
    }

    #[test]
    fn custom_bands_are_honored() {
        let bands = PortBands {
            tcp_base: 40000,
            alt_tcp_base: 41000,
            udp_base: 50000,
        };
        let pair = bands.first_candidate("172.16.4.9".parse().unwrap(), 443);
        assert_eq!(pair.tcp, 41009);
        assert_eq!(pair.udp, 51009);
    }

    proptest! {
        #[test]
        fn candidate_is_deterministic(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255, port in 1u16..=65535) {
            let ip = Ipv4Addr::new(a, b, c, d);
            let first = bands().first_candidate(ip, port);
            let again = bands().first_candidate(ip, port);
            prop_assert_eq!(first, again);
        }

        #[test]
        fn offset_tracks_last_octet(d in 0u8..=255) {
            let ip = Ipv4Addr::new(192, 168, 1, d);
            let pair = bands().first_candidate(ip, 80);
            prop_assert_eq!(pair.tcp, 18000 + u16::from(d));
            prop_assert_eq!(pair.udp, 28000 + u16::from(d));
        }

        #[test]
        fn udp_leg_mirrors_tcp_offset(d in 0u8..=255, port in 1u16..=65535) {
            let ip = Ipv4Addr::new(10, 20, 30, d);
            for pair in bands().candidates(ip, port) {
                prop_assert_eq!(pair.udp - 28000, pair.tcp - 18000);
            }
        }
    }
}
