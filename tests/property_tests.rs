//! Cross-crate properties: port allocation feeding the rewrite contract.

use std::net::Ipv4Addr;

use proptest::prelude::*;

use kvmlink_relay::PortBands;
use kvmlink_rewrite::{RewriteTarget, rewrite_sdp};

proptest! {
    /// The UDP rendezvous port substituted into candidates is always the
    /// one allocated alongside the TCP port the peer connected through.
    #[test]
    fn rewritten_candidates_use_the_allocated_udp_port(
        d in 0u8..=255,
        device_port in 81u16..=65535,
        media_port in 1u16..=65535,
    ) {
        let device_ip = Ipv4Addr::new(192, 168, 1, d);
        let relay_ip: Ipv4Addr = "10.147.17.5".parse().unwrap();
        let pair = PortBands::default().first_candidate(device_ip, device_port);

        let body = format!(
            "c=IN IP4 {device_ip}\r\na=candidate:1 1 udp 1 {device_ip} {media_port} typ host\r\n"
        );
        let outcome = rewrite_sdp(&body, &RewriteTarget {
            device_ip,
            relay_ip,
            udp_listen_port: pair.udp,
        });

        prop_assert!(!outcome.text.contains(&device_ip.to_string()));
        let expected = format!("{relay_ip} {}", pair.udp);
        prop_assert!(outcome.text.contains(&expected));
        prop_assert_eq!(outcome.displaced_ports, vec![media_port]);
    }

    /// Rewriting never changes the number or order of lines.
    #[test]
    fn rewrite_preserves_message_shape(lines in prop::collection::vec("[ -~]{0,60}", 0..20)) {
        let body = lines.join("\r\n");
        let target = RewriteTarget {
            device_ip: "192.168.68.100".parse().unwrap(),
            relay_ip: "10.147.17.5".parse().unwrap(),
            udp_listen_port: 28100,
        };
        let outcome = rewrite_sdp(&body, &target);
        prop_assert_eq!(outcome.text.matches("\r\n").count(), body.matches("\r\n").count());
    }
}
