//! Candidate and SDP address rewriting.
//!
//! Line-oriented: ICE candidate attributes are rewritten token-wise, SDP
//! bodies line by line with original line endings preserved. Addresses
//! that are unspecified (`0.0.0.0`), loopback, or already the relay's
//! overlay address are left untouched.

use std::net::Ipv4Addr;

/// Addresses involved in a rewrite.
#[derive(Debug, Clone, Copy)]
pub struct RewriteTarget {
    /// The device's private LAN address, as it appears in negotiation
    /// messages
    pub device_ip: Ipv4Addr,
    /// The relay host's overlay address that replaces it
    pub relay_ip: Ipv4Addr,
    /// The relay's UDP media rendezvous port, substituted into UDP
    /// candidate entries
    pub udp_listen_port: u16,
}

/// Result of rewriting one negotiation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// The rewritten message text
    pub text: String,
    /// Device-side UDP ports displaced by the rewrite, in first-seen
    /// order, de-duplicated. Each must be reported to the relay's
    /// port-learning path.
    pub displaced_ports: Vec<u16>,
}

impl RewriteTarget {
    /// Whether an address found in a message should be rewritten.
    fn should_rewrite(&self, addr: Ipv4Addr) -> bool {
        !addr.is_unspecified() && !addr.is_loopback() && addr != self.relay_ip
            && addr == self.device_ip
    }
}

/// Rewrite one ICE candidate attribute line.
///
/// Accepts both the bare `candidate:...` form and the SDP `a=candidate:`
/// attribute. Returns the rewritten line and, when a UDP candidate's
/// port was displaced, the original device-side port.
///
/// Lines that do not parse as candidates, or whose address is not the
/// device's, come back unchanged.
#[must_use]
pub fn rewrite_candidate_line(line: &str, target: &RewriteTarget) -> (String, Option<u16>) {
    // candidate:<foundation> <component> <transport> <priority> <addr> <port> typ <type> ...
    let mut tokens: Vec<&str> = line.split(' ').collect();
    if tokens.len() < 6 || !tokens[0].trim_start_matches("a=").starts_with("candidate:") {
        return (line.to_string(), None);
    }

    let Ok(addr) = tokens[4].parse::<Ipv4Addr>() else {
        return (line.to_string(), None);
    };
    if !target.should_rewrite(addr) {
        return (line.to_string(), None);
    }

    let relay_ip = target.relay_ip.to_string();
    tokens[4] = &relay_ip;

    let udp_port;
    let mut displaced = None;
    if tokens[2].eq_ignore_ascii_case("udp") {
        displaced = tokens[5].parse::<u16>().ok().filter(|p| *p != 0);
        udp_port = target.udp_listen_port.to_string();
        tokens[5] = &udp_port;
    }

    (tokens.join(" "), displaced)
}

/// Rewrite a full SDP body.
///
/// Handles `c=` connection lines, the `o=` origin line, and embedded
/// `a=candidate:` attributes. Everything else passes through unchanged.
#[must_use]
pub fn rewrite_sdp(body: &str, target: &RewriteTarget) -> RewriteOutcome {
    let mut text = String::with_capacity(body.len());
    let mut displaced_ports = Vec::new();

    for raw in body.split_inclusive('\n') {
        let (line, ending) = split_line_ending(raw);

        let rewritten = if line.starts_with("a=candidate:") || line.starts_with("candidate:") {
            let (out, displaced) = rewrite_candidate_line(line, target);
            if let Some(port) = displaced {
                if !displaced_ports.contains(&port) {
                    displaced_ports.push(port);
                }
            }
            out
        } else if line.starts_with("c=") || line.starts_with("o=") {
            rewrite_address_tokens(line, target)
        } else {
            line.to_string()
        };

        text.push_str(&rewritten);
        text.push_str(ending);
    }

    RewriteOutcome {
        text,
        displaced_ports,
    }
}

/// Replace any whitespace-delimited token equal to the device address.
/// Covers `c=IN IP4 <addr>` and `o=- <sid> <ver> IN IP4 <addr>`.
fn rewrite_address_tokens(line: &str, target: &RewriteTarget) -> String {
    line.split(' ')
        .map(|token| match token.parse::<Ipv4Addr>() {
            Ok(addr) if target.should_rewrite(addr) => target.relay_ip.to_string(),
            _ => token.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_line_ending(raw: &str) -> (&str, &str) {
    if let Some(stripped) = raw.strip_suffix("\r\n") {
        (stripped, "\r\n")
    } else if let Some(stripped) = raw.strip_suffix('\n') {
        (stripped, "\n")
    } else {
        (raw, "")
    }
}
