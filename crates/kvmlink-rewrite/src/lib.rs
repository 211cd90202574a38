//! # kvmlink-rewrite
//!
//! Peer-side half of the relay contract.
//!
//! The device negotiates its media session with ICE candidates and an
//! SDP body that name its private LAN address, which the remote peer
//! cannot route to. Before a negotiation message reaches the peer's
//! media engine, every field naming the device's private address must be
//! rewritten to the relay host's overlay address, and UDP candidate
//! ports to the relay's media rendezvous port.
//!
//! Each device-side port displaced by a rewrite is reported back to the
//! relay through its port-learning control path, once per distinct value
//! per session, so the relay knows where to forward media datagrams.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod report;
pub mod sdp;

pub use report::{PortReporter, ReportError};
pub use sdp::{RewriteOutcome, RewriteTarget, rewrite_candidate_line, rewrite_sdp};
