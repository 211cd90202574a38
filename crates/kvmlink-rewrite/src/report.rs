//! Media-port reporting to the relay's port-learning path.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Errors reporting a learned media port to the relay.
///
/// Non-fatal by contract: media may briefly drop until a later report
/// succeeds, so callers log and move on.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Transport-level failure reaching the relay
    #[error("port report request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Relay answered with a non-success status
    #[error("port report rejected with status {0}")]
    BadStatus(reqwest::StatusCode),
}

/// Reports displaced device-side media ports to one relay, once per
/// distinct value per session.
///
/// A renegotiated session that picks a new ephemeral port produces a new
/// distinct value and goes through; repeats of an already-reported port
/// are suppressed. Failed reports are not recorded, so the next attempt
/// for the same port retries.
pub struct PortReporter {
    http: reqwest::Client,
    relay_ip: Ipv4Addr,
    tcp_listen_port: u16,
    reported: Mutex<HashSet<u16>>,
}

impl PortReporter {
    /// Create a reporter for one relay rendezvous address.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::RequestFailed`] if the HTTP client cannot
    /// be constructed.
    pub fn new(relay_ip: Ipv4Addr, tcp_listen_port: u16) -> Result<Self, ReportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            relay_ip,
            tcp_listen_port,
            reported: Mutex::new(HashSet::new()),
        })
    }

    /// Report one device-side media port, unless already reported this
    /// session.
    ///
    /// # Errors
    ///
    /// Returns the transport or status error; the port stays unreported
    /// so a later call retries it.
    pub async fn report(&self, port: u16) -> Result<(), ReportError> {
        if self.already_reported(port) {
            return Ok(());
        }

        let url = format!(
            "http://{}:{}/_relay/set-media-port?port={port}",
            self.relay_ip, self.tcp_listen_port
        );
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ReportError::BadStatus(response.status()));
        }

        self.mark_reported(port);
        debug!(port, relay = %self.relay_ip, "media port reported");
        Ok(())
    }

    /// Report every port displaced by a rewrite, logging failures and
    /// carrying on. The peer never blocks on reporting.
    pub async fn report_all(&self, ports: &[u16]) {
        for &port in ports {
            if let Err(e) = self.report(port).await {
                warn!(port, error = %e, "media port report failed");
            }
        }
    }

    fn already_reported(&self, port: u16) -> bool {
        self.reported.lock().is_ok_and(|set| set.contains(&port))
    }

    fn mark_reported(&self, port: u16) {
        if let Ok(mut set) = self.reported.lock() {
            set.insert(port);
        }
    }
}
