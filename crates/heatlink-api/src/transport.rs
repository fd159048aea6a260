// Transport configuration for building the device's reqwest::Client.
//
// The LOM320 module is almost always reached over plain HTTP on a LAN, but
// some installs sit behind a TLS proxy with a self-signed certificate, so
// certificate policy is explicit and chosen from the host by default.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::redirect::Policy;

use crate::error::Error;

/// Idle pooled sockets kept per host. This bounds reuse, not concurrency;
/// a device client issues its chunk reads one at a time.
pub const MAX_IDLE_CONNECTIONS: usize = 6;

/// TLS verification mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (for self-signed LAN devices).
    DangerAcceptInvalid,
}

impl TlsMode {
    /// Default TLS mode for a host.
    ///
    /// Private, loopback, and link-local addresses plus `localhost` and
    /// `.local` names accept invalid certificates; anything else verifies.
    pub fn for_host(host: &str) -> Self {
        if is_local_host(host) {
            Self::DangerAcceptInvalid
        } else {
            Self::System
        }
    }
}

fn is_local_host(host: &str) -> bool {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_private() || ip.is_loopback() || ip.is_link_local(),
        Ok(IpAddr::V6(ip)) => {
            ip.is_loopback() || ip.is_unique_local() || ip.is_unicast_link_local()
        }
        Err(_) => {
            let lower = bare.to_ascii_lowercase();
            lower == "localhost" || lower.ends_with(".local")
        }
    }
}

/// Transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Per-attempt timeout. There is no outer timeout on a chunked read.
    pub timeout: Duration,
    /// Idle pooled sockets kept per host.
    pub max_idle_connections: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(10),
            max_idle_connections: MAX_IDLE_CONNECTIONS,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// Redirects are never followed automatically: the digest header is
    /// bound to the request URI and has to be re-attached by the caller.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(self.max_idle_connections)
            .redirect(Policy::none())
            .user_agent(concat!("heatlink/", env!("CARGO_PKG_VERSION")));

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path).map_err(|e| {
                    Error::configuration(format!("failed to read CA cert {}: {e}", path.display()))
                })?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::configuration(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))
    }
}
