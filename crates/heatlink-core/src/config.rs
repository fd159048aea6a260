// ── Runtime device configuration ──
//
// Describes how to reach one heat pump and how to poll it. Carries
// credentials and tuning but never touches disk; the CLI builds a
// `DeviceConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use heatlink_api::{ClientConfig, RetryPolicy, TlsMode, TransportConfig, WriteMode};

use crate::backoff::BackoffPolicy;
use crate::transform::DEFAULT_SENTINEL_THRESHOLD;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Pick from the host: LAN addresses accept self-signed certificates.
    #[default]
    Auto,
    /// System CA store (strict).
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification.
    DangerAcceptInvalid,
}

/// Configuration for polling a single device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Module URL (e.g., `http://192.168.1.50`).
    pub url: Url,
    pub username: String,
    pub password: SecretString,
    pub tls: TlsVerification,
    pub allow_basic_fallback: bool,
    pub write_access: bool,
    pub write_mode: WriteMode,
    pub chunk_size: usize,
    pub max_retries: u32,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub failure_threshold: u32,
    pub extended_backoff: Duration,
    /// Samples older than this are reported unavailable.
    pub max_data_age: Duration,
    /// Temperatures at or below this are treated as "no sensor".
    pub sentinel_threshold: f64,
}

impl DeviceConfig {
    pub fn new(url: Url, username: impl Into<String>, password: SecretString) -> Self {
        let retry = RetryPolicy::default();
        let backoff = BackoffPolicy::default();
        Self {
            url,
            username: username.into(),
            password,
            tls: TlsVerification::default(),
            allow_basic_fallback: false,
            write_access: false,
            write_mode: WriteMode::default(),
            chunk_size: 25,
            max_retries: retry.max_retries,
            timeout: TransportConfig::default().timeout,
            retry_base_delay: retry.base_delay,
            retry_max_delay: retry.max_delay,
            poll_interval: backoff.base_interval,
            max_poll_interval: backoff.max_interval,
            failure_threshold: backoff.failure_threshold,
            extended_backoff: backoff.extended_backoff,
            max_data_age: Duration::from_secs(120),
            sentinel_threshold: DEFAULT_SENTINEL_THRESHOLD,
        }
    }

    /// Settings for the device client.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.url.clone(), &self.username, self.password.clone());
        config.allow_basic_fallback = self.allow_basic_fallback;
        config.write_access = self.write_access;
        config.write_mode = self.write_mode;
        config.chunk_size = self.chunk_size;
        config.retry = RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            ..config.retry
        };
        config.transport.timeout = self.timeout;
        if let Some(tls) = self.tls_mode() {
            config.transport.tls = tls;
        }
        config
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_interval: self.poll_interval,
            max_interval: self.max_poll_interval,
            failure_threshold: self.failure_threshold.max(1),
            extended_backoff: self.extended_backoff,
        }
    }

    /// Explicit TLS mode, or `None` to keep the host-derived default.
    fn tls_mode(&self) -> Option<TlsMode> {
        match &self.tls {
            TlsVerification::Auto => None,
            TlsVerification::SystemDefaults => Some(TlsMode::System),
            TlsVerification::CustomCa(path) => Some(TlsMode::CustomCa(path.clone())),
            TlsVerification::DangerAcceptInvalid => Some(TlsMode::DangerAcceptInvalid),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(url: &str) -> DeviceConfig {
        DeviceConfig::new(url.parse().unwrap(), "admin", SecretString::from("pw"))
    }

    #[test]
    fn defaults() {
        let c = config("http://192.168.1.50");
        assert_eq!(c.chunk_size, 25);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.timeout, Duration::from_secs(10));
        assert_eq!(c.poll_interval, Duration::from_secs(30));
        assert_eq!(c.failure_threshold, 5);
        assert_eq!(c.extended_backoff, Duration::from_secs(300));
        assert!((c.sentinel_threshold - -80.0).abs() < f64::EPSILON);
        assert!(!c.write_access);
    }

    #[test]
    fn client_config_carries_tuning() {
        let mut c = config("https://heatpump.example.com");
        c.chunk_size = 10;
        c.max_retries = 1;
        c.write_access = true;
        c.timeout = Duration::from_secs(3);
        let cc = c.client_config();
        assert_eq!(cc.chunk_size, 10);
        assert_eq!(cc.retry.max_retries, 1);
        assert!(cc.write_access);
        assert_eq!(cc.transport.timeout, Duration::from_secs(3));
        assert_eq!(cc.transport.tls, TlsMode::System);
    }

    #[test]
    fn tls_auto_follows_host() {
        assert_eq!(
            config("https://10.0.0.5").client_config().transport.tls,
            TlsMode::DangerAcceptInvalid
        );
        let mut c = config("https://10.0.0.5");
        c.tls = TlsVerification::SystemDefaults;
        assert_eq!(c.client_config().transport.tls, TlsMode::System);
    }
}
