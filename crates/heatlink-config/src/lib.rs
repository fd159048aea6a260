//! Shared configuration for heatlink.
//!
//! TOML profiles, credential resolution (flag + env + plaintext), catalog
//! files, and translation to `heatlink_core::DeviceConfig`. The core never
//! reads files; this crate does it for it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use heatlink_core::{Catalog, DeviceConfig, EntityDescriptor, TlsVerification, WriteMode};

/// Environment variable consulted for the password when no flag is given.
pub const PASSWORD_ENV: &str = "HEATLINK_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("invalid catalog file {path}: {reason}")]
    Catalog { path: PathBuf, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named device profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, p)| (k.as_str(), p))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

/// Settings applied to every profile unless it overrides them.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Poll interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_chunk_size() -> usize {
    25
}
fn default_max_retries() -> u32 {
    3
}
fn default_poll_interval() -> u64 {
    30
}

/// A named device profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Host name or address, optionally with scheme and port
    /// (e.g. "192.168.1.50" or "https://heatpump.lan:8443").
    pub host: String,

    /// Use HTTPS when `host` carries no scheme.
    #[serde(default)]
    pub use_ssl: bool,

    /// Username for digest auth.
    pub username: Option<String>,

    /// Password (plaintext; prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Skip TLS verification.
    pub insecure: Option<bool>,

    pub allow_basic_fallback: Option<bool>,

    /// Enable writes to read-write registers.
    pub write_access: Option<bool>,

    pub write_mode: Option<WriteMode>,

    /// Path to a catalog TOML file; the built-in catalog is used when unset.
    pub catalog: Option<PathBuf>,

    // ── Tuning overrides ──
    pub timeout: Option<u64>,
    pub chunk_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub poll_interval: Option<u64>,
    pub max_poll_interval: Option<u64>,
    pub failure_threshold: Option<u32>,
    /// Seconds.
    pub extended_backoff: Option<u64>,
    /// Seconds.
    pub max_data_age: Option<u64>,
    /// °C at or below which a temperature counts as "no sensor".
    pub sentinel_threshold: Option<f64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "heatlink", "heatlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("heatlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path`, layered over defaults and under
/// `HEATLINK_`-prefixed environment variables (`__` separates nesting,
/// e.g. `HEATLINK_DEFAULTS__TIMEOUT=5`). A missing file is not an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HEATLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the password: CLI flag, then the profile's `password_env`
/// variable, then `HEATLINK_PASSWORD`, then plaintext in the profile.
pub fn resolve_password(
    profile: &Profile,
    profile_name: &str,
    flag: Option<SecretString>,
) -> Result<SecretString, ConfigError> {
    // 1. CLI flag
    if let Some(pw) = flag {
        return Ok(pw);
    }

    // 2. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 3. Global env var
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        return Ok(SecretString::from(pw));
    }

    // 4. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Base URL of the module described by `profile`.
pub fn profile_url(profile: &Profile) -> Result<Url, ConfigError> {
    let host = profile.host.trim();
    if host.is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: "must not be empty".into(),
        });
    }
    let raw = if host.contains("://") {
        host.to_owned()
    } else {
        let scheme = if profile.use_ssl { "https" } else { "http" };
        format!("{scheme}://{host}")
    };
    let url = Url::parse(&raw).map_err(|e| ConfigError::Validation {
        field: "host".into(),
        reason: format!("invalid URL {raw}: {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

/// Build a `DeviceConfig` from a profile and the global defaults.
pub fn profile_to_device_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    password_flag: Option<SecretString>,
) -> Result<DeviceConfig, ConfigError> {
    let url = profile_url(profile)?;
    let password = resolve_password(profile, profile_name, password_flag)?;
    let username = profile.username.clone().unwrap_or_else(|| "admin".into());

    let mut config = DeviceConfig::new(url, username, password);

    config.tls = if profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::Auto
    };

    config.allow_basic_fallback = profile.allow_basic_fallback.unwrap_or(false);
    config.write_access = profile.write_access.unwrap_or(false);
    config.write_mode = profile.write_mode.unwrap_or_default();
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.chunk_size = profile.chunk_size.unwrap_or(defaults.chunk_size);
    config.max_retries = profile.max_retries.unwrap_or(defaults.max_retries);
    config.poll_interval =
        Duration::from_secs(profile.poll_interval.unwrap_or(defaults.poll_interval));
    if let Some(secs) = profile.max_poll_interval {
        config.max_poll_interval = Duration::from_secs(secs);
    }
    if let Some(n) = profile.failure_threshold {
        config.failure_threshold = n;
    }
    if let Some(secs) = profile.extended_backoff {
        config.extended_backoff = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.max_data_age {
        config.max_data_age = Duration::from_secs(secs);
    }
    if let Some(t) = profile.sentinel_threshold {
        config.sentinel_threshold = t;
    }

    if config.chunk_size == 0 {
        return Err(ConfigError::Validation {
            field: "chunk_size".into(),
            reason: "must be at least 1".into(),
        });
    }
    if config.timeout.is_zero() {
        return Err(ConfigError::Validation {
            field: "timeout".into(),
            reason: "must be at least 1 second".into(),
        });
    }

    Ok(config)
}

// ── Catalog files ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "entity")]
    entities: Vec<EntityDescriptor>,
}

/// Load a catalog from a TOML file of `[[entity]]` tables.
pub fn load_catalog(path: &Path) -> Result<Catalog, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let file: CatalogFile = toml::from_str(&text).map_err(|e| ConfigError::Catalog {
        path: path.to_owned(),
        reason: e.message().to_owned(),
    })?;
    Catalog::new(file.entities).map_err(|e| ConfigError::Catalog {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}

/// The profile's catalog file, or the built-in catalog.
pub fn resolve_catalog(profile: &Profile) -> Result<Catalog, ConfigError> {
    match profile.catalog {
        Some(ref path) => load_catalog(path),
        None => Ok(Catalog::builtin()),
    }
}
