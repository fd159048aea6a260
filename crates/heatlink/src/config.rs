//! CLI configuration: thin wrapper around `heatlink_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--host, --username, --password, --insecure, --timeout).

use secrecy::SecretString;

use heatlink_core::{Catalog, DeviceConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use heatlink_config::{Config, Profile, config_path, load_config, save_config};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the device config and catalog for this invocation.
///
/// Flags override the profile. Without a profile, `--host` alone is enough.
pub fn resolve_device(global: &GlobalOpts) -> Result<(DeviceConfig, Catalog), CliError> {
    let mut cfg = load_config()?;
    let name = active_profile_name(global, &cfg);

    let mut profile = match cfg.profiles.remove(&name) {
        Some(profile) => profile,
        None if global.profile.is_some() => {
            let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(CliError::ProfileNotFound {
                name,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            });
        }
        None => Profile {
            host: global.host.clone().ok_or_else(|| CliError::NoConfig {
                path: config_path().display().to_string(),
            })?,
            ..Profile::default()
        },
    };

    if let Some(ref host) = global.host {
        profile.host.clone_from(host);
    }
    if let Some(ref username) = global.username {
        profile.username = Some(username.clone());
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }

    let password = global.password.clone().map(SecretString::from);
    let device =
        heatlink_config::profile_to_device_config(&profile, &name, &cfg.defaults, password)?;
    let catalog = heatlink_config::resolve_catalog(&profile)?;
    tracing::debug!(profile = %name, url = %device.url, entities = catalog.len(), "device resolved");
    Ok((device, catalog))
}
