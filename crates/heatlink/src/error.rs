//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use heatlink_config::ConfigError;
use heatlink_core::{CoreError, ErrorKind};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the heat pump: {message}")]
    #[diagnostic(
        code(heatlink::connection_failed),
        help(
            "Check that the module is powered and reachable on the network.\n\
             For self-signed HTTPS try --insecure (-k)."
        )
    )]
    ConnectionFailed { message: String },

    #[error("Request timed out: {message}")]
    #[diagnostic(
        code(heatlink::timeout),
        help("Increase the timeout with --timeout or lower chunk_size in the profile.")
    )]
    Timeout { message: String },

    #[error("The module returned a response heatlink could not read: {message}")]
    #[diagnostic(code(heatlink::invalid_response))]
    InvalidResponse { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(heatlink::auth_failed),
        help(
            "Verify the username and password for this module.\n\
             Set the password with --password or HEATLINK_PASSWORD."
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(heatlink::no_credentials),
        help(
            "Pass --password, set HEATLINK_PASSWORD, or add password_env to the profile:\n\
             heatlink config set-profile {profile} --host <HOST> --password-env <VAR>"
        )
    )]
    NoCredentials { profile: String },

    // ── Writes ───────────────────────────────────────────────────────
    #[error("Write refused: {message}")]
    #[diagnostic(
        code(heatlink::write_refused),
        help(
            "Writes need write_access = true in the profile (or --allow-write)\n\
             and a register listed as writable in `heatlink catalog --writable`."
        )
    )]
    WriteRefused { message: String },

    #[error("The module rejected the write to {entity}")]
    #[diagnostic(code(heatlink::write_rejected))]
    WriteRejected { entity: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Register '{identifier}' not found")]
    #[diagnostic(
        code(heatlink::not_found),
        help("Run: heatlink catalog to see known registers")
    )]
    NotFound { identifier: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(heatlink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(heatlink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: heatlink config set-profile {name} --host <HOST>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No device configured")]
    #[diagnostic(
        code(heatlink::no_config),
        help(
            "Pass --host, or create a profile with: heatlink config set-profile default --host <HOST>\n\
             Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(heatlink::config))]
    Config(ConfigError),

    #[error("Polling stopped")]
    #[diagnostic(code(heatlink::shut_down))]
    ShutDown,

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(heatlink::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::WriteRefused { .. } => exit_code::PERMISSION,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Device(e) => {
                let message = e.message().to_owned();
                match e.kind() {
                    ErrorKind::Authentication => Self::AuthFailed { message },
                    ErrorKind::Timeout => Self::Timeout { message },
                    ErrorKind::Parse => Self::InvalidResponse { message },
                    ErrorKind::WriteAccess => Self::WriteRefused { message },
                    ErrorKind::Cancelled => Self::ShutDown,
                    ErrorKind::Configuration => Self::Validation {
                        field: "device".into(),
                        reason: message,
                    },
                    ErrorKind::Connection => Self::ConnectionFailed { message },
                }
            }
            CoreError::UnknownEntity { id } => Self::NotFound {
                identifier: id.to_string(),
            },
            CoreError::InvalidValue { id, message } => Self::Validation {
                field: format!("register {id}"),
                reason: message,
            },
            CoreError::AuthRequired => Self::AuthFailed {
                message: "credentials were rejected".into(),
            },
            CoreError::ShutDown => Self::ShutDown,
            CoreError::Config { message } => Self::Validation {
                field: "configuration".into(),
                reason: message,
            },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use heatlink_core::DeviceError;

    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        let auth = CliError::from(CoreError::from(DeviceError::authentication("bad digest")));
        assert_eq!(auth.exit_code(), exit_code::AUTH);
        assert_eq!(
            CliError::from(CoreError::UnknownEntity { id: 9 }).exit_code(),
            exit_code::NOT_FOUND
        );
        assert_eq!(
            CliError::WriteRefused { message: String::new() }.exit_code(),
            exit_code::PERMISSION
        );
    }
}
