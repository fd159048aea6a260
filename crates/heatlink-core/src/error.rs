// ── Core error types ──
//
// Device failures pass through unchanged so callers keep the kind, status,
// and body. Domain failures that never reach the wire get their own variants.

use heatlink_api::ErrorKind;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transport, auth, parse, or write-access failure from the device client.
    #[error(transparent)]
    Device(#[from] heatlink_api::Error),

    #[error("Unknown entity id {id}")]
    UnknownEntity { id: u32 },

    #[error("Invalid value for entity {id}: {message}")]
    InvalidValue { id: u32, message: String },

    /// Polling is suspended until credentials are refreshed.
    #[error("Re-authentication required")]
    AuthRequired,

    #[error("Coordinator is shut down")]
    ShutDown,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Map back onto the device error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Device(e) => e.kind(),
            Self::UnknownEntity { .. } | Self::InvalidValue { .. } | Self::Config { .. } => {
                ErrorKind::Configuration
            }
            Self::AuthRequired => ErrorKind::Authentication,
            Self::ShutDown => ErrorKind::Cancelled,
        }
    }

    pub fn is_auth(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }
}
