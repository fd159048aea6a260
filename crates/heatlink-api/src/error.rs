use std::fmt;

use thiserror::Error;

/// Maximum number of body characters carried on an error for diagnostics.
pub const BODY_PREVIEW_LEN: usize = 200;

/// Failure category of an [`Error`].
///
/// Every failure the device client can produce falls into exactly one of
/// these buckets; callers branch on the kind rather than on error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum ErrorKind {
    /// Network, transport, or unexpected HTTP status.
    #[strum(to_string = "connection")]
    Connection,
    /// Rejected credentials or an unsupported auth scheme.
    #[strum(to_string = "authentication")]
    Authentication,
    /// No response within the per-attempt budget.
    #[strum(to_string = "timeout")]
    Timeout,
    /// Body matched none of the known response shapes.
    #[strum(to_string = "parse")]
    Parse,
    /// Write refused locally or by the device.
    #[strum(to_string = "write access")]
    WriteAccess,
    /// The client was shut down while the call was in flight.
    #[strum(to_string = "cancelled")]
    Cancelled,
    /// Invalid URL or client settings.
    #[strum(to_string = "configuration")]
    Configuration,
}

/// Error type for the `heatlink-api` crate.
///
/// A single tagged error: the [`ErrorKind`] drives retry and backoff
/// decisions, while status and body preview exist for diagnostics.
#[derive(Error)]
#[error("{kind} error: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    body: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            body: None,
            source: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Parse failure carrying a truncated copy of the offending body.
    pub fn parse(message: impl Into<String>, body: &str) -> Self {
        Self::new(ErrorKind::Parse, message).with_body(body)
    }

    pub fn write_access(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WriteAccess, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "client shut down")
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(preview(body));
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status that produced this error, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// First [`BODY_PREVIEW_LEN`] characters of the response body, if any.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Returns `true` if this is a transient error worth retrying.
    ///
    /// Timeouts, transport failures, empty 204 replies, 404 and 5xx are
    /// transient. Auth, parse, and write-access failures never are.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            ErrorKind::Timeout => true,
            ErrorKind::Connection => match self.status {
                None => true,
                Some(status) => status == 204 || status == 404 || status >= 500,
            },
            _ => false,
        }
    }

    /// Returns `true` if re-authentication is needed to make progress.
    pub fn is_auth(&self) -> bool {
        self.kind == ErrorKind::Authentication
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("status", &self.status)
            .field("body", &self.body)
            .field("source", &self.source.as_ref().map(ToString::to_string))
            .finish()
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_builder() {
            ErrorKind::Configuration
        } else {
            ErrorKind::Connection
        };
        let mut error = Self::new(kind, err.to_string());
        if let Some(status) = err.status() {
            error.status = Some(status.as_u16());
        }
        error.with_source(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::configuration(format!("invalid URL: {err}")).with_source(err)
    }
}

/// Truncate `body` to [`BODY_PREVIEW_LEN`] characters on a char boundary.
pub(crate) fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_LEN).collect()
}
