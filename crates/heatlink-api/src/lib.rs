// heatlink-api: Async Rust client for the SVK LOM320 heat-pump web module

pub mod auth;
pub mod client;
pub mod error;
pub mod parse;
pub mod transport;

pub use auth::{
    Algorithm, AuthScheme, AuthSession, DigestAuthenticator, DigestParams, compute_response,
};
pub use client::{
    Access, ClientConfig, DeviceClient, ID_SEPARATOR, RetryPolicy, TEST_ID, VALUES_PATH, WriteMode,
    chunk_ids,
};
pub use error::{Error, ErrorKind};
pub use parse::{Record, parse};
pub use transport::{TlsMode, TransportConfig};
