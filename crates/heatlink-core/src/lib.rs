//! Polling domain between `heatlink-api` and consumers (CLI, integrations).
//!
//! - **[`PollingCoordinator`]** runs the fetch cycle for one device, tracks
//!   connection health and failure backoff, and serves cached reads and
//!   writes.
//! - **[`ValueStore`]** keeps the last good sample per register (`DashMap`
//!   plus a `watch` version counter).
//! - **[`Catalog`]** is the immutable id → [`EntityDescriptor`] table,
//!   supplied once at construction.
//! - **[`ValueTransform`]** turns classified device values into stored
//!   values; [`CatalogTransform`] is the default.

pub mod backoff;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod store;
pub mod transform;
pub mod value;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backoff::{BackoffPolicy, FailureWindow};
pub use catalog::{Access, Catalog, DeviceClass, EntityDescriptor, StateClass};
pub use config::{DeviceConfig, TlsVerification};
pub use coordinator::{ConnectionState, CycleOutcome, PollReport, PollingCoordinator};
pub use error::CoreError;
pub use store::{MergeStats, Sample, ValueStore};
pub use transform::{CatalogTransform, DEFAULT_SENTINEL_THRESHOLD, ValueTransform};
pub use value::Value;

pub use heatlink_api::{AuthScheme, Error as DeviceError, ErrorKind, WriteMode};
