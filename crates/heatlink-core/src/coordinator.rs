// ── Polling coordinator ──
//
// Owns one device: runs the periodic fetch cycle, classifies failures,
// escalates backoff, and serves cached reads and writes. The coordinator
// is the only writer of connection state, the failure window, and the
// value store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use heatlink_api::{DeviceClient, ErrorKind};

use crate::backoff::{BackoffPolicy, FailureWindow};
use crate::catalog::{Catalog, EntityDescriptor};
use crate::config::DeviceConfig;
use crate::error::CoreError;
use crate::store::{Sample, ValueStore};
use crate::transform::{CatalogTransform, ValueTransform};

// ── ConnectionState ──────────────────────────────────────────────

/// Connection health observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Summary of one successful poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub requested: usize,
    pub received: usize,
    pub stored: usize,
    pub retained: usize,
    pub sentinel: usize,
    pub duration: Duration,
}

/// What [`PollingCoordinator::poll_once`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Polled(PollReport),
    /// Extended backoff is active; no request was made.
    Skipped { remaining: Duration },
    /// Credentials were rejected; waiting for [`PollingCoordinator::update_credentials`].
    Suspended,
}

// ── PollingCoordinator ───────────────────────────────────────────

/// Polling front end for one device.
///
/// Cheaply cloneable via `Arc<CoordinatorInner>`. At most one poll or
/// write is in flight at a time.
#[derive(Clone)]
pub struct PollingCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: DeviceConfig,
    policy: BackoffPolicy,
    catalog: Arc<Catalog>,
    client: DeviceClient,
    store: ValueStore,
    transform: Box<dyn ValueTransform>,
    state: watch::Sender<ConnectionState>,
    window: watch::Sender<FailureWindow>,
    auth_required: AtomicBool,
    /// Held for the duration of every poll cycle and write.
    cycle: Mutex<()>,
    wake: Notify,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PollingCoordinator {
    /// Build a coordinator and its device client. Does not poll; call
    /// [`start()`](Self::start) or [`poll_once()`](Self::poll_once).
    pub fn new(config: DeviceConfig, catalog: Arc<Catalog>) -> Result<Self, CoreError> {
        let client = DeviceClient::new(config.client_config())?;
        Ok(Self::with_client(config, catalog, client))
    }

    /// Use an existing device client.
    pub fn with_client(config: DeviceConfig, catalog: Arc<Catalog>, client: DeviceClient) -> Self {
        let transform = CatalogTransform::new(config.sentinel_threshold);
        Self::with_transform(config, catalog, client, Box::new(transform))
    }

    /// Use an existing device client and a custom value transform.
    pub fn with_transform(
        config: DeviceConfig,
        catalog: Arc<Catalog>,
        client: DeviceClient,
        transform: Box<dyn ValueTransform>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (window, _) = watch::channel(FailureWindow::default());
        let policy = config.backoff_policy();
        let store = ValueStore::new(Arc::clone(&catalog));

        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                policy,
                catalog,
                client,
                store,
                transform,
                state,
                window,
                auth_required: AtomicBool::new(false),
                cycle: Mutex::new(()),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.inner.catalog
    }

    pub fn store(&self) -> &ValueStore {
        &self.inner.store
    }

    pub fn client(&self) -> &DeviceClient {
        &self.inner.client
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the background poll loop. Calling it again is a no-op.
    pub async fn start(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() || self.inner.cancel.is_cancelled() {
            return;
        }
        let coordinator = self.clone();
        let cancel = self.inner.cancel.clone();
        handles.push(tokio::spawn(poll_task(coordinator, cancel)));
        info!(url = %self.inner.config.url, interval = ?self.inner.policy.base_interval, "polling started");
    }

    /// Stop polling, abort in-flight requests, and drop the auth session.
    /// The value store is left as it was.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.client.shutdown().await;

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        let _ = self.inner.state.send(ConnectionState::Disconnected);
        debug!("coordinator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // ── Poll cycle ───────────────────────────────────────────────

    /// Run one fetch cycle now.
    ///
    /// Skips without any request while extended backoff is active and
    /// returns [`CycleOutcome::Suspended`] while re-authentication is
    /// pending. Failures are recorded before they are returned.
    pub async fn poll_once(&self) -> Result<CycleOutcome, CoreError> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(CoreError::ShutDown);
        }
        if inner.auth_required.load(Ordering::Acquire) {
            return Ok(CycleOutcome::Suspended);
        }

        let _cycle = inner.cycle.lock().await;

        let remaining = inner.window.borrow().backoff_remaining(Instant::now());
        if let Some(remaining) = remaining {
            debug!(remaining_ms = remaining.as_millis(), "extended backoff active, cycle skipped");
            return Ok(CycleOutcome::Skipped { remaining });
        }

        inner.set_state(ConnectionState::Connecting);
        let ids = inner.catalog.readable_ids();
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return Err(CoreError::ShutDown),
            result = inner.client.read_values(&ids) => result,
        };

        match result {
            Ok(records) => {
                let stats = inner
                    .store
                    .merge(&records, inner.transform.as_ref(), Utc::now());
                inner.window.send_modify(FailureWindow::record_success);
                inner.set_state(ConnectionState::Connected);

                let report = PollReport {
                    requested: ids.len(),
                    received: stats.received,
                    stored: stats.stored,
                    retained: stats.retained,
                    sentinel: stats.sentinel,
                    duration: started.elapsed(),
                };
                info!(
                    requested = report.requested,
                    received = report.received,
                    stored = report.stored,
                    retained = report.retained,
                    sentinel = report.sentinel,
                    duration_ms = report.duration.as_millis(),
                    "poll cycle complete"
                );
                Ok(CycleOutcome::Polled(report))
            }
            Err(e) if e.kind() == ErrorKind::Cancelled => Err(CoreError::ShutDown),
            Err(e) => {
                inner.record_failure(&e);
                Err(e.into())
            }
        }
    }

    /// Delay before the next scheduled cycle.
    pub fn next_interval(&self) -> Duration {
        self.inner.window.borrow().next_interval(&self.inner.policy)
    }

    pub fn failure_window(&self) -> FailureWindow {
        *self.inner.window.borrow()
    }

    pub fn subscribe_failures(&self) -> watch::Receiver<FailureWindow> {
        self.inner.window.subscribe()
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn get_value(&self, id: u32) -> Option<Arc<Sample>> {
        self.inner.store.get(id)
    }

    /// True when the entity has a value, the last successful cycle refreshed
    /// it, and the sample is younger than `max_data_age`. A cycle in flight
    /// or a failed one does not hide fresh data.
    pub fn is_available(&self, id: u32) -> bool {
        let Some(sample) = self.inner.store.get(id) else {
            return false;
        };
        if sample.transformed.is_none() || !self.inner.store.in_last_cycle(id) {
            return false;
        }
        let age = (Utc::now() - sample.fetched_at)
            .to_std()
            .unwrap_or_default();
        age < self.inner.config.max_data_age
    }

    /// Set after the device rejected the credentials. Polling stays
    /// suspended until [`update_credentials`](Self::update_credentials).
    pub fn auth_required(&self) -> bool {
        self.inner.auth_required.load(Ordering::Acquire)
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Replace the device credentials and resume polling immediately.
    pub async fn update_credentials(&self, username: impl Into<String>, password: SecretString) {
        self.inner.client.update_credentials(username, password).await;
        self.inner.window.send_modify(FailureWindow::record_success);
        self.inner.auth_required.store(false, Ordering::Release);
        self.inner.wake.notify_one();
        info!("credentials updated, polling resumed");
    }

    /// Write `value` to entity `id`.
    ///
    /// Read-only entities and a disabled global write switch fail with a
    /// write-access error before any request. On success the store entry
    /// is overwritten without waiting for the next cycle. Returns `false`
    /// when the device answered but reported the write as rejected.
    pub async fn write(&self, id: u32, value: &str) -> Result<bool, CoreError> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(CoreError::ShutDown);
        }
        let descriptor = inner
            .catalog
            .get(id)
            .ok_or(CoreError::UnknownEntity { id })?;
        if descriptor.is_writable() && inner.config.write_access {
            validate(descriptor, value)?;
        }

        let _cycle = inner.cycle.lock().await;
        let accepted = match inner.client.write_value(id, value, descriptor.access).await {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::Cancelled => return Err(CoreError::ShutDown),
            Err(e) => {
                if e.is_auth() {
                    inner.flag_auth_required();
                }
                return Err(e.into());
            }
        };

        if !accepted {
            warn!(id, "device rejected write");
            return Ok(false);
        }

        inner
            .store
            .overwrite(id, value, inner.transform.as_ref(), Utc::now());
        inner.window.send_modify(FailureWindow::record_success);
        info!(id, key = %descriptor.key, "write applied");
        Ok(true)
    }
}

impl CoordinatorInner {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "connection state changed");
            *state = next;
            true
        });
    }

    fn flag_auth_required(&self) {
        if !self.auth_required.swap(true, Ordering::AcqRel) {
            warn!(url = %self.config.url, "credentials rejected, polling suspended");
        }
    }

    fn record_failure(&self, error: &heatlink_api::Error) {
        let now = Instant::now();
        let mut entered = false;
        self.window.send_modify(|w| {
            entered = w.record_failure(now, &self.policy);
        });

        // Flag first, then notify even if already in Error, so state
        // observers always see the suspension.
        if error.is_auth() {
            self.flag_auth_required();
            self.state.send_replace(ConnectionState::Error);
            return;
        }
        self.set_state(ConnectionState::Error);

        let window = *self.window.borrow();
        if entered {
            warn!(
                failures = window.consecutive_failures,
                backoff_secs = self.policy.extended_backoff.as_secs(),
                error = %error,
                "entering extended backoff"
            );
        } else {
            warn!(
                failures = window.consecutive_failures,
                next_ms = window.next_interval(&self.policy).as_millis(),
                error = %error,
                "poll cycle failed"
            );
        }
    }
}

fn validate(descriptor: &EntityDescriptor, value: &str) -> Result<(), CoreError> {
    if descriptor.min.is_none() && descriptor.max.is_none() {
        return Ok(());
    }
    let invalid = |message: String| CoreError::InvalidValue {
        id: descriptor.id,
        message,
    };
    let v: f64 = value
        .trim()
        .parse()
        .map_err(|_| invalid(format!("{value:?} is not a number")))?;
    match (descriptor.min, descriptor.max) {
        (Some(min), _) if v < min => Err(invalid(format!("{v} is below the minimum {min}"))),
        (_, Some(max)) if v > max => Err(invalid(format!("{v} is above the maximum {max}"))),
        _ => Ok(()),
    }
}

// ── Background task ──────────────────────────────────────────────

async fn poll_task(coordinator: PollingCoordinator, cancel: CancellationToken) {
    loop {
        match coordinator.poll_once().await {
            Ok(CycleOutcome::Polled(_)) => {}
            Ok(CycleOutcome::Skipped { remaining }) => {
                debug!(remaining_secs = remaining.as_secs(), "poll skipped");
            }
            Ok(CycleOutcome::Suspended) => debug!("poll suspended, awaiting credentials"),
            Err(CoreError::ShutDown) => break,
            // Already logged and recorded by poll_once.
            Err(_) => {}
        }

        let delay = coordinator.next_interval();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = coordinator.inner.wake.notified() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }
    debug!("poll task exited");
}
