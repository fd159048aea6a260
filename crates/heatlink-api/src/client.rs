// LOM320 device HTTP client
//
// Wraps one persistent `reqwest::Client` per heat-pump module. Reads are
// split into chunks of register ids, each chunk is one GET against
// `json_values.cgi`, and every attempt walks the digest challenge and any
// redirects by hand so the `Authorization` header always matches the URI
// it was computed for.

use std::collections::HashSet;
use std::time::Duration;

use rand::RngCore;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, LOCATION, WWW_AUTHENTICATE};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{AuthSession, DEFAULT_NONCE_LIFETIME, DigestAuthenticator};
use crate::error::{Error, ErrorKind};
use crate::parse::{self, Record};
use crate::transport::{TlsMode, TransportConfig};

/// Endpoint serving both reads (`ids=`) and writes (`itemno=`/`itemval=`).
pub const VALUES_PATH: &str = "/cgi-bin/json_values.cgi";

/// Separator between ids in the `ids=` query parameter. Sent literally.
pub const ID_SEPARATOR: char = ';';

/// Register read by [`DeviceClient::test_connection`] (heating supply temperature).
pub const TEST_ID: u32 = 253;

/// Auth and redirect round-trips allowed within one attempt.
const MAX_HOPS: usize = 8;

// ── Configuration ────────────────────────────────────────────────────

/// How writes are sent to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WriteMode {
    /// `GET json_values.cgi?itemno=<id>&itemval=<value>`
    #[default]
    Query,
    /// `POST json_values.cgi` with `{"id": .., "value": ..}`
    JsonBody,
}

/// Access mode of a register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum Access {
    #[default]
    #[serde(rename = "read")]
    #[strum(serialize = "read")]
    Read,
    #[serde(rename = "readwrite", alias = "read_write")]
    #[strum(serialize = "readwrite")]
    ReadWrite,
}

/// Per-chunk retry policy: `base * 2^attempt`, capped, plus random jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_millis(400),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Backoff plus jitter in `[0, jitter]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::rng().next_u64() % jitter_ms.saturating_add(1)
        };
        self.backoff(attempt)
            .saturating_add(Duration::from_millis(extra))
    }
}

/// Everything a [`DeviceClient`] needs to talk to one module.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub username: String,
    pub password: SecretString,
    pub allow_basic_fallback: bool,
    /// Global write switch; when off every write fails before any I/O.
    pub write_access: bool,
    pub write_mode: WriteMode,
    pub chunk_size: usize,
    pub retry: RetryPolicy,
    pub nonce_lifetime: Duration,
    pub transport: TransportConfig,
}

impl ClientConfig {
    /// Defaults for everything but the address and credentials. TLS policy
    /// is derived from the host.
    pub fn new(base_url: Url, username: impl Into<String>, password: SecretString) -> Self {
        let tls = TlsMode::for_host(base_url.host_str().unwrap_or_default());
        Self {
            base_url,
            username: username.into(),
            password,
            allow_basic_fallback: false,
            write_access: false,
            write_mode: WriteMode::default(),
            chunk_size: 25,
            retry: RetryPolicy::default(),
            nonce_lifetime: DEFAULT_NONCE_LIFETIME,
            transport: TransportConfig {
                tls,
                ..TransportConfig::default()
            },
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────

struct Request {
    method: Method,
    url: Url,
    json: Option<serde_json::Value>,
    /// Kind reported when the device answers 403.
    forbidden: ErrorKind,
}

struct Reply {
    content_type: Option<String>,
    body: String,
}

/// HTTP client for one LOM320 module.
///
/// Owns the digest session for the device. All methods take `&self`; the
/// session sits behind an async mutex that is never held across I/O.
pub struct DeviceClient {
    http: reqwest::Client,
    config: ClientConfig,
    auth: Mutex<DigestAuthenticator>,
    cancel: CancellationToken,
}

impl DeviceClient {
    /// Create a client, building its HTTP session from `config.transport`.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        if config.chunk_size == 0 {
            return Err(Error::configuration("chunk size must be at least 1"));
        }
        let http = config.transport.build_client()?;
        Ok(Self::with_client(http, config))
    }

    /// Create a client on top of a pre-built `reqwest::Client`.
    ///
    /// The caller is responsible for disabling automatic redirects.
    pub fn with_client(http: reqwest::Client, config: ClientConfig) -> Self {
        let auth = DigestAuthenticator::new(
            config.username.clone(),
            config.password.clone(),
            config.allow_basic_fallback,
        )
        .with_nonce_lifetime(config.nonce_lifetime);
        Self {
            http,
            config,
            auth: Mutex::new(auth),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Copy of the current digest session, if any.
    pub async fn session_snapshot(&self) -> Option<AuthSession> {
        self.auth.lock().await.session().cloned()
    }

    /// Swap credentials. The current session is dropped.
    pub async fn update_credentials(&self, username: impl Into<String>, password: SecretString) {
        self.auth.lock().await.update_credentials(username, password);
        debug!("device credentials replaced");
    }

    /// Abort in-flight retry loops and drop the auth session.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.auth.lock().await.reset();
        info!(url = %self.config.base_url, "device client shut down");
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Read `ids` in chunks of `chunk_size`.
    ///
    /// Chunks fail independently: the result is the union of every
    /// successful chunk, restricted to requested ids with no duplicates.
    /// When every chunk fails the first chunk's error is returned. An auth
    /// failure or shutdown aborts the remaining chunks.
    pub async fn read_values(&self, ids: &[u32]) -> Result<Vec<Record>, Error> {
        let mut unique = HashSet::with_capacity(ids.len());
        let ids: Vec<u32> = ids.iter().copied().filter(|id| unique.insert(*id)).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = chunk_ids(&ids, self.config.chunk_size);
        let total = chunks.len();
        let mut records = Vec::with_capacity(ids.len());
        let mut seen = HashSet::with_capacity(ids.len());
        let mut first_error = None;
        let mut succeeded = 0usize;

        for (index, chunk) in chunks.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(Error::cancelled());
            }
            match self.read_chunk(chunk).await {
                Ok(batch) => {
                    succeeded += 1;
                    let wanted: HashSet<u32> = chunk.iter().copied().collect();
                    let received = batch.len();
                    records.extend(batch.into_iter().filter(|r| {
                        r.numeric_id()
                            .is_some_and(|id| wanted.contains(&id) && seen.insert(id))
                    }));
                    debug!(chunk = index + 1, total, received, "chunk read");
                }
                Err(e) if e.is_auth() || e.kind() == ErrorKind::Cancelled => return Err(e),
                Err(e) => {
                    warn!(chunk = index + 1, total, error = %e, "chunk read failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(records),
        }
    }

    async fn read_chunk(&self, ids: &[u32]) -> Result<Vec<Record>, Error> {
        let mut url = self.config.base_url.join(VALUES_PATH)?;
        url.set_query(Some(&format!("ids={}", join_ids(ids))));

        let reply = self
            .execute(&Request {
                method: Method::GET,
                url,
                json: None,
                forbidden: ErrorKind::Authentication,
            })
            .await?;
        parse::parse(reply.content_type.as_deref(), &reply.body)
    }

    /// Read a single well-known register and report whether it came back.
    pub async fn test_connection(&self) -> Result<bool, Error> {
        let records = self.read_chunk(&[TEST_ID]).await?;
        let ok = !records.is_empty();
        info!(url = %self.config.base_url, ok, "connection test finished");
        Ok(ok)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Write one register.
    ///
    /// Refused without any I/O when writes are disabled or `access` is
    /// read-only. Returns `false` when the device answers with an explicit
    /// `"success": false`.
    pub async fn write_value(&self, id: u32, value: &str, access: Access) -> Result<bool, Error> {
        if !self.config.write_access {
            return Err(Error::write_access("write access is disabled"));
        }
        if access == Access::Read {
            return Err(Error::write_access(format!("entity {id} is read-only")));
        }

        let mut url = self.config.base_url.join(VALUES_PATH)?;
        let request = match self.config.write_mode {
            WriteMode::Query => {
                url.query_pairs_mut()
                    .append_pair("itemno", &id.to_string())
                    .append_pair("itemval", value);
                Request {
                    method: Method::GET,
                    url,
                    json: None,
                    forbidden: ErrorKind::WriteAccess,
                }
            }
            WriteMode::JsonBody => Request {
                method: Method::POST,
                url,
                json: Some(serde_json::json!({ "id": id, "value": value })),
                forbidden: ErrorKind::WriteAccess,
            },
        };

        let reply = self.execute(&request).await?;
        let accepted = write_accepted(&reply.body);
        if accepted {
            info!(id, value, "value written");
        } else {
            warn!(id, value, "device rejected write");
        }
        Ok(accepted)
    }

    // ── Transport mechanics ──────────────────────────────────────────

    /// Run `request` with the retry policy. Only transient failures retry.
    async fn execute(&self, request: &Request) -> Result<Reply, Error> {
        let retry = self.config.retry;
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::cancelled());
            }

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(Error::cancelled()),
                result = self.attempt(request) => result,
            };
            let err = match result {
                Ok(reply) => return Ok(reply),
                Err(e) => e,
            };

            if !err.is_transient() {
                return Err(err);
            }
            if attempt >= retry.max_retries {
                warn!(attempts = attempt + 1, error = %err, "giving up after retries");
                return Err(err);
            }

            let delay = retry.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis(),
                error = %err,
                "request failed, retrying"
            );
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::cancelled()),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// One attempt: request, answer digest challenges, follow redirects.
    async fn attempt(&self, request: &Request) -> Result<Reply, Error> {
        let mut method = request.method.clone();
        let mut url = request.url.clone();
        let mut uri = request_uri(&url);
        let mut authorization = self.auth.lock().await.authorize(method.as_str(), &uri);
        // Set once the header in hand came from a challenge seen this attempt.
        let mut exchanged = false;
        let mut stale_retried = false;

        for _ in 0..MAX_HOPS {
            let mut builder = self.http.request(method.clone(), url.clone());
            if let Some(ref header) = authorization {
                builder = builder.header(AUTHORIZATION, header);
            }
            if method == Method::POST {
                if let Some(ref body) = request.json {
                    builder = builder.json(body);
                }
            }

            debug!(%method, %uri, authorized = authorization.is_some(), "sending request");
            let response = builder.send().await?;
            let status = response.status().as_u16();

            match status {
                200 => {
                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    let body = response.text().await?;
                    return Ok(Reply { content_type, body });
                }
                204 => {
                    return Err(Error::connection("device returned an empty response").with_status(204));
                }
                401 => {
                    let challenge = www_authenticate(response.headers()).ok_or_else(|| {
                        Error::authentication("401 without a WWW-Authenticate challenge")
                            .with_status(401)
                    })?;

                    let mut auth = self.auth.lock().await;
                    let stale = auth
                        .challenge(&challenge)
                        .map_err(|e| e.with_status(401))?
                        .stale;
                    if exchanged {
                        if !stale || stale_retried {
                            auth.reset();
                            return Err(Error::authentication("credentials rejected by device")
                                .with_status(401));
                        }
                        stale_retried = true;
                        debug!("nonce went stale, renegotiating once");
                    } else if authorization.is_some() {
                        debug!("cached auth session rejected, re-challenging");
                    }
                    authorization = auth.authorize(method.as_str(), &uri);
                    exchanged = true;
                }
                403 => {
                    let message = match request.forbidden {
                        ErrorKind::WriteAccess => "device refused the write (403)",
                        _ => "device refused access (403)",
                    };
                    return Err(Error::new(request.forbidden, message).with_status(403));
                }
                301 | 302 | 303 | 307 | 308 => {
                    let location = response
                        .headers()
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .ok_or_else(|| {
                            Error::connection("redirect without a Location header").with_status(status)
                        })?;
                    let next = url.join(location).map_err(|e| {
                        Error::connection(format!("invalid redirect target {location}: {e}"))
                            .with_status(status)
                    })?;
                    // Credentials never leave the device's origin.
                    if next.origin() != url.origin() {
                        warn!(status, location = %next, "refusing cross-origin redirect");
                        return Err(Error::connection(format!(
                            "device redirected to another origin: {}",
                            next.origin().ascii_serialization()
                        ))
                        .with_status(status));
                    }
                    let next_uri = request_uri(&next);
                    let next_method = if status == 303 { Method::GET } else { method.clone() };

                    if authorization.is_some() && (next_uri != uri || next_method != method) {
                        authorization = self.auth.lock().await.authorize(next_method.as_str(), &next_uri);
                    }
                    debug!(status, location = %next, "following redirect");
                    method = next_method;
                    url = next;
                    uri = next_uri;
                }
                code => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::connection(format!("unexpected HTTP status {code}"))
                        .with_status(code)
                        .with_body(&body));
                }
            }
        }

        Err(Error::connection("too many authentication or redirect round-trips"))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Split `ids` into consecutive chunks of at most `size` ids.
pub fn chunk_ids(ids: &[u32], size: usize) -> Vec<&[u32]> {
    ids.chunks(size.max(1)).collect()
}

fn join_ids(ids: &[u32]) -> String {
    ids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(&ID_SEPARATOR.to_string())
}

/// Request-target the digest is computed over: path plus query.
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    }
}

/// The Digest challenge if the server offered one, else the first challenge.
fn www_authenticate(headers: &HeaderMap) -> Option<String> {
    let challenges: Vec<&str> = headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    challenges
        .iter()
        .find(|c| c.trim_start().to_ascii_lowercase().starts_with("digest"))
        .or_else(|| challenges.first())
        .map(|c| (*c).to_owned())
}

/// A write succeeded unless the body is JSON with `"success": false`.
fn write_accepted(body: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(body.trim()) {
        Ok(serde_json::Value::Object(map)) => {
            !matches!(map.get("success"), Some(serde_json::Value::Bool(false)))
        }
        _ => true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn chunking_covers_every_id_once() {
        let ids: Vec<u32> = (1..=60).collect();
        let chunks = chunk_ids(&ids, 25);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 10);
        assert_eq!(chunks.concat(), ids);
        assert_eq!(chunk_ids(&ids, 0).len(), 60);
    }

    #[test]
    fn ids_are_joined_with_semicolons() {
        assert_eq!(join_ids(&[253, 254, 255]), "253;254;255");
    }

    #[test]
    fn request_uri_keeps_literal_semicolons() {
        let mut url = Url::parse("http://192.168.1.50").unwrap().join(VALUES_PATH).unwrap();
        url.set_query(Some("ids=253;254"));
        assert_eq!(request_uri(&url), "/cgi-bin/json_values.cgi?ids=253;254");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            jitter: Duration::ZERO,
        };
        let delays: Vec<u128> = (0..5).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 3000, 3000]);
        assert_eq!(policy.backoff(40), Duration::from_secs(3));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy {
            jitter: Duration::from_millis(50),
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(550));
        }
    }

    #[test]
    fn write_acceptance() {
        assert!(write_accepted(""));
        assert!(write_accepted("OK"));
        assert!(write_accepted(r#"{"success":true}"#));
        assert!(write_accepted(r#"{"result":"done"}"#));
        assert!(!write_accepted(r#"{"success":false}"#));
    }

    #[test]
    fn prefers_digest_challenge() {
        let mut headers = HeaderMap::new();
        headers.append(WWW_AUTHENTICATE, "Basic realm=\"lom\"".parse().unwrap());
        headers.append(WWW_AUTHENTICATE, "Digest realm=\"lom\", nonce=\"n\"".parse().unwrap());
        assert_eq!(
            www_authenticate(&headers).as_deref(),
            Some("Digest realm=\"lom\", nonce=\"n\"")
        );
    }

    #[test]
    fn access_serde_names() {
        assert_eq!(serde_json::to_string(&Access::ReadWrite).unwrap(), "\"readwrite\"");
        let parsed: Access = serde_json::from_str("\"read_write\"").unwrap();
        assert_eq!(parsed, Access::ReadWrite);
    }

    #[test]
    fn config_defaults_follow_host() {
        let config = ClientConfig::new(
            Url::parse("http://192.168.1.50").unwrap(),
            "admin",
            SecretString::from("pw"),
        );
        assert_eq!(config.transport.tls, TlsMode::DangerAcceptInvalid);
        assert_eq!(config.chunk_size, 25);
        assert!(!config.write_access);
    }
}
