// HTTP Digest authentication (RFC 7616) for the LOM320 web module.
//
// The module answers every unauthenticated request with a `401` and a
// `WWW-Authenticate: Digest ...` challenge. The authenticator turns that
// challenge into an `AuthSession` and signs subsequent requests from it
// until the server rejects the nonce or the nonce lifetime runs out.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::Md5;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

use crate::error::Error;

/// Default lifetime of a cached nonce before a fresh challenge is forced.
pub const DEFAULT_NONCE_LIFETIME: Duration = Duration::from_secs(300);

/// Digest hash algorithm advertised by the server.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Algorithm {
    #[default]
    #[strum(serialize = "MD5")]
    Md5,
    #[strum(serialize = "MD5-sess")]
    Md5Sess,
    #[strum(serialize = "SHA-256")]
    Sha256,
    #[strum(serialize = "SHA-256-sess")]
    Sha256Sess,
}

impl Algorithm {
    fn is_session(self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    /// Lowercase hex digest of `input`.
    pub fn hash(self, input: &str) -> String {
        match self {
            Self::Md5 | Self::Md5Sess => hex::encode(Md5::digest(input.as_bytes())),
            Self::Sha256 | Self::Sha256Sess => hex::encode(Sha256::digest(input.as_bytes())),
        }
    }
}

/// Which scheme a session signs requests with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Digest,
    /// Only reachable when Basic fallback is explicitly allowed.
    Basic,
}

/// Negotiated authentication state, reused across requests.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub scheme: AuthScheme,
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    /// Selected quality of protection (`auth`), or `None` for RFC 2069 mode.
    pub qop: Option<String>,
    pub algorithm: Algorithm,
    /// Nonce count of the last signed request. Starts at 0, never decreases.
    pub nc: u32,
    /// Client nonce of the last signed request.
    pub cnonce: String,
    /// Whether the challenge that created this session carried `stale=true`.
    pub stale: bool,
    pub created_at: Instant,
}

/// Inputs to a single digest response computation.
#[derive(Debug, Clone, Copy)]
pub struct DigestParams<'a> {
    pub algorithm: Algorithm,
    pub username: &'a str,
    pub password: &'a str,
    pub realm: &'a str,
    pub nonce: &'a str,
    pub method: &'a str,
    pub uri: &'a str,
    pub qop: Option<&'a str>,
    pub nc: u32,
    pub cnonce: &'a str,
}

/// Compute the `response` field of a Digest `Authorization` header.
///
/// HA1 = H(user:realm:pass), or H(H(user:realm:pass):nonce:cnonce) for the
/// `-sess` variants. HA2 = H(method:uri). The response is
/// H(HA1:nonce:nc:cnonce:qop:HA2) with qop, else H(HA1:nonce:HA2).
pub fn compute_response(p: &DigestParams<'_>) -> String {
    let hash = |s: &str| p.algorithm.hash(s);

    let mut ha1 = hash(&format!("{}:{}:{}", p.username, p.realm, p.password));
    if p.algorithm.is_session() {
        ha1 = hash(&format!("{ha1}:{}:{}", p.nonce, p.cnonce));
    }
    let ha2 = hash(&format!("{}:{}", p.method, p.uri));

    match p.qop {
        Some(qop) => hash(&format!(
            "{ha1}:{}:{:08x}:{}:{qop}:{ha2}",
            p.nonce, p.nc, p.cnonce
        )),
        None => hash(&format!("{ha1}:{}:{ha2}", p.nonce)),
    }
}

/// Tracks the digest session for one device and signs requests with it.
#[derive(Debug)]
pub struct DigestAuthenticator {
    username: String,
    password: SecretString,
    allow_basic: bool,
    nonce_lifetime: Duration,
    session: Option<AuthSession>,
}

impl DigestAuthenticator {
    pub fn new(username: impl Into<String>, password: SecretString, allow_basic: bool) -> Self {
        Self {
            username: username.into(),
            password,
            allow_basic,
            nonce_lifetime: DEFAULT_NONCE_LIFETIME,
            session: None,
        }
    }

    #[must_use]
    pub fn with_nonce_lifetime(mut self, lifetime: Duration) -> Self {
        self.nonce_lifetime = lifetime;
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The current session, if a challenge has been accepted.
    pub fn session(&self) -> Option<&AuthSession> {
        self.session.as_ref()
    }

    /// Drop the session; the next request re-challenges.
    pub fn reset(&mut self) {
        self.session = None;
    }

    /// Replace credentials and drop the session built from the old ones.
    pub fn update_credentials(&mut self, username: impl Into<String>, password: SecretString) {
        self.username = username.into();
        self.password = password;
        self.session = None;
    }

    /// Accept a `WWW-Authenticate` challenge and build a fresh session.
    ///
    /// A new session always restarts the nonce count at 0.
    pub fn challenge(&mut self, header: &str) -> Result<&AuthSession, Error> {
        let (scheme, params) = split_challenge(header);

        let session = if scheme.eq_ignore_ascii_case("digest") {
            let realm = params
                .get("realm")
                .ok_or_else(|| Error::authentication("digest challenge is missing realm"))?;
            let nonce = params
                .get("nonce")
                .ok_or_else(|| Error::authentication("digest challenge is missing nonce"))?;
            let algorithm = match params.get("algorithm") {
                Some(token) => token.parse::<Algorithm>().map_err(|_| {
                    Error::authentication(format!("unsupported digest algorithm: {token}"))
                })?,
                None => Algorithm::Md5,
            };
            let qop = params.get("qop").map(|q| select_qop(q)).transpose()?;
            let stale = params
                .get("stale")
                .is_some_and(|v| v.eq_ignore_ascii_case("true"));

            debug!(realm = %realm, algorithm = %algorithm, stale, "accepted digest challenge");
            AuthSession {
                scheme: AuthScheme::Digest,
                realm: realm.clone(),
                nonce: nonce.clone(),
                opaque: params.get("opaque").cloned(),
                qop,
                algorithm,
                nc: 0,
                cnonce: String::new(),
                stale,
                created_at: Instant::now(),
            }
        } else if scheme.eq_ignore_ascii_case("basic") && self.allow_basic {
            debug!("falling back to basic auth");
            AuthSession {
                scheme: AuthScheme::Basic,
                realm: params.get("realm").cloned().unwrap_or_default(),
                nonce: String::new(),
                opaque: None,
                qop: None,
                algorithm: Algorithm::Md5,
                nc: 0,
                cnonce: String::new(),
                stale: false,
                created_at: Instant::now(),
            }
        } else {
            return Err(Error::authentication(format!(
                "unsupported auth scheme: {}",
                if scheme.is_empty() { "<none>" } else { scheme }
            )));
        };

        Ok(&*self.session.insert(session))
    }

    /// Build an `Authorization` header for `method` + `uri`.
    ///
    /// Returns `None` when there is no usable session (never challenged,
    /// nonce lifetime elapsed, or nonce count exhausted). Each call bumps
    /// the nonce count and draws a fresh cnonce.
    pub fn authorize(&mut self, method: &str, uri: &str) -> Option<String> {
        let expired = self
            .session
            .as_ref()
            .is_some_and(|s| s.created_at.elapsed() > self.nonce_lifetime);
        if expired {
            debug!("nonce lifetime elapsed, discarding auth session");
            self.session = None;
        }

        let session = self.session.as_mut()?;
        let password = self.password.expose_secret();

        if session.scheme == AuthScheme::Basic {
            let token = STANDARD.encode(format!("{}:{password}", self.username));
            return Some(format!("Basic {token}"));
        }

        let Some(nc) = session.nc.checked_add(1) else {
            self.session = None;
            return None;
        };
        session.nc = nc;
        session.cnonce = generate_cnonce();

        let response = compute_response(&DigestParams {
            algorithm: session.algorithm,
            username: &self.username,
            password,
            realm: &session.realm,
            nonce: &session.nonce,
            method,
            uri,
            qop: session.qop.as_deref(),
            nc,
            cnonce: &session.cnonce,
        });

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}, response=\"{response}\"",
            quote(&self.username),
            quote(&session.realm),
            quote(&session.nonce),
            quote(uri),
            session.algorithm,
        );
        if let Some(ref opaque) = session.opaque {
            let _ = write!(header, ", opaque=\"{}\"", quote(opaque));
        }
        if let Some(ref qop) = session.qop {
            let _ = write!(header, ", qop={qop}, nc={nc:08x}, cnonce=\"{}\"", session.cnonce);
        }
        Some(header)
    }
}

// ── Challenge parsing ────────────────────────────────────────────────

/// Split a challenge into its scheme and lowercase-keyed parameters.
fn split_challenge(header: &str) -> (&str, HashMap<String, String>) {
    let header = header.trim();
    let (scheme, rest) = header
        .split_once(char::is_whitespace)
        .unwrap_or((header, ""));
    (scheme, parse_params(rest))
}

/// Parse `key=value, key="quoted, value"` pairs.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ',') {
            key.push(c);
        }
        if chars.next_if_eq(&'=').is_none() {
            continue;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    other => value.push(other),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                value.push(c);
            }
            value = value.trim_end().to_owned();
        }

        let key = key.trim().to_ascii_lowercase();
        if !key.is_empty() {
            params.insert(key, value);
        }
    }

    params
}

/// Pick `auth` out of a qop list such as `"auth,auth-int"`.
fn select_qop(offered: &str) -> Result<String, Error> {
    offered
        .split(',')
        .map(str::trim)
        .find(|q| q.eq_ignore_ascii_case("auth"))
        .map(str::to_owned)
        .ok_or_else(|| Error::authentication(format!("unsupported digest qop: {offered}")))
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn generate_cnonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
