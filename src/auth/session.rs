//! Session management
//!
//! Sessions are small key/value maps carried in an encrypted cookie.
//! No server-side session storage needed.
//!
//! Cookie format: `base64url(nonce || AES-256-GCM(json payload))`, with the
//! key derived as `HMAC-SHA256(password, KEY_CONTEXT)`.

use std::collections::BTreeMap;
use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{CookieConfig, SessionConfig};
use crate::error::{AppError, SessionDecodeError};

/// Anti-forgery token of the pending login
pub const OAUTH_STATE: &str = "oauth_state";
/// Where to send the user once the callback completes
pub const POST_LOGIN_REDIRECT: &str = "post-login-redirect-url";
pub const ACCESS_TOKEN: &str = "access_token";
pub const REFRESH_TOKEN: &str = "refresh_token";
pub const ID_TOKEN: &str = "id_token";
/// Unix timestamp after which the access token is no longer accepted
pub const EXPIRES_AT: &str = "expires_at";

const KEY_CONTEXT: &[u8] = b"kinde-axum session v1";
const AES_GCM_NONCE_BYTES: usize = 12;
const MAX_COOKIE_BYTES: usize = 4096;

/// Per-user session state
///
/// Owned by a single request. Mutations mark the session dirty so the
/// response knows to ship an updated cookie.
#[derive(Clone, PartialEq)]
pub struct Session {
    id: String,
    values: BTreeMap<String, Value>,
    dirty: bool,
}

impl Session {
    /// Create an empty session with a fresh identifier
    pub fn new() -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            values: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Correlation id for logs; carries no authority
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Issue a new identifier, e.g. once the user has signed in
    pub fn rotate_id(&mut self) {
        self.id = ulid::Ulid::new().to_string();
        self.dirty = true;
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value for `key`, if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Remove `key` and return it when it held a string
    pub fn take_str(&mut self, key: &str) -> Option<String> {
        match self.remove(key) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        }
    }

    /// Drop every key
    ///
    /// Always marks the session dirty so that the cookie is removed even if
    /// nothing was stored.
    pub fn clear(&mut self) {
        self.values.clear();
        self.dirty = true;
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values hold tokens; only keys are printed.
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct SessionPayload {
    id: String,
    issued_at: DateTime<Utc>,
    values: BTreeMap<String, Value>,
}

/// Encrypts sessions into cookies and back
#[derive(Clone)]
pub struct SessionManager {
    cipher: Aes256Gcm,
    max_age: Duration,
    cookie: CookieConfig,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("max_age", &self.max_age)
            .field("cookie", &self.cookie)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Build the manager from validated session configuration
    pub fn from_config(config: &SessionConfig) -> Result<Self, AppError> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(config.password.expose().as_bytes())
            .map_err(|e| AppError::Encryption(e.to_string()))?;
        mac.update(KEY_CONTEXT);
        let key = mac.finalize().into_bytes();

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| AppError::Encryption("invalid session key length".to_string()))?;

        Ok(Self {
            cipher,
            max_age: Duration::seconds(config.max_age_seconds),
            cookie: config.cookie.clone(),
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie.name
    }

    /// Encrypt a session into a cookie value
    pub fn encode(&self, session: &Session) -> Result<String, AppError> {
        let payload = SessionPayload {
            id: session.id.clone(),
            issued_at: Utc::now(),
            values: session.values.clone(),
        };
        let plaintext =
            serde_json::to_vec(&payload).map_err(|e| AppError::Internal(e.into()))?;

        let mut nonce = [0_u8; AES_GCM_NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| AppError::Encryption("session encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(AES_GCM_NONCE_BYTES + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Decrypt and authenticate a cookie value
    ///
    /// # Errors
    /// Returns the reason the cookie was rejected. Callers treat every
    /// variant as "no session".
    pub fn decode(&self, value: &str) -> Result<Session, SessionDecodeError> {
        let raw = URL_SAFE_NO_PAD
            .decode(value.trim())
            .map_err(|_| SessionDecodeError::Encoding)?;
        if raw.len() <= AES_GCM_NONCE_BYTES {
            return Err(SessionDecodeError::Truncated);
        }

        let (nonce, ciphertext) = raw.split_at(AES_GCM_NONCE_BYTES);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SessionDecodeError::Tampered)?;

        let payload: SessionPayload =
            serde_json::from_slice(&plaintext).map_err(|_| SessionDecodeError::Payload)?;

        match payload.issued_at.checked_add_signed(self.max_age) {
            Some(expires_at) if expires_at >= Utc::now() => {}
            _ => return Err(SessionDecodeError::Expired),
        }

        Ok(Session {
            id: payload.id,
            values: payload.values,
            dirty: false,
        })
    }

    /// Read the session from the request cookies
    ///
    /// Fails closed: a missing, tampered or expired cookie yields a fresh
    /// empty session.
    pub fn load(&self, jar: &CookieJar) -> Session {
        let Some(cookie) = jar.get(&self.cookie.name) else {
            return Session::new();
        };

        match self.decode(cookie.value()) {
            Ok(session) => session,
            Err(reason) => {
                tracing::debug!(
                    cookie = %self.cookie.name,
                    %reason,
                    "Discarding undecodable session cookie"
                );
                let mut session = Session::new();
                // Make sure the bad cookie gets replaced or removed.
                session.dirty = true;
                session
            }
        }
    }

    /// Add the session cookie to the response jar if the session changed
    ///
    /// An empty session removes the cookie.
    pub fn store(&self, jar: CookieJar, session: &Session) -> Result<CookieJar, AppError> {
        if !session.is_dirty() {
            return Ok(jar);
        }

        if session.is_empty() {
            // Added rather than removed so the removal is sent even when
            // the request carried no cookie.
            let mut removal = Cookie::build((self.cookie.name.clone(), ""))
                .path(self.cookie.path.clone())
                .build();
            removal.make_removal();
            return Ok(jar.add(removal));
        }

        let value = self.encode(session)?;
        if value.len() > MAX_COOKIE_BYTES {
            tracing::warn!(
                session_id = %session.id(),
                bytes = value.len(),
                "Session cookie exceeds 4096 bytes and may be dropped by browsers"
            );
        }

        Ok(jar.add(self.build_cookie(value)))
    }

    fn build_cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.cookie.name.clone(), value))
            .path(self.cookie.path.clone())
            .http_only(self.cookie.http_only)
            .secure(self.cookie.secure)
            .same_site(self.cookie.same_site.into())
            .max_age(time::Duration::seconds(self.max_age.num_seconds()))
            .build()
    }
}
