//! Verification key provider.
//!
//! The issuer publishes one raw P-256 public key as hex text.  A
//! [`KeyProvider`] fetches it once per process through a [`KeySource`] and
//! keeps it until [`KeyProvider::invalidate`] is called.  Overlapping
//! [`KeyProvider::ensure_key_loaded`] calls share one in-flight fetch.  A
//! failed fetch is not cached; the next call starts a new one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt as _, Shared};
use tracing::{info, warn};

use crate::error::{MemberIdError, Result, ResultExt as _};
use crate::signing::PublicKey;

// ---------------------------------------------------------------------------
// Key sources
// ---------------------------------------------------------------------------

/// Where the key text comes from.
///
/// Production: [`HttpKeySource`] against the issuer's key endpoint.
/// Offline / tests: [`StaticKeySource`].
pub trait KeySource: Send + Sync + 'static {
    /// Fetch the raw key text (hex, possibly `0x`-prefixed).
    fn fetch_key(&self) -> BoxFuture<'_, Result<String>>;
}

/// Single GET to the issuer's key endpoint.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl KeySource for HttpKeySource {
    fn fetch_key(&self) -> BoxFuture<'_, Result<String>> {
        async move {
            let resp = self
                .client
                .get(&self.url)
                .header(reqwest::header::ACCEPT, "text/plain")
                .send()
                .await
                .ctx_key(&format!("GET {}", self.url))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(MemberIdError::KeyFetch(format!(
                    "{} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("error")
                )));
            }

            resp.text().await.ctx_key("read body")
        }
        .boxed()
    }
}

/// Key text known up front (config file, CLI flag, tests).
#[derive(Debug, Clone)]
pub struct StaticKeySource(pub String);

impl KeySource for StaticKeySource {
    fn fetch_key(&self) -> BoxFuture<'_, Result<String>> {
        let text = self.0.clone();
        async move { Ok(text) }.boxed()
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

type PendingFetch = Shared<BoxFuture<'static, Result<PublicKey>>>;

enum KeyState {
    Unloaded,
    /// A fetch is in flight.  `last_error` carries the previous failure
    /// until this fetch succeeds.
    Loading {
        pending: PendingFetch,
        last_error: Option<String>,
    },
    Loaded(PublicKey),
    Failed(String),
}

/// Loads and caches the verification key.  Construct once and share by
/// reference (or `Arc`) with everything that verifies.
pub struct KeyProvider {
    source: Arc<dyn KeySource>,
    state: Mutex<KeyState>,
}

impl std::fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.lock() {
            KeyState::Unloaded => "unloaded",
            KeyState::Loading { .. } => "loading",
            KeyState::Loaded(_) => "loaded",
            KeyState::Failed(_) => "failed",
        };
        f.debug_struct("KeyProvider")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl KeyProvider {
    pub fn new(source: impl KeySource) -> Self {
        Self {
            source: Arc::new(source),
            state: Mutex::new(KeyState::Unloaded),
        }
    }

    /// A provider that already holds `key` and never fetches.
    pub fn preloaded(key: PublicKey) -> Self {
        Self {
            source: Arc::new(StaticKeySource(key.to_hex())),
            state: Mutex::new(KeyState::Loaded(key)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, KeyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure a key is loaded, fetching it if needed.
    ///
    /// `Ok` means a key is loaded when this returns.  If the fetch this call
    /// joined is superseded (by [`KeyProvider::invalidate`] or a newer load),
    /// the call follows the newer load, or fails with
    /// [`MemberIdError::KeyUnavailable`] when none is running.
    pub async fn ensure_key_loaded(&self) -> Result<()> {
        loop {
            let pending = {
                let mut state = self.lock();
                match &*state {
                    KeyState::Loaded(_) => return Ok(()),
                    KeyState::Loading { pending, .. } => pending.clone(),
                    KeyState::Unloaded | KeyState::Failed(_) => {
                        let last_error = match &*state {
                            KeyState::Failed(reason) => Some(reason.clone()),
                            _ => None,
                        };
                        let pending = self.start_fetch();
                        *state = KeyState::Loading {
                            pending: pending.clone(),
                            last_error,
                        };
                        pending
                    }
                }
            };

            let outcome = pending.clone().await;

            let mut state = self.lock();
            let ours = matches!(&*state, KeyState::Loading { pending: p, .. } if p.ptr_eq(&pending));
            if !ours {
                // Superseded while we waited; the current state decides.
                match &*state {
                    KeyState::Loaded(_) => return Ok(()),
                    KeyState::Loading { .. } => continue,
                    KeyState::Unloaded | KeyState::Failed(_) => {
                        return Err(match outcome {
                            Err(e) => as_fetch_error(e),
                            Ok(_) => MemberIdError::KeyUnavailable,
                        });
                    }
                }
            }

            return match outcome {
                Ok(key) => {
                    info!(fingerprint = %key.fingerprint(), "verification key loaded");
                    *state = KeyState::Loaded(key);
                    Ok(())
                }
                Err(e) => {
                    let err = as_fetch_error(e);
                    warn!(error = %err, "verification key unavailable");
                    *state = KeyState::Failed(err.to_string());
                    Err(err)
                }
            };
        }
    }

    fn start_fetch(&self) -> PendingFetch {
        let source = Arc::clone(&self.source);
        async move {
            let text = source.fetch_key().await?;
            PublicKey::from_hex(&text)
        }
        .boxed()
        .shared()
    }

    /// Whether a key is loaded and usable.
    pub fn is_available(&self) -> bool {
        matches!(&*self.lock(), KeyState::Loaded(_))
    }

    /// Reason of the most recent failed load, cleared by a successful load
    /// (or by [`KeyProvider::invalidate`]).  A retry in flight keeps it.
    pub fn last_error(&self) -> Option<String> {
        match &*self.lock() {
            KeyState::Failed(reason) => Some(reason.clone()),
            KeyState::Loading { last_error, .. } => last_error.clone(),
            _ => None,
        }
    }

    /// The loaded key, if any.  Never triggers a fetch.
    pub fn public_key(&self) -> Option<PublicKey> {
        match &*self.lock() {
            KeyState::Loaded(key) => Some(key.clone()),
            _ => None,
        }
    }

    /// Drop the cached key and any recorded error.
    pub fn invalidate(&self) {
        *self.lock() = KeyState::Unloaded;
    }
}

fn as_fetch_error(e: MemberIdError) -> MemberIdError {
    match e {
        MemberIdError::KeyFetch(_) => e,
        other => MemberIdError::KeyFetch(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
