//! API Key Manager
//!
//! Round-robin selection over a pool of credential-bound clients, with per-key health
//! tracking. Keys that are rate limited or that keep failing are skipped until their
//! backoff or cooldown window runs out. A key is never removed from the pool.

use crate::config::KeyManagerConfig;
use crate::error::{Result, UgliError};
use crate::router::clock::Clock;
use crate::router::rate_limit::looks_like_rate_limit_error;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Number of leading credential characters kept in the masked identifier
const MASK_PREFIX_LEN: usize = 8;

/// Appended to every masked identifier
const MASK_SUFFIX: &str = "***";

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Build a log-safe display form of a credential.
///
/// Keeps at most the first 8 characters, and never more than half of the credential.
/// The half-length cap deliberately departs from a plain "first 8 characters" mask so
/// credentials of 16 characters or fewer are never mostly revealed.
pub fn mask_credential(credential: &str) -> String {
    let visible = MASK_PREFIX_LEN.min(credential.chars().count() / 2);
    let prefix: String = credential.chars().take(visible).collect();
    format!("{}{}", prefix, MASK_SUFFIX)
}

/// Identifies the key that served a request. Passed back in `report_*` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHandle {
    manager_id: u64,
    index: usize,
}

impl KeyHandle {
    /// Position of the key in its pool
    pub fn index(&self) -> usize {
        self.index
    }
}

/// A client handed out by [`KeyManager::next_client`], together with the handle to report on.
#[derive(Debug)]
pub struct Lease<C> {
    handle: KeyHandle,
    client: Arc<C>,
}

impl<C> Lease<C> {
    pub fn handle(&self) -> KeyHandle {
        self.handle
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn into_parts(self) -> (KeyHandle, Arc<C>) {
        (self.handle, self.client)
    }
}

/// Mutable health fields of a key, guarded together
#[derive(Debug, Clone, Copy, Default)]
struct KeyHealth {
    /// Consecutive generic errors since the last success or cooldown reset
    error_count: u32,
    last_error_at: Option<DateTime<Utc>>,
    rate_limited_until: Option<DateTime<Utc>>,
}

impl KeyHealth {
    fn is_rate_limited(&self, now: DateTime<Utc>) -> bool {
        matches!(self.rate_limited_until, Some(until) if until > now)
    }

    fn is_available(&self, now: DateTime<Utc>, config: &KeyManagerConfig) -> bool {
        !self.is_rate_limited(now) && self.error_count < config.max_consecutive_errors
    }
}

/// Managed state for a single credential
#[derive(Debug)]
pub struct KeyState<C> {
    /// Client bound to this credential
    client: Arc<C>,

    /// Log-safe form of the credential
    masked: String,

    /// Total number of times this key was handed out
    request_count: AtomicU64,

    health: Mutex<KeyHealth>,
}

impl<C> KeyState<C> {
    fn new(credential: &str, client: C) -> Self {
        Self {
            client: Arc::new(client),
            masked: mask_credential(credential),
            request_count: AtomicU64::new(0),
            health: Mutex::new(KeyHealth::default()),
        }
    }

    /// Masked identifier, safe to log
    pub fn masked(&self) -> &str {
        &self.masked
    }

    /// Get the request count
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Decide whether this key may serve a request right now.
    ///
    /// A key over the error threshold whose cooldown has elapsed gets its error count
    /// reset and is accepted.
    fn try_acquire(&self, now: DateTime<Utc>, config: &KeyManagerConfig) -> bool {
        let mut health = self.health.lock();

        if health.is_rate_limited(now) {
            return false;
        }

        if health.error_count >= config.max_consecutive_errors {
            let cooled_down = health
                .last_error_at
                .map_or(true, |at| now - at >= config.error_cooldown());
            if !cooled_down {
                return false;
            }
            health.error_count = 0;
            info!(key = %self.masked, "error cooldown elapsed, key back in rotation");
        }

        true
    }
}

/// Point-in-time view of one key, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct KeySnapshot {
    pub index: usize,
    pub masked_key: String,
    pub request_count: u64,
    pub error_count: u32,
    pub last_error_at: Option<DateTime<Utc>>,
    pub rate_limited_until: Option<DateTime<Utc>>,
}

/// Aggregate statistics about the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    pub total_keys: usize,
    /// Keys neither rate limited nor over the error threshold
    pub available_keys: usize,
    pub rate_limited_keys: usize,
    pub total_requests: u64,
}

/// Pool of credential-bound clients with health-aware round-robin selection
pub struct KeyManager<C> {
    id: u64,

    keys: Vec<KeyState<C>>,

    /// Rotation cursor, always in `0..keys.len()`
    current_index: AtomicUsize,

    config: KeyManagerConfig,

    clock: Arc<dyn Clock>,
}

impl<C> KeyManager<C> {
    /// Build a manager with one client per credential, in order.
    ///
    /// An empty credential list is accepted; every later [`next_client`](Self::next_client)
    /// call fails with [`UgliError::NoCredentials`].
    pub fn new<F>(
        credentials: Vec<String>,
        config: KeyManagerConfig,
        clock: Arc<dyn Clock>,
        mut make_client: F,
    ) -> Self
    where
        F: FnMut(&str) -> C,
    {
        match Self::try_new(credentials, config, clock, |credential| {
            Ok::<_, Infallible>(make_client(credential))
        }) {
            Ok(manager) => manager,
            Err(never) => match never {},
        }
    }

    /// Like [`new`](Self::new), for client constructors that can fail.
    pub fn try_new<F, E>(
        credentials: Vec<String>,
        config: KeyManagerConfig,
        clock: Arc<dyn Clock>,
        mut make_client: F,
    ) -> std::result::Result<Self, E>
    where
        F: FnMut(&str) -> std::result::Result<C, E>,
    {
        let keys = credentials
            .iter()
            .map(|credential| {
                let client = make_client(credential.as_str())?;
                Ok(KeyState::new(credential, client))
            })
            .collect::<std::result::Result<Vec<KeyState<C>>, E>>()?;

        if keys.is_empty() {
            warn!(
                keys = 0,
                "no Gemini credentials configured, generation requests will fail"
            );
        } else {
            info!(keys = keys.len(), "key manager initialized");
        }

        Ok(Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            keys,
            current_index: AtomicUsize::new(0),
            config,
            clock,
        })
    }

    /// Get the number of keys in the pool
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn config(&self) -> &KeyManagerConfig {
        &self.config
    }

    /// Pick the client for the next outbound request.
    ///
    /// Walks the pool once from the cursor, skipping keys that are rate limited or over the
    /// error threshold. When every key is unhealthy the first key is returned anyway; the
    /// upstream call then fails and feeds back into health tracking.
    pub fn next_client(&self) -> Result<Lease<C>> {
        let len = self.keys.len();
        if len == 0 {
            return Err(UgliError::NoCredentials);
        }

        let now = self.clock.now();
        for _ in 0..len {
            let index = self.advance(len);
            if self.keys[index].try_acquire(now, &self.config) {
                return Ok(self.lease(index));
            }
        }

        warn!(
            keys = len,
            "all keys rate-limited or erroring, falling back to first key"
        );
        Ok(self.lease(0))
    }

    /// Record a successful call: clears the error streak and any rate limit.
    pub fn report_success(&self, handle: &KeyHandle) {
        if let Some(key) = self.key_for(handle) {
            let mut health = key.health.lock();
            health.error_count = 0;
            health.rate_limited_until = None;
        }
    }

    /// Take a key out of rotation for the rate-limit backoff window.
    pub fn report_rate_limit(&self, handle: &KeyHandle) {
        if let Some(key) = self.key_for(handle) {
            let until = self
                .clock
                .now()
                .checked_add_signed(self.config.rate_limit_backoff())
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            key.health.lock().rate_limited_until = Some(until);
            warn!(key = %key.masked, until = %until.to_rfc3339(), "key rate limited");
        }
    }

    /// Record a failed call. Errors whose message looks like a rate limit also
    /// rate-limit the key.
    pub fn report_error<E>(&self, handle: &KeyHandle, error: &E)
    where
        E: fmt::Display + ?Sized,
    {
        let Some(key) = self.key_for(handle) else {
            return;
        };

        let message = error.to_string();
        {
            let mut health = key.health.lock();
            health.error_count = health.error_count.saturating_add(1);
            health.last_error_at = Some(self.clock.now());

            if health.error_count == self.config.max_consecutive_errors {
                warn!(
                    key = %key.masked,
                    errors = health.error_count,
                    "key reached error threshold, skipping until cooldown"
                );
            } else {
                debug!(
                    key = %key.masked,
                    errors = health.error_count,
                    error = %message,
                    "key error"
                );
            }
        }

        if looks_like_rate_limit_error(&message) {
            self.report_rate_limit(handle);
        }
    }

    /// Get statistics about the pool
    pub fn stats(&self) -> KeyStats {
        let now = self.clock.now();
        let mut stats = KeyStats {
            total_keys: self.keys.len(),
            available_keys: 0,
            rate_limited_keys: 0,
            total_requests: 0,
        };

        for key in &self.keys {
            let health = *key.health.lock();
            if health.is_available(now, &self.config) {
                stats.available_keys += 1;
            }
            if health.is_rate_limited(now) {
                stats.rate_limited_keys += 1;
            }
            stats.total_requests += key.request_count();
        }

        stats
    }

    /// Per-key diagnostic view
    pub fn snapshot(&self) -> Vec<KeySnapshot> {
        self.keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let health = *key.health.lock();
                KeySnapshot {
                    index,
                    masked_key: key.masked.clone(),
                    request_count: key.request_count(),
                    error_count: health.error_count,
                    last_error_at: health.last_error_at,
                    rate_limited_until: health.rate_limited_until,
                }
            })
            .collect()
    }

    /// Masked identifier of the key behind a handle, if it belongs to this pool
    pub fn masked_key(&self, handle: &KeyHandle) -> Option<&str> {
        self.key_for(handle).map(KeyState::masked)
    }

    /// Return the cursor and move it one step, wrapping at `len`
    fn advance(&self, len: usize) -> usize {
        match self
            .current_index
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| Some((i + 1) % len))
        {
            Ok(previous) | Err(previous) => previous,
        }
    }

    fn lease(&self, index: usize) -> Lease<C> {
        let key = &self.keys[index];
        key.request_count.fetch_add(1, Ordering::Relaxed);
        Lease {
            handle: KeyHandle {
                manager_id: self.id,
                index,
            },
            client: Arc::clone(&key.client),
        }
    }

    /// Handles minted by another manager, or out of range, resolve to nothing
    fn key_for(&self, handle: &KeyHandle) -> Option<&KeyState<C>> {
        if handle.manager_id != self.id {
            return None;
        }
        self.keys.get(handle.index)
    }
}

impl<C> fmt::Debug for KeyManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("id", &self.id)
            .field(
                "keys",
                &self.keys.iter().map(KeyState::masked).collect::<Vec<_>>(),
            )
            .field("current_index", &self.current_index.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish()
    }
}
