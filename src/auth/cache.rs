//! Short-lived memo of credential verdicts
//!
//! Maps a presented bearer token to the verdict it last received. Both
//! positive and negative verdicts are kept so that retries of a known-bad
//! token do not reach the verifier again. The TTL is a cache lifetime, not
//! the credential's own validity window, and is capped at
//! [`MAX_VERIFICATION_TTL`] so an upstream revocation is honoured within
//! that bound.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Upper bound for how long a verdict may be trusted
pub const MAX_VERIFICATION_TTL: Duration = Duration::from_secs(15 * 60);

/// Default sweep period for [`VerificationCache::spawn_cleanup`]
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A cached verdict and the instant it stops being trusted
#[derive(Debug, Clone, Copy)]
struct VerificationEntry {
    valid: bool,
    expires_at: Instant,
}

impl VerificationEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Thread-safe verdict cache with lazy and periodic expiry
#[derive(Debug)]
pub struct VerificationCache {
    entries: RwLock<HashMap<String, VerificationEntry>>,
    ttl: Duration,
}

impl VerificationCache {
    /// Create a cache whose entries live for `ttl` (capped at 15 minutes).
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let ttl = ttl.min(MAX_VERIFICATION_TTL);
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Effective entry lifetime
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up the cached verdict for `credential`.
    ///
    /// `None` is a miss, either because nothing was cached or because the
    /// entry outlived its TTL. A stale entry is dropped opportunistically:
    /// if the write lock is free it is removed now, otherwise the periodic
    /// [`cleanup`](Self::cleanup) takes care of it. The caller never waits
    /// on a writer to learn about the miss.
    pub fn get(&self, credential: &str) -> Option<bool> {
        let now = Instant::now();
        let entry = self.entries.read().get(credential).copied()?;

        if entry.is_expired(now) {
            if let Some(mut entries) = self.entries.try_write() {
                // A concurrent set() may have refreshed it in the meantime
                if entries.get(credential).is_some_and(|e| e.is_expired(now)) {
                    entries.remove(credential);
                    trace!("Dropped stale verification entry");
                }
            }
            return None;
        }

        Some(entry.valid)
    }

    /// Record `valid` for `credential` with a fresh TTL from now.
    pub fn set(&self, credential: &str, valid: bool) {
        let entry = VerificationEntry {
            valid,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().insert(credential.to_string(), entry);
    }

    /// Remove every entry whose TTL has elapsed. Returns how many went.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of entries currently held (expired ones included until swept)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` until `shutdown` fires.
    ///
    /// This is the only expiry path that runs without request traffic.
    pub fn spawn_cleanup(
        self: &std::sync::Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let cache = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.cleanup();
                        if removed > 0 {
                            debug!(removed, remaining = cache.len(), "Swept verification cache");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

impl Default for VerificationCache {
    fn default() -> Self {
        Self::new(MAX_VERIFICATION_TTL)
    }
}
