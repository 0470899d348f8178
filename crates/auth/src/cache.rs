//! TTL cache of resolved effective access, keyed by (user, scope).
//!
//! Entries are dropped eagerly when an [`InvalidationEvent`] covers them and
//! lazily when their TTL elapses. Rule evaluation itself is never cached; a
//! cached entry is only the membership half of a decision.
//!
//! Expired entries are removed when a lookup finds them and by a full sweep
//! that [`insert`] runs at most once per TTL, so the map stays bounded by the
//! keys resolved within roughly two TTL windows.
//!
//! A fill that raced an invalidation is discarded: callers read [`epoch`]
//! before resolving and hand it back to [`insert`], which refuses the write if
//! any invalidation happened in between.
//!
//! [`epoch`]: DecisionCache::epoch
//! [`insert`]: DecisionCache::insert

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use projectgate_core::{ProjectId, UserId};
use projectgate_events::{EventListener, InvalidationEvent};

use crate::effective::{EffectiveAccess, Scope};

/// Upper bound on the TTL accepted by configuration.
pub const MAX_TTL: Duration = Duration::from_secs(60);

/// Default TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CacheEntry {
    access: EffectiveAccess,
    inserted_at: Instant,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidated: u64,
    pub stale_fills_skipped: u64,
}

#[derive(Debug)]
pub struct DecisionCache {
    ttl: Duration,
    entries: RwLock<HashMap<(UserId, Scope), CacheEntry>>,
    last_sweep: Mutex<Instant>,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidated: AtomicU64,
    stale_fills_skipped: AtomicU64,
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl DecisionCache {
    /// `ttl` is clamped to [`MAX_TTL`].
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.min(MAX_TTL),
            entries: RwLock::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
            stale_fills_skipped: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, user: UserId, scope: Scope) -> Option<EffectiveAccess> {
        let lookup = self.entries.read().ok().map(|entries| match entries.get(&(user, scope)) {
            Some(e) if e.inserted_at.elapsed() < self.ttl => Lookup::Fresh(e.access.clone()),
            Some(_) => Lookup::Expired,
            None => Lookup::Absent,
        });

        match lookup {
            Some(Lookup::Fresh(access)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(access)
            }
            Some(Lookup::Expired) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut entries) = self.entries.write() {
                    // Re-check: a fresh fill may have landed between the locks.
                    if entries
                        .get(&(user, scope))
                        .is_some_and(|e| e.inserted_at.elapsed() >= self.ttl)
                    {
                        entries.remove(&(user, scope));
                    }
                }
                None
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Current invalidation epoch. Read it before resolving a miss.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Store `access` unless an invalidation happened since `observed_epoch`.
    ///
    /// Entries without an owning organisation (unknown projects) are never
    /// stored: no invalidation could ever reach them.
    pub fn insert(&self, user: UserId, scope: Scope, access: EffectiveAccess, observed_epoch: u64) -> bool {
        if access.organisation_id.is_none() {
            return false;
        }

        let Ok(mut entries) = self.entries.write() else {
            return false;
        };

        // Invalidations bump the epoch while holding this same lock.
        if self.epoch.load(Ordering::Acquire) != observed_epoch {
            self.stale_fills_skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(user_id = %user, scope = %scope, "skipped cache fill that raced an invalidation");
            return false;
        }

        self.sweep_if_due(&mut entries);
        entries.insert(
            (user, scope),
            CacheEntry {
                access,
                inserted_at: Instant::now(),
            },
        );
        true
    }

    /// Drop every entry the event covers. Returns how many were dropped.
    pub fn invalidate(&self, event: &InvalidationEvent) -> usize {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.epoch.fetch_add(1, Ordering::AcqRel);

        let before = entries.len();
        entries.retain(|(user, scope), entry| {
            let Some(org) = entry.access.organisation_id else {
                return false;
            };
            !event.covers(*user, org, project_of(*scope))
        });
        let dropped = before - entries.len();

        self.invalidated.fetch_add(dropped as u64, Ordering::Relaxed);
        tracing::debug!(
            event_id = %event.event_id(),
            change = ?event.change(),
            dropped,
            "invalidated cached access"
        );
        dropped
    }

    /// Remove entries whose TTL has elapsed.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        self.purge_locked(&mut entries)
    }

    fn purge_locked(&self, entries: &mut HashMap<(UserId, Scope), CacheEntry>) -> usize {
        let before = entries.len();
        entries.retain(|_, e| e.inserted_at.elapsed() < self.ttl);
        if let Ok(mut last) = self.last_sweep.lock() {
            *last = Instant::now();
        }
        before - entries.len()
    }

    /// Full sweep, at most once per TTL. Caller holds the entries write lock.
    fn sweep_if_due(&self, entries: &mut HashMap<(UserId, Scope), CacheEntry>) {
        let due = self
            .last_sweep
            .lock()
            .map(|last| last.elapsed() >= self.ttl)
            .unwrap_or(true);
        if due {
            let purged = self.purge_locked(entries);
            if purged > 0 {
                tracing::debug!(purged, remaining = entries.len(), "swept expired cache entries");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            stale_fills_skipped: self.stale_fills_skipped.load(Ordering::Relaxed),
        }
    }
}

enum Lookup {
    Fresh(EffectiveAccess),
    Expired,
    Absent,
}

fn project_of(scope: Scope) -> Option<ProjectId> {
    match scope {
        Scope::Project(p) => Some(p),
        Scope::Organisation(_) => None,
    }
}

impl EventListener<InvalidationEvent> for DecisionCache {
    fn on_event(&self, message: &InvalidationEvent) {
        self.invalidate(message);
    }
}
