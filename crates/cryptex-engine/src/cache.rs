//! Context cache
//!
//! Bounded LRU of sanitized snapshots keyed by context id. Entries older than
//! `max_age` are treated as absent on lookup and removed by sweeps, either
//! opportunistically from the engine or from a background reaper task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use cryptex_core::SanitizedSnapshot;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default maximum number of cached contexts
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Default context lifetime in seconds
pub const DEFAULT_MAX_AGE_SECS: u64 = 3600;

/// Upper bound on the sweep interval
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size: usize,
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_age: Duration::from_secs(DEFAULT_MAX_AGE_SECS),
        }
    }
}

impl CacheConfig {
    /// How often expired entries are swept: a sixth of `max_age`, capped at
    /// five minutes
    pub fn sweep_interval(&self) -> Duration {
        (self.max_age / 6).clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL)
    }
}

struct CacheEntry {
    snapshot: Arc<SanitizedSnapshot>,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) > max_age
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub count: usize,
    pub max_size: usize,
    /// `count / max_size`
    pub utilization: f64,
    pub max_age_secs: f64,
    pub average_age_secs: f64,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to stay within `max_size`
    pub evictions: u64,
    /// Entries dropped for exceeding `max_age`
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ContextCache {
    config: CacheConfig,
    entries: RwLock<LruCache<String, CacheEntry>>,
    last_sweep: Mutex<Instant>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ContextCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            // Bounded by hand in `store` so evictions can be counted
            entries: RwLock::new(LruCache::unbounded()),
            last_sweep: Mutex::new(Instant::now()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or replace a context, evicting least recently used entries
    /// beyond `max_size`
    pub async fn store(&self, context_id: String, snapshot: Arc<SanitizedSnapshot>) {
        let mut entries = self.entries.write().await;
        entries.put(
            context_id,
            CacheEntry {
                snapshot,
                stored_at: Instant::now(),
            },
        );

        while entries.len() > self.config.max_size {
            match entries.pop_lru() {
                Some((evicted, _)) => {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(context_id = %evicted, "Evicted least recently used context");
                }
                None => break,
            }
        }
    }

    /// Look up a live context, marking it most recently used
    pub async fn get(&self, context_id: &str) -> Option<Arc<SanitizedSnapshot>> {
        let now = Instant::now();
        if !self.entries.read().await.contains(context_id) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let mut entries = self.entries.write().await;
        self.take_live(&mut entries, context_id, now)
    }

    /// Promote and return `context_id` if it is live as of `now`
    ///
    /// Runs under the write lock; the entry may have been cleared, replaced or
    /// swept since the read lock was released.
    fn take_live(
        &self,
        entries: &mut LruCache<String, CacheEntry>,
        context_id: &str,
        now: Instant,
    ) -> Option<Arc<SanitizedSnapshot>> {
        let lookup = entries.get(context_id).map(|entry| {
            (
                Arc::clone(&entry.snapshot),
                entry.is_expired(now, self.config.max_age),
            )
        });

        match lookup {
            Some((snapshot, false)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(snapshot)
            }
            Some((_, true)) => {
                entries.pop(context_id);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(context_id, "Dropped expired context on lookup");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remove every entry older than `max_age` as of `now`
    pub async fn evict_expired(&self, now: Instant) -> usize {
        let removed = {
            let mut entries = self.entries.write().await;
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now, self.config.max_age))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                entries.pop(id.as_str());
            }
            expired.len()
        };

        *self.sweep_clock() = now;

        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            info!(removed, "Swept expired contexts");
        }
        removed
    }

    /// Sweep only if `interval` has passed since the previous sweep
    pub async fn sweep_if_due(&self, interval: Duration) -> usize {
        let now = Instant::now();
        let due = now.saturating_duration_since(*self.sweep_clock()) >= interval;
        if due { self.evict_expired(now).await } else { 0 }
    }

    fn sweep_clock(&self) -> MutexGuard<'_, Instant> {
        self.last_sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop one context; returns whether it was present
    pub async fn clear(&self, context_id: &str) -> bool {
        self.entries.write().await.pop(context_id).is_some()
    }

    /// Drop every context; returns how many were removed
    pub async fn clear_all(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let count = entries.len();
        let total_age: f64 = entries
            .iter()
            .map(|(_, entry)| now.saturating_duration_since(entry.stored_at).as_secs_f64())
            .sum();

        CacheStats {
            count,
            max_size: self.config.max_size,
            utilization: if self.config.max_size == 0 {
                0.0
            } else {
                count as f64 / self.config.max_size as f64
            },
            max_age_secs: self.config.max_age.as_secs_f64(),
            average_age_secs: if count == 0 {
                0.0
            } else {
                total_age / count as f64
            },
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    /// Zero the hit and miss counters
    pub fn reset_counters(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Spawn a task sweeping expired entries every `interval`
    ///
    /// Must be called from within a tokio runtime. The task holds only a weak
    /// reference and exits once the cache is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> ReaperHandle {
        let cache: Weak<Self> = Arc::downgrade(self);
        let interval = interval.max(MIN_SWEEP_INTERVAL);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.evict_expired(Instant::now()).await;
            }
            debug!("Context reaper exited");
        });

        info!(
            interval_ms = interval.as_millis() as u64,
            "Started context reaper"
        );
        ReaperHandle { task }
    }
}

/// Background sweep task; aborted on [`ReaperHandle::stop`] or drop
pub struct ReaperHandle {
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        // Drop aborts the task
        info!("Stopped context reaper");
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
