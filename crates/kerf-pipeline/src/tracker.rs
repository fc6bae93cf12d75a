//! Resource tracking for native handles.
//!
//! [`ResourceTracker`] is the single authority over every live
//! [`NativeHandle`]. It caps the number of concurrently live handles,
//! evicts the oldest ones when the cap is exceeded, and guarantees that
//! each handle's buffer reaches the [`Disposer`] at most once.
//!
//! The tracked set sits behind a mutex because the periodic cleanup
//! timer runs independently of scheduled work. Disposal always happens
//! after the lock is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::native::{HandleId, NativeBuffer, NativeHandle};

/// Default maximum number of concurrently tracked handles.
pub const DEFAULT_CAPACITY: usize = 20;

/// Default share of the tracked set released by one eviction.
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.25;

/// Default occupancy ratio above which `cleanup_tick` evicts.
pub const DEFAULT_AUTO_CLEANUP_THRESHOLD: f64 = 0.7;

/// Tracker tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum number of live handles after `track` returns.
    pub capacity: usize,
    /// Share of the set evicted at once, in `[0, 1]`. At least one
    /// handle is always evicted from a non-empty set.
    pub eviction_fraction: f64,
    /// Occupancy ratio above which periodic cleanup evicts.
    pub auto_cleanup_threshold: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            eviction_fraction: DEFAULT_EVICTION_FRACTION,
            auto_cleanup_threshold: DEFAULT_AUTO_CLEANUP_THRESHOLD,
        }
    }
}

/// Snapshot of tracker occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Handles currently tracked.
    pub current: usize,
    /// Handles ever tracked. Not reset by `release_all`.
    pub total_allocated: u64,
    /// Configured capacity.
    pub max: usize,
}

/// A disposer failed to free a native buffer.
///
/// Never leaves the tracker: it is logged and counted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("failed to dispose native buffer `{label}`: {reason}")]
    DisposeFailed {
        /// Label of the handle being disposed.
        label: String,
        /// Backend-specific failure description.
        reason: String,
    },
}

/// Frees native buffers on behalf of the tracker.
pub trait Disposer: Send + Sync {
    /// Free one buffer. Called at most once per handle.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] if the external capability refused the
    /// request. The tracker logs it and moves on.
    fn dispose(&self, label: &str, buffer: NativeBuffer) -> Result<(), ResourceError>;
}

/// Disposer that simply drops the buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropDisposer;

impl Disposer for DropDisposer {
    fn dispose(&self, _label: &str, buffer: NativeBuffer) -> Result<(), ResourceError> {
        drop(buffer);
        Ok(())
    }
}

struct Entry {
    handle: NativeHandle,
    tracked_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct TrackedSet {
    entries: HashMap<HandleId, Entry>,
    total_allocated: u64,
    next_seq: u64,
}

impl TrackedSet {
    /// Remove and return the `count` oldest entries.
    fn take_oldest(&mut self, count: usize) -> Vec<NativeHandle> {
        let mut order: Vec<(Instant, u64, HandleId)> = self
            .entries
            .iter()
            .map(|(id, entry)| (entry.tracked_at, entry.seq, *id))
            .collect();
        order.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        order
            .into_iter()
            .take(count)
            .filter_map(|(_, _, id)| self.entries.remove(&id))
            .map(|entry| entry.handle)
            .collect()
    }
}

/// Number of handles one eviction pass releases from a set of `len`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn eviction_count(len: usize, fraction: f64) -> usize {
    if len == 0 {
        return 0;
    }
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    ((len as f64 * fraction).floor() as usize).clamp(1, len)
}

/// Tracks live native handles and disposes them exactly once.
pub struct ResourceTracker {
    config: TrackerConfig,
    disposer: Arc<dyn Disposer>,
    set: Mutex<TrackedSet>,
    disposal_failures: AtomicU64,
}

impl ResourceTracker {
    /// Create a tracker that drops buffers on disposal.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_disposer(config, Arc::new(DropDisposer))
    }

    /// Create a tracker that hands buffers to `disposer`.
    ///
    /// A zero capacity is raised to 1.
    #[must_use]
    pub fn with_disposer(config: TrackerConfig, disposer: Arc<dyn Disposer>) -> Self {
        let config = TrackerConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        Self {
            config,
            disposer,
            set: Mutex::new(TrackedSet::default()),
            disposal_failures: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Register a live handle.
    ///
    /// Released or already tracked handles are ignored. If the set
    /// grows past capacity, the oldest entries are evicted before this
    /// returns.
    pub fn track(&self, handle: &NativeHandle) {
        if handle.is_released() {
            tracing::debug!(id = %handle.id(), label = handle.label(), "ignoring released handle");
            return;
        }

        let victims = {
            let mut set = self.lock();
            if set.entries.contains_key(&handle.id()) {
                return;
            }
            let seq = set.next_seq;
            set.next_seq += 1;
            set.total_allocated += 1;
            set.entries.insert(
                handle.id(),
                Entry {
                    handle: handle.clone(),
                    tracked_at: Instant::now(),
                    seq,
                },
            );

            let len = set.entries.len();
            if len > self.config.capacity {
                let count = eviction_count(len, self.config.eviction_fraction)
                    .max(len - self.config.capacity);
                set.take_oldest(count)
            } else {
                Vec::new()
            }
        };

        if !victims.is_empty() {
            tracing::info!(
                evicted = victims.len(),
                capacity = self.config.capacity,
                "tracker over capacity, evicted oldest handles",
            );
        }
        self.dispose_all(victims);
    }

    /// Release one handle.
    ///
    /// Returns `false` without touching the disposer if the handle was
    /// already released.
    pub fn release(&self, handle: &NativeHandle) -> bool {
        if !handle.mark_released() {
            return false;
        }
        self.lock().entries.remove(&handle.id());
        self.dispose(handle);
        true
    }

    /// Release the oldest `fraction` of the tracked set (at least one
    /// handle when non-empty). Returns the number released.
    pub fn evict_oldest(&self, fraction: f64) -> usize {
        let victims = {
            let mut set = self.lock();
            let count = eviction_count(set.entries.len(), fraction);
            set.take_oldest(count)
        };
        let released = self.dispose_all(victims);
        if released > 0 {
            tracing::info!(released, "evicted oldest handles");
        }
        released
    }

    /// [`evict_oldest`](Self::evict_oldest) with the configured fraction.
    pub fn evict_oldest_default(&self) -> usize {
        self.evict_oldest(self.config.eviction_fraction)
    }

    /// Release every tracked handle. Returns the number released.
    pub fn release_all(&self) -> usize {
        let victims: Vec<NativeHandle> = {
            let mut set = self.lock();
            set.entries.drain().map(|(_, entry)| entry.handle).collect()
        };
        let released = self.dispose_all(victims);
        tracing::debug!(released, "released all tracked handles");
        released
    }

    #[must_use]
    pub fn usage(&self) -> Usage {
        let set = self.lock();
        Usage {
            current: set.entries.len(),
            total_allocated: set.total_allocated,
            max: self.config.capacity,
        }
    }

    /// One periodic cleanup step: evicts with the configured fraction
    /// when occupancy exceeds the auto-cleanup threshold.
    #[allow(clippy::cast_precision_loss)]
    pub fn cleanup_tick(&self) -> usize {
        let current = self.lock().entries.len();
        let limit = self.config.capacity as f64 * self.config.auto_cleanup_threshold;
        if current as f64 > limit {
            tracing::info!(current, limit, "auto cleanup triggered");
            self.evict_oldest_default()
        } else {
            0
        }
    }

    #[must_use]
    pub fn contains(&self, handle: &NativeHandle) -> bool {
        self.lock().entries.contains_key(&handle.id())
    }

    /// Number of disposer calls that reported an error.
    #[must_use]
    pub fn disposal_failures(&self) -> u64 {
        self.disposal_failures.load(Ordering::Relaxed)
    }

    fn dispose_all(&self, handles: Vec<NativeHandle>) -> usize {
        handles
            .into_iter()
            .filter(|handle| handle.mark_released())
            .map(|handle| self.dispose(&handle))
            .count()
    }

    fn dispose(&self, handle: &NativeHandle) {
        let Some(buffer) = handle.take_buffer() else {
            return;
        };
        match self.disposer.dispose(handle.label(), buffer) {
            Ok(()) => {
                tracing::debug!(id = %handle.id(), label = handle.label(), "released native buffer");
            }
            Err(err) => {
                self.disposal_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(id = %handle.id(), label = handle.label(), error = %err, "native buffer disposal failed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackedSet> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl std::fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("config", &self.config)
            .field("usage", &self.usage())
            .finish_non_exhaustive()
    }
}
