//! The head-chunk cache.
//!
//! Caches the head chunk of recently touched slots so searches avoid
//! re-reading overhead and keys from the file. The cache is strictly a
//! mirror: every head write goes to the file first and the cached copy
//! is refreshed afterwards, so dropping any entry at any time is
//! always safe. Admission is governed by available memory measured
//! against two thresholds rather than by entry count.

use rustc_hash::FxHashMap;

/// Eviction preference of a cached head chunk.
///
/// Rebuilding an interior node costs more follow-up reads than
/// rebuilding a leaf, so leaves go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CachePriority {
    /// Leaf slots; cheapest to drop.
    Low,
    /// Slots with one onward link.
    Medium,
    /// Slots with two onward links.
    High,
}

/// Memory-pressure state of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GrowStatus {
    /// Below the shrink threshold: evict before (and instead of)
    /// admitting.
    Evict,
    /// Between the thresholds: hold size steady, one out one in.
    Hold,
    /// Plenty of room: admit freely.
    Grow,
}

/// Supplies the available-memory figure the grow/hold/evict decision
/// is based on. Injectable so tests can script pressure transitions.
pub trait MemoryGauge: Send {
    /// Memory available for growth, given the cache's current
    /// estimated footprint.
    fn available(&self, cache_bytes: u64) -> u64;
}

/// Default gauge: a fixed byte budget the cache consumes from.
#[derive(Debug, Clone, Copy)]
pub struct BudgetGauge {
    budget: u64,
}

impl BudgetGauge {
    /// A gauge reporting `budget` minus the cache's own footprint.
    pub fn new(budget: u64) -> Self {
        Self { budget }
    }
}

impl MemoryGauge for BudgetGauge {
    fn available(&self, cache_bytes: u64) -> u64 {
        self.budget.saturating_sub(cache_bytes)
    }
}

/// Available-memory thresholds steering cache growth.
#[derive(Debug, Clone, Copy)]
pub struct CacheThresholds {
    /// Stop admitting new entries once available memory drops to this.
    pub stop_grow: u64,
    /// Start evicting once available memory drops below this.
    pub start_shrink: u64,
}

impl Default for CacheThresholds {
    fn default() -> Self {
        Self {
            stop_grow: 1024 * 1024,
            start_shrink: 512 * 1024,
        }
    }
}

/// Default byte budget for the built-in gauge.
pub const DEFAULT_CACHE_BUDGET: u64 = 8 * 1024 * 1024;

/// How to build a [`NodeCache`] once the head-chunk size is known.
///
/// The head size depends on the row schema, which an opener may only
/// learn from the file header, so cache construction is deferred.
pub struct CacheConfig {
    /// Pressure thresholds.
    pub thresholds: CacheThresholds,
    /// Gauge supplying the available-memory figure.
    pub gauge: Box<dyn MemoryGauge>,
}

impl CacheConfig {
    /// Builds the cache for the given head-chunk size.
    pub fn build(self, head_size: usize) -> NodeCache {
        NodeCache::new(head_size, self.thresholds, self.gauge)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            thresholds: CacheThresholds::default(),
            gauge: Box::new(BudgetGauge::new(DEFAULT_CACHE_BUDGET)),
        }
    }
}

/// Point-in-time counters of a [`NodeCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCacheStats {
    /// Cached entries right now.
    pub entries: usize,
    /// Estimated footprint in bytes.
    pub bytes: u64,
    /// Head chunk size this cache was built for.
    pub head_size: usize,
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that fell through to the file.
    pub misses: u64,
    /// First-time insertions.
    pub write_unique: u64,
    /// Refreshes of an already-cached entry.
    pub write_double: u64,
    /// Explicit removals (slot disposed).
    pub deletes: u64,
    /// Entries dropped to make or reclaim room.
    pub evictions: u64,
}

// Rough per-entry bookkeeping cost on top of the chunk itself.
const ENTRY_OVERHEAD: u64 = 40;

struct Entry {
    head: Vec<u8>,
    priority: CachePriority,
}

/// Bounded mirror of head chunks, keyed by slot index.
pub struct NodeCache {
    entries: FxHashMap<i32, Entry>,
    head_size: usize,
    thresholds: CacheThresholds,
    gauge: Box<dyn MemoryGauge>,
    hits: u64,
    misses: u64,
    write_unique: u64,
    write_double: u64,
    deletes: u64,
    evictions: u64,
}

impl NodeCache {
    /// Builds a cache for head chunks of `head_size` bytes.
    pub fn new(
        head_size: usize,
        thresholds: CacheThresholds,
        gauge: Box<dyn MemoryGauge>,
    ) -> Self {
        Self {
            entries: FxHashMap::default(),
            head_size,
            thresholds,
            gauge,
            hits: 0,
            misses: 0,
            write_unique: 0,
            write_double: 0,
            deletes: 0,
            evictions: 0,
        }
    }

    /// Convenience constructor with a fixed byte budget and default
    /// thresholds.
    pub fn with_budget(head_size: usize, budget: u64) -> Self {
        Self::new(
            head_size,
            CacheThresholds::default(),
            Box::new(BudgetGauge::new(budget)),
        )
    }

    /// Estimated footprint in bytes.
    pub fn bytes(&self) -> u64 {
        self.entries.len() as u64 * (self.head_size as u64 + ENTRY_OVERHEAD)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current pressure state.
    pub fn grow_status(&self) -> GrowStatus {
        let available = self.gauge.available(self.bytes());
        if available > self.thresholds.stop_grow {
            GrowStatus::Grow
        } else if available > self.thresholds.start_shrink {
            GrowStatus::Hold
        } else {
            GrowStatus::Evict
        }
    }

    /// Looks up the head chunk of a slot.
    pub fn get(&mut self, index: i32) -> Option<Vec<u8>> {
        match self.entries.get(&index) {
            Some(entry) => {
                self.hits += 1;
                Some(entry.head.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Mirrors a head chunk that was just read or written. An entry
    /// already present is refreshed unconditionally; a new entry is
    /// admitted only if pressure allows, possibly after evicting a
    /// victim.
    pub fn put(&mut self, index: i32, head: &[u8], priority: CachePriority) {
        debug_assert_eq!(head.len(), self.head_size);
        if let Some(entry) = self.entries.get_mut(&index) {
            entry.head.clear();
            entry.head.extend_from_slice(head);
            entry.priority = priority;
            self.write_double += 1;
            return;
        }
        if self.make_room() {
            self.entries.insert(
                index,
                Entry {
                    head: head.to_vec(),
                    priority,
                },
            );
            self.write_unique += 1;
        }
    }

    /// Drops the entry for a disposed slot.
    pub fn remove(&mut self, index: i32) {
        if self.entries.remove(&index).is_some() {
            self.deletes += 1;
        }
    }

    /// Drops everything, keeping the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> NodeCacheStats {
        NodeCacheStats {
            entries: self.entries.len(),
            bytes: self.bytes(),
            head_size: self.head_size,
            hits: self.hits,
            misses: self.misses,
            write_unique: self.write_unique,
            write_double: self.write_double,
            deletes: self.deletes,
            evictions: self.evictions,
        }
    }

    fn make_room(&mut self) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        if self.grow_status() == GrowStatus::Grow {
            return true;
        }
        self.evict_one();
        // After trading one out, admit only while not under outright
        // shrink pressure.
        self.grow_status() > GrowStatus::Evict
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(index, entry)| (entry.priority, **index))
            .map(|(index, _)| *index);
        if let Some(index) = victim {
            self.entries.remove(&index);
            self.evictions += 1;
        }
    }
}
