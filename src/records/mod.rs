//! The record engine: a flat file of fixed-width slots with a
//! free-list allocator, per-slot overhead for index linkage, and an
//! optional memory-pressure-aware head-chunk cache.

pub mod alloc;
pub mod cache;
pub mod file;
pub mod header;
pub mod node;
pub mod store;

pub use alloc::{FreeChainReport, UsageControl};
pub use cache::{
    BudgetGauge, CacheConfig, CachePriority, CacheThresholds, GrowStatus, MemoryGauge,
    NodeCache, NodeCacheStats,
};
pub use file::RecordFile;
pub use node::Node;
pub use store::RecordStore;

/// Raw sentinel meaning "no slot".
pub const NUL_HANDLE: i32 = i32::MIN;

/// Index of a slot in the data region.
///
/// A handle is a plain record number; the byte offset of the slot is
/// derived from the data offset and record size. The on-disk encoding
/// is a big-endian `i32`, with [`NUL_HANDLE`] standing for "no slot";
/// in-memory APIs use `Option<Handle>` instead of the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(i32);

impl Handle {
    /// Wraps a raw on-disk value, mapping the sentinel to `None`.
    pub fn from_raw(raw: i32) -> Option<Handle> {
        if raw == NUL_HANDLE {
            None
        } else {
            Some(Handle(raw))
        }
    }

    /// Decodes four big-endian bytes.
    pub fn decode(bytes: [u8; 4]) -> Option<Handle> {
        Self::from_raw(i32::from_be_bytes(bytes))
    }

    /// Encodes an optional handle as four big-endian bytes.
    pub fn encode(handle: Option<Handle>) -> [u8; 4] {
        Self::to_raw(handle).to_be_bytes()
    }

    /// Raw on-disk value of an optional handle.
    pub fn to_raw(handle: Option<Handle>) -> i32 {
        handle.map_or(NUL_HANDLE, |h| h.0)
    }

    /// The slot index.
    pub fn index(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical layout of one record slot.
///
/// Each slot is `[overhead bytes][overhead handles x 4][row]`; the head
/// chunk covers the overhead plus the key column, the tail chunk the
/// remaining columns.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    /// Count of single overhead bytes per slot.
    pub oh_bytes: usize,
    /// Count of 4-byte overhead handles per slot.
    pub oh_handles: usize,
    /// Width of the key column.
    pub key_width: usize,
    /// Total row width (all columns).
    pub row_size: usize,
}

impl Geometry {
    /// Overhead bytes preceding the row inside a slot.
    pub fn overhead(&self) -> usize {
        self.oh_bytes + 4 * self.oh_handles
    }

    /// Full slot width.
    pub fn record_size(&self) -> usize {
        self.overhead() + self.row_size
    }

    /// Width of the head chunk (overhead + key column).
    pub fn head_size(&self) -> usize {
        self.overhead() + self.key_width
    }

    /// Width of the tail chunk (columns after the key).
    pub fn tail_size(&self) -> usize {
        self.row_size - self.key_width
    }

    /// Byte offset of overhead handle `i` within the head chunk.
    pub fn handle_offset(&self, i: usize) -> usize {
        self.oh_bytes + 4 * i
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_raw_round_trip() {
        assert_eq!(Handle::from_raw(NUL_HANDLE), None);
        let h = Handle::from_raw(7).expect("handle");
        assert_eq!(h.index(), 7);
        assert_eq!(Handle::to_raw(Some(h)), 7);
        assert_eq!(Handle::to_raw(None), NUL_HANDLE);
        assert_eq!(Handle::decode(Handle::encode(Some(h))), Some(h));
        assert_eq!(Handle::decode(Handle::encode(None)), None);
    }

    #[test]
    fn geometry_partitions_the_slot() {
        let g = Geometry {
            oh_bytes: 2,
            oh_handles: 3,
            key_width: 8,
            row_size: 24,
        };
        assert_eq!(g.overhead(), 14);
        assert_eq!(g.record_size(), 38);
        assert_eq!(g.head_size(), 22);
        assert_eq!(g.tail_size(), 16);
        assert_eq!(g.head_size() + g.tail_size(), g.record_size());
        assert_eq!(g.handle_offset(2), 10);
    }
}
