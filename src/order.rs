//! Byte orderings for primary keys.
//!
//! The tree never compares keys itself; it delegates to a
//! [`ByteOrdering`] supplied with the schema. The ordering also decides
//! which stored keys are real content and which are tombstones, and
//! carries a two-byte signature that is persisted in the file header so
//! a reopen with a different ordering can be detected.

use std::cmp::Ordering;

/// Comparison, well-formedness and identity of a key ordering.
pub trait ByteOrdering: Send + Sync {
    /// Compares two keys. Keys of different length are compared as if
    /// the shorter one were padded with zero bytes.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Returns false for keys that mark a slot as deleted or never
    /// initialized rather than carrying content.
    fn wellformed(&self, key: &[u8]) -> bool;

    /// Two-byte signature persisted in the file header.
    fn signature(&self) -> [u8; 2];

    /// Human-readable name, used in log messages.
    fn name(&self) -> &'static str;
}

/// Plain unsigned byte-wise ordering with zero padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrder;

impl ByteOrdering for NaturalOrder {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let len = a.len().max(b.len());
        for i in 0..len {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            match x.cmp(&y) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    fn wellformed(&self, key: &[u8]) -> bool {
        // A leading zero byte marks a cleared slot; the 0x80 0x00 pair
        // is the legacy deleted-row marker.
        match key.first() {
            None | Some(0) => false,
            Some(0x80) => !matches!(key.get(1), Some(0) | None),
            Some(_) => true,
        }
    }

    fn signature(&self) -> [u8; 2] {
        *b"nd"
    }

    fn name(&self) -> &'static str {
        "natural"
    }
}
