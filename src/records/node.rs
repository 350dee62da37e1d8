//! In-memory view of one record slot.

use crate::error::{Result, StoreError};
use crate::records::{Geometry, Handle};

/// One slot's content, split into head and tail chunks.
///
/// The head chunk holds the overhead bytes, the overhead handles and
/// the key column; the tail chunk holds the remaining columns and is
/// only attached when a caller actually needs the full row. Both
/// chunks are owned buffers; a node is a private copy of the slot, not
/// a view into shared state. Mutations set a per-chunk dirty flag and
/// reach the file when the store commits the node.
#[derive(Debug, Clone)]
pub struct Node {
    handle: Handle,
    geo: Geometry,
    head: Vec<u8>,
    tail: Option<Vec<u8>>,
    head_dirty: bool,
    tail_dirty: bool,
}

impl Node {
    /// Wraps a freshly read head chunk. The tail stays unattached.
    pub fn from_head(handle: Handle, geo: Geometry, head: Vec<u8>) -> Result<Self> {
        if head.len() != geo.head_size() {
            return Err(StoreError::Corruption(format!(
                "head chunk of slot {} is {} bytes, layout requires {}",
                handle,
                head.len(),
                geo.head_size()
            )));
        }
        Ok(Self {
            handle,
            geo,
            head,
            tail: None,
            head_dirty: false,
            tail_dirty: false,
        })
    }

    /// Wraps a full record read from the file.
    pub fn from_record(handle: Handle, geo: Geometry, record: Vec<u8>) -> Result<Self> {
        if record.len() != geo.record_size() {
            return Err(StoreError::Corruption(format!(
                "record of slot {handle} is {} bytes, layout requires {}",
                record.len(),
                geo.record_size()
            )));
        }
        let mut head = record;
        let tail = head.split_off(geo.head_size());
        Ok(Self {
            handle,
            geo,
            head,
            tail: Some(tail),
            head_dirty: false,
            tail_dirty: false,
        })
    }

    /// Builds the in-memory image of a slot whose row was just written
    /// by the allocator. The overhead region is filled with `0xff`
    /// placeholders; the caller is expected to set every overhead field
    /// before committing, which marks the head dirty.
    pub fn fresh(handle: Handle, geo: Geometry, row: &[u8]) -> Result<Self> {
        if row.len() != geo.row_size {
            return Err(StoreError::SchemaMismatch(format!(
                "row is {} bytes, layout requires {}",
                row.len(),
                geo.row_size
            )));
        }
        let mut head = vec![0xffu8; geo.overhead()];
        head.extend_from_slice(&row[..geo.key_width]);
        let tail = row[geo.key_width..].to_vec();
        Ok(Self {
            handle,
            geo,
            head,
            tail: Some(tail),
            head_dirty: false,
            tail_dirty: false,
        })
    }

    /// The slot this node mirrors.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The slot layout.
    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    /// The raw head chunk.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// The tail chunk, if attached.
    pub fn tail(&self) -> Option<&[u8]> {
        self.tail.as_deref()
    }

    /// Attaches a tail chunk read from the file.
    pub fn attach_tail(&mut self, tail: Vec<u8>) -> Result<()> {
        if tail.len() != self.geo.tail_size() {
            return Err(StoreError::Corruption(format!(
                "tail chunk of slot {} is {} bytes, layout requires {}",
                self.handle,
                tail.len(),
                self.geo.tail_size()
            )));
        }
        self.tail = Some(tail);
        Ok(())
    }

    /// The key column bytes, full width.
    pub fn key(&self) -> &[u8] {
        let start = self.geo.overhead();
        &self.head[start..start + self.geo.key_width]
    }

    /// Overhead byte `i`.
    pub fn oh_byte(&self, i: usize) -> u8 {
        debug_assert!(i < self.geo.oh_bytes);
        self.head[i]
    }

    /// Sets overhead byte `i`, marking the head dirty.
    pub fn set_oh_byte(&mut self, i: usize, value: u8) {
        debug_assert!(i < self.geo.oh_bytes);
        self.head[i] = value;
        self.head_dirty = true;
    }

    /// Overhead handle `i`.
    pub fn oh_handle(&self, i: usize) -> Option<Handle> {
        debug_assert!(i < self.geo.oh_handles);
        let at = self.geo.handle_offset(i);
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.head[at..at + 4]);
        Handle::decode(raw)
    }

    /// Sets overhead handle `i`, marking the head dirty.
    pub fn set_oh_handle(&mut self, i: usize, value: Option<Handle>) {
        debug_assert!(i < self.geo.oh_handles);
        let at = self.geo.handle_offset(i);
        self.head[at..at + 4].copy_from_slice(&Handle::encode(value));
        self.head_dirty = true;
    }

    /// Replaces the whole row in place, marking both chunks dirty.
    /// Requires the tail to be attached.
    pub fn set_row(&mut self, row: &[u8]) -> Result<()> {
        if row.len() != self.geo.row_size {
            return Err(StoreError::SchemaMismatch(format!(
                "row is {} bytes, layout requires {}",
                row.len(),
                self.geo.row_size
            )));
        }
        let key_at = self.geo.overhead();
        self.head[key_at..key_at + self.geo.key_width]
            .copy_from_slice(&row[..self.geo.key_width]);
        self.head_dirty = true;
        match &mut self.tail {
            Some(tail) => {
                tail.copy_from_slice(&row[self.geo.key_width..]);
                self.tail_dirty = true;
                Ok(())
            }
            None => Err(StoreError::InvalidArgument(format!(
                "cannot set row on slot {} without its tail chunk",
                self.handle
            ))),
        }
    }

    /// Assembles the full row. `None` while the tail is unattached.
    pub fn row(&self) -> Option<Vec<u8>> {
        let tail = self.tail.as_ref()?;
        let key_at = self.geo.overhead();
        let mut row = Vec::with_capacity(self.geo.row_size);
        row.extend_from_slice(&self.head[key_at..]);
        row.extend_from_slice(tail);
        Some(row)
    }

    /// Whether the head chunk has uncommitted changes.
    pub fn head_dirty(&self) -> bool {
        self.head_dirty
    }

    /// Whether the tail chunk has uncommitted changes.
    pub fn tail_dirty(&self) -> bool {
        self.tail_dirty
    }

    /// Clears both dirty flags after a successful write-back.
    pub fn mark_clean(&mut self) {
        self.head_dirty = false;
        self.tail_dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo() -> Geometry {
        Geometry {
            oh_bytes: 2,
            oh_handles: 3,
            key_width: 4,
            row_size: 10,
        }
    }

    fn handle(i: i32) -> Handle {
        Handle::from_raw(i).expect("handle")
    }

    #[test]
    fn fresh_node_splits_row_across_chunks() {
        let n = Node::fresh(handle(3), geo(), b"keyAtail56").expect("node");
        assert_eq!(n.key(), b"keyA");
        assert_eq!(n.tail(), Some(&b"tail56"[..]));
        assert_eq!(n.row().expect("row"), b"keyAtail56");
        assert!(!n.head_dirty());
        assert!(!n.tail_dirty());
        // Placeholder overhead until the caller sets it.
        assert_eq!(n.oh_byte(0), 0xff);
    }

    #[test]
    fn overhead_mutation_marks_head_dirty() {
        let mut n = Node::fresh(handle(0), geo(), b"keyAtail56").expect("node");
        n.set_oh_byte(0, 1);
        n.set_oh_byte(1, 0);
        n.set_oh_handle(0, None);
        n.set_oh_handle(1, Some(handle(7)));
        n.set_oh_handle(2, None);
        assert!(n.head_dirty());
        assert!(!n.tail_dirty());
        assert_eq!(n.oh_byte(0), 1);
        assert_eq!(n.oh_handle(0), None);
        assert_eq!(n.oh_handle(1), Some(handle(7)));
    }

    #[test]
    fn head_only_node_has_no_row_until_tail_attached() {
        let full = Node::fresh(handle(1), geo(), b"keyBtail78").expect("node");
        let mut n =
            Node::from_head(handle(1), geo(), full.head().to_vec()).expect("head node");
        assert_eq!(n.key(), b"keyB");
        assert!(n.row().is_none());
        n.attach_tail(b"tail78".to_vec()).expect("tail");
        assert_eq!(n.row().expect("row"), b"keyBtail78");
    }

    #[test]
    fn set_row_requires_tail_and_marks_both_dirty() {
        let full = Node::fresh(handle(2), geo(), b"keyCtail90").expect("node");
        let mut head_only =
            Node::from_head(handle(2), geo(), full.head().to_vec()).expect("head node");
        assert!(head_only.set_row(b"keyDtail12").is_err());

        let mut n = full;
        n.set_row(b"keyDtail12").expect("set row");
        assert!(n.head_dirty());
        assert!(n.tail_dirty());
        assert_eq!(n.row().expect("row"), b"keyDtail12");
        n.mark_clean();
        assert!(!n.head_dirty());
        assert!(!n.tail_dirty());
    }

    #[test]
    fn wrong_sized_chunks_are_rejected() {
        assert!(Node::fresh(handle(0), geo(), b"short").is_err());
        assert!(Node::from_head(handle(0), geo(), vec![0u8; 3]).is_err());
        assert!(Node::from_record(handle(0), geo(), vec![0u8; 5]).is_err());
        let mut n = Node::fresh(handle(0), geo(), b"keyAtail56").expect("node");
        assert!(n.attach_tail(vec![0u8; 2]).is_err());
    }
}
