//! The record store: file, header, allocator, cache and schema glued
//! together behind a node-level API.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, StoreError};
use crate::order::ByteOrdering;
use crate::records::alloc::{FreeChainReport, UsageControl};
use crate::records::cache::{CacheConfig, CachePriority, NodeCache, NodeCacheStats};
use crate::records::file::RecordFile;
use crate::records::header::{self, POS_DESCR};
use crate::records::node::Node;
use crate::records::{Geometry, Handle};
use crate::row::RowSchema;

/// A file of fixed-width slots with overhead linkage, exposed as
/// loadable/committable [`Node`]s.
///
/// The store itself is not thread-safe; the owning table wraps it in
/// an exclusive section. All writes go through to the file before the
/// cache sees them, so the cache never holds the only copy of
/// anything.
pub struct RecordStore {
    path: PathBuf,
    io: RecordFile,
    geo: Geometry,
    schema: RowSchema,
    usage: UsageControl,
    cache: Option<NodeCache>,
    int_props: usize,
    txt_props: usize,
    txt_prop_width: usize,
    handles_at: u64,
    txt_props_at: u64,
}

impl RecordStore {
    /// Creates a fresh file with the given schema and slot overhead.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        path: &Path,
        schema: RowSchema,
        oh_bytes: usize,
        oh_handles: usize,
        int_props: usize,
        txt_props: usize,
        txt_prop_width: usize,
        cache: Option<CacheConfig>,
    ) -> Result<Self> {
        let mut io = RecordFile::open(path)?;
        if !io.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "refusing to create over non-empty file {}",
                path.display()
            )));
        }
        let geo = Geometry {
            oh_bytes,
            oh_handles,
            key_width: schema.key_width(),
            row_size: schema.row_size(),
        };
        let data_offset = header::write_new(
            &io,
            schema.widths(),
            oh_bytes,
            oh_handles,
            int_props,
            txt_props,
            txt_prop_width,
            schema.order().signature(),
        )?;
        io.set_slot_layout(data_offset, geo.record_size());
        let cache = cache.map(|c| c.build(geo.head_size()));
        let columns = schema.columns();
        Ok(Self {
            path: path.to_path_buf(),
            io,
            geo,
            schema,
            usage: UsageControl::new(),
            cache,
            int_props,
            txt_props,
            txt_prop_width,
            handles_at: header::handles_offset(columns),
            txt_props_at: header::txt_props_offset(columns, int_props),
        })
    }

    /// Opens an existing file, verifying it against the given schema.
    pub fn open(
        path: &Path,
        schema: RowSchema,
        oh_bytes: usize,
        oh_handles: usize,
        cache: Option<CacheConfig>,
    ) -> Result<Self> {
        let info = {
            let io = RecordFile::open(path)?;
            header::read(&io)?
        };
        if info.column_widths != schema.widths() {
            return Err(StoreError::SchemaMismatch(format!(
                "file {} has columns {:?}, schema requires {:?}",
                path.display(),
                info.column_widths,
                schema.widths()
            )));
        }
        Self::open_with_schema(path, schema, info_check(info, oh_bytes, oh_handles, path)?, cache)
    }

    /// Opens an existing file, taking the column widths from its own
    /// header. Used by tooling that knows the ordering but not the
    /// schema.
    pub fn open_existing(
        path: &Path,
        order: Arc<dyn ByteOrdering>,
        oh_bytes: usize,
        oh_handles: usize,
        cache: Option<CacheConfig>,
    ) -> Result<Self> {
        let info = {
            let io = RecordFile::open(path)?;
            header::read(&io)?
        };
        let schema = RowSchema::new(info.column_widths.clone(), order)?;
        Self::open_with_schema(path, schema, info_check(info, oh_bytes, oh_handles, path)?, cache)
    }

    fn open_with_schema(
        path: &Path,
        schema: RowSchema,
        info: header::HeaderInfo,
        cache: Option<CacheConfig>,
    ) -> Result<Self> {
        let mut io = RecordFile::open(path)?;
        let geo = Geometry {
            oh_bytes: info.oh_bytes,
            oh_handles: info.oh_handles,
            key_width: schema.key_width(),
            row_size: schema.row_size(),
        };
        io.set_slot_layout(info.data_offset, geo.record_size());

        let expected = schema.order().signature();
        if info.signature != expected {
            warn!(
                path = %path.display(),
                stored = %String::from_utf8_lossy(&info.signature),
                ordering = schema.order().name(),
                "stored ordering signature disagrees with schema, rewriting"
            );
            io.write_at(POS_DESCR, &expected)?;
            io.sync()?;
        }

        let mut usage = UsageControl::from_header(&info);
        usage.validate(&io)?;

        let cache = cache.map(|c| c.build(geo.head_size()));
        Ok(Self {
            path: path.to_path_buf(),
            io,
            geo,
            schema,
            usage,
            cache,
            int_props: info.int_props,
            txt_props: info.txt_props,
            txt_prop_width: info.txt_prop_width,
            handles_at: header::handles_offset(info.column_widths.len()),
            txt_props_at: header::txt_props_offset(info.column_widths.len(), info.int_props),
        })
    }

    /// The path this store was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The row schema.
    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    /// The slot layout.
    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    /// Slots holding live rows.
    pub fn used_count(&self) -> i32 {
        self.usage.used()
    }

    /// Slots on the free chain.
    pub fn free_count(&self) -> i32 {
        self.usage.free()
    }

    /// Physical slots in the file.
    pub fn all_count(&self) -> i32 {
        self.io.slot_count() as i32
    }

    /// File length in bytes.
    pub fn file_len(&self) -> u64 {
        self.io.len()
    }

    /// Cache counters, if a cache is attached.
    pub fn cache_stats(&self) -> Option<NodeCacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Reserves a slot for `row` and returns its in-memory node. The
    /// caller must set every overhead field and commit.
    pub fn allocate_node(&mut self, row: &[u8]) -> Result<Node> {
        self.schema.check_row(row)?;
        let handle = self.usage.allocate(&self.io, self.geo.overhead(), row)?;
        Node::fresh(handle, self.geo, row)
    }

    /// Loads a node by handle. A handle outside the physical file is
    /// reported as [`StoreError::DanglingHandle`]; use
    /// [`RecordStore::load_child`] when a parent is at hand to heal.
    pub fn load_node(&mut self, handle: Handle, fill_tail: bool) -> Result<Node> {
        let all = self.all_count();
        if handle.index() < 0 || handle.index() >= all {
            return Err(StoreError::DanglingHandle {
                handle: handle.index(),
            });
        }
        if let Some(cache) = self.cache.as_mut() {
            if let Some(head) = cache.get(handle.index()) {
                let mut node = Node::from_head(handle, self.geo, head)?;
                if fill_tail {
                    self.fill_tail(&mut node)?;
                }
                return Ok(node);
            }
        }
        let node = if fill_tail {
            Node::from_record(handle, self.geo, self.io.read_slot(handle.index())?)?
        } else {
            Node::from_head(
                handle,
                self.geo,
                self.io.read_slot_range(handle.index(), 0, self.geo.head_size())?,
            )?
        };
        self.mirror(&node);
        Ok(node)
    }

    /// Follows overhead handle `slot` of `parent`. A dangling link is
    /// healed in place: the parent's link is nulled, committed, and
    /// the child reported as absent.
    pub fn load_child(
        &mut self,
        parent: &mut Node,
        slot: usize,
        fill_tail: bool,
    ) -> Result<Option<Node>> {
        let Some(handle) = parent.oh_handle(slot) else {
            return Ok(None);
        };
        match self.load_node(handle, fill_tail) {
            Ok(node) => Ok(Some(node)),
            Err(StoreError::DanglingHandle { handle: raw }) => {
                warn!(
                    parent = parent.handle().index(),
                    slot,
                    handle = raw,
                    "nulling dangling link and proceeding without the child"
                );
                parent.set_oh_handle(slot, None);
                self.commit_node(parent)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Attaches the tail chunk to a head-only node.
    pub fn fill_tail(&mut self, node: &mut Node) -> Result<()> {
        if node.tail().is_some() {
            return Ok(());
        }
        let tail = self.io.read_slot_range(
            node.handle().index(),
            self.geo.head_size(),
            self.geo.tail_size(),
        )?;
        node.attach_tail(tail)
    }

    /// The full row of a node, loading the tail if necessary.
    pub fn node_row(&mut self, node: &mut Node) -> Result<Vec<u8>> {
        self.fill_tail(node)?;
        node.row().ok_or_else(|| {
            StoreError::Corruption(format!("slot {} lost its tail chunk", node.handle()))
        })
    }

    /// Writes a node's dirty chunks back to the file and refreshes the
    /// cache mirror. Committing a clean node does nothing, so commits
    /// are idempotent.
    pub fn commit_node(&mut self, node: &mut Node) -> Result<()> {
        let mut wrote = false;
        if node.head_dirty() {
            self.io
                .write_slot_range(node.handle().index(), 0, node.head())?;
            self.mirror(node);
            wrote = true;
        }
        if node.tail_dirty() {
            if let Some(tail) = node.tail() {
                self.io
                    .write_slot_range(node.handle().index(), self.geo.head_size(), tail)?;
            }
            wrote = true;
        }
        if wrote {
            self.io.sync()?;
            node.mark_clean();
        }
        Ok(())
    }

    /// Returns a node's slot to the free chain and forgets its mirror.
    pub fn dispose_node(&mut self, handle: Handle) -> Result<()> {
        if let Some(cache) = self.cache.as_mut() {
            cache.remove(handle.index());
        }
        self.usage.dispose(&self.io, handle)
    }

    fn mirror(&mut self, node: &Node) {
        if let Some(cache) = self.cache.as_mut() {
            cache.put(
                node.handle().index(),
                node.head(),
                head_priority(&self.geo, node),
            );
        }
    }

    /// Reads general handle `pos`. Handle 0 is the index root.
    pub fn get_handle(&self, pos: usize) -> Result<Option<Handle>> {
        self.check_handle_pos(pos)?;
        let raw = self.io.read_i32(self.handles_at + 4 * pos as u64)?;
        Ok(Handle::from_raw(raw))
    }

    /// Writes general handle `pos` and flushes.
    pub fn set_handle(&mut self, pos: usize, handle: Option<Handle>) -> Result<()> {
        self.check_handle_pos(pos)?;
        self.io
            .write_i32(self.handles_at + 4 * pos as u64, Handle::to_raw(handle))?;
        self.io.sync()
    }

    fn check_handle_pos(&self, pos: usize) -> Result<()> {
        if pos >= self.int_props {
            return Err(StoreError::InvalidArgument(format!(
                "handle position {pos} of {}",
                self.int_props
            )));
        }
        Ok(())
    }

    /// Reads text property `pos`, with trailing zero padding trimmed.
    pub fn get_text(&self, pos: usize) -> Result<Vec<u8>> {
        self.check_text_pos(pos)?;
        let mut buf = vec![0u8; self.txt_prop_width];
        self.io
            .read_at(self.txt_props_at + (pos * self.txt_prop_width) as u64, &mut buf)?;
        while buf.last() == Some(&0) {
            buf.pop();
        }
        Ok(buf)
    }

    /// Writes text property `pos`, zero-padded to the property width.
    pub fn set_text(&mut self, pos: usize, text: &[u8]) -> Result<()> {
        self.check_text_pos(pos)?;
        if text.len() > self.txt_prop_width {
            return Err(StoreError::InvalidArgument(format!(
                "text of {} bytes exceeds property width {}",
                text.len(),
                self.txt_prop_width
            )));
        }
        let mut buf = vec![0u8; self.txt_prop_width];
        buf[..text.len()].copy_from_slice(text);
        self.io
            .write_at(self.txt_props_at + (pos * self.txt_prop_width) as u64, &buf)?;
        self.io.sync()
    }

    fn check_text_pos(&self, pos: usize) -> Result<()> {
        if pos >= self.txt_props {
            return Err(StoreError::InvalidArgument(format!(
                "text position {pos} of {}",
                self.txt_props
            )));
        }
        Ok(())
    }

    /// Walks the free chain for diagnostics.
    pub fn free_chain(&self, budget: Option<Duration>) -> Result<FreeChainReport> {
        self.usage.free_chain(&self.io, budget)
    }

    /// Scans every physical slot in file order, skipping free-chain
    /// members and slots whose key is not well-formed, and returns the
    /// surviving rows. Independent of the index linkage, so it also
    /// finds rows an index no longer reaches.
    pub fn content_rows(&mut self, budget: Option<Duration>) -> Result<Vec<(Handle, Vec<u8>)>> {
        let free: rustc_hash::FxHashSet<i32> = self
            .free_chain(budget)?
            .handles
            .iter()
            .map(|h| h.index())
            .collect();
        let order = Arc::clone(self.schema.order());
        let mut rows = Vec::new();
        for index in 0..self.all_count() {
            if free.contains(&index) {
                continue;
            }
            let record = self.io.read_slot(index)?;
            let node = Node::from_record(
                Handle::from_raw(index).ok_or_else(|| {
                    StoreError::Corruption(format!("slot index {index} is unrepresentable"))
                })?,
                self.geo,
                record,
            )?;
            if !order.wellformed(node.key()) {
                continue;
            }
            if let Some(row) = node.row() {
                rows.push((node.handle(), row));
            }
        }
        Ok(rows)
    }

    /// Raw bytes of one slot, for dump tooling.
    pub fn dump_slot(&self, index: i32) -> Result<Vec<u8>> {
        if index < 0 || index >= self.all_count() {
            return Err(StoreError::InvalidArgument(format!(
                "slot {index} of {}",
                self.all_count()
            )));
        }
        self.io.read_slot(index)
    }

    /// Drops all rows by re-initializing the file in place.
    pub fn clear(&mut self) -> Result<()> {
        self.io.truncate(0)?;
        header::write_new(
            &self.io,
            self.schema.widths(),
            self.geo.oh_bytes,
            self.geo.oh_handles,
            self.int_props,
            self.txt_props,
            self.txt_prop_width,
            self.schema.order().signature(),
        )?;
        self.usage = UsageControl::new();
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
        Ok(())
    }

    /// Flushes counters and data to stable storage.
    pub fn close(&mut self) -> Result<()> {
        self.usage.persist(&self.io)?;
        self.io.sync()
    }
}

fn info_check(
    info: header::HeaderInfo,
    oh_bytes: usize,
    oh_handles: usize,
    path: &Path,
) -> Result<header::HeaderInfo> {
    if info.oh_bytes != oh_bytes || info.oh_handles != oh_handles {
        return Err(StoreError::SchemaMismatch(format!(
            "file {} has overhead {}+{} handles, expected {}+{}",
            path.display(),
            info.oh_bytes,
            info.oh_handles,
            oh_bytes,
            oh_handles
        )));
    }
    Ok(info)
}

/// Entries with more onward links are costlier to rebuild.
fn head_priority(geo: &Geometry, node: &Node) -> CachePriority {
    let mut links = 0;
    for i in 1..geo.oh_handles {
        if node.oh_handle(i).is_some() {
            links += 1;
        }
    }
    match links {
        0 => CachePriority::Low,
        1 => CachePriority::Medium,
        _ => CachePriority::High,
    }
}
