//! The embedded table surface.
//!
//! A [`Table`] is one tree-indexed record file behind a single
//! exclusive section: every operation, reads included, takes the lock,
//! and a [`Rows`] iterator holds it for its whole lifetime. That is
//! the engine's concurrency model in full; there is no finer locking
//! underneath worth exposing.

pub mod registry;

pub use registry::{TableInfo, TableRegistry};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::error::Result;
use crate::order::ByteOrdering;
use crate::records::alloc::FreeChainReport;
use crate::records::cache::{CacheConfig, NodeCacheStats};
use crate::records::Handle;
use crate::row::RowSchema;
use crate::tree::{Direction, Tree, Walk};

/// Options for opening a table.
pub struct TableOptions {
    /// Head-chunk cache configuration; `None` disables caching.
    pub cache: Option<CacheConfig>,
    /// Number of fixed-width text properties reserved at creation.
    pub txt_props: usize,
    /// Width of each text property in bytes.
    pub txt_prop_width: usize,
    /// Diagnostics registry to report to, if the application keeps one.
    pub registry: Option<Arc<TableRegistry>>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            cache: Some(CacheConfig::default()),
            txt_props: 2,
            txt_prop_width: 64,
            registry: None,
        }
    }
}

/// An ordered key-value table in one file.
pub struct Table {
    path: PathBuf,
    inner: Mutex<Tree>,
    registry: Option<Arc<TableRegistry>>,
}

impl Table {
    /// Opens the table at `path`, creating the file if it does not
    /// exist yet. An existing file is verified against `schema`.
    pub fn open(path: &Path, schema: RowSchema, options: TableOptions) -> Result<Table> {
        let exists = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        let tree = if exists {
            Tree::open(path, schema, options.cache)?
        } else {
            Tree::create(
                path,
                schema,
                options.txt_props,
                options.txt_prop_width,
                options.cache,
            )?
        };
        Ok(Self::wrap(path, tree, options.registry))
    }

    /// Opens an existing table, taking the schema from its header.
    pub fn open_existing(
        path: &Path,
        order: Arc<dyn ByteOrdering>,
        options: TableOptions,
    ) -> Result<Table> {
        let tree = Tree::open_existing(path, order, options.cache)?;
        Ok(Self::wrap(path, tree, options.registry))
    }

    fn wrap(path: &Path, tree: Tree, registry: Option<Arc<TableRegistry>>) -> Table {
        let table = Table {
            path: path.to_path_buf(),
            inner: Mutex::new(tree),
            registry,
        };
        if let Some(registry) = &table.registry {
            let tree = table.inner.lock();
            registry.register(
                &table.path.display().to_string(),
                TableInfo {
                    columns: tree.store().schema().columns(),
                    row_size: tree.store().schema().row_size(),
                    record_size: tree.store().geometry().record_size(),
                },
            );
        }
        table
    }

    /// The file this table lives in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A clone of the table's row schema.
    pub fn schema(&self) -> RowSchema {
        self.inner.lock().store().schema().clone()
    }

    /// Number of live rows.
    pub fn size(&self) -> usize {
        self.inner.lock().size()
    }

    /// Looks up the row stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.lock().get(key)
    }

    /// Inserts or replaces a row, returning the previous row under the
    /// same key.
    pub fn put(&self, row: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.lock().put(row)
    }

    /// Removes the row under `key` and returns it.
    pub fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.lock().remove(key)
    }

    /// The smallest row.
    pub fn first(&self) -> Result<Option<Vec<u8>>> {
        self.inner.lock().first_row()
    }

    /// The largest row.
    pub fn last(&self) -> Result<Option<Vec<u8>>> {
        self.inner.lock().last_row()
    }

    /// Tree height, for diagnostics.
    pub fn height(&self) -> Result<usize> {
        self.inner.lock().height()
    }

    /// Iterates rows in key order. The iterator holds the table lock;
    /// drop it before calling anything else on this table from the
    /// same thread.
    pub fn rows(
        &self,
        direction: Direction,
        rotating: bool,
        start: Option<&[u8]>,
    ) -> Result<Rows<'_>> {
        let mut guard = self.inner.lock();
        let walk = Walk::seed(&mut guard, direction, rotating, start)?;
        Ok(Rows { guard, walk })
    }

    /// Walks the free chain for diagnostics.
    pub fn free_chain(&self, budget: Option<Duration>) -> Result<FreeChainReport> {
        self.inner.lock().store().free_chain(budget)
    }

    /// Scans all physical slots, index-independent.
    pub fn content_rows(&self, budget: Option<Duration>) -> Result<Vec<(Handle, Vec<u8>)>> {
        self.inner.lock().store_mut().content_rows(budget)
    }

    /// Cache counters, if caching is enabled.
    pub fn cache_stats(&self) -> Option<NodeCacheStats> {
        self.inner.lock().store().cache_stats()
    }

    /// Reads text property `pos`.
    pub fn get_text(&self, pos: usize) -> Result<Vec<u8>> {
        self.inner.lock().store().get_text(pos)
    }

    /// Writes text property `pos`.
    pub fn set_text(&self, pos: usize, text: &[u8]) -> Result<()> {
        self.inner.lock().store_mut().set_text(pos, text)
    }

    /// Drops every row, re-initializing the file in place.
    pub fn clear(&self) -> Result<()> {
        self.inner.lock().store_mut().clear()
    }

    /// Flushes and closes the table.
    pub fn close(self) -> Result<()> {
        self.inner.lock().close()
        // Drop deregisters.
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Some(registry) = &self.registry {
            registry.deregister(&self.path.display().to_string());
        }
    }
}

/// Iterator over table rows in key order. Holds the table lock.
pub struct Rows<'a> {
    guard: MutexGuard<'a, Tree>,
    walk: Walk,
}

impl Iterator for Rows<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        self.walk.next_row(&mut self.guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::NaturalOrder;
    use tempfile::tempdir;

    fn schema() -> RowSchema {
        RowSchema::new(vec![4, 8], Arc::new(NaturalOrder)).expect("schema")
    }

    fn row(key: &str, value: &str) -> Vec<u8> {
        schema().pack(&[key.as_bytes(), value.as_bytes()]).expect("pack")
    }

    #[test]
    fn open_creates_then_reopens() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("t.db");
        {
            let table =
                Table::open(&path, schema(), TableOptions::default()).expect("create");
            table.put(&row("aaa", "one")).expect("put");
            table.close().expect("close");
        }
        let table = Table::open(&path, schema(), TableOptions::default()).expect("reopen");
        assert_eq!(table.size(), 1);
        assert_eq!(table.get(b"aaa").expect("get"), Some(row("aaa", "one")));
    }

    #[test]
    fn rows_iterator_holds_order() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("t.db");
        let table = Table::open(&path, schema(), TableOptions::default()).expect("open");
        for key in ["ccc", "aaa", "bbb"] {
            table.put(&row(key, "v")).expect("put");
        }
        let keys: Vec<Vec<u8>> = table
            .rows(Direction::Ascending, false, None)
            .expect("rows")
            .map(|r| r[..3].to_vec())
            .collect();
        assert_eq!(keys, vec![b"aaa".to_vec(), b"bbb".to_vec(), b"ccc".to_vec()]);
    }

    #[test]
    fn registry_tracks_lifecycle() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("t.db");
        let registry = Arc::new(TableRegistry::new());
        let name = path.display().to_string();
        {
            let options = TableOptions {
                registry: Some(registry.clone()),
                ..TableOptions::default()
            };
            let table = Table::open(&path, schema(), options).expect("open");
            assert_eq!(registry.names(), vec![name.clone()]);
            let info = registry.info(&name).expect("info");
            assert_eq!(info.columns, 2);
            assert_eq!(info.row_size, 12);
            table.put(&row("aaa", "v")).expect("put");
        }
        // Dropping the table deregisters it.
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_empties_the_table() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("t.db");
        let table = Table::open(&path, schema(), TableOptions::default()).expect("open");
        table.put(&row("aaa", "v")).expect("put");
        table.put(&row("bbb", "v")).expect("put");
        table.clear().expect("clear");
        assert_eq!(table.size(), 0);
        assert_eq!(table.get(b"aaa").expect("get"), None);
        table.put(&row("ccc", "v")).expect("put");
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn text_properties_survive_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("t.db");
        {
            let table =
                Table::open(&path, schema(), TableOptions::default()).expect("create");
            table.set_text(0, b"owner=tests").expect("set text");
            table.close().expect("close");
        }
        let table = Table::open(&path, schema(), TableOptions::default()).expect("reopen");
        assert_eq!(table.get_text(0).expect("get text"), b"owner=tests");
    }
}
