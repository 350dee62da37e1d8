//! Diagnostics registry for open tables.
//!
//! Nothing in the engine depends on this; it exists so an application
//! embedding several tables can enumerate them for status tooling.
//! The application owns the registry and passes it in through
//! [`crate::table::TableOptions`]; there is no process-global state.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Static facts about one registered table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableInfo {
    /// Column count, key included.
    pub columns: usize,
    /// Row width in bytes.
    pub row_size: usize,
    /// Full slot width including overhead.
    pub record_size: usize,
}

/// Tracks tables by file name.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: Mutex<FxHashMap<String, TableInfo>>,
}

impl TableRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or refreshes a table.
    pub fn register(&self, name: &str, info: TableInfo) {
        self.tables.lock().insert(name.to_owned(), info);
    }

    /// Removes a table; removing an unknown name is a no-op.
    pub fn deregister(&self, name: &str) {
        self.tables.lock().remove(name);
    }

    /// Registered file names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Facts about one registered table.
    pub fn info(&self, name: &str) -> Option<TableInfo> {
        self.tables.lock().get(name).copied()
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    /// Whether no table is registered.
    pub fn is_empty(&self) -> bool {
        self.tables.lock().is_empty()
    }
}
