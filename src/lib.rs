//! slotree: an embedded, file-backed, ordered key-value store.
//!
//! One table is one flat file of fixed-width slots. Each slot carries
//! a few overhead bytes and handles that thread an AVL tree through
//! the file, so lookups, ordered iteration and range seeks work
//! without any external index. Deleted slots are recycled through a
//! free list chained inside the slot bodies themselves.
//!
//! The engine is deliberately conservative about damage: startup
//! validates the header counters against the physical file, searches
//! repair link cycles in place, and dangling child links are nulled
//! out rather than poisoning the whole table. A content scan can
//! recover rows the index no longer reaches.
//!
//! ```no_run
//! use std::sync::Arc;
//! use slotree::{NaturalOrder, RowSchema, Table, TableOptions};
//!
//! # fn main() -> slotree::Result<()> {
//! let schema = RowSchema::new(vec![16, 64], Arc::new(NaturalOrder))?;
//! let table = Table::open("example.db".as_ref(), schema.clone(), TableOptions::default())?;
//! table.put(&schema.pack(&[&b"alpha"[..], &b"first row"[..]])?)?;
//! assert!(table.get(b"alpha")?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod order;
pub mod records;
pub mod row;
pub mod table;
pub mod tree;

pub use error::{Result, StoreError};
pub use order::{ByteOrdering, NaturalOrder};
pub use records::{
    BudgetGauge, CacheConfig, CachePriority, CacheThresholds, FreeChainReport, GrowStatus,
    Handle, MemoryGauge, NodeCacheStats, RecordStore,
};
pub use row::RowSchema;
pub use table::{Rows, Table, TableInfo, TableOptions, TableRegistry};
pub use tree::{Direction, Tree};
