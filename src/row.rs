//! Row schemas: fixed-width columns with a designated primary key.

use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::order::ByteOrdering;

/// Describes the fixed-width columns of a table row.
///
/// Column 0 is the primary key. Every row passed to the engine must be
/// exactly [`RowSchema::row_size`] bytes long; columns are not
/// delimited on disk, only concatenated.
#[derive(Clone)]
pub struct RowSchema {
    widths: Vec<usize>,
    row_size: usize,
    order: Arc<dyn ByteOrdering>,
}

impl RowSchema {
    /// Builds a schema from column widths and a key ordering.
    pub fn new(widths: Vec<usize>, order: Arc<dyn ByteOrdering>) -> Result<Self> {
        if widths.is_empty() {
            return Err(StoreError::InvalidArgument(
                "schema needs at least the key column".into(),
            ));
        }
        if widths.iter().any(|w| *w == 0) {
            return Err(StoreError::InvalidArgument(
                "zero-width columns are not allowed".into(),
            ));
        }
        let row_size = widths.iter().sum();
        Ok(Self {
            widths,
            row_size,
            order,
        })
    }

    /// Number of columns, including the key.
    pub fn columns(&self) -> usize {
        self.widths.len()
    }

    /// Width of column `i` in bytes.
    pub fn width(&self, i: usize) -> usize {
        self.widths[i]
    }

    /// Width of the primary key column.
    pub fn key_width(&self) -> usize {
        self.widths[0]
    }

    /// Total row width in bytes.
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// All column widths.
    pub fn widths(&self) -> &[usize] {
        &self.widths
    }

    /// The key ordering this schema was built with.
    pub fn order(&self) -> &Arc<dyn ByteOrdering> {
        &self.order
    }

    /// Rejects rows whose length does not match the schema. Checked
    /// before any write reaches the file.
    pub fn check_row(&self, row: &[u8]) -> Result<()> {
        if row.len() != self.row_size {
            return Err(StoreError::SchemaMismatch(format!(
                "row is {} bytes, schema requires {}",
                row.len(),
                self.row_size
            )));
        }
        Ok(())
    }

    /// Packs one value per column into a row, zero-padding short values.
    pub fn pack(&self, columns: &[&[u8]]) -> Result<Vec<u8>> {
        if columns.len() != self.widths.len() {
            return Err(StoreError::SchemaMismatch(format!(
                "{} values for {} columns",
                columns.len(),
                self.widths.len()
            )));
        }
        let mut row = Vec::with_capacity(self.row_size);
        for (value, width) in columns.iter().zip(&self.widths) {
            if value.len() > *width {
                return Err(StoreError::SchemaMismatch(format!(
                    "value of {} bytes exceeds column width {}",
                    value.len(),
                    width
                )));
            }
            row.extend_from_slice(value);
            row.extend(std::iter::repeat(0u8).take(width - value.len()));
        }
        Ok(row)
    }
}

impl std::fmt::Debug for RowSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowSchema")
            .field("widths", &self.widths)
            .field("order", &self.order.name())
            .finish()
    }
}
