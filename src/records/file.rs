//! Raw access to the fixed-width slot file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::error::{Result, StoreError};

struct Inner {
    file: File,
    len: u64,
}

/// The backing file of a record store.
///
/// Provides absolute-offset primitives for the header region and a
/// slot view over the data region once the layout is known. All raw
/// I/O is serialized behind an internal mutex, so individual reads and
/// writes are atomic with respect to each other; higher-level
/// consistency is the caller's exclusive section. Short reads surface
/// as I/O errors, never as zero-filled data.
pub struct RecordFile {
    inner: Mutex<Inner>,
    data_offset: u64,
    record_size: usize,
}

impl RecordFile {
    /// Opens (creating if absent) the file in read-write mode. The
    /// slot layout is unknown until [`RecordFile::set_slot_layout`].
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            inner: Mutex::new(Inner { file, len }),
            data_offset: 0,
            record_size: 0,
        })
    }

    /// Fixes the slot layout after the header has been read or written.
    pub fn set_slot_layout(&mut self, data_offset: u64, record_size: usize) {
        self.data_offset = data_offset;
        self.record_size = record_size;
    }

    /// Current file length in bytes.
    pub fn len(&self) -> u64 {
        self.inner.lock().len
    }

    /// Whether the file is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads exactly `buf.len()` bytes at `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` at `offset`, extending the file if needed. A write
    /// past the current end zero-fills the gap.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(buf)?;
        let end = offset + buf.len() as u64;
        if end > inner.len {
            inner.len = end;
        }
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&self, offset: u64) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_at(offset, &mut b)?;
        Ok(b[0])
    }

    /// Writes one byte.
    pub fn write_u8(&self, offset: u64, value: u8) -> Result<()> {
        self.write_at(offset, &[value])
    }

    /// Reads a big-endian `u16`.
    pub fn read_u16(&self, offset: u64) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_at(offset, &mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    /// Writes a big-endian `u16`.
    pub fn write_u16(&self, offset: u64, value: u16) -> Result<()> {
        self.write_at(offset, &value.to_be_bytes())
    }

    /// Reads a big-endian `i32`.
    pub fn read_i32(&self, offset: u64) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_at(offset, &mut b)?;
        Ok(i32::from_be_bytes(b))
    }

    /// Writes a big-endian `i32`.
    pub fn write_i32(&self, offset: u64, value: i32) -> Result<()> {
        self.write_at(offset, &value.to_be_bytes())
    }

    /// Reads a big-endian `u64`.
    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_at(offset, &mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    /// Writes a big-endian `u64`.
    pub fn write_u64(&self, offset: u64, value: u64) -> Result<()> {
        self.write_at(offset, &value.to_be_bytes())
    }

    /// Flushes buffered writes to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_data()?;
        Ok(())
    }

    /// Truncates the file to `new_len` bytes.
    pub fn truncate(&self, new_len: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(new_len)?;
        inner.len = new_len;
        Ok(())
    }

    /// Number of whole slots the data region currently holds. A
    /// trailing partial slot is not counted.
    pub fn slot_count(&self) -> u64 {
        debug_assert!(self.record_size > 0, "slot layout not set");
        self.len().saturating_sub(self.data_offset) / self.record_size as u64
    }

    /// Byte offset of slot `index`.
    pub fn slot_offset(&self, index: i32) -> Result<u64> {
        if index < 0 {
            return Err(StoreError::InvalidArgument(format!(
                "negative slot index {index}"
            )));
        }
        (index as u64)
            .checked_mul(self.record_size as u64)
            .and_then(|rel| rel.checked_add(self.data_offset))
            .ok_or_else(|| StoreError::InvalidArgument(format!("slot index {index} overflows")))
    }

    /// Reads a whole slot.
    pub fn read_slot(&self, index: i32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.record_size];
        self.read_at(self.slot_offset(index)?, &mut buf)?;
        Ok(buf)
    }

    /// Reads `len` bytes starting `rel` bytes into slot `index`.
    pub fn read_slot_range(&self, index: i32, rel: usize, len: usize) -> Result<Vec<u8>> {
        if rel + len > self.record_size {
            return Err(StoreError::InvalidArgument(format!(
                "range {rel}+{len} exceeds record size {}",
                self.record_size
            )));
        }
        let mut buf = vec![0u8; len];
        self.read_at(self.slot_offset(index)? + rel as u64, &mut buf)?;
        Ok(buf)
    }

    /// Writes bytes starting `rel` bytes into slot `index`.
    pub fn write_slot_range(&self, index: i32, rel: usize, bytes: &[u8]) -> Result<()> {
        if rel + bytes.len() > self.record_size {
            return Err(StoreError::InvalidArgument(format!(
                "range {rel}+{} exceeds record size {}",
                bytes.len(),
                self.record_size
            )));
        }
        self.write_at(self.slot_offset(index)? + rel as u64, bytes)
    }

    /// Appends a whole slot at the end of the data region and returns
    /// its index.
    pub fn append_slot(&self, bytes: &[u8]) -> Result<i32> {
        if bytes.len() != self.record_size {
            return Err(StoreError::InvalidArgument(format!(
                "slot is {} bytes, record size is {}",
                bytes.len(),
                self.record_size
            )));
        }
        let index = self.slot_count() as i32;
        self.write_at(self.slot_offset(index)?, bytes)?;
        Ok(index)
    }

    /// Removes the last whole slot from the file.
    pub fn truncate_last_slot(&self) -> Result<()> {
        let count = self.slot_count();
        if count == 0 {
            return Err(StoreError::InvalidArgument(
                "no slots left to truncate".into(),
            ));
        }
        self.truncate(self.data_offset + (count - 1) * self.record_size as u64)
    }

    /// Drops any trailing partial slot, returning how many bytes were
    /// cut off.
    pub fn trim_partial_slot(&self) -> Result<u64> {
        debug_assert!(self.record_size > 0, "slot layout not set");
        let body = self.len().saturating_sub(self.data_offset);
        let rest = body % self.record_size as u64;
        if rest != 0 {
            self.truncate(self.len() - rest)?;
        }
        Ok(rest)
    }
}
