//! The fixed-offset file header.
//!
//! Every multi-byte integer in the header (and in slot overhead) is
//! big-endian. The header is followed by a block of general-purpose
//! handles (index 0 holds the tree root), a block of fixed-width text
//! properties, and then the slot region at the recorded data offset.

use crate::error::{Result, StoreError};
use crate::records::file::RecordFile;
use crate::records::NUL_HANDLE;

/// Identifies a record file.
pub const MAGIC: u8 = 4;

/// Advisory port hint written at creation; purely informational.
pub const PORT_HINT: u16 = 4444;

/// Width of the description field.
pub const DESCR_LEN: usize = 60;

pub const POS_MAGIC: u64 = 0;
pub const POS_BUSY: u64 = 1;
pub const POS_PORT: u64 = 2;
pub const POS_DESCR: u64 = 4;
pub const POS_COLUMNS: u64 = 64;
pub const POS_OHBYTEC: u64 = 66;
pub const POS_OHHANDLEC: u64 = 68;
pub const POS_USEDC: u64 = 70;
pub const POS_FREEC: u64 = 74;
pub const POS_FREEH: u64 = 78;
pub const POS_MD5PW: u64 = 82;
pub const POS_ENCRYPTION: u64 = 98;
pub const POS_OFFSET: u64 = 114;
pub const POS_INTPROPC: u64 = 122;
pub const POS_TXTPROPC: u64 = 126;
pub const POS_TXTPROPW: u64 = 130;
pub const POS_COLWIDTHS: u64 = 134;

const DEFAULT_DESCR: &[u8] = b"--slotree fixed-width record file--";

/// Everything the fixed header records about a file.
#[derive(Debug, Clone)]
pub struct HeaderInfo {
    /// Ordering signature (first two description bytes).
    pub signature: [u8; 2],
    /// Column widths, key column first.
    pub column_widths: Vec<usize>,
    /// Overhead bytes per slot.
    pub oh_bytes: usize,
    /// Overhead handles per slot.
    pub oh_handles: usize,
    /// Used-slot counter as stored.
    pub used: i32,
    /// Free-slot counter as stored.
    pub free: i32,
    /// Raw free-list head value as stored.
    pub free_head_raw: i32,
    /// Start of the slot region.
    pub data_offset: u64,
    /// Number of general handles (at least one, the tree root).
    pub int_props: usize,
    /// Number of text properties.
    pub txt_props: usize,
    /// Width of each text property.
    pub txt_prop_width: usize,
}

/// Offset of the general handle block.
pub fn handles_offset(columns: usize) -> u64 {
    POS_COLWIDTHS + 4 * columns as u64
}

/// Offset of the text property block.
pub fn txt_props_offset(columns: usize, int_props: usize) -> u64 {
    handles_offset(columns) + 4 * int_props as u64
}

/// Start of the slot region for the given header dimensions.
pub fn data_offset_for(
    columns: usize,
    int_props: usize,
    txt_props: usize,
    txt_prop_width: usize,
) -> u64 {
    txt_props_offset(columns, int_props) + (txt_props * txt_prop_width) as u64
}

/// Writes a complete fresh header (plus NUL handles and blank text
/// properties) to an empty file and returns the data offset.
pub fn write_new(
    io: &RecordFile,
    column_widths: &[usize],
    oh_bytes: usize,
    oh_handles: usize,
    int_props: usize,
    txt_props: usize,
    txt_prop_width: usize,
    signature: [u8; 2],
) -> Result<u64> {
    if column_widths.is_empty() || column_widths.len() > u16::MAX as usize {
        return Err(StoreError::InvalidArgument(format!(
            "unsupported column count {}",
            column_widths.len()
        )));
    }
    if int_props == 0 {
        return Err(StoreError::InvalidArgument(
            "at least one general handle is required".into(),
        ));
    }

    io.write_u8(POS_MAGIC, MAGIC)?;
    io.write_u8(POS_BUSY, 0)?;
    io.write_u16(POS_PORT, PORT_HINT)?;

    let mut descr = [b'-'; DESCR_LEN];
    descr[..DEFAULT_DESCR.len()].copy_from_slice(DEFAULT_DESCR);
    descr[..2].copy_from_slice(&signature);
    io.write_at(POS_DESCR, &descr)?;

    io.write_u16(POS_COLUMNS, column_widths.len() as u16)?;
    io.write_u16(POS_OHBYTEC, oh_bytes as u16)?;
    io.write_u16(POS_OHHANDLEC, oh_handles as u16)?;
    io.write_i32(POS_USEDC, 0)?;
    io.write_i32(POS_FREEC, 0)?;
    io.write_i32(POS_FREEH, NUL_HANDLE)?;
    io.write_at(POS_MD5PW, &[0u8; 16])?;
    io.write_at(POS_ENCRYPTION, &[0u8; 16])?;

    let data_offset = data_offset_for(
        column_widths.len(),
        int_props,
        txt_props,
        txt_prop_width,
    );
    io.write_u64(POS_OFFSET, data_offset)?;
    io.write_i32(POS_INTPROPC, int_props as i32)?;
    io.write_i32(POS_TXTPROPC, txt_props as i32)?;
    io.write_i32(POS_TXTPROPW, txt_prop_width as i32)?;

    for (i, width) in column_widths.iter().enumerate() {
        io.write_i32(POS_COLWIDTHS + 4 * i as u64, *width as i32)?;
    }
    let handles_at = handles_offset(column_widths.len());
    for i in 0..int_props {
        io.write_i32(handles_at + 4 * i as u64, NUL_HANDLE)?;
    }
    if txt_props * txt_prop_width > 0 {
        let blank = vec![0u8; txt_props * txt_prop_width];
        io.write_at(txt_props_offset(column_widths.len(), int_props), &blank)?;
    }
    io.sync()?;
    Ok(data_offset)
}

/// Reads and validates the header of an existing file.
pub fn read(io: &RecordFile) -> Result<HeaderInfo> {
    if io.len() < POS_COLWIDTHS {
        return Err(StoreError::Corruption(format!(
            "file too short for a header: {} bytes",
            io.len()
        )));
    }
    let magic = io.read_u8(POS_MAGIC)?;
    if magic != MAGIC {
        return Err(StoreError::Corruption(format!(
            "bad magic byte {magic:#04x}, expected {MAGIC:#04x}"
        )));
    }

    let mut signature = [0u8; 2];
    io.read_at(POS_DESCR, &mut signature)?;

    let columns = io.read_u16(POS_COLUMNS)? as usize;
    if columns == 0 {
        return Err(StoreError::Corruption("header reports zero columns".into()));
    }
    let oh_bytes = io.read_u16(POS_OHBYTEC)? as usize;
    let oh_handles = io.read_u16(POS_OHHANDLEC)? as usize;
    let used = io.read_i32(POS_USEDC)?;
    let free = io.read_i32(POS_FREEC)?;
    let free_head_raw = io.read_i32(POS_FREEH)?;
    let data_offset = io.read_u64(POS_OFFSET)?;
    let int_props = io.read_i32(POS_INTPROPC)?;
    let txt_props = io.read_i32(POS_TXTPROPC)?;
    let txt_prop_width = io.read_i32(POS_TXTPROPW)?;
    if int_props < 1 || txt_props < 0 || txt_prop_width < 0 {
        return Err(StoreError::Corruption(format!(
            "implausible property counts: {int_props} handles, {txt_props} texts of {txt_prop_width} bytes"
        )));
    }

    let mut column_widths = Vec::with_capacity(columns);
    for i in 0..columns {
        let w = io.read_i32(POS_COLWIDTHS + 4 * i as u64)?;
        if w <= 0 {
            return Err(StoreError::Corruption(format!(
                "column {i} has non-positive width {w}"
            )));
        }
        column_widths.push(w as usize);
    }

    let expected_offset = data_offset_for(
        columns,
        int_props as usize,
        txt_props as usize,
        txt_prop_width as usize,
    );
    if data_offset != expected_offset {
        return Err(StoreError::Corruption(format!(
            "data offset {data_offset} disagrees with header dimensions ({expected_offset})"
        )));
    }

    Ok(HeaderInfo {
        signature,
        column_widths,
        oh_bytes,
        oh_handles,
        used,
        free,
        free_head_raw,
        data_offset,
        int_props: int_props as usize,
        txt_props: txt_props as usize,
        txt_prop_width: txt_prop_width as usize,
    })
}
