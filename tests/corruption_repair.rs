//! Deliberate damage: stale counters, torn appends, broken free
//! chains, dangling roots and link cycles. The engine must recover or
//! degrade cleanly, never spin or corrupt further.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::tempdir;

use slotree::records::header::{self, POS_FREEC, POS_FREEH, POS_OFFSET, POS_USEDC};
use slotree::{NaturalOrder, RowSchema, StoreError, Table, TableOptions};

const KEY_W: usize = 5;
const VAL_W: usize = 7;
const RECORD_SIZE: u64 = 14 + (KEY_W + VAL_W) as u64;

fn schema() -> RowSchema {
    RowSchema::new(vec![KEY_W, VAL_W], Arc::new(NaturalOrder)).expect("schema")
}

fn row(key: &str, value: &str) -> Vec<u8> {
    schema()
        .pack(&[key.as_bytes(), value.as_bytes()])
        .expect("pack")
}

/// Builds a table with `keys` and closes it.
fn build(path: &Path, keys: &[&str]) {
    let table = Table::open(path, schema(), TableOptions::default()).expect("create");
    for key in keys {
        table.put(&row(key, "val")).expect("put");
    }
    table.close().expect("close");
}

fn reopen(path: &Path) -> Table {
    Table::open(path, schema(), TableOptions::default()).expect("reopen")
}

fn poke_i32(path: &Path, offset: u64, value: i32) {
    let mut f = OpenOptions::new().write(true).open(path).expect("open raw");
    f.seek(SeekFrom::Start(offset)).expect("seek");
    f.write_all(&value.to_be_bytes()).expect("write");
}

fn peek_i32(path: &Path, offset: u64) -> i32 {
    let mut f = OpenOptions::new().read(true).open(path).expect("open raw");
    f.seek(SeekFrom::Start(offset)).expect("seek");
    let mut buf = [0u8; 4];
    f.read_exact(&mut buf).expect("read");
    i32::from_be_bytes(buf)
}

fn peek_u64(path: &Path, offset: u64) -> u64 {
    let mut f = OpenOptions::new().read(true).open(path).expect("open raw");
    f.seek(SeekFrom::Start(offset)).expect("seek");
    let mut buf = [0u8; 8];
    f.read_exact(&mut buf).expect("read");
    u64::from_be_bytes(buf)
}

fn data_offset(path: &Path) -> u64 {
    peek_u64(path, POS_OFFSET)
}

fn slot_offset(path: &Path, index: i32) -> u64 {
    data_offset(path) + index as u64 * RECORD_SIZE
}

fn root_handle(path: &Path) -> i32 {
    peek_i32(path, header::handles_offset(2))
}

fn file(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("t.db")
}

#[test]
fn stale_used_count_is_recovered_from_file_size() {
    let dir = tempdir().expect("tempdir");
    let path = file(&dir);
    build(&path, &["aaa", "bbb", "ccc"]);

    poke_i32(&path, POS_USEDC, 99);
    let table = reopen(&path);
    assert_eq!(table.size(), 3);
    // The recovered counter was written back.
    drop(table);
    assert_eq!(peek_i32(&path, POS_USEDC), 3);
}

#[test]
fn impossible_free_count_is_fatal() {
    let dir = tempdir().expect("tempdir");
    let path = file(&dir);
    build(&path, &["aaa", "bbb", "ccc"]);

    // More free slots than the file physically holds: the recomputed
    // used count would be negative, which nothing can repair.
    poke_i32(&path, POS_FREEC, 50);
    assert!(matches!(
        Table::open(&path, schema(), TableOptions::default()),
        Err(StoreError::Corruption(_))
    ));
}

#[test]
fn torn_trailing_slot_is_trimmed_on_open() {
    let dir = tempdir().expect("tempdir");
    let path = file(&dir);
    build(&path, &["aaa", "bbb", "ccc"]);

    let whole = std::fs::metadata(&path).expect("meta").len();
    let mut f = OpenOptions::new().append(true).open(&path).expect("open raw");
    f.write_all(&[0xabu8; 5]).expect("append garbage");
    drop(f);

    let table = reopen(&path);
    assert_eq!(table.size(), 3);
    assert_eq!(table.get(b"ccc").expect("get"), Some(row("ccc", "val")));
    drop(table);
    assert_eq!(std::fs::metadata(&path).expect("meta").len(), whole);
}

#[test]
fn broken_free_chain_is_truncated_and_table_stays_usable() {
    let dir = tempdir().expect("tempdir");
    let path = file(&dir);
    build(&path, &["aaa", "bbb", "ccc", "ddd"]);
    {
        let table = reopen(&path);
        table.remove(b"aaa").expect("remove");
        table.remove(b"bbb").expect("remove");
        table.close().expect("close");
    }

    // Damage the head slot's forward link to point far past the file.
    let head = peek_i32(&path, POS_FREEH);
    poke_i32(&path, slot_offset(&path, head), 9999);

    let table = reopen(&path);
    let report = table.free_chain(None).expect("walk");
    assert_eq!(report.handles.len(), 1);
    assert!(report.truncated);

    // The patched chain reads back clean.
    let again = table.free_chain(None).expect("walk");
    assert_eq!(again.handles.len(), 1);
    assert!(!again.truncated);

    // The slot beyond the patch is leaked, not fatal: writes still work.
    table.put(&row("eee", "val")).expect("put");
    table.put(&row("fff", "val")).expect("put");
    assert_eq!(table.get(b"eee").expect("get"), Some(row("eee", "val")));
    assert_eq!(table.get(b"fff").expect("get"), Some(row("fff", "val")));
}

#[test]
fn looped_free_chain_is_truncated() {
    let dir = tempdir().expect("tempdir");
    let path = file(&dir);
    build(&path, &["aaa", "bbb", "ccc"]);
    {
        let table = reopen(&path);
        table.remove(b"aaa").expect("remove");
        table.remove(b"bbb").expect("remove");
        table.close().expect("close");
    }

    // head -> second -> head again.
    let head = peek_i32(&path, POS_FREEH);
    let second = peek_i32(&path, slot_offset(&path, head));
    poke_i32(&path, slot_offset(&path, second), head);

    let table = reopen(&path);
    let report = table.free_chain(None).expect("walk");
    assert_eq!(report.handles.len(), 2);
    assert!(report.truncated);
}

#[test]
fn dangling_root_degrades_to_empty_index() {
    let dir = tempdir().expect("tempdir");
    let path = file(&dir);
    build(&path, &["aaa", "bbb", "ccc"]);

    poke_i32(&path, header::handles_offset(2), 9999);

    let table = reopen(&path);
    // The index is gone but nothing loops or panics.
    assert_eq!(table.get(b"aaa").expect("get"), None);
    // New writes rebuild an index; old rows stay in their slots and a
    // content scan still reaches them.
    table.put(&row("new", "val")).expect("put");
    assert_eq!(table.get(b"new").expect("get"), Some(row("new", "val")));
    let scanned = table.content_rows(None).expect("scan");
    assert_eq!(scanned.len(), 4);
}

#[test]
fn link_cycle_is_repaired_in_place() {
    let dir = tempdir().expect("tempdir");
    let path = file(&dir);
    build(&path, &["aaa", "bbb", "ccc"]);

    // Point both child links of the root back at the root itself.
    let root = root_handle(&path);
    let base = slot_offset(&path, root);
    poke_i32(&path, base + 6, root); // left child handle
    poke_i32(&path, base + 10, root); // right child handle

    let table = reopen(&path);
    // Any search that walks past the root revisits it; the lookup
    // degrades to not-found and the node is reset to a leaf.
    assert_eq!(table.get(b"zzz").expect("get"), None);
    // The next search terminates immediately.
    assert_eq!(table.get(b"zzz").expect("get"), None);
    // The root's own row is still reachable.
    let root_key = {
        let rows = table.content_rows(None).expect("scan");
        rows.iter()
            .find(|(h, _)| h.index() == root)
            .map(|(_, r)| r[..KEY_W].to_vec())
            .expect("root row")
    };
    assert_eq!(
        table.get(&root_key).expect("get"),
        Some({
            let mut r = root_key.clone();
            r.extend_from_slice(b"val\0\0\0\0");
            r
        })
    );
}
