//! Slot allocation and the free list.
//!
//! Disposed slots are chained through their own bodies: the first four
//! bytes of a free slot hold the big-endian handle of the next free
//! slot, with the chain head kept in the header. Allocation pops the
//! head before growing the file.

use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;
use tracing::{error, warn};

use crate::error::{Result, StoreError};
use crate::records::file::RecordFile;
use crate::records::header::{self, HeaderInfo};
use crate::records::{Handle, NUL_HANDLE};

/// Result of a free-chain diagnostic walk.
#[derive(Debug, Clone, Default)]
pub struct FreeChainReport {
    /// Handles collected from the chain, in link order.
    pub handles: Vec<Handle>,
    /// True if the walk hit a past-end link or a cycle and patched the
    /// chain short. The slots beyond the patch are leaked, not lost
    /// data; a rebuild reclaims them.
    pub truncated: bool,
}

/// Used/free accounting and the free-list head.
///
/// Counter changes are written back to the header synchronously, so a
/// crash can cost at most the change in flight; the open-time
/// validation against the physical file length recovers the used
/// counter from anything short of a negative recomputation.
#[derive(Debug)]
pub struct UsageControl {
    used: i32,
    free: i32,
    free_head: Option<Handle>,
}

impl UsageControl {
    /// Fresh accounting for a newly created file.
    pub fn new() -> Self {
        Self {
            used: 0,
            free: 0,
            free_head: None,
        }
    }

    /// Accounting as recorded in an existing header.
    pub fn from_header(info: &HeaderInfo) -> Self {
        Self {
            used: info.used,
            free: info.free,
            free_head: Handle::from_raw(info.free_head_raw),
        }
    }

    /// Slots holding live rows.
    pub fn used(&self) -> i32 {
        self.used
    }

    /// Slots parked on the free chain.
    pub fn free(&self) -> i32 {
        self.free
    }

    /// Total physical slots accounted for.
    pub fn all(&self) -> i32 {
        self.used + self.free
    }

    /// Head of the free chain.
    pub fn free_head(&self) -> Option<Handle> {
        self.free_head
    }

    /// Writes all three counters back to the header and flushes.
    pub fn persist(&self, io: &RecordFile) -> Result<()> {
        io.write_i32(header::POS_USEDC, self.used)?;
        io.write_i32(header::POS_FREEC, self.free)?;
        io.write_i32(header::POS_FREEH, Handle::to_raw(self.free_head))?;
        io.sync()
    }

    /// Reconciles the counters with the physical file at open time.
    ///
    /// A trailing partial slot (torn append) is cut off. If the slot
    /// count disagrees with used+free, the used counter is recomputed
    /// from the physical count; a negative result means the free
    /// counter itself is wrong and the file cannot be trusted.
    pub fn validate(&mut self, io: &RecordFile) -> Result<()> {
        let cut = io.trim_partial_slot()?;
        if cut > 0 {
            warn!(bytes = cut, "dropped torn partial slot at end of file");
        }
        let calculated = io.slot_count() as i32;
        let counted = self.used + self.free;
        if calculated != counted {
            warn!(
                calculated,
                used = self.used,
                free = self.free,
                "slot count disagrees with header counters, recomputing used count"
            );
            let recomputed = calculated - self.free;
            if recomputed < 0 {
                return Err(StoreError::Corruption(format!(
                    "recomputed used count is negative ({calculated} slots, {} free)",
                    self.free
                )));
            }
            self.used = recomputed;
            self.persist(io)?;
        }
        Ok(())
    }

    /// Reserves a slot and writes `payload` as its row, returning the
    /// slot's handle. Pops the free chain when it is non-empty,
    /// otherwise appends a slot at the end of the file. The overhead
    /// region is filled with `0xff` placeholders until the caller
    /// commits real linkage; a recycled slot's old link bytes must not
    /// survive.
    pub fn allocate(&mut self, io: &RecordFile, overhead: usize, payload: &[u8]) -> Result<Handle> {
        let index = if self.free == 0 {
            io.slot_count() as i32
        } else {
            self.pop_free(io)?
        };
        let mut record = vec![0xffu8; overhead];
        record.extend_from_slice(payload);
        io.write_slot_range(index, 0, &record)?;
        self.used += 1;
        self.persist(io)?;
        Handle::from_raw(index).ok_or_else(|| {
            StoreError::Corruption(format!("allocated impossible slot index {index}"))
        })
    }

    fn pop_free(&mut self, io: &RecordFile) -> Result<i32> {
        let Some(head) = self.free_head else {
            // Counter says slots are free but the chain is empty. The
            // marked slots are unreachable; append instead and leave
            // them for a rebuild.
            error!(
                free = self.free,
                "free counter positive but chain head is NUL, leaking marked slots"
            );
            let index = io.slot_count() as i32;
            self.used += self.free;
            self.free = 0;
            return Ok(index);
        };
        let offset = io.slot_offset(head.index())?;
        if offset >= io.len() {
            // The chain points past the end of the file. Same policy:
            // leak the chain, append fresh.
            error!(
                head = head.index(),
                "free chain head lies past end of file, leaking marked slots"
            );
            let index = io.slot_count() as i32;
            self.used += self.free;
            self.free = 0;
            self.free_head = None;
            return Ok(index);
        }
        let next_raw = io.read_i32(offset)?;
        self.free_head = Handle::from_raw(next_raw);
        self.free -= 1;
        Ok(head.index())
    }

    /// Returns a slot to the free chain. The forward link is written
    /// into the slot body itself.
    pub fn dispose(&mut self, io: &RecordFile, handle: Handle) -> Result<()> {
        let all = io.slot_count() as i32;
        if handle.index() < 0 || handle.index() >= all {
            return Err(StoreError::InvalidArgument(format!(
                "cannot dispose slot {} of {all}",
                handle.index()
            )));
        }
        io.write_i32(io.slot_offset(handle.index())?, Handle::to_raw(self.free_head))?;
        self.free_head = Some(handle);
        self.free += 1;
        self.used -= 1;
        self.persist(io)
    }

    /// Walks the free chain for diagnostics, collecting every member.
    ///
    /// A link that points past the end of the file, or back onto a
    /// slot already seen, is patched to NUL in place (in the header
    /// for the first link, in the previous slot's body otherwise) and
    /// the walk stops with `truncated` set. An optional time budget
    /// aborts a pathologically long walk with [`StoreError::TimeBudget`].
    pub fn free_chain(
        &self,
        io: &RecordFile,
        budget: Option<Duration>,
    ) -> Result<FreeChainReport> {
        let mut report = FreeChainReport::default();
        let deadline = budget.map(|b| Instant::now() + b);
        let mut seen: FxHashSet<i32> = FxHashSet::default();
        // Where the link to the current slot lives, for patching.
        let mut link_at = header::POS_FREEH;
        let mut cursor = self.free_head;

        while let Some(handle) = cursor {
            let offset = io.slot_offset(handle.index())?;
            if offset >= io.len() {
                warn!(
                    handle = handle.index(),
                    "free chain links past end of file, truncating chain"
                );
                io.write_i32(link_at, NUL_HANDLE)?;
                io.sync()?;
                report.truncated = true;
                return Ok(report);
            }
            if !seen.insert(handle.index()) {
                warn!(
                    handle = handle.index(),
                    "free chain loops back onto itself, truncating chain"
                );
                io.write_i32(link_at, NUL_HANDLE)?;
                io.sync()?;
                report.truncated = true;
                return Ok(report);
            }
            report.handles.push(handle);
            if let Some(deadline) = deadline {
                if Instant::now() > deadline {
                    return Err(StoreError::TimeBudget(format!(
                        "free chain walk stopped after {} slots",
                        report.handles.len()
                    )));
                }
            }
            link_at = offset;
            cursor = Handle::from_raw(io.read_i32(offset)?);
        }
        Ok(report)
    }
}

impl Default for UsageControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const OVERHEAD: usize = 6;
    const ROW: usize = 10;

    fn fixture() -> (NamedTempFile, RecordFile, UsageControl) {
        let tmp = NamedTempFile::new().expect("temp file");
        let io = RecordFile::open(tmp.path()).expect("open");
        header::write_new(&io, &[4, 6], 2, 1, 1, 0, 0, *b"nd").expect("header");
        let mut io = io;
        let info = header::read(&io).expect("read header");
        io.set_slot_layout(info.data_offset, OVERHEAD + ROW);
        (tmp, io, UsageControl::new())
    }

    #[test]
    fn allocate_appends_then_recycles() {
        let (_tmp, io, mut usage) = fixture();
        let a = usage.allocate(&io, OVERHEAD, &[1u8; ROW]).expect("alloc");
        let b = usage.allocate(&io, OVERHEAD, &[2u8; ROW]).expect("alloc");
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(usage.used(), 2);

        usage.dispose(&io, a).expect("dispose");
        assert_eq!(usage.used(), 1);
        assert_eq!(usage.free(), 1);
        assert_eq!(usage.free_head(), Some(a));

        // The recycled slot comes back before the file grows.
        let c = usage.allocate(&io, OVERHEAD, &[3u8; ROW]).expect("alloc");
        assert_eq!(c, a);
        assert_eq!(usage.free(), 0);
        assert_eq!(io.slot_count(), 2);
    }

    #[test]
    fn dispose_links_through_slot_bodies() {
        let (_tmp, io, mut usage) = fixture();
        let a = usage.allocate(&io, OVERHEAD, &[1u8; ROW]).expect("alloc");
        let b = usage.allocate(&io, OVERHEAD, &[2u8; ROW]).expect("alloc");
        usage.dispose(&io, a).expect("dispose");
        usage.dispose(&io, b).expect("dispose");

        // b is the head and its body links to a.
        assert_eq!(usage.free_head(), Some(b));
        let link = io.read_i32(io.slot_offset(b.index()).expect("pos")).expect("link");
        assert_eq!(Handle::from_raw(link), Some(a));

        let chain = usage.free_chain(&io, None).expect("walk");
        assert_eq!(chain.handles, vec![b, a]);
        assert!(!chain.truncated);
    }

    #[test]
    fn reserved_overhead_is_filled_with_placeholder_bytes() {
        let (_tmp, io, mut usage) = fixture();
        let a = usage.allocate(&io, OVERHEAD, &[1u8; ROW]).expect("alloc");
        assert_eq!(
            io.read_slot_range(a.index(), 0, OVERHEAD).expect("overhead"),
            vec![0xffu8; OVERHEAD]
        );

        // A recycled slot gets the fill again, clobbering its old
        // free-chain link.
        usage.dispose(&io, a).expect("dispose");
        let b = usage.allocate(&io, OVERHEAD, &[2u8; ROW]).expect("alloc");
        assert_eq!(b, a);
        assert_eq!(
            io.read_slot_range(b.index(), 0, OVERHEAD).expect("overhead"),
            vec![0xffu8; OVERHEAD]
        );
    }

    #[test]
    fn counters_are_persisted_synchronously() {
        let (_tmp, io, mut usage) = fixture();
        let a = usage.allocate(&io, OVERHEAD, &[1u8; ROW]).expect("alloc");
        usage.dispose(&io, a).expect("dispose");
        assert_eq!(io.read_i32(header::POS_USEDC).expect("usedc"), 0);
        assert_eq!(io.read_i32(header::POS_FREEC).expect("freec"), 1);
        assert_eq!(
            Handle::from_raw(io.read_i32(header::POS_FREEH).expect("freeh")),
            Some(a)
        );
    }

    #[test]
    fn validate_recovers_used_count() {
        let (_tmp, io, mut usage) = fixture();
        usage.allocate(&io, OVERHEAD, &[1u8; ROW]).expect("alloc");
        usage.allocate(&io, OVERHEAD, &[2u8; ROW]).expect("alloc");

        // Simulate a stale header counter.
        let mut stale = UsageControl {
            used: 9,
            free: 0,
            free_head: None,
        };
        stale.validate(&io).expect("validate");
        assert_eq!(stale.used(), 2);
        assert_eq!(io.read_i32(header::POS_USEDC).expect("usedc"), 2);
    }

    #[test]
    fn validate_fails_when_recomputation_goes_negative() {
        let (_tmp, io, mut usage) = fixture();
        usage.allocate(&io, OVERHEAD, &[1u8; ROW]).expect("alloc");
        let mut stale = UsageControl {
            used: 0,
            free: 5,
            free_head: None,
        };
        assert!(matches!(
            stale.validate(&io),
            Err(StoreError::Corruption(_))
        ));
    }

    #[test]
    fn free_chain_truncates_past_end_link() {
        let (_tmp, io, mut usage) = fixture();
        let a = usage.allocate(&io, OVERHEAD, &[1u8; ROW]).expect("alloc");
        usage.dispose(&io, a).expect("dispose");
        // Corrupt the link in a's body to point far past the file.
        io.write_i32(io.slot_offset(a.index()).expect("pos"), 999)
            .expect("corrupt");

        let chain = usage.free_chain(&io, None).expect("walk");
        assert_eq!(chain.handles, vec![a]);
        assert!(chain.truncated);
        // The patched link reads back as NUL.
        let link = io.read_i32(io.slot_offset(a.index()).expect("pos")).expect("link");
        assert_eq!(Handle::from_raw(link), None);
    }

    #[test]
    fn free_chain_truncates_cycles() {
        let (_tmp, io, mut usage) = fixture();
        let a = usage.allocate(&io, OVERHEAD, &[1u8; ROW]).expect("alloc");
        let b = usage.allocate(&io, OVERHEAD, &[2u8; ROW]).expect("alloc");
        usage.dispose(&io, a).expect("dispose");
        usage.dispose(&io, b).expect("dispose");
        // Point a's link back at b: b -> a -> b.
        io.write_i32(io.slot_offset(a.index()).expect("pos"), b.index())
            .expect("corrupt");

        let chain = usage.free_chain(&io, None).expect("walk");
        assert_eq!(chain.handles, vec![b, a]);
        assert!(chain.truncated);
    }

    #[test]
    fn lost_chain_appends_instead_of_overwriting() {
        let (_tmp, io, mut usage) = fixture();
        usage.allocate(&io, OVERHEAD, &[1u8; ROW]).expect("alloc");
        usage.allocate(&io, OVERHEAD, &[2u8; ROW]).expect("alloc");
        // Claim a free slot without a chain.
        usage.free = 1;
        usage.used = 1;
        usage.free_head = None;
        let c = usage.allocate(&io, OVERHEAD, &[3u8; ROW]).expect("alloc");
        assert_eq!(c.index(), 2);
        assert_eq!(usage.free(), 0);
        assert_eq!(io.slot_count(), 3);
    }
}
