//! Dirty list, loose list, and spill bookkeeping for a single write
//! transaction.
//!
//! Generalizes the implicit dirty-page tracking inside the original
//! `MutPage`/`Cow` handling into an explicit structure: an ordered dirty
//! list with a fixed room, a loose list of pages freed and reused within
//! the same txn, and a spill step that flushes part of the dirty list
//! early when room runs low.

use crate::consts::*;
use crate::error::{Error, Resource, Result};
use crate::idlist::IdList;
use crate::mmap::Mmap;
use crate::page::PageViewMut;
use std::collections::BTreeMap;

/// Pages allocated or copy-on-written within the current write
/// transaction, keyed by pgno, kept in a `BTreeMap` so iteration (needed
/// at flush time) is naturally pgno-ordered — the same ordering a
/// free-page chain relies on for sequential writes.
pub struct DirtyPages {
    pages: BTreeMap<u64, Box<[u8]>>,
    /// Pages that were spilled (written to disk early) and evicted from
    /// `pages`; kept so a later `touch` can tell "this page is spilled,
    /// pull it back" apart from "this page was never dirtied".
    spilled: IdList,
    page_size: usize,
    room: usize,
    /// Pages dirtied-then-freed within this txn: preferred by the
    /// allocator over reclaim, since reusing them avoids an extra COW.
    loose: IdList,
    /// Generation counter for the "keep" bit (Open Question decision:
    /// generation counter over xor-parity — see DESIGN.md). Bumped once
    /// per spill pass; a page's `keep_generation` matching this value
    /// means "do not spill, a live cursor still points at it".
    keep_generation: u64,
}

impl DirtyPages {
    pub fn new(page_size: usize, room: usize) -> DirtyPages {
        DirtyPages {
            pages: BTreeMap::new(),
            spilled: IdList::new(),
            page_size,
            room,
            loose: IdList::new(),
            keep_generation: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_dirty(&self, pgno: u64) -> bool {
        self.pages.contains_key(&pgno)
    }

    pub fn is_spilled(&self, pgno: u64) -> bool {
        self.spilled.contains(pgno)
    }

    pub fn get(&self, pgno: u64) -> Option<&[u8]> {
        self.pages.get(&pgno).map(|b| b.as_ref())
    }

    pub fn get_mut(&mut self, pgno: u64) -> Option<&mut [u8]> {
        self.pages.get_mut(&pgno).map(|b| b.as_mut())
    }

    /// Inserts a freshly allocated or copied page into the dirty list.
    /// Returns `ResourceExhausted` if the list is already at capacity.
    pub fn insert(&mut self, pgno: u64, buf: Box<[u8]>) -> Result<()> {
        if self.pages.len() >= self.room && !self.pages.contains_key(&pgno) {
            return Err(Error::ResourceExhausted(Resource::DirtyListFull));
        }
        self.pages.insert(pgno, buf);
        Ok(())
    }

    pub fn remove(&mut self, pgno: u64) -> Option<Box<[u8]>> {
        self.pages.remove(&pgno)
    }

    pub fn room_remaining(&self) -> usize {
        self.room.saturating_sub(self.pages.len())
    }

    pub fn push_loose(&mut self, pgno: u64) {
        let _ = self.loose.append_sorted(pgno);
        self.loose.sort_and_dedup();
    }

    pub fn pop_loose(&mut self) -> Option<u64> {
        let ids = self.loose.as_slice();
        let last = *ids.last()?;
        let new_len = ids.len() - 1;
        let mut v = self.loose.as_slice()[..new_len].to_vec();
        v.sort_unstable();
        self.loose = IdList::from(v);
        Some(last)
    }

    pub fn loose_list(&self) -> &IdList {
        &self.loose
    }

    /// Spills roughly `1/SPILL_FRACTION_DENOM` of the dirty list (from the
    /// tail, i.e. highest pgnos first) to disk, skipping pages marked
    /// `keep` for this pass. Spilled pages are removed from the in-memory
    /// dirty set and their pgno is recorded (so `touch` can tell to pull
    /// them back). Returns the number of pages spilled.
    pub fn spill(&mut self, mmap: &Mmap, keep: &dyn Fn(u64) -> bool) -> Result<usize> {
        let target = (self.pages.len() / SPILL_FRACTION_DENOM).max(1);
        let mut candidates: Vec<u64> = self.pages.keys().rev().copied().collect();
        candidates.retain(|pgno| !keep(*pgno));
        candidates.truncate(target);

        let mut spilled = 0;
        for pgno in candidates {
            if let Some(buf) = self.pages.remove(&pgno) {
                let offset = pgno * self.page_size as u64;
                mmap.pwrite_meta(offset, &buf)?;
                let _ = self.spilled.append_sorted(pgno);
                self.spilled.sort_and_dedup();
                spilled += 1;
            }
        }
        Ok(spilled)
    }

    /// Removes `pgno` from the spilled set, e.g. once `touch` has pulled
    /// it back into the dirty list as a fresh copy.
    pub fn unmark_spilled(&mut self, pgno: u64) {
        let ids: Vec<u64> = self.spilled.iter().filter(|&&p| p != pgno).copied().collect();
        self.spilled = IdList::from(ids);
    }

    pub fn bump_keep_generation(&mut self) -> u64 {
        self.keep_generation += 1;
        self.keep_generation
    }

    pub fn keep_generation(&self) -> u64 {
        self.keep_generation
    }

    /// All dirty pages in ascending pgno order, as `(pgno, bytes)`: used
    /// by commit to flush with sequential writes.
    pub fn iter_ordered(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.pages.iter().map(|(&pgno, buf)| (pgno, buf.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.spilled.clear();
        self.loose.clear();
    }
}

/// Allocates a zeroed page buffer of `page_size` bytes and initializes
/// its header for `flags`.
pub fn new_page_buffer(page_size: usize, pgno: u64, flags: u16) -> Box<[u8]> {
    let mut buf = vec![0u8; page_size].into_boxed_slice();
    let mut view = PageViewMut::new(&mut buf);
    view.init(pgno, flags, page_size);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_list_rejects_insert_past_room() {
        let mut d = DirtyPages::new(512, 1);
        d.insert(1, new_page_buffer(512, 1, 0)).unwrap();
        assert!(d.insert(2, new_page_buffer(512, 2, 0)).is_err());
    }

    #[test]
    fn loose_list_is_lifo_by_value() {
        let mut d = DirtyPages::new(512, 8);
        d.push_loose(5);
        d.push_loose(2);
        d.push_loose(9);
        assert_eq!(d.pop_loose(), Some(9));
        assert_eq!(d.pop_loose(), Some(5));
        assert_eq!(d.pop_loose(), Some(2));
        assert_eq!(d.pop_loose(), None);
    }
}
