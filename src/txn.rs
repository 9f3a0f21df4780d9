//! Transaction lifecycle: read snapshots and the single write transaction.
//!
//! Grounded in the original `Txn`/`MutTxn` lifecycle (Drop-releases-lock
//! pattern, `alloc_page`, the phase order of `commit()`), generalized to a
//! reader-table-aware, free-DB-aware commit protocol.

use crate::alloc::{new_page_buffer, DirtyPages};
use crate::cmp::Comparator;
use crate::consts::*;
use crate::cow;
use crate::cursor::{fixup_pgno, Frame};
use crate::env::Env;
use crate::error::{Conflict, Error, Resource, Result};
use crate::freedb;
use crate::idlist::IdList;
use crate::meta::{DbRecord, Meta};
use crate::page::{OverflowHeader, PageView, PageViewMut};
use crate::reader::ReaderHandle;
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Weak;
use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard};

/// Minimal capability every transaction exposes: decode a page by number
/// under this transaction's view of the world (the committed map for a
/// reader, the map overlaid with the dirty list for the writer).
pub trait PageReader {
    fn page_size(&self) -> usize;
    fn comparator(&self) -> &dyn Comparator;
    fn read_page(&self, pgno: u64) -> PageView<'_>;

    /// Resolves a leaf node's stored data bytes, following an overflow
    /// chain when the node is flagged `BIGDATA`.
    fn value_bytes(&self, flags: u16, inline: &[u8]) -> Vec<u8> {
        if flags & node_flags::BIGDATA != 0 {
            let first_pgno = u64::from_ne_bytes(inline[0..8].try_into().unwrap());
            self.read_overflow(first_pgno)
        } else {
            inline.to_vec()
        }
    }

    fn read_overflow(&self, first_pgno: u64) -> Vec<u8> {
        let page_size = self.page_size();
        let head = self.read_page(first_pgno);
        let total_len = OverflowHeader::total_len(head.as_bytes()) as usize;
        let mut out = Vec::with_capacity(total_len);
        let cap_first = page_size - OverflowHeader::data_offset();
        let cap_rest = page_size - PAGE_HEADER_SIZE;
        let mut remaining = total_len;
        let mut pgno = first_pgno;
        let mut first = true;
        while remaining > 0 {
            let view = self.read_page(pgno);
            let (data_off, cap) = if first {
                (OverflowHeader::data_offset(), cap_first)
            } else {
                (PAGE_HEADER_SIZE, cap_rest)
            };
            let take = remaining.min(cap);
            out.extend_from_slice(&view.as_bytes()[data_off..data_off + take]);
            remaining -= take;
            pgno += 1;
            first = false;
        }
        out
    }
}

/// A read-only snapshot transaction: a reader-table slot pinning the meta
/// page that was current at `begin()`, so later writers can COW freely
/// without ever touching pages this snapshot can still reach.
pub struct ReadTxn<'env> {
    env: &'env Env,
    handle: ReaderHandle,
    pub(crate) snapshot_txnid: u64,
    meta: Meta,
    comparator: Arc<dyn Comparator>,
}

impl<'env> ReadTxn<'env> {
    pub(crate) fn begin(env: &'env Env) -> Result<ReadTxn<'env>> {
        let pid = std::process::id();
        let tid = thread_id();
        let committed = env.committed_txnid.load(Ordering::SeqCst);
        let handle = env
            .reader_table
            .acquire(tid, pid, committed)
            .ok_or(Error::ResourceExhausted(Resource::ReadersFull))?;
        let meta = *env.current_meta.lock().unwrap();
        Ok(ReadTxn { env, handle, snapshot_txnid: meta.txnid, meta, comparator: env.comparator() })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        crate::btree::get(self, self.meta.main_db.root, key)
    }

    pub fn stat(&self) -> crate::stat::Stat {
        crate::stat::Stat::from_record(&self.meta.main_db)
    }

    pub fn iter(&self) -> crate::cursor::Cursor<'_, ReadTxn<'env>> {
        crate::cursor::Cursor::new(self, self.meta.main_db.root)
    }
}

impl<'env> PageReader for ReadTxn<'env> {
    fn page_size(&self) -> usize {
        self.env.page_size()
    }

    fn comparator(&self) -> &dyn Comparator {
        self.comparator.as_ref()
    }

    fn read_page(&self, pgno: u64) -> PageView<'_> {
        let page_size = self.page_size();
        let off = pgno as usize * page_size;
        PageView::new(&self.env.mmap.as_slice()[off..off + page_size])
    }
}

impl<'env> Drop for ReadTxn<'env> {
    fn drop(&mut self) {
        self.env.reader_table.release(self.handle);
    }
}

/// A stand-in for an OS thread id: stable for the life of the thread and
/// unique enough for the reader table's same-thread slot reuse, without
/// reaching into platform-specific `gettid` APIs.
fn thread_id() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

impl<'env> std::fmt::Debug for WriteTxn<'env> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn")
            .field("txnid", &self.txnid)
            .field("main_db", &self.main_db)
            .field("free_db", &self.free_db)
            .finish_non_exhaustive()
    }
}

/// The single write transaction. Only one can be live per environment at a
/// time, enforced by `Env::writer`.
pub struct WriteTxn<'env> {
    env: &'env Env,
    _guard: MutexGuard<'env, ()>,
    pub(crate) txnid: u64,
    dirty: DirtyPages,
    comparator: Arc<dyn Comparator>,
    main_db: DbRecord,
    free_db: DbRecord,
    /// Pages freed by this txn that were *not* allocated by it; saved as a
    /// new free-DB record keyed by `txnid` at commit.
    freed: IdList,
    /// Pages reclaimed from older free-DB records by the allocator,
    /// pending consumption.
    reclaim: IdList,
    last_consumed_txnid: u64,
    /// Pages allocated fresh during this txn; a page freed and in this set
    /// becomes loose (reusable within the txn) rather than going through
    /// `freed`.
    allocated_this_txn: IdList,
    next_pgno: u64,
    last_pgno_before: u64,
    tracked_cursors: Vec<Weak<RefCell<Vec<Frame>>>>,
    error: Option<Error>,
}

impl<'env> WriteTxn<'env> {
    pub(crate) fn begin(env: &'env Env) -> Result<WriteTxn<'env>> {
        let guard = env.writer.lock().unwrap();
        Self::begin_with_guard(env, guard)
    }

    pub(crate) fn begin_with_guard(
        env: &'env Env,
        guard: MutexGuard<'env, ()>,
    ) -> Result<WriteTxn<'env>> {
        let meta = *env.current_meta.lock().unwrap();
        let txnid = meta.txnid + 1;
        let room = (env.page_size() / 8).max(64);
        Ok(WriteTxn {
            env,
            _guard: guard,
            txnid,
            dirty: DirtyPages::new(env.page_size(), room),
            comparator: env.comparator(),
            main_db: meta.main_db,
            free_db: meta.free_db,
            freed: IdList::new(),
            reclaim: IdList::new(),
            last_consumed_txnid: 0,
            allocated_this_txn: IdList::new(),
            next_pgno: meta.last_pgno + 1,
            last_pgno_before: meta.last_pgno,
            tracked_cursors: Vec::new(),
            error: None,
        })
    }

    pub fn txnid(&self) -> u64 {
        self.txnid
    }

    pub fn main_db_root(&self) -> u64 {
        self.main_db.root
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        crate::btree::get(self, self.main_db.root, key)
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_error()?;
        let r = crate::btree::insert::put(self, Db::Main, key, value, crate::btree::PutFlags::default());
        self.latch_error(r)
    }

    pub fn put_no_overwrite(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_error()?;
        let flags = crate::btree::PutFlags { no_overwrite: true, ..Default::default() };
        let r = crate::btree::insert::put(self, Db::Main, key, value, flags);
        self.latch_error(r)
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.check_error()?;
        let r = crate::btree::delete::delete(self, Db::Main, key);
        self.latch_error(r)
    }

    pub fn stat(&self) -> crate::stat::Stat {
        crate::stat::Stat::from_record(&self.main_db)
    }

    pub fn new_cursor(&self) -> crate::cursor::Cursor<'_, WriteTxn<'env>> {
        crate::cursor::Cursor::new(self, self.main_db.root)
    }

    fn check_error(&self) -> Result<()> {
        if self.error.is_some() {
            return Err(Error::Conflict(Conflict::BadTxn));
        }
        Ok(())
    }

    fn latch_error<T>(&mut self, r: Result<T>) -> Result<T> {
        if let Err(ref e) = r {
            if !matches!(e, Error::NotFound | Error::AlreadyExists) {
                self.error = Some(clone_error(e));
            }
        }
        r
    }

    pub fn db_record(&self, which: Db) -> &DbRecord {
        match which {
            Db::Main => &self.main_db,
            Db::Free => &self.free_db,
        }
    }

    pub fn db_record_mut(&mut self, which: Db) -> &mut DbRecord {
        match which {
            Db::Main => &mut self.main_db,
            Db::Free => &mut self.free_db,
        }
    }

    // --- allocator / dirty-list plumbing used by `cow.rs` and `btree/` ---

    pub fn page_size(&self) -> usize {
        self.dirty.page_size()
    }

    pub fn is_dirty(&self, pgno: u64) -> bool {
        self.dirty.is_dirty(pgno)
    }

    pub fn is_spilled(&self, pgno: u64) -> bool {
        self.dirty.is_spilled(pgno)
    }

    pub fn pull_back_spilled(&mut self, pgno: u64) -> Result<()> {
        let page_size = self.page_size();
        let off = pgno as usize * page_size;
        let buf = self.env.mmap.as_slice()[off..off + page_size].to_vec().into_boxed_slice();
        self.dirty.unmark_spilled(pgno);
        self.ensure_room()?;
        self.dirty.insert(pgno, buf)
    }

    pub fn insert_dirty(&mut self, pgno: u64, buf: Box<[u8]>) -> Result<()> {
        self.dirty.insert(pgno, buf)
    }

    pub fn get_page_mut(&mut self, pgno: u64) -> Result<PageViewMut<'_>> {
        let buf = self.dirty.get_mut(pgno).ok_or(Error::Conflict(Conflict::BadTxn))?;
        Ok(PageViewMut::new(buf))
    }

    /// Ensures the page at `pgno` is dirty (copy-on-write touch), returning
    /// its (possibly new) pgno.
    pub fn touch(&mut self, pgno: u64) -> Result<u64> {
        cow::touch(self, pgno)
    }

    fn ensure_room(&mut self) -> Result<()> {
        if self.dirty.room_remaining() == 0 {
            let tracked = self.tracked_cursors.clone();
            self.dirty.spill(&self.env.mmap, &|pgno| crate::cursor::is_referenced(&tracked, pgno))?;
        }
        Ok(())
    }

    /// Allocates `n` contiguous fresh pgnos (preferring loose pages, then
    /// free-DB reclaim, then growing the tail — see `freedb::allocate`)
    /// and inserts a zeroed, dirty page buffer for each.
    pub fn alloc_pages(&mut self, n: u64, flags: u16) -> Result<u64> {
        self.ensure_room()?;
        let first = freedb::allocate(self, n)?;
        for i in 0..n {
            let pgno = first + i;
            let buf = new_page_buffer(self.page_size(), pgno, flags);
            self.dirty.insert(pgno, buf)?;
            self.allocated_this_txn.append_sorted(pgno);
        }
        self.allocated_this_txn.sort_and_dedup();
        if first + n > self.next_pgno {
            self.next_pgno = first + n;
        }
        Ok(first)
    }

    pub fn alloc_pgno(&mut self, n: u64) -> Result<u64> {
        self.alloc_pages(n, 0)
    }

    pub fn alloc_page(&mut self, flags: u16) -> Result<u64> {
        self.alloc_pages(1, flags)
    }

    /// Grows the tail allocator past every page ever touched this txn or
    /// before; the free-DB allocator's last-resort path once reclaim and
    /// loose pages are exhausted.
    pub(crate) fn grow_tail(&mut self, n: u64) -> Result<u64> {
        let pgno = self.next_pgno;
        let needed_len = (pgno + n) * self.page_size() as u64;
        if needed_len > self.env.mmap.len() as u64 {
            self.env.mmap.grow(needed_len.next_power_of_two().max(needed_len))?;
        }
        self.next_pgno = pgno + n;
        Ok(pgno)
    }

    pub(crate) fn reclaim_list_mut(&mut self) -> &mut IdList {
        &mut self.reclaim
    }

    pub(crate) fn last_consumed_txnid(&self) -> u64 {
        self.last_consumed_txnid
    }

    pub(crate) fn set_last_consumed_txnid(&mut self, v: u64) {
        self.last_consumed_txnid = v;
    }

    pub(crate) fn freed_list(&self) -> &IdList {
        &self.freed
    }

    /// Drains and returns this txn's freed-page list, clearing it in place
    /// so a caller looping to a fixed point (saving the free list at
    /// commit) can tell whether a later pass added anything new.
    pub(crate) fn take_freed_list(&mut self) -> Vec<u64> {
        let ids = self.freed.as_slice().to_vec();
        self.freed.clear();
        ids
    }

    /// Drains and returns the in-memory reclaim set left over from the
    /// free-DB allocator, clearing it in place.
    pub(crate) fn take_reclaim_list(&mut self) -> Vec<u64> {
        let ids = self.reclaim.as_slice().to_vec();
        self.reclaim.clear();
        ids
    }

    pub(crate) fn loose_list(&self) -> &IdList {
        self.dirty.loose_list()
    }

    pub(crate) fn pop_loose(&mut self) -> Option<u64> {
        self.dirty.pop_loose()
    }

    pub(crate) fn oldest_live_snapshot(&self) -> u64 {
        self.env.reader_table.oldest_live_snapshot().unwrap_or_else(|| self.txnid.saturating_sub(1))
    }

    /// Frees `pgno`: if it was allocated by this txn, it becomes a loose
    /// page (reusable immediately without a free-DB round trip); otherwise
    /// it is recorded to be saved under this txn's free-DB record at
    /// commit.
    pub fn free_page(&mut self, pgno: u64) -> Result<()> {
        self.dirty.remove(pgno);
        if self.allocated_this_txn.contains(pgno) {
            self.dirty.push_loose(pgno);
        } else {
            self.freed.append_sorted(pgno);
            self.freed.sort_and_dedup();
        }
        Ok(())
    }

    pub fn fixup_cursors(&mut self, old_pgno: u64, new_pgno: u64) {
        fixup_pgno(&mut self.tracked_cursors, old_pgno, new_pgno);
    }

    pub fn register_cursor(&mut self, weak: Weak<RefCell<Vec<Frame>>>) {
        self.tracked_cursors.push(weak);
    }

    /// Writes `value` into a fresh overflow chain, returning `(first_pgno,
    /// page_count)`. Callers are responsible for crediting `page_count` to
    /// whichever `DbRecord.overflow_pages` the value belongs to, since this
    /// plumbing is shared by the main DB, the free-DB, and DupSort
    /// sub-databases.
    pub fn write_overflow(&mut self, value: &[u8]) -> Result<(u64, u64)> {
        let page_size = self.page_size();
        let cap_first = page_size - OverflowHeader::data_offset();
        let cap_rest = page_size - PAGE_HEADER_SIZE;
        let n_pages = if value.len() <= cap_first {
            1
        } else {
            1 + ((value.len() - cap_first + cap_rest - 1) / cap_rest)
        };
        let first = self.alloc_pages(n_pages as u64, page_flags::OVERFLOW)?;
        {
            let mut head = self.get_page_mut(first)?;
            let buf = head.as_bytes_mut();
            OverflowHeader::set_page_count(buf, n_pages as u32);
            OverflowHeader::set_total_len(buf, value.len() as u64);
        }
        let mut written = 0usize;
        for i in 0..n_pages {
            let pgno = first + i as u64;
            let mut view = self.get_page_mut(pgno)?;
            let buf = view.as_bytes_mut();
            let (data_off, cap) = if i == 0 {
                (OverflowHeader::data_offset(), cap_first)
            } else {
                (PAGE_HEADER_SIZE, cap_rest)
            };
            let take = (value.len() - written).min(cap);
            buf[data_off..data_off + take].copy_from_slice(&value[written..written + take]);
            written += take;
        }
        Ok((first, n_pages as u64))
    }

    /// Frees every page in the overflow chain starting at `first_pgno`,
    /// returning the number of pages freed (for the caller to debit from
    /// the owning `DbRecord.overflow_pages`).
    pub fn free_overflow(&mut self, first_pgno: u64) -> Result<u64> {
        let count = {
            let view = self.read_page(first_pgno);
            OverflowHeader::page_count(view.as_bytes())
        };
        for i in 0..count as u64 {
            self.free_page(first_pgno + i)?;
        }
        Ok(count as u64)
    }

    /// Commits the transaction: saves the free list, flushes dirty pages,
    /// fsyncs per the configured durability mode, and writes the new meta
    /// page. This is the sole point at which the transaction becomes
    /// visible to new readers.
    pub fn commit(mut self) -> Result<()> {
        if self.error.is_some() {
            return Err(Error::Conflict(Conflict::BadTxn));
        }

        freedb::save_free_list(&mut self)?;

        let needed_len = self.next_pgno * self.page_size() as u64;
        if needed_len > self.env.mmap.len() as u64 {
            self.env.mmap.grow(needed_len.next_power_of_two())?;
        }

        for (pgno, bytes) in self.dirty.iter_ordered() {
            let offset = pgno * self.page_size() as u64;
            self.env.mmap.pwrite_meta(offset, bytes)?;
        }
        if self.env.durability() != Durability::NoSync {
            self.env.mmap.fsync_data()?;
        }

        let mut meta = Meta::fresh(self.page_size() as u32, self.env.mmap.len() as u64);
        meta.txnid = self.txnid;
        meta.main_db = self.main_db;
        meta.free_db = self.free_db;
        meta.last_pgno = self.next_pgno.saturating_sub(1).max(self.last_pgno_before);
        let sync_meta = self.env.durability() == Durability::Full;
        crate::meta::write(&self.env.mmap, &meta, self.page_size(), sync_meta)?;

        *self.env.current_meta.lock().unwrap() = meta;
        self.env.committed_txnid.store(self.txnid, Ordering::SeqCst);

        log::debug!(
            "txn {} committed: last_pgno={} main_db.entries={}",
            self.txnid,
            meta.last_pgno,
            meta.main_db.entries
        );
        Ok(())
    }

    /// Discards every change made by this transaction. Nothing touched by
    /// the txn was ever written to the meta page, so dropping the
    /// in-memory dirty list and releasing the writer mutex is sufficient.
    pub fn abort(self) {
        log::debug!("txn {} aborted", self.txnid);
    }
}

impl<'env> PageReader for WriteTxn<'env> {
    fn page_size(&self) -> usize {
        self.dirty.page_size()
    }

    fn comparator(&self) -> &dyn Comparator {
        self.comparator.as_ref()
    }

    fn read_page(&self, pgno: u64) -> PageView<'_> {
        if let Some(buf) = self.dirty.get(pgno) {
            PageView::new(buf)
        } else {
            let page_size = self.page_size();
            let off = pgno as usize * page_size;
            PageView::new(&self.env.mmap.as_slice()[off..off + page_size])
        }
    }
}

/// Which database a btree operation targets. Named/dup-promoted sub-DBs
/// are addressed directly by root pgno rather than through this enum; see
/// `btree::dup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Db {
    Main,
    Free,
}

fn clone_error(e: &Error) -> Error {
    match e {
        Error::Io(io) => Error::Io(std::io::Error::new(io.kind(), io.to_string())),
        Error::Corruption(c) => Error::Corruption(*c),
        Error::Panicked => Error::Panicked,
        Error::ResourceExhausted(r) => Error::ResourceExhausted(*r),
        Error::Conflict(c) => Error::Conflict(*c),
        Error::NotFound => Error::NotFound,
        Error::AlreadyExists => Error::AlreadyExists,
        Error::OwnerDead => Error::OwnerDead,
        Error::TooLarge(a, b) => Error::TooLarge(*a, *b),
    }
}
