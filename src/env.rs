//! Top-level environment: open configuration and the handle shared by all
//! transactions.
//!
//! Grounded in an `Env::new(path, log_length)` constructor, generalized
//! into a builder the way `seemantr-rdb::db::Settings` and the ZeroDB
//! `EnvBuilder` structure their open-time options
//! (timeout/no_grow_sync/read_only/mmap_flags/initial_mmap_size;
//! durability mode; max readers; comparator).

use crate::cmp::{Comparator, Lexicographic};
use crate::consts::*;
use crate::error::{Conflict, Error, Result};
use crate::meta::{self, Meta};
use crate::mmap::{Mmap, Paths};
use crate::reader::ReaderTable;
use crate::txn::{ReadTxn, WriteTxn};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

/// Builder for opening an [`Env`]. Mirrors the original `Env::new`
/// parameters, expanded with the knobs a complete embedding needs.
pub struct OpenOptions {
    page_size: Option<usize>,
    map_size: u64,
    max_readers: usize,
    durability: Durability,
    no_subdir: bool,
    read_only: bool,
    comparator: Arc<dyn Comparator>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            page_size: None,
            map_size: 10 * 1024 * 1024,
            max_readers: 126,
            durability: Durability::default(),
            no_subdir: false,
            read_only: false,
            comparator: Arc::new(Lexicographic),
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page size in bytes; must be a power of two in
    /// `[MIN_PAGE_SIZE, MAX_PAGE_SIZE]`. Defaults to the OS page size.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn map_size(mut self, bytes: u64) -> Self {
        self.map_size = bytes;
        self
    }

    pub fn max_readers(mut self, n: usize) -> Self {
        self.max_readers = n;
        self
    }

    pub fn durability(mut self, mode: Durability) -> Self {
        self.durability = mode;
        self
    }

    pub fn no_subdir(mut self, yes: bool) -> Self {
        self.no_subdir = yes;
        self
    }

    pub fn read_only(mut self, yes: bool) -> Self {
        self.read_only = yes;
        self
    }

    pub fn comparator(mut self, cmp: Arc<dyn Comparator>) -> Self {
        self.comparator = cmp;
        self
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Env> {
        let root = path.as_ref().to_path_buf();
        let page_size = self.page_size.unwrap_or_else(os_page_size);
        if !is_valid_page_size(page_size) {
            return Err(Error::Corruption(crate::error::Corruption::InvalidPageHeader));
        }

        let paths = Paths::resolve(&root, self.no_subdir);
        let initial_len = (page_size as u64 * 2).max(self.map_size);
        let mmap = Mmap::open(&paths, initial_len, self.read_only)?;

        let meta = meta::read_current(&mmap, page_size)?;
        let page_size = meta.page_size as usize;

        let committed_txnid = AtomicU64::new(meta.txnid);
        let env = Env {
            root,
            page_size,
            durability: self.durability,
            max_readers: self.max_readers,
            comparator: self.comparator,
            mmap,
            reader_table: ReaderTable::new(self.max_readers),
            committed_txnid,
            current_meta: Mutex::new(meta),
            writer: Mutex::new(()),
        };
        Ok(env)
    }
}

fn os_page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 {
        4096
    } else {
        (sz as usize).next_power_of_two().clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
    }
}

/// A shared, opened database. `Send + Sync`: all interior mutability is
/// guarded by `reader_table`'s mutex or `writer`, the same reasoning that
/// justifies `unsafe impl Send/Sync` over `RefCell`-based maps when access
/// is disciplined by locks rather than by the type system.
pub struct Env {
    root: PathBuf,
    page_size: usize,
    durability: Durability,
    max_readers: usize,
    comparator: Arc<dyn Comparator>,
    pub(crate) mmap: Mmap,
    pub(crate) reader_table: ReaderTable,
    pub(crate) committed_txnid: AtomicU64,
    pub(crate) current_meta: Mutex<Meta>,
    pub(crate) writer: Mutex<()>,
}

impl Env {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Env> {
        OpenOptions::new().open(path)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn max_readers(&self) -> usize {
        self.max_readers
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    pub fn comparator(&self) -> Arc<dyn Comparator> {
        self.comparator.clone()
    }

    /// Begins a read-only snapshot transaction.
    pub fn begin_read(&self) -> Result<ReadTxn<'_>> {
        ReadTxn::begin(self)
    }

    /// Begins the single write transaction. Blocks (via the writer mutex)
    /// until any other write transaction has committed or aborted.
    pub fn begin_write(&self) -> Result<WriteTxn<'_>> {
        WriteTxn::begin(self)
    }

    /// Non-blocking variant: returns `Conflict::WriterAlreadyActive`
    /// instead of blocking if another writer is active.
    pub fn try_begin_write(&self) -> Result<WriteTxn<'_>> {
        match self.writer.try_lock() {
            Ok(guard) => WriteTxn::begin_with_guard(self, guard),
            Err(_) => Err(Error::Conflict(Conflict::WriterAlreadyActive)),
        }
    }

    pub fn stat(&self) -> Result<crate::stat::Stat> {
        let txn = self.begin_read()?;
        Ok(txn.stat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_fresh_database() {
        let dir = tempdir().unwrap();
        let env = Env::open(dir.path()).unwrap();
        assert!(env.page_size() >= MIN_PAGE_SIZE);
    }

    #[test]
    fn page_size_override_is_honored() {
        let dir = tempdir().unwrap();
        let env = OpenOptions::new().page_size(4096).open(dir.path()).unwrap();
        assert_eq!(env.page_size(), 4096);
    }
}
