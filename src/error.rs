use std::fmt;
use std::io;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while opening, reading, or writing a
/// [`crate::Env`].
///
/// Variants map onto the behavioral taxonomy of the commit/read protocol
/// rather than onto implementation details: callers should match on these
/// to decide whether a transaction can be retried, must be aborted, or the
/// whole environment must be reopened.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Underlying I/O failure (open, read, write, fsync, mmap).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The data or lock file failed a structural sanity check: bad magic,
    /// unsupported format version, or a page whose header claims a kind
    /// that disagrees with how it is being used.
    #[error("corrupt database: {0}")]
    Corruption(Corruption),

    /// An environment that hit [`Error::Corruption`] or an I/O failure
    /// during a meta write is latched into a permanently unusable state;
    /// every subsequent operation on it returns this until it is reopened.
    #[error("environment is in a fatal error state and must be reopened")]
    Panicked,

    /// A resource with a fixed, configured capacity has been exhausted.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(Resource),

    /// A concurrency invariant was violated by caller misuse rather than by
    /// data corruption.
    #[error("concurrency conflict: {0}")]
    Conflict(Conflict),

    /// The requested key (or named database) does not exist.
    #[error("key not found")]
    NotFound,

    /// Insertion refused because the key already exists and the caller
    /// asked for an exclusive insert.
    #[error("key already exists")]
    AlreadyExists,

    /// A lock holder (writer mutex or reader-table mutex) died while
    /// holding the lock. The successor has recovered the protected state
    /// and marked the mutex consistent; if the dead holder was a writer the
    /// environment is additionally marked [`Error::Panicked`], since its
    /// in-progress dirty list and free list cannot be trusted.
    #[error("lock owner died; state recovered, but environment may require inspection")]
    OwnerDead,

    /// A key or value exceeded the configured size limit.
    #[error("key or value too large: {0} bytes (limit {1})")]
    TooLarge(usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    BadMagic,
    UnsupportedVersion,
    PageKindMismatch,
    InvalidPageHeader,
    NonLeafSearch,
    BadFreeList,
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Corruption::BadMagic => "bad magic number",
            Corruption::UnsupportedVersion => "unsupported format version",
            Corruption::PageKindMismatch => "page kind does not match expected use",
            Corruption::InvalidPageHeader => "invalid page header (lower/upper out of range)",
            Corruption::NonLeafSearch => "attempted leaf search on a non-leaf page",
            Corruption::BadFreeList => "free list decode failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    MapFull,
    DirtyListFull,
    ReadersFull,
    CursorStackOverflow,
    DbsFull,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resource::MapFull => "memory map is full",
            Resource::DirtyListFull => "dirty page list is full",
            Resource::ReadersFull => "reader table is full",
            Resource::CursorStackOverflow => "cursor stack depth exceeded",
            Resource::DbsFull => "named database handle table is full",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    BadReaderSlot,
    BadTxn,
    BadDbi,
    WriterAlreadyActive,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Conflict::BadReaderSlot => "reader slot was reused by another transaction",
            Conflict::BadTxn => "transaction used after error or after spawning a child",
            Conflict::BadDbi => "database handle invalidated by a conflicting reopen",
            Conflict::WriterAlreadyActive => "a write transaction is already active",
        };
        f.write_str(s)
    }
}
