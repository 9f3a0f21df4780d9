//! An embedded, transactional, ordered key-value store built on a
//! memory-mapped, copy-on-write B+tree, in the lineage of LMDB: readers
//! never block (each pins a snapshot of the meta page and walks pages that
//! a concurrent writer can never overwrite in place), and the single
//! writer commits by atomically swapping one of two alternating meta
//! pages.
//!
//! ```no_run
//! let env = kirjasto::Env::open("/tmp/my-db").unwrap();
//! {
//!     let mut txn = env.begin_write().unwrap();
//!     txn.put(b"key", b"value").unwrap();
//!     txn.commit().unwrap();
//! }
//! let txn = env.begin_read().unwrap();
//! assert_eq!(txn.get(b"key").unwrap(), Some(b"value".to_vec()));
//! ```

mod alloc;
mod btree;
mod cmp;
mod consts;
mod cow;
mod cursor;
mod env;
mod error;
mod freedb;
mod idlist;
mod meta;
mod mmap;
mod page;
mod reader;
mod stat;
mod txn;

pub use cmp::{Comparator, Lexicographic, NativeEndianInt};
pub use consts::Durability;
pub use cursor::Cursor;
pub use env::{Env, OpenOptions};
pub use error::{Conflict, Corruption, Error, Resource, Result};
pub use meta::DbRecord;
pub use stat::Stat;
pub use txn::{PageReader, ReadTxn, WriteTxn};
