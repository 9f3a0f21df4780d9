//! B+tree operations: point lookup, insert-with-split, delete-with-merge,
//! and duplicate-value (DupSort) handling, all built on the page codec in
//! `crate::page` and the copy-on-write touch in `crate::cow`.
//!
//! Every operation here is parameterized over a root pgno rather than
//! hard-wired to the main database, the way a `binary_tree_get`-style
//! lookup can be parameterized over `Db { root }`: this lets the main DB,
//! the free-DB, and a DupSort sub-database all share one
//! insert/delete/search core.

pub mod delete;
pub mod dup;
pub mod insert;
pub mod rebalance;
pub mod search;

use crate::error::Result;
use crate::txn::PageReader;

/// Flags controlling how `insert_into_root` treats an existing key.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutFlags {
    /// Fail with `Error::AlreadyExists` instead of overwriting.
    pub no_overwrite: bool,
    /// Hint that `key` sorts after every existing key (skips a full
    /// descent in favor of appending at the tail); current implementation
    /// accepts the hint but still validates by descending rather than
    /// trusting a caller-supplied ordering.
    pub append: bool,
}

/// Looks up `key` starting from `root`. For a DupSort key this returns the
/// lowest of its duplicate values; see `dup::get_all` for the full set.
pub fn get<R: PageReader>(reader: &R, root: u64, key: &[u8]) -> Result<Option<Vec<u8>>> {
    use crate::consts::{node_flags, P_INVALID};
    use search::{branch_search, leaf_search};

    if root == P_INVALID {
        return Ok(None);
    }
    let mut pgno = root;
    loop {
        let view = reader.read_page(pgno);
        view.validate()?;
        if view.is_branch() {
            let idx = branch_search(&view, key, reader.comparator());
            pgno = view.branch_child_at(idx);
            continue;
        }
        let (found, idx) = leaf_search(&view, key, reader.comparator());
        if !found {
            return Ok(None);
        }
        let hdr = view.node_header_at(idx);
        let flags = hdr.leaf_flags();
        let data = view.leaf_data_at(idx);
        if flags & node_flags::DUPDATA != 0 {
            return dup::first_value(reader, flags, data);
        }
        return Ok(Some(reader.value_bytes(flags, data)));
    }
}
