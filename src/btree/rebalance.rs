//! Branch-underflow collapse after delete.
//!
//! Grounded in the classic root-shrink handling generalized to every
//! level: when a branch is left with a single child, promote that child
//! into the slot the branch itself occupied and free the branch, shrinking
//! that path's depth by one. `btree::delete` applies this at every branch
//! a delete passes back through, not only at the root, so no branch ever
//! persists with fewer than two children — see DESIGN.md for why a single
//! collapse per level is enough and sibling key redistribution is not
//! needed.

use crate::error::Result;
use crate::txn::{PageReader, WriteTxn};

/// If `pgno` is a branch page with exactly one child, frees it and returns
/// its child as the replacement along with `true`. Otherwise returns
/// `pgno` unchanged and `false`.
pub fn collapse_singleton(txn: &mut WriteTxn, pgno: u64) -> Result<(u64, bool)> {
    let view = txn.read_page(pgno);
    if !view.is_branch() || view.num_keys() != 1 {
        return Ok((pgno, false));
    }
    let only_child = view.branch_child_at(0);
    txn.free_page(pgno)?;
    Ok((only_child, true))
}

/// Root-specific alias: `delete_from_root` calls this once more at the top
/// after `delete_recursive` returns, since the root has no parent branch
/// to apply the same collapse on its behalf.
pub fn collapse_root(txn: &mut WriteTxn, pgno: u64) -> Result<(u64, bool)> {
    collapse_singleton(txn, pgno)
}
