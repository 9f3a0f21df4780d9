//! Recursive delete-with-merge.
//!
//! Grounded in the classic `del_key_value` descent: walk down recording
//! the path, remove the node, then repair underfull pages on the way back
//! up. Page underflow here is repaired by freeing an emptied leaf and
//! letting its parent drop the matching entry, then collapsing that parent
//! (or any ancestor branch) into its surviving child whenever the drop
//! leaves it with only one — see `rebalance::collapse_singleton`. This
//! keeps every branch at two or more children without sibling key
//! redistribution, at the cost of sometimes freeing a branch and
//! reattaching its lone child one level up rather than borrowing from a
//! neighbor.

use super::rebalance::{collapse_root, collapse_singleton};
use super::search::{branch_search, leaf_search};
use crate::txn::PageReader;
use crate::consts::node_flags;
use crate::error::Result;
use crate::txn::{Db, WriteTxn};

/// What happened to a child page after a delete descended into it.
enum Outcome {
    /// The child page is still in use, possibly at a new pgno after COW.
    Kept(u64),
    /// The child page became empty and was freed; the parent must drop the
    /// entry that pointed to it.
    Emptied,
}

/// Deletes `key` from the tree rooted at `root`, returning the (possibly
/// new) root pgno, whether the key was found, and the net leaf/branch/
/// overflow page delta the caller should apply to its `DbRecord` (negative
/// or zero).
pub fn delete_from_root(
    txn: &mut WriteTxn,
    root: u64,
    key: &[u8],
) -> Result<(u64, bool, i64, i64, i64)> {
    use crate::consts::P_INVALID;
    if root == P_INVALID {
        return Ok((root, false, 0, 0, 0));
    }

    let (outcome, found, leaf_delta, branch_delta, overflow_delta) = delete_recursive(txn, root, key)?;
    match outcome {
        Outcome::Kept(new_root) => {
            let (final_root, collapsed) = collapse_root(txn, new_root)?;
            Ok((final_root, found, leaf_delta, branch_delta - collapsed as i64, overflow_delta))
        }
        Outcome::Emptied => Ok((P_INVALID, found, leaf_delta, branch_delta, overflow_delta)),
    }
}

fn delete_recursive(
    txn: &mut WriteTxn,
    pgno: u64,
    key: &[u8],
) -> Result<(Outcome, bool, i64, i64, i64)> {
    let pgno = txn.touch(pgno)?;
    let is_branch = txn.read_page(pgno).is_branch();

    if is_branch {
        let idx = branch_search(&txn.read_page(pgno), key, txn.comparator());
        let child = txn.read_page(pgno).branch_child_at(idx);
        let (child_outcome, found, leaf_delta, branch_delta, overflow_delta) = delete_recursive(txn, child, key)?;
        match child_outcome {
            Outcome::Kept(new_child) => {
                txn.get_page_mut(pgno)?.set_branch_child(idx, new_child);
                Ok((Outcome::Kept(pgno), found, leaf_delta, branch_delta, overflow_delta))
            }
            Outcome::Emptied => {
                let num_keys = txn.read_page(pgno).num_keys();
                if num_keys <= 1 {
                    // This branch's only child vanished; it is now empty too.
                    txn.free_page(pgno)?;
                    Ok((Outcome::Emptied, found, leaf_delta, branch_delta - 1, overflow_delta))
                } else {
                    let drop_idx = if idx == 0 {
                        // Index 0 holds the -infinity separator; promote
                        // index 1's child into its slot and drop index 1.
                        let promoted = txn.read_page(pgno).branch_child_at(1);
                        txn.get_page_mut(pgno)?.set_branch_child(0, promoted);
                        1
                    } else {
                        idx
                    };
                    txn.get_page_mut(pgno)?.delete_node(drop_idx);
                    let mut branch_delta = branch_delta - 1;
                    let (kept_pgno, collapsed) = collapse_singleton(txn, pgno)?;
                    if collapsed {
                        branch_delta -= 1;
                    }
                    Ok((Outcome::Kept(kept_pgno), found, leaf_delta, branch_delta, overflow_delta))
                }
            }
        }
    } else {
        let (found, idx) = leaf_search(&txn.read_page(pgno), key, txn.comparator());
        if !found {
            return Ok((Outcome::Kept(pgno), false, 0, 0, 0));
        }
        let hdr = txn.read_page(pgno).node_header_at(idx);
        let mut overflow_delta = 0i64;
        if hdr.leaf_flags() & node_flags::BIGDATA != 0 {
            let data = txn.read_page(pgno).leaf_data_at(idx).to_vec();
            let first = u64::from_ne_bytes(data[0..8].try_into().unwrap());
            overflow_delta -= txn.free_overflow(first)? as i64;
        }
        txn.get_page_mut(pgno)?.delete_node(idx);
        if txn.read_page(pgno).num_keys() == 0 {
            txn.free_page(pgno)?;
            Ok((Outcome::Emptied, true, -1, 0, overflow_delta))
        } else {
            Ok((Outcome::Kept(pgno), true, 0, 0, overflow_delta))
        }
    }
}

/// Deletes `key` from `db`, updating entry/page counters on its `DbRecord`.
/// Returns whether the key was present.
pub fn delete(txn: &mut WriteTxn, db: Db, key: &[u8]) -> Result<bool> {
    let root = txn.db_record(db).root;
    let (new_root, found, leaf_delta, branch_delta, overflow_delta) = delete_from_root(txn, root, key)?;

    let rec = txn.db_record_mut(db);
    rec.root = new_root;
    if found {
        rec.entries = rec.entries.saturating_sub(1);
    }
    rec.leaf_pages = (rec.leaf_pages as i64 + leaf_delta).max(0) as u64;
    rec.branch_pages = (rec.branch_pages as i64 + branch_delta).max(0) as u64;
    rec.overflow_pages = (rec.overflow_pages as i64 + overflow_delta).max(0) as u64;
    if rec.entries == 0 {
        rec.depth = 0;
        rec.root = crate::consts::P_INVALID;
    }
    Ok(found)
}
