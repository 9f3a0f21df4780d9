//! Free-page reclamation: the free-DB is an ordinary B+tree (rooted at
//! `DbRecord` slot `FREE_DB`) keyed by an 8-byte txnid, whose leaf value is
//! the list of pages that txn's writer freed. A page freed by txn N cannot
//! be reused until every reader that might still see the pre-N tree has
//! gone away, i.e. until N is older than every live snapshot.
//!
//! Grounded in the usual free-list bookkeeping done at commit time (save
//! the freed-page list, keyed by txn) and LMDB's `mdb_page_alloc`: try the
//! in-memory reclaimed set first, then pull in more free-DB records up to
//! a scan budget, then grow the file.

use crate::consts::ALLOC_SCAN_BUDGET_PER_PAGE;
use crate::error::Result;
use crate::txn::{Db, WriteTxn};

fn encode_id_list(ids: &[u64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + ids.len() * 8);
    buf.extend_from_slice(&(ids.len() as u32).to_ne_bytes());
    for id in ids {
        buf.extend_from_slice(&id.to_ne_bytes());
    }
    buf
}

fn decode_id_list(buf: &[u8]) -> Vec<u64> {
    if buf.len() < 4 {
        return Vec::new();
    }
    let count = u32::from_ne_bytes(buf[0..4].try_into().unwrap()) as usize;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let off = 4 + i * 8;
        out.push(u64::from_ne_bytes(buf[off..off + 8].try_into().unwrap()));
    }
    out
}

fn txnid_key(txnid: u64) -> [u8; 8] {
    txnid.to_ne_bytes()
}

/// Allocates `n` contiguous fresh pgnos, preferring (in order): loose pages
/// from this txn (n == 1 only), a contiguous run already sitting in the
/// in-memory reclaim set, pages pulled in from older free-DB records, and
/// finally growing the file's tail.
pub fn allocate(txn: &mut WriteTxn, n: u64) -> Result<u64> {
    if n == 1 {
        if let Some(pgno) = txn.pop_loose() {
            return Ok(pgno);
        }
    }
    if let Some(first) = txn.reclaim_list_mut().pop_contiguous_run(n) {
        return Ok(first);
    }

    pull_free_records(txn, n)?;
    if let Some(first) = txn.reclaim_list_mut().pop_contiguous_run(n) {
        return Ok(first);
    }

    txn.grow_tail(n)
}

/// Scans forward from the last consumed free-DB txnid, merging any record
/// older than the oldest live snapshot into the in-memory reclaim set and
/// deleting it from the free-DB, up to `ALLOC_SCAN_BUDGET_PER_PAGE * n`
/// txnids probed.
fn pull_free_records(txn: &mut WriteTxn, n: u64) -> Result<()> {
    let oldest_live = txn.oldest_live_snapshot();
    let budget = ALLOC_SCAN_BUDGET_PER_PAGE as u64 * n.max(1);
    let mut probed = 0u64;
    let mut cursor = txn.last_consumed_txnid();

    while probed < budget && cursor < oldest_live {
        cursor += 1;
        probed += 1;
        let key = txnid_key(cursor);
        let free_root = txn.db_record(Db::Free).root;
        if let Some(data) = crate::btree::get(&*txn, free_root, &key)? {
            let ids = decode_id_list(&data);
            let merged = crate::idlist::IdList::from(ids);
            txn.reclaim_list_mut().merge(&merged);
            crate::btree::delete::delete(txn, Db::Free, &key)?;
        }
        txn.set_last_consumed_txnid(cursor);
    }
    Ok(())
}

/// Saves this txn's freed-page list as a new free-DB record keyed by its
/// own txnid, and re-saves any leftover reclaimed pages `pull_free_records`
/// pulled in but this txn's allocations never consumed.
///
/// `pull_free_records` deletes a free-DB record as soon as it merges it
/// into the in-memory reclaim set; a page that lands in `reclaim` but is
/// never popped by an allocation before commit would otherwise vanish from
/// both the tree and the free-DB. Re-saving it under the last txnid this
/// txn consumed keeps it discoverable by a future scan (which always
/// starts past that point for this txn, but for a fresh write txn starts
/// from scratch at txnid 1 and reaches it like any other record).
///
/// Called once at the start of `commit()`, before the dirty pages are
/// flushed, so the records themselves land in the same commit. Writing a
/// record can itself allocate a page from the loose pool, which never adds
/// back to `freed`/`reclaim`, so this converges in one or two passes; the
/// loop keeps going only as long as a pass still has something to save.
pub fn save_free_list(txn: &mut WriteTxn) -> Result<()> {
    loop {
        let freed_ids = txn.take_freed_list();
        let reclaim_ids = txn.take_reclaim_list();
        if freed_ids.is_empty() && reclaim_ids.is_empty() {
            return Ok(());
        }

        if !freed_ids.is_empty() {
            let key = txnid_key(txn.txnid());
            let encoded = encode_id_list(&freed_ids);
            crate::btree::insert::put(txn, Db::Free, &key, &encoded, crate::btree::PutFlags::default())?;
        }

        if !reclaim_ids.is_empty() {
            let key = txnid_key(txn.last_consumed_txnid().max(1));
            let encoded = encode_id_list(&reclaim_ids);
            crate::btree::insert::put(txn, Db::Free, &key, &encoded, crate::btree::PutFlags::default())?;
        }
    }
}
