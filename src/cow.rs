//! Copy-on-write page touch: the operation that guarantees a page is
//! uniquely owned by the current write transaction before it is mutated.
//!
//! Grounded in the classic `Cow` enum / `into_mut_page` pattern: touching a
//! page is the dispatch point between "already a `MutPage`, use in place"
//! and "a `Page`, copy into a fresh `MutPage`". This module generalizes
//! that dispatch to three cases: already dirty, spilled-and-pulled-back,
//! and brand new.

use crate::alloc::new_page_buffer;
use crate::error::Result;
use crate::page::{align2, PageView};
use crate::txn::{PageReader, WriteTxn};

/// Ensures `pgno` is dirty and owned exclusively by `txn`, returning the
/// pgno that now identifies it (unchanged if it was already dirty or
/// spilled-and-pulled-back; a freshly allocated pgno otherwise).
pub fn touch(txn: &mut WriteTxn, pgno: u64) -> Result<u64> {
    if txn.is_dirty(pgno) {
        return Ok(pgno);
    }
    if txn.is_spilled(pgno) {
        txn.pull_back_spilled(pgno)?;
        return Ok(pgno);
    }

    let page_size = txn.page_size();
    let old_bytes = txn.read_page(pgno).as_bytes().to_vec();
    let new_pgno = txn.alloc_pgno(1)?;
    let mut buf = new_page_buffer(page_size, new_pgno, 0);
    // Rounding `upper` toward alignment is a no-op here since pages are
    // always built 2-byte aligned already; copy the old contents wholesale
    // and only the pgno field changes identity.
    buf.copy_from_slice(&old_bytes);
    {
        let mut view = crate::page::PageViewMut::new(&mut buf);
        view.set_pgno(new_pgno);
    }
    debug_assert_eq!(align2(buf.len()), buf.len());
    let _ = PageView::new(&buf); // sanity: decodes without panicking
    txn.insert_dirty(new_pgno, buf)?;
    txn.free_page(pgno)?;
    txn.fixup_cursors(pgno, new_pgno);
    log::trace!("cow: touched page {} -> {}", pgno, new_pgno);
    Ok(new_pgno)
}
