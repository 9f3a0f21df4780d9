//! Cursor mechanics: a stack of `(page, index)` positions, positioning
//! operations, and the tracked-cursor bookkeeping a write transaction
//! needs to fix cursors up after a split, merge, or copy-on-write touch
//! changes which pgno holds a page a cursor was pointing at.
//!
//! No single source file implements cursors this way (the original
//! insert/delete routines walk pages recursively rather than through an
//! explicit position stack); this is built from the stack-of-(page,index)
//! shape cross-checked against the btree cursor implementations in
//! `other_examples/` (rbolt, the mdbx dupfixed iterator).

use crate::btree::search;
use crate::cmp::Comparator;
use crate::error::{Conflict, Error, Result};
use crate::page::PageView;
use crate::txn::PageReader;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// One level of a cursor's descent: the page it is on and the index of
/// the entry it is positioned at.
pub type Frame = (u64, usize);

/// Shared, mutable position stack. Held by `Cursor` and, for write-txn
/// cursors, also referenced weakly by the owning transaction so a
/// mutation can patch every live cursor's stack in place.
pub type CursorStack = Rc<RefCell<Vec<Frame>>>;

/// A cursor over one database's B+tree (the main DB, a named sub-DB, or
/// the free-DB).
pub struct Cursor<'txn, R: PageReader> {
    reader: &'txn R,
    root: u64,
    stack: CursorStack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position<'a> {
    Key(&'a [u8]),
}

impl<'txn, R: PageReader> Cursor<'txn, R> {
    pub fn new(reader: &'txn R, root: u64) -> Self {
        Cursor { reader, root, stack: Rc::new(RefCell::new(Vec::new())) }
    }

    /// Returns a weak handle a write transaction can register for
    /// post-mutation fixups.
    pub fn tracking_handle(&self) -> Weak<RefCell<Vec<Frame>>> {
        Rc::downgrade(&self.stack)
    }

    fn descend_to(&self, target: Descend) -> Result<bool> {
        let mut stack = self.stack.borrow_mut();
        stack.clear();
        if self.root == crate::consts::P_INVALID {
            return Ok(false);
        }
        let mut pgno = self.root;
        loop {
            let view = self.reader.read_page(pgno);
            view.validate()?;
            if view.is_branch() {
                let idx = match target {
                    Descend::First => 0,
                    Descend::Last => view.num_keys() - 1,
                    Descend::Key(k) => search::branch_search(&view, k, self.reader.comparator()),
                };
                stack.push((pgno, idx));
                pgno = view.branch_child_at(idx);
            } else {
                let n = view.num_keys();
                if n == 0 {
                    stack.push((pgno, 0));
                    return Ok(false);
                }
                let idx = match target {
                    Descend::First => 0,
                    Descend::Last => n - 1,
                    Descend::Key(k) => {
                        let (found, idx) = search::leaf_search(&view, k, self.reader.comparator());
                        if !found {
                            stack.push((pgno, idx));
                            return Ok(false);
                        }
                        idx
                    }
                };
                stack.push((pgno, idx));
                return Ok(true);
            }
        }
    }

    pub fn first(&self) -> Result<bool> {
        self.descend_to(Descend::First)
    }

    pub fn last(&self) -> Result<bool> {
        self.descend_to(Descend::Last)
    }

    pub fn set(&self, key: &[u8]) -> Result<bool> {
        self.descend_to(Descend::Key(key))
    }

    /// Positions at the least key >= `key`.
    pub fn set_range(&self, key: &[u8]) -> Result<bool> {
        let exact = self.descend_to(Descend::Key(key))?;
        if exact {
            return Ok(true);
        }
        // `descend_to` already left the stack at the insertion point; that
        // insertion point IS the least-key->= position unless it ran off
        // the end of the leaf, handled by `next`'s sibling climb.
        Ok(self.current().is_some())
    }

    pub fn current(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        let stack = self.stack.borrow();
        let &(pgno, idx) = stack.last()?;
        let view = self.reader.read_page(pgno);
        if idx >= view.num_keys() {
            return None;
        }
        Some((view.key_at(idx).to_vec(), view.leaf_data_at(idx).to_vec()))
    }

    pub fn next(&self) -> Result<bool> {
        let mut stack = self.stack.borrow_mut();
        if stack.is_empty() {
            drop(stack);
            return self.first();
        }
        let (pgno, idx) = *stack.last().unwrap();
        let view = self.reader.read_page(pgno);
        if idx + 1 < view.num_keys() {
            stack.last_mut().unwrap().1 = idx + 1;
            return Ok(true);
        }
        drop(stack);
        self.sibling(Direction::Right)
    }

    pub fn prev(&self) -> Result<bool> {
        let mut stack = self.stack.borrow_mut();
        if stack.is_empty() {
            drop(stack);
            return self.last();
        }
        let (_, idx) = *stack.last().unwrap();
        if idx > 0 {
            stack.last_mut().unwrap().1 = idx - 1;
            return Ok(true);
        }
        drop(stack);
        self.sibling(Direction::Left)
    }

    /// Pops the stack until a parent has a sibling in `dir`, advances into
    /// it, then redescends to the first/last leaf under that sibling.
    fn sibling(&self, dir: Direction) -> Result<bool> {
        let mut stack = self.stack.borrow_mut();
        stack.pop();
        while let Some(&(pgno, idx)) = stack.last() {
            let view = self.reader.read_page(pgno);
            let n = view.num_keys();
            let next_idx = match dir {
                Direction::Right => idx + 1,
                Direction::Left => {
                    if idx == 0 {
                        stack.pop();
                        continue;
                    }
                    idx - 1
                }
            };
            if dir == Direction::Right && next_idx >= n {
                stack.pop();
                continue;
            }
            stack.last_mut().unwrap().1 = next_idx;
            let mut pgno = view.branch_child_at(next_idx);
            drop(stack);
            let mut stack = self.stack.borrow_mut();
            loop {
                let v = self.reader.read_page(pgno);
                if v.is_branch() {
                    let idx = match dir {
                        Direction::Right => 0,
                        Direction::Left => v.num_keys() - 1,
                    };
                    stack.push((pgno, idx));
                    pgno = v.branch_child_at(idx);
                } else {
                    let idx = match dir {
                        Direction::Right => 0,
                        Direction::Left => v.num_keys().saturating_sub(1),
                    };
                    stack.push((pgno, idx));
                    return Ok(v.num_keys() > 0);
                }
            }
        }
        Ok(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Left,
    Right,
}

#[derive(Clone, Copy)]
enum Descend<'a> {
    First,
    Last,
    Key(&'a [u8]),
}

/// Patches every tracked cursor stack that references `old_pgno`,
/// replacing it with `new_pgno`. Called after a copy-on-write touch
/// reallocates a page's identity. Dead (dropped) cursor handles are
/// pruned opportunistically.
pub fn fixup_pgno(tracked: &mut Vec<Weak<RefCell<Vec<Frame>>>>, old_pgno: u64, new_pgno: u64) {
    tracked.retain(|w| w.strong_count() > 0);
    for w in tracked.iter() {
        if let Some(stack) = w.upgrade() {
            for frame in stack.borrow_mut().iter_mut() {
                if frame.0 == old_pgno {
                    frame.0 = new_pgno;
                }
            }
        }
    }
}

/// Returns `true` if any tracked cursor currently references `pgno`; used
/// by the spiller to decide whether a dirty page must be kept in memory
/// (`P_KEEP`) rather than flushed early.
pub fn is_referenced(tracked: &[Weak<RefCell<Vec<Frame>>>], pgno: u64) -> bool {
    tracked.iter().filter_map(|w| w.upgrade()).any(|s| s.borrow().iter().any(|f| f.0 == pgno))
}

pub fn require_live<T>(opt: Option<T>) -> Result<T> {
    opt.ok_or(Error::Conflict(Conflict::BadTxn))
}
