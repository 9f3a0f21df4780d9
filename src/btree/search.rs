//! Binary search within a single page, shared by cursors and the
//! insert/delete descent.

use crate::cmp::Comparator;
use crate::page::PageView;
use std::cmp::Ordering;

/// Searches a leaf page for `key`. Returns `(true, index)` on an exact
/// match, `(false, index)` where `index` is the position `key` would be
/// inserted at to keep the page sorted.
pub fn leaf_search(view: &PageView, key: &[u8], cmp: &dyn Comparator) -> (bool, usize) {
    let mut lo = 0usize;
    let mut hi = view.num_keys();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match cmp.compare(view.key_at(mid), key) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return (true, mid),
        }
    }
    (false, lo)
}

/// Searches a branch page for the child to descend into to find `key`.
/// Index 0 holds an implicit -infinity separator (its stored key is never
/// compared), so the search space for real comparisons starts at index 1;
/// the result is the largest index `i` such that `key_at(i) <= key`, or 0
/// if none (meaning: descend via the -infinity child).
pub fn branch_search(view: &PageView, key: &[u8], cmp: &dyn Comparator) -> usize {
    let n = view.num_keys();
    if n <= 1 {
        return 0;
    }
    let mut lo = 1usize;
    let mut hi = n;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp.compare(view.key_at(mid), key) == Ordering::Greater {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmp::Lexicographic;
    use crate::page::PageViewMut;

    #[test]
    fn leaf_search_finds_exact_and_insertion_point() {
        let mut buf = vec![0u8; 512];
        let mut page = PageViewMut::new(&mut buf);
        page.init(1, crate::consts::page_flags::LEAF, 512);
        page.insert_leaf(0, b"b", b"1", 0).unwrap();
        page.insert_leaf(1, b"d", b"2", 0).unwrap();
        let view = PageView::new(&buf);
        let cmp = Lexicographic;
        assert_eq!(leaf_search(&view, b"b", &cmp), (true, 0));
        assert_eq!(leaf_search(&view, b"c", &cmp), (false, 1));
        assert_eq!(leaf_search(&view, b"z", &cmp), (false, 2));
    }

    #[test]
    fn branch_search_skips_implicit_separator() {
        let mut buf = vec![0u8; 512];
        let mut page = PageViewMut::new(&mut buf);
        page.init(1, crate::consts::page_flags::BRANCH, 512);
        page.insert_branch(0, b"", 10).unwrap();
        page.insert_branch(1, b"m", 20).unwrap();
        page.insert_branch(2, b"t", 30).unwrap();
        let view = PageView::new(&buf);
        let cmp = Lexicographic;
        assert_eq!(branch_search(&view, b"a", &cmp), 0);
        assert_eq!(branch_search(&view, b"n", &cmp), 1);
        assert_eq!(branch_search(&view, b"z", &cmp), 2);
    }
}
