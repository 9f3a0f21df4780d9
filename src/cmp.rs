//! Key comparators. The on-disk format stores no comparator identifier
//! alongside a DB record: whoever opens a database must supply one
//! compatible with the order already on disk, or invariant 4 (sorted
//! offsets) is silently violated.

use std::cmp::Ordering;

/// A total order over keys. Implementations must be deterministic: the
/// same two byte strings must always compare the same way, for the
/// lifetime of the database, or the B+tree's sortedness invariant breaks.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Plain byte-lexicographic order. The default for every new database.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lexicographic;

impl Comparator for Lexicographic {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Treats keys as fixed-width native-endian unsigned integers and compares
/// numerically. Keys of differing length fall back to lexicographic order
/// (this should not happen in a well-formed database using this
/// comparator, since all keys share one integer width).
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEndianInt;

impl Comparator for NativeEndianInt {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        if a.len() != b.len() {
            return a.cmp(b);
        }
        match a.len() {
            4 => {
                let x = u32::from_ne_bytes(a.try_into().unwrap());
                let y = u32::from_ne_bytes(b.try_into().unwrap());
                x.cmp(&y)
            }
            8 => {
                let x = u64::from_ne_bytes(a.try_into().unwrap());
                let y = u64::from_ne_bytes(b.try_into().unwrap());
                x.cmp(&y)
            }
            _ => a.cmp(b),
        }
    }
}

/// Lexicographic order on the reversed byte sequence. Useful for keys that
/// should sort by suffix (e.g. reverse-domain-name style keys).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseBytes;

impl Comparator for ReverseBytes {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.iter().rev().cmp(b.iter().rev())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_endian_int_orders_numerically() {
        let c = NativeEndianInt;
        let a = 1u64.to_ne_bytes();
        let b = 2u64.to_ne_bytes();
        assert_eq!(c.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn reverse_bytes_orders_by_suffix() {
        let c = ReverseBytes;
        assert_eq!(c.compare(b"xa", b"ya"), Ordering::Less);
        assert_eq!(c.compare(b"ax", b"ay"), Ordering::Less);
    }
}
