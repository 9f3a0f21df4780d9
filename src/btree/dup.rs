//! Duplicate-value (`DupSort`) keys.
//!
//! Small duplicate sets are kept inline in the main tree's leaf node as a
//! sorted, length-prefixed concatenation (flag `DUPDATA`). Once a key's
//! duplicate set outgrows `INLINE_DUP_BUDGET`, it is promoted to a nested
//! sub-database: the leaf's data becomes an encoded `DbRecord` (flags
//! `DUPDATA|SUBDB`) whose root is its own B+tree, keyed by the duplicate
//! values themselves (empty payload). Promotion reuses the same
//! `insert_into_root`/`delete_from_root`/`get` core the main DB and the
//! free-DB use, which is the reason those were written generic over a root
//! pgno rather than specific to one `Db` variant.
//!
//! Grounded in the common observation that a nested sub-database is just
//! another tree whose root lives where a value would otherwise sit.

use super::insert::insert_into_root;
use super::delete::delete_from_root;
use super::search::{branch_search, leaf_search};
use crate::consts::{node_flags, P_INVALID};
use crate::error::Result;
use crate::meta::DbRecord;
use crate::txn::{PageReader, WriteTxn};

/// Above this many encoded bytes, an inline duplicate set is promoted to a
/// sub-database rather than grown further in place.
const INLINE_DUP_BUDGET: usize = 512;

fn encode_inline(values: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        out.extend_from_slice(&(v.len() as u32).to_ne_bytes());
        out.extend_from_slice(v);
    }
    out
}

fn decode_inline(buf: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 4 <= buf.len() {
        let len = u32::from_ne_bytes(buf[i..i + 4].try_into().unwrap()) as usize;
        i += 4;
        out.push(buf[i..i + len].to_vec());
        i += len;
    }
    out
}

fn decode_record(buf: &[u8]) -> DbRecord {
    DbRecord::decode(buf)
}

fn encode_record(rec: &DbRecord) -> Vec<u8> {
    let mut buf = vec![0u8; DbRecord::ENCODED_SIZE];
    rec.encode(&mut buf);
    buf
}

/// Returns the lowest duplicate value stored under a `DUPDATA` leaf entry.
pub fn first_value<R: PageReader>(reader: &R, flags: u16, data: &[u8]) -> Result<Option<Vec<u8>>> {
    if flags & node_flags::SUBDB != 0 {
        let rec = decode_record(data);
        Ok(min_key(reader, rec.root))
    } else {
        Ok(decode_inline(data).into_iter().next())
    }
}

/// Returns every duplicate value stored under `key`, in sorted order; a
/// key with no duplicates (or absent) yields an empty vec.
pub fn get_all<R: PageReader>(reader: &R, root: u64, key: &[u8]) -> Result<Vec<Vec<u8>>> {
    let Some((pgno, idx)) = find_leaf(reader, root, key) else { return Ok(Vec::new()) };
    let view = reader.read_page(pgno);
    let hdr = view.node_header_at(idx);
    let flags = hdr.leaf_flags();
    let data = view.leaf_data_at(idx);
    if flags & node_flags::DUPDATA == 0 {
        return Ok(vec![reader.value_bytes(flags, data)]);
    }
    if flags & node_flags::SUBDB != 0 {
        let rec = decode_record(data);
        Ok(collect_all_keys(reader, rec.root))
    } else {
        Ok(decode_inline(data))
    }
}

fn find_leaf<R: PageReader>(reader: &R, root: u64, key: &[u8]) -> Option<(u64, usize)> {
    if root == P_INVALID {
        return None;
    }
    let mut pgno = root;
    loop {
        let view = reader.read_page(pgno);
        if view.is_branch() {
            let idx = branch_search(&view, key, reader.comparator());
            pgno = view.branch_child_at(idx);
            continue;
        }
        let (found, idx) = leaf_search(&view, key, reader.comparator());
        return if found { Some((pgno, idx)) } else { None };
    }
}

fn min_key<R: PageReader>(reader: &R, root: u64) -> Option<Vec<u8>> {
    if root == P_INVALID {
        return None;
    }
    let mut pgno = root;
    loop {
        let view = reader.read_page(pgno);
        if view.is_branch() {
            pgno = view.branch_child_at(0);
        } else if view.num_keys() == 0 {
            return None;
        } else {
            return Some(view.key_at(0).to_vec());
        }
    }
}

fn collect_all_keys<R: PageReader>(reader: &R, root: u64) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    collect_rec(reader, root, &mut out);
    out
}

fn collect_rec<R: PageReader>(reader: &R, pgno: u64, out: &mut Vec<Vec<u8>>) {
    if pgno == P_INVALID {
        return;
    }
    let view = reader.read_page(pgno);
    if view.is_branch() {
        for i in 0..view.num_keys() {
            collect_rec(reader, view.branch_child_at(i), out);
        }
    } else {
        for i in 0..view.num_keys() {
            out.push(view.key_at(i).to_vec());
        }
    }
}

/// Adds `value` to `key`'s duplicate set, creating it if `key` is new or
/// holds a single plain value. Returns `true` if `value` was not already
/// present.
pub fn put_duplicate(txn: &mut WriteTxn, root: u64, key: &[u8], value: &[u8]) -> Result<(u64, bool)> {
    let existing = find_leaf(&*txn, root, key);
    let (mut values, plain_value, had_entry) = match existing {
        Some((pgno, idx)) => {
            let view = txn.read_page(pgno);
            let hdr = view.node_header_at(idx);
            let flags = hdr.leaf_flags();
            let data = view.leaf_data_at(idx).to_vec();
            if flags & node_flags::DUPDATA != 0 {
                if flags & node_flags::SUBDB != 0 {
                    let rec = decode_record(&data);
                    return put_into_subdb(txn, root, key, &rec, value);
                }
                (decode_inline(&data), None, true)
            } else {
                (Vec::new(), Some(txn.value_bytes(flags, &data)), true)
            }
        }
        None => (Vec::new(), None, false),
    };

    if let Some(pv) = plain_value {
        if pv == value {
            return Ok((root, false));
        }
        values.push(pv);
    }

    let pos = values.binary_search(&value.to_vec()).unwrap_or_else(|p| p);
    if values.get(pos).map(|v| v.as_slice()) == Some(value) {
        return Ok((root, false));
    }
    values.insert(pos, value.to_vec());

    let encoded = encode_inline(&values);
    if encoded.len() <= INLINE_DUP_BUDGET {
        let new_root = insert_inline(txn, root, key, &encoded)?;
        Ok((new_root, true))
    } else {
        let new_root = promote_to_subdb(txn, root, key, &values)?;
        let _ = had_entry;
        Ok((new_root, true))
    }
}

fn insert_inline(txn: &mut WriteTxn, root: u64, key: &[u8], encoded: &[u8]) -> Result<u64> {
    let (new_root, _stats) = insert_into_root(
        txn,
        root,
        key,
        encoded,
        node_flags::DUPDATA,
        super::PutFlags::default(),
    )?;
    Ok(new_root)
}

fn promote_to_subdb(txn: &mut WriteTxn, root: u64, key: &[u8], values: &[Vec<u8>]) -> Result<u64> {
    let mut sub_root = P_INVALID;
    for v in values {
        let (r, _stats) = insert_into_root(txn, sub_root, v, &[], 0, super::PutFlags::default())?;
        sub_root = r;
    }
    let rec = DbRecord {
        leaf2_size: 0,
        flags: node_flags::SUBDB,
        depth: 1,
        branch_pages: 0,
        leaf_pages: 1,
        overflow_pages: 0,
        entries: values.len() as u64,
        root: sub_root,
    };
    let encoded = encode_record(&rec);
    let (new_root, _stats) = insert_into_root(
        txn,
        root,
        key,
        &encoded,
        node_flags::DUPDATA | node_flags::SUBDB,
        super::PutFlags::default(),
    )?;
    Ok(new_root)
}

fn put_into_subdb(
    txn: &mut WriteTxn,
    root: u64,
    key: &[u8],
    rec: &DbRecord,
    value: &[u8],
) -> Result<(u64, bool)> {
    if get_all(&*txn, root, key)?.iter().any(|v| v == value) {
        return Ok((root, false));
    }
    let (new_sub_root, stats) =
        insert_into_root(txn, rec.root, value, &[], 0, super::PutFlags::default())?;
    let mut new_rec = *rec;
    new_rec.root = new_sub_root;
    new_rec.entries += 1;
    new_rec.leaf_pages = (new_rec.leaf_pages as i64 + stats.leaf_delta) as u64;
    new_rec.branch_pages = (new_rec.branch_pages as i64 + stats.branch_delta) as u64;
    let encoded = encode_record(&new_rec);
    let (new_root, _) = insert_into_root(
        txn,
        root,
        key,
        &encoded,
        node_flags::DUPDATA | node_flags::SUBDB,
        super::PutFlags::default(),
    )?;
    Ok((new_root, true))
}

/// Removes `value` from `key`'s duplicate set. Returns the (possibly new)
/// root and whether anything was removed.
pub fn delete_duplicate(txn: &mut WriteTxn, root: u64, key: &[u8], value: &[u8]) -> Result<(u64, bool)> {
    let Some((pgno, idx)) = find_leaf(&*txn, root, key) else { return Ok((root, false)) };
    let view = txn.read_page(pgno);
    let hdr = view.node_header_at(idx);
    let flags = hdr.leaf_flags();
    if flags & node_flags::DUPDATA == 0 {
        return Ok((root, false));
    }
    let data = view.leaf_data_at(idx).to_vec();
    if flags & node_flags::SUBDB != 0 {
        let rec = decode_record(&data);
        let (new_sub_root, removed, _, _, _) = delete_from_root(txn, rec.root, value)?;
        if !removed {
            return Ok((root, false));
        }
        if new_sub_root == P_INVALID {
            let (new_root, _, _, _, _) = delete_from_root(txn, root, key)?;
            return Ok((new_root, true));
        }
        let mut new_rec = rec;
        new_rec.root = new_sub_root;
        new_rec.entries = new_rec.entries.saturating_sub(1);
        let encoded = encode_record(&new_rec);
        let (new_root, _) = insert_into_root(
            txn,
            root,
            key,
            &encoded,
            node_flags::DUPDATA | node_flags::SUBDB,
            super::PutFlags::default(),
        )?;
        Ok((new_root, true))
    } else {
        let mut values = decode_inline(&data);
        let before = values.len();
        values.retain(|v| v != value);
        if values.len() == before {
            return Ok((root, false));
        }
        if values.is_empty() {
            let (new_root, _, _, _, _) = delete_from_root(txn, root, key)?;
            return Ok((new_root, true));
        }
        let encoded = encode_inline(&values);
        let new_root = insert_inline(txn, root, key, &encoded)?;
        Ok((new_root, true))
    }
}
