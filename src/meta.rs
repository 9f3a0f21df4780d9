//! Meta page protocol: the two alternating meta pages that anchor every
//! snapshot.
//!
//! Grounded in a typical commit-time meta write (single write, synced
//! last) and `Kerakov-redb/.../page_manager.rs`'s dual-meta-page selection
//! logic.

use crate::consts::*;
use crate::error::{Corruption, Error, Result};
use crate::mmap::Mmap;
use std::convert::TryInto;

/// The 48-byte summary of one B+tree: enough to resume walking it without
/// a scan, and to report statistics cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRecord {
    pub leaf2_size: u16,
    pub flags: u16,
    pub depth: u16,
    pub branch_pages: u64,
    pub leaf_pages: u64,
    pub overflow_pages: u64,
    pub entries: u64,
    pub root: u64,
}

impl DbRecord {
    pub const EMPTY: DbRecord = DbRecord {
        leaf2_size: 0,
        flags: 0,
        depth: 0,
        branch_pages: 0,
        leaf_pages: 0,
        overflow_pages: 0,
        entries: 0,
        root: P_INVALID,
    };

    pub(crate) const ENCODED_SIZE: usize = DB_RECORD_SIZE;

    pub(crate) fn encode(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.leaf2_size.to_ne_bytes());
        buf[2..4].copy_from_slice(&self.flags.to_ne_bytes());
        buf[4..6].copy_from_slice(&self.depth.to_ne_bytes());
        buf[6..8].copy_from_slice(&[0, 0]);
        buf[8..16].copy_from_slice(&self.branch_pages.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.leaf_pages.to_ne_bytes());
        buf[24..32].copy_from_slice(&self.overflow_pages.to_ne_bytes());
        buf[32..40].copy_from_slice(&self.entries.to_ne_bytes());
        buf[40..48].copy_from_slice(&self.root.to_ne_bytes());
    }

    pub(crate) fn decode(buf: &[u8]) -> DbRecord {
        DbRecord {
            leaf2_size: u16::from_ne_bytes(buf[0..2].try_into().unwrap()),
            flags: u16::from_ne_bytes(buf[2..4].try_into().unwrap()),
            depth: u16::from_ne_bytes(buf[4..6].try_into().unwrap()),
            branch_pages: u64::from_ne_bytes(buf[8..16].try_into().unwrap()),
            leaf_pages: u64::from_ne_bytes(buf[16..24].try_into().unwrap()),
            overflow_pages: u64::from_ne_bytes(buf[24..32].try_into().unwrap()),
            entries: u64::from_ne_bytes(buf[32..40].try_into().unwrap()),
            root: u64::from_ne_bytes(buf[40..48].try_into().unwrap()),
        }
    }
}

/// Reserved DB indices within a meta page.
pub const FREE_DB: usize = 0;
pub const MAIN_DB: usize = 1;

/// Full decoded contents of one meta page.
#[derive(Debug, Clone, Copy)]
pub struct Meta {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub fixed_map_addr: u64,
    pub map_size: u64,
    pub free_db: DbRecord,
    pub main_db: DbRecord,
    pub last_pgno: u64,
    pub txnid: u64,
}

// Byte layout within a meta page, starting right after the 16-byte page
// header (which still carries this page's own pgno/flags=META).
const OFF_MAGIC: usize = PAGE_HEADER_SIZE;
const OFF_VERSION: usize = OFF_MAGIC + 4;
const OFF_PAGE_SIZE: usize = OFF_VERSION + 4;
const OFF_FIXED_ADDR: usize = OFF_PAGE_SIZE + 4;
const OFF_MAP_SIZE: usize = OFF_FIXED_ADDR + 8;
const OFF_FREE_DB: usize = OFF_MAP_SIZE + 8;
const OFF_MAIN_DB: usize = OFF_FREE_DB + DB_RECORD_SIZE;
const OFF_LAST_PGNO: usize = OFF_MAIN_DB + DB_RECORD_SIZE;
const OFF_TXNID: usize = OFF_LAST_PGNO + 8;
pub const META_ENCODED_SIZE: usize = OFF_TXNID + 8;

impl Meta {
    pub fn fresh(page_size: u32, map_size: u64) -> Meta {
        Meta {
            magic: META_MAGIC,
            version: FORMAT_VERSION,
            page_size,
            fixed_map_addr: 0,
            map_size,
            free_db: DbRecord::EMPTY,
            main_db: DbRecord::EMPTY,
            last_pgno: FIRST_FREE_PGNO - 1,
            txnid: 0,
        }
    }

    pub fn encode(&self, buf: &mut [u8], pgno: u64) {
        buf[..PAGE_HEADER_SIZE].iter_mut().for_each(|b| *b = 0);
        buf[0..8].copy_from_slice(&pgno.to_ne_bytes());
        buf[8..10].copy_from_slice(&page_flags::META.to_ne_bytes());
        buf[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&self.magic.to_ne_bytes());
        buf[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&self.version.to_ne_bytes());
        buf[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 4].copy_from_slice(&self.page_size.to_ne_bytes());
        buf[OFF_FIXED_ADDR..OFF_FIXED_ADDR + 8].copy_from_slice(&self.fixed_map_addr.to_ne_bytes());
        buf[OFF_MAP_SIZE..OFF_MAP_SIZE + 8].copy_from_slice(&self.map_size.to_ne_bytes());
        self.free_db.encode(&mut buf[OFF_FREE_DB..OFF_FREE_DB + DB_RECORD_SIZE]);
        self.main_db.encode(&mut buf[OFF_MAIN_DB..OFF_MAIN_DB + DB_RECORD_SIZE]);
        buf[OFF_LAST_PGNO..OFF_LAST_PGNO + 8].copy_from_slice(&self.last_pgno.to_ne_bytes());
        buf[OFF_TXNID..OFF_TXNID + 8].copy_from_slice(&self.txnid.to_ne_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Meta> {
        if buf.len() < META_ENCODED_SIZE {
            return Err(Error::Corruption(Corruption::InvalidPageHeader));
        }
        let magic = u32::from_ne_bytes(buf[OFF_MAGIC..OFF_MAGIC + 4].try_into().unwrap());
        if magic != META_MAGIC {
            return Err(Error::Corruption(Corruption::BadMagic));
        }
        let version = u32::from_ne_bytes(buf[OFF_VERSION..OFF_VERSION + 4].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::Corruption(Corruption::UnsupportedVersion));
        }
        Ok(Meta {
            magic,
            version,
            page_size: u32::from_ne_bytes(buf[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 4].try_into().unwrap()),
            fixed_map_addr: u64::from_ne_bytes(buf[OFF_FIXED_ADDR..OFF_FIXED_ADDR + 8].try_into().unwrap()),
            map_size: u64::from_ne_bytes(buf[OFF_MAP_SIZE..OFF_MAP_SIZE + 8].try_into().unwrap()),
            free_db: DbRecord::decode(&buf[OFF_FREE_DB..OFF_FREE_DB + DB_RECORD_SIZE]),
            main_db: DbRecord::decode(&buf[OFF_MAIN_DB..OFF_MAIN_DB + DB_RECORD_SIZE]),
            last_pgno: u64::from_ne_bytes(buf[OFF_LAST_PGNO..OFF_LAST_PGNO + 8].try_into().unwrap()),
            txnid: u64::from_ne_bytes(buf[OFF_TXNID..OFF_TXNID + 8].try_into().unwrap()),
        })
    }
}

/// Reads both meta pages and returns the one with the larger txnid (the
/// "current" snapshot), falling back to a freshly synthesized pair when
/// the file is too small to hold either (a brand-new database).
pub fn read_current(map: &Mmap, page_size: usize) -> Result<Meta> {
    let slice = map.as_slice();
    if slice.len() < page_size * 2 {
        return Ok(Meta::fresh(page_size as u32, map.len() as u64));
    }
    let m0 = Meta::decode(&slice[0..page_size]);
    let m1 = Meta::decode(&slice[page_size..page_size * 2]);
    match (m0, m1) {
        (Ok(a), Ok(b)) => Ok(if a.txnid >= b.txnid { a } else { b }),
        (Ok(a), Err(_)) => Ok(a),
        (Err(_), Ok(b)) => Ok(b),
        (Err(e), Err(_)) => Err(e),
    }
}

/// Writes `meta` into slot `meta.txnid % 2` and, unless `durability`
/// requests otherwise, fsyncs the meta fd. This is the sole commit point:
/// once this call returns, the transaction is durable (modulo the chosen
/// durability mode) and visible to new readers.
pub fn write(map: &Mmap, meta: &Meta, page_size: usize, sync: bool) -> Result<()> {
    let slot = (meta.txnid % 2) as u64;
    let mut buf = vec![0u8; page_size];
    meta.encode(&mut buf, slot);
    map.pwrite_meta(slot * page_size as u64, &buf)?;
    if sync {
        map.fsync_meta()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_roundtrips_through_encode_decode() {
        let mut m = Meta::fresh(4096, 1 << 20);
        m.txnid = 42;
        m.main_db.root = 7;
        m.main_db.entries = 3;
        let mut buf = vec![0u8; 4096];
        m.encode(&mut buf, 1);
        let decoded = Meta::decode(&buf).unwrap();
        assert_eq!(decoded.txnid, 42);
        assert_eq!(decoded.main_db.root, 7);
        assert_eq!(decoded.main_db.entries, 3);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let buf = vec![0u8; 4096];
        assert!(matches!(Meta::decode(&buf), Err(Error::Corruption(Corruption::BadMagic))));
    }
}
