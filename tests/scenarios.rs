//! End-to-end scenarios, each using a fresh `tempfile::TempDir`-backed
//! `Env`.

use kirjasto::{Env, Error};
use tempfile::tempdir;

#[test]
fn fresh_environment_has_no_entries() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    let txn = env.begin_read().unwrap();
    assert_eq!(txn.get(b"anything").unwrap(), None);
    assert_eq!(txn.stat().entries, 0);
}

#[test]
fn single_insert_commit_read() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    {
        let mut txn = env.begin_write().unwrap();
        txn.put(b"hello", b"world").unwrap();
        txn.commit().unwrap();
    }
    let txn = env.begin_read().unwrap();
    assert_eq!(txn.get(b"hello").unwrap(), Some(b"world".to_vec()));
}

#[test]
fn overwrite_returns_latest_value() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    let mut txn = env.begin_write().unwrap();
    txn.put(b"k", b"v1").unwrap();
    txn.put(b"k", b"v2").unwrap();
    assert_eq!(txn.get(b"k").unwrap(), Some(b"v2".to_vec()));
    txn.commit().unwrap();

    let txn = env.begin_read().unwrap();
    assert_eq!(txn.get(b"k").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn put_no_overwrite_rejects_existing_key() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    let mut txn = env.begin_write().unwrap();
    txn.put(b"k", b"v1").unwrap();
    let err = txn.put_no_overwrite(b"k", b"v2").unwrap_err();
    assert!(matches!(err, Error::AlreadyExists));
    assert_eq!(txn.get(b"k").unwrap(), Some(b"v1".to_vec()));
}

#[test]
fn delete_only_entry_empties_the_tree() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    let mut txn = env.begin_write().unwrap();
    txn.put(b"k", b"v").unwrap();
    assert!(txn.delete(b"k").unwrap());
    assert_eq!(txn.get(b"k").unwrap(), None);
    assert_eq!(txn.stat().entries, 0);
    txn.commit().unwrap();

    let txn = env.begin_read().unwrap();
    assert_eq!(txn.stat().entries, 0);
}

#[test]
fn delete_missing_key_returns_false() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    let mut txn = env.begin_write().unwrap();
    assert!(!txn.delete(b"nope").unwrap());
}

#[test]
fn abort_leaves_no_trace() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    {
        let mut txn = env.begin_write().unwrap();
        txn.put(b"before", b"1").unwrap();
        txn.commit().unwrap();
    }
    {
        let mut txn = env.begin_write().unwrap();
        txn.put(b"after", b"2").unwrap();
        txn.abort();
    }
    let txn = env.begin_read().unwrap();
    assert_eq!(txn.get(b"before").unwrap(), Some(b"1".to_vec()));
    assert_eq!(txn.get(b"after").unwrap(), None);
}

#[test]
fn split_produces_a_multi_level_tree() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    let mut txn = env.begin_write().unwrap();
    for i in 0..2000u32 {
        let key = format!("key-{:06}", i);
        let value = vec![b'x'; 64];
        txn.put(key.as_bytes(), &value).unwrap();
    }
    txn.commit().unwrap();

    let txn = env.begin_read().unwrap();
    assert_eq!(txn.stat().entries, 2000);
    assert!(txn.stat().depth >= 2, "expected a branch level after 2000 inserts");
    for i in 0..2000u32 {
        let key = format!("key-{:06}", i);
        assert!(txn.get(key.as_bytes()).unwrap().is_some());
    }
}

#[test]
fn overflow_value_round_trips() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    let big_value = vec![b'y'; 100_000];
    let mut txn = env.begin_write().unwrap();
    txn.put(b"big", &big_value).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_read().unwrap();
    assert_eq!(txn.get(b"big").unwrap(), Some(big_value));
    assert!(txn.stat().overflow_pages > 0);
}

#[test]
fn overwriting_overflow_value_frees_old_chain() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    let mut txn = env.begin_write().unwrap();
    txn.put(b"big", &vec![b'a'; 50_000]).unwrap();
    txn.commit().unwrap();

    let before = env.begin_read().unwrap().stat().overflow_pages;

    let mut txn = env.begin_write().unwrap();
    txn.put(b"big", &vec![b'b'; 50_000]).unwrap();
    txn.commit().unwrap();

    let after = env.begin_read().unwrap().stat().overflow_pages;
    assert_eq!(before, after);
}

#[test]
fn iteration_visits_every_key_in_order() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    let mut txn = env.begin_write().unwrap();
    let mut keys: Vec<String> = (0..200).map(|i| format!("k{:04}", i)).collect();
    keys.sort();
    for k in keys.iter().rev() {
        txn.put(k.as_bytes(), b"v").unwrap();
    }
    txn.commit().unwrap();

    let txn = env.begin_read().unwrap();
    let cursor = txn.iter();
    let mut seen = Vec::new();
    let mut more = cursor.first().unwrap();
    while more {
        let (k, _) = cursor.current().unwrap();
        seen.push(String::from_utf8(k).unwrap());
        more = cursor.next().unwrap();
    }
    assert_eq!(seen, keys);
}

#[test]
fn reader_pins_snapshot_across_a_writer_commit() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    {
        let mut txn = env.begin_write().unwrap();
        txn.put(b"k", b"v1").unwrap();
        txn.commit().unwrap();
    }

    let reader = env.begin_read().unwrap();
    {
        let mut txn = env.begin_write().unwrap();
        txn.put(b"k", b"v2").unwrap();
        txn.commit().unwrap();
    }
    // The pinned reader still sees the snapshot taken before the second
    // commit even though the writer has since reused/rewritten pages.
    assert_eq!(reader.get(b"k").unwrap(), Some(b"v1".to_vec()));

    let fresh = env.begin_read().unwrap();
    assert_eq!(fresh.get(b"k").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn reclamation_reuses_pages_freed_by_earlier_committed_txns() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    for round in 0..20 {
        let mut txn = env.begin_write().unwrap();
        for i in 0..50u32 {
            let key = format!("r{}-{:03}", round, i);
            txn.put(key.as_bytes(), b"v").unwrap();
        }
        for i in 0..50u32 {
            let key = format!("r{}-{:03}", round, i);
            txn.delete(key.as_bytes()).unwrap();
        }
        txn.commit().unwrap();
    }
    let size_after = std::fs::metadata(dir.path().join("data")).unwrap().len();

    // A database that actually reclaims pages across these no-net-growth
    // rounds should not have grown without bound.
    let mut txn = env.begin_write().unwrap();
    txn.put(b"final", b"v").unwrap();
    txn.commit().unwrap();
    let size_final = std::fs::metadata(dir.path().join("data")).unwrap().len();
    assert!(size_final <= size_after * 2);
}

#[test]
fn try_begin_write_conflicts_with_an_active_writer() {
    let dir = tempdir().unwrap();
    let env = Env::open(dir.path()).unwrap();
    let _txn = env.begin_write().unwrap();
    let err = env.try_begin_write().unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}
