//! Tiny interactive demo: opens (or creates) a database at the given
//! path, inserts a handful of key/value pairs in one write transaction,
//! then reads them back in a separate read transaction to show that the
//! two never contend.

use kirjasto::Env;
use std::env;

fn main() {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| "/tmp/kirjasto-demo".to_string());
    let env = Env::open(&path).expect("failed to open environment");

    {
        let mut txn = env.begin_write().expect("failed to begin write txn");
        for i in 0..10u32 {
            let key = format!("key-{:03}", i);
            let value = format!("value-{}", i * i);
            txn.put(key.as_bytes(), value.as_bytes()).expect("put failed");
        }
        txn.commit().expect("commit failed");
    }

    let txn = env.begin_read().expect("failed to begin read txn");
    let cursor = txn.iter();
    let mut found = cursor.first().expect("cursor descent failed");
    while found {
        let (key, value) = cursor.current().expect("cursor positioned but empty");
        println!("{} = {}", String::from_utf8_lossy(&key), String::from_utf8_lossy(&value));
        found = cursor.next().expect("cursor advance failed");
    }

    let stat = txn.stat();
    println!("entries: {}, depth: {}, leaf_pages: {}", stat.entries, stat.depth, stat.leaf_pages);
}
