//! KvStore contract tests against the reference engine

use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use strand_core::{Backupable, ErrorKind, IterationOptions, KvPair, KvStore, Result};
use strand_storage::backup::read_backup;
use strand_storage::snapshot::{self, Snapshot};
use strand_storage::{MemStore, StoreConfig, StoreConfigBuilder};
use tempfile::TempDir;

fn open() -> Arc<MemStore> {
    MemStore::open(StoreConfig::default()).unwrap()
}

fn keys_of(store: &dyn KvStore, options: IterationOptions) -> Vec<String> {
    store
        .iterate(options)
        .unwrap()
        .map(|pair| String::from_utf8(pair.unwrap().key).unwrap())
        .collect()
}

#[test]
fn test_put_get_delete() -> Result<()> {
    let store = open();

    store.put(vec![KvPair::new("k", "v1")])?;
    assert_eq!(store.get_one(b"k")?.map(|p| p.value), Some(b"v1".to_vec()));

    store.put(vec![KvPair::new("k", "v2")])?;
    assert_eq!(store.get_one(b"k")?.map(|p| p.value), Some(b"v2".to_vec()));

    store.delete(b"k")?;
    assert_eq!(store.get_one(b"k")?, None);

    // Deleting again is fine
    store.delete(b"k")?;
    Ok(())
}

#[test]
fn test_bulk_get_omits_absent_keys() -> Result<()> {
    let store = open();
    store.put(vec![KvPair::new("a", "1"), KvPair::new("c", "3")])?;

    let pairs = store.get(&[b"a", b"b", b"c"])?;
    let keys: Vec<&[u8]> = pairs.iter().map(|p| p.key.as_slice()).collect();
    assert_eq!(keys, vec![&b"a"[..], b"c"]);
    Ok(())
}

#[test]
fn test_bulk_get_is_all_or_nothing() {
    let store = MemStore::open(StoreConfigBuilder::new().max_key_size(4).build().unwrap()).unwrap();
    store.put(vec![KvPair::new("a", "1")]).unwrap();

    let err = store.get(&[&b"a"[..], b"far-too-long"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[test]
fn test_compare_and_set_semantics() -> Result<()> {
    let store = open();

    assert!(store.compare_and_set(b"k", None, b"1")?);
    assert!(!store.compare_and_set(b"k", None, b"2")?);
    assert!(!store.compare_and_set(b"k", Some(b"wrong"), b"2")?);
    assert!(store.compare_and_set(b"k", Some(b"1"), b"2")?);
    assert_eq!(store.get_one(b"k")?.map(|p| p.value), Some(b"2".to_vec()));

    assert!(!store.compare_and_set(b"absent", Some(b"x"), b"y")?);
    assert_eq!(store.get_one(b"absent")?, None);
    Ok(())
}

#[test]
fn test_concurrent_create_has_exactly_one_winner() {
    for round in 0..20 {
        let store = open();
        let key = format!("lock-{round}");
        let winners = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for t in 0..8 {
                let store = &store;
                let key = key.as_bytes();
                let winners = &winners;
                s.spawn(move || {
                    let value = format!("owner-{t}");
                    if store.compare_and_set(key, None, value.as_bytes()).unwrap() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_concurrent_increments_through_cas_lose_nothing() {
    let store = open();
    store.put(vec![KvPair::new("counter", "0")]).unwrap();

    std::thread::scope(|s| {
        for _ in 0..4 {
            let store = &store;
            s.spawn(move || {
                for _ in 0..50 {
                    loop {
                        let current = store.get_one(b"counter").unwrap().unwrap().value;
                        let n: u64 = String::from_utf8(current.clone()).unwrap().parse().unwrap();
                        let next = (n + 1).to_string();
                        if store
                            .compare_and_set(b"counter", Some(current.as_slice()), next.as_bytes())
                            .unwrap()
                        {
                            break;
                        }
                    }
                }
            });
        }
    });

    assert_eq!(store.get_one(b"counter").unwrap().unwrap().value, b"200");
}

#[test]
fn test_disjoint_writers_all_land() {
    let store = open();

    std::thread::scope(|s| {
        for t in 0..8 {
            let store = &store;
            s.spawn(move || {
                for i in 0..100 {
                    store
                        .put(vec![KvPair::new(format!("t{t}-{i}"), "v")])
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(keys_of(&*store, IterationOptions::new()).len(), 800);
}

/// Every `a:` key has its `b:` twin, and the change number counts the batches
fn assert_whole_batches(snapshot: &Snapshot) {
    let mut a_keys = BTreeSet::new();
    let mut b_keys = BTreeSet::new();
    for pair in &snapshot.pairs {
        let key = String::from_utf8(pair.key.clone()).unwrap();
        match key.split_once(':') {
            Some(("a", rest)) => a_keys.insert(rest.to_string()),
            Some(("b", rest)) => b_keys.insert(rest.to_string()),
            _ => panic!("unexpected key {key}"),
        };
    }
    assert_eq!(a_keys, b_keys, "snapshot split a batch");
    assert_eq!(snapshot.change_number, a_keys.len() as u64);
}

#[test]
fn test_snapshots_and_backups_are_point_in_time_under_writers() {
    let store = open();
    let temp = TempDir::new().unwrap();
    let writers_done = AtomicBool::new(false);
    let captures = AtomicUsize::new(0);

    std::thread::scope(|s| {
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = &store;
                s.spawn(move || {
                    for i in 0..150 {
                        store
                            .put(vec![
                                KvPair::new(format!("a:{w}-{i}"), "x"),
                                KvPair::new(format!("b:{w}-{i}"), "y"),
                            ])
                            .unwrap();
                    }
                })
            })
            .collect();

        let reader = s.spawn(|| {
            let backup_dir = temp.path().join("live-backup");
            let mut round = 0;
            while !writers_done.load(Ordering::Acquire) || round < 5 {
                let mut stream = store.get_snapshot().unwrap();
                assert_whole_batches(&snapshot::decode(&mut stream).unwrap());

                store.backup_to(&backup_dir).unwrap();
                let (manifest, backed_up) = read_backup(&backup_dir).unwrap();
                assert_eq!(manifest.change_number, backed_up.change_number);
                assert_whole_batches(&backed_up);

                captures.fetch_add(1, Ordering::Relaxed);
                round += 1;
            }
        });

        for writer in writers {
            writer.join().unwrap();
        }
        writers_done.store(true, Ordering::Release);
        reader.join().unwrap();
    });

    assert!(captures.load(Ordering::Relaxed) >= 5);
    let mut stream = store.get_snapshot().unwrap();
    let last = snapshot::decode(&mut stream).unwrap();
    assert_whole_batches(&last);
    assert_eq!(last.change_number, 600);
}

#[test]
fn test_snapshot_round_trip() -> Result<()> {
    let source = open();
    source.put(
        (0..200)
            .map(|i| KvPair::new(format!("key-{i:03}"), format!("value-{i}")))
            .collect(),
    )?;
    source.delete(b"key-100")?;

    let target = open();
    let mut stream = source.get_snapshot()?;
    target.put_snapshot(&mut stream)?;

    let expected = keys_of(&*source, IterationOptions::new());
    assert_eq!(keys_of(&*target, IterationOptions::new()), expected);
    assert_eq!(expected.len(), 199);
    assert_eq!(
        target.get_one(b"key-042")?.map(|p| p.value),
        Some(b"value-42".to_vec())
    );
    Ok(())
}

#[test]
fn test_prefix_iteration() {
    let store = open();
    store
        .put(vec![
            KvPair::new("user:1", "a"),
            KvPair::new("user:2", "b"),
            KvPair::new("order:1", "c"),
        ])
        .unwrap();

    let users: BTreeSet<String> = keys_of(&*store, IterationOptions::new().key_prefix("user:"))
        .into_iter()
        .collect();
    assert_eq!(
        users,
        BTreeSet::from(["user:1".to_string(), "user:2".to_string()])
    );
}

#[test]
fn test_iteration_resumes_from_start_key() {
    let store = open();
    store
        .put((1..=5).map(|i| KvPair::new(format!("user:{i}"), "v")).collect())
        .unwrap();
    store.put(vec![KvPair::new("zzz", "v")]).unwrap();

    let resumed = keys_of(
        &*store,
        IterationOptions::new().key_prefix("user:").start_key("user:3"),
    );
    assert_eq!(resumed, vec!["user:3", "user:4", "user:5"]);

    // A fresh call starts over
    assert_eq!(keys_of(&*store, IterationOptions::new().key_prefix("user:")).len(), 5);
}

#[test]
fn test_iterator_is_isolated_from_later_writes() {
    let store = open();
    store
        .put(vec![KvPair::new("a", "1"), KvPair::new("b", "2")])
        .unwrap();

    let mut iter = store.iterate(IterationOptions::new()).unwrap();
    let first = iter.next().unwrap().unwrap();
    assert_eq!(first.key, b"a");

    store.put(vec![KvPair::new("c", "3")]).unwrap();
    store.delete(b"b").unwrap();

    let rest: Vec<KvPair> = iter.map(|p| p.unwrap()).collect();
    assert_eq!(rest, vec![KvPair::new("b", "2")]);
}

#[test]
fn test_abandoned_iterator_releases_the_store() {
    let store = open();
    store.put(vec![KvPair::new("a", "1")]).unwrap();

    {
        let mut iter = store.iterate(IterationOptions::new()).unwrap();
        assert!(iter.next().is_some());
    }

    // Writers and whole-store sections are not blocked by the dropped iterator
    store.put(vec![KvPair::new("b", "2")]).unwrap();
    assert!(store.get_snapshot().is_ok());
}

#[test]
fn test_operations_after_close_fail_with_closed() {
    let store = open();
    store.close().unwrap();
    store.close().unwrap();

    let err = store.put(vec![KvPair::new("k", "v")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    assert_eq!(store.get(&[b"k"]).unwrap_err().kind(), ErrorKind::Closed);
}

proptest! {
    #[test]
    fn prop_prefix_iteration_matches_filter(
        keys in proptest::collection::btree_set("[a-c]{1,4}", 0..40),
        prefix in "[a-c]{0,2}",
    ) {
        let store = open();
        if !keys.is_empty() {
            store
                .put(keys.iter().map(|k| KvPair::new(k.as_str(), "v")).collect())
                .unwrap();
        }

        let got = keys_of(&*store, IterationOptions::new().key_prefix(prefix.as_str()));
        let expected: Vec<String> = keys.iter().filter(|k| k.starts_with(&prefix)).cloned().collect();
        prop_assert_eq!(got, expected);
    }
}
