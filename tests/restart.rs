//! Crash-and-restart integration tests: a process is dropped mid-session
//! (simulating a crash) and a fresh engine is opened against the same data
//! root, relying on WAL replay to reconstruct state.

use docustore::{StoreConfig, StoreEngine};
use serde_json::json;
use tempfile::tempdir;

fn config_at(dir: &std::path::Path, memtable_limit: usize) -> StoreConfig {
    StoreConfig::builder()
        .data_root(dir)
        .memtable_limit(memtable_limit)
        .compaction_threshold(4)
        .build()
        .unwrap()
}

#[test]
fn restart_recovers_unflushed_puts_from_wal() {
    let dir = tempdir().unwrap();
    let cfg = config_at(dir.path(), 1024);

    {
        let engine = StoreEngine::new(cfg.clone()).unwrap();
        engine.create_collection("u", "d", "c").unwrap();
        engine
            .insert("u", "d", "c", json!({"id": "a", "v": 1}).as_object().unwrap().clone())
            .unwrap();
    } // engine dropped, nothing flushed

    let engine = StoreEngine::new(cfg).unwrap();
    let found = engine.find("u", "d", "c", &json!({"id": "a"})).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("v").unwrap(), 1);
}

#[test]
fn restart_after_flush_still_finds_flushed_records() {
    let dir = tempdir().unwrap();
    let cfg = config_at(dir.path(), 4);

    {
        let engine = StoreEngine::new(cfg.clone()).unwrap();
        engine.create_collection("u", "d", "c").unwrap();
        for i in 0..10 {
            engine
                .insert("u", "d", "c", json!({"id": i}).as_object().unwrap().clone())
                .unwrap();
        }
    }

    let engine = StoreEngine::new(cfg).unwrap();
    assert_eq!(engine.find("u", "d", "c", &json!({})).unwrap().len(), 10);
}

#[test]
fn tombstone_persists_across_restart() {
    let dir = tempdir().unwrap();
    let cfg = config_at(dir.path(), 1024);

    {
        let engine = StoreEngine::new(cfg.clone()).unwrap();
        engine.create_collection("u", "d", "c").unwrap();
        engine
            .insert("u", "d", "c", json!({"id": "a"}).as_object().unwrap().clone())
            .unwrap();
        assert!(engine.delete_one("u", "d", "c", &json!({"id": "a"})).unwrap());
    }

    let engine = StoreEngine::new(cfg).unwrap();
    assert!(engine.find("u", "d", "c", &json!({"id": "a"})).unwrap().is_empty());
}

#[test]
fn tombstone_survives_compaction_across_many_cycles() {
    let dir = tempdir().unwrap();
    let cfg = config_at(dir.path(), 1);

    let engine = StoreEngine::new(cfg).unwrap();
    engine.create_collection("u", "d", "c").unwrap();
    engine
        .insert("u", "d", "c", json!({"id": "a"}).as_object().unwrap().clone())
        .unwrap();
    assert!(engine.delete_one("u", "d", "c", &json!({"id": "a"})).unwrap());

    for _ in 0..3 {
        engine.compact_all().unwrap();
        assert!(engine.find("u", "d", "c", &json!({"id": "a"})).unwrap().is_empty());
    }
}

#[test]
fn catalog_collection_survives_restart() {
    let dir = tempdir().unwrap();
    let cfg = config_at(dir.path(), 1024);

    {
        let engine = StoreEngine::new(cfg.clone()).unwrap();
        engine.create_database("u", "system").unwrap();
        engine.create_collection("u", "system", "users").unwrap();
        engine
            .insert("u", "system", "users", json!({"id": 1, "email": "a"}).as_object().unwrap().clone())
            .unwrap();
    }

    let engine = StoreEngine::new(cfg).unwrap();
    let found = engine.find("u", "system", "users", &json!({"id": 1})).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("email").unwrap(), "a");
}
