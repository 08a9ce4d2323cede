//! The dispatch layer: presents the ten logical operations clients use,
//! routing each to the catalog path or the LSM path per spec.md §4.5. This
//! is the only place the two storage flavors diverge, and the only place
//! that owns the background maintenance thread.

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::lsm::LsmCollection;
use crate::predicate::Filter;
use crate::record::{is_tombstone, record_id, Record};
use crate::vector::{self, VectorQuery};
use crate::wal::{WalEntry, WriteAheadLog};
use crate::container;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

const CATALOG_DB: &str = "system";
const CATALOG_COLLECTION: &str = "users";

fn is_catalog(db: &str, collection: &str) -> bool {
    db == CATALOG_DB && collection == CATALOG_COLLECTION
}

struct CatalogHandle {
    wal: WriteAheadLog,
    container_path: PathBuf,
    write_lock: Mutex<()>,
}

/// The top-level engine: owns the filesystem layout, the set of open LSM
/// collections, the catalog handle, and the background maintenance thread.
/// Construct one per process and share it (typically behind an `Arc`)
/// across request-handling threads.
pub struct StoreEngine {
    config: StoreConfig,
    collections: RwLock<HashMap<(String, String, String), LsmCollection>>,
    catalogs: RwLock<HashMap<(String, String), CatalogHandle>>,
    maintenance_running: std::sync::Arc<AtomicBool>,
    maintenance_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StoreEngine {
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_root)?;
        info!(data_root = %config.data_root.display(), "store engine initialized");
        Ok(Self {
            config,
            collections: RwLock::new(HashMap::new()),
            catalogs: RwLock::new(HashMap::new()),
            maintenance_running: std::sync::Arc::new(AtomicBool::new(false)),
            maintenance_handle: Mutex::new(None),
        })
    }

    fn db_dir(&self, user: &str, db: &str) -> PathBuf {
        self.config.data_root.join(user).join(db)
    }

    fn collections_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<(String, String, String), LsmCollection>>> {
        self.collections
            .write()
            .map_err(|_| StoreError::LockPoisoned("collections"))
    }

    fn catalogs_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<(String, String), CatalogHandle>>> {
        self.catalogs
            .write()
            .map_err(|_| StoreError::LockPoisoned("catalogs"))
    }

    fn open_catalog(&self, user: &str, db: &str) -> Result<()> {
        let key = (user.to_string(), db.to_string());
        if self.catalogs.read().map_err(|_| StoreError::LockPoisoned("catalogs"))?.contains_key(&key) {
            return Ok(());
        }
        let db_dir = self.db_dir(user, db);
        let wal = WriteAheadLog::open(&db_dir.join("wal").join("db.wal"))?;
        let container_path = db_dir.join("data").join(format!("{CATALOG_COLLECTION}.bin"));

        let mut guard = self.catalogs_lock()?;
        guard.entry(key).or_insert(CatalogHandle {
            wal,
            container_path,
            write_lock: Mutex::new(()),
        });
        Ok(())
    }

    fn open_lsm(&self, user: &str, db: &str, collection: &str) -> Result<()> {
        let key = (user.to_string(), db.to_string(), collection.to_string());
        if self
            .collections
            .read()
            .map_err(|_| StoreError::LockPoisoned("collections"))?
            .contains_key(&key)
        {
            return Ok(());
        }
        let db_dir = self.db_dir(user, db);
        let coll = LsmCollection::open(
            &db_dir,
            user,
            db,
            collection,
            self.config.memtable_limit,
            self.config.compaction_threshold,
        )?;
        self.collections_lock()?.entry(key).or_insert(coll);
        Ok(())
    }

    // ---- directory / namespace operations -------------------------------

    pub fn ensure_user_root(&self, user: &str) -> Result<()> {
        std::fs::create_dir_all(self.config.data_root.join(user))?;
        Ok(())
    }

    /// Idempotent: creates `data/`, `wal/`, and `logs/` under the database.
    pub fn create_database(&self, user: &str, db: &str) -> Result<()> {
        let db_dir = self.db_dir(user, db);
        std::fs::create_dir_all(db_dir.join("data"))?;
        std::fs::create_dir_all(db_dir.join("wal"))?;
        std::fs::create_dir_all(db_dir.join("logs"))?;
        Ok(())
    }

    /// Idempotent: creates an empty container file for `collection` if one
    /// does not already exist, and opens the LSM engine for it (or the
    /// catalog handle, when routed there).
    pub fn create_collection(&self, user: &str, db: &str, collection: &str) -> Result<()> {
        self.create_database(user, db)?;
        if is_catalog(db, collection) {
            self.open_catalog(user, db)?;
            let container_path = self.db_dir(user, db).join("data").join(format!("{collection}.bin"));
            if !container_path.exists() {
                container::write_all(&container_path, &[])?;
            }
        } else {
            self.open_lsm(user, db, collection)?;
        }
        Ok(())
    }

    /// Lists immediate subdirectories under the user namespace. A missing
    /// user directory yields an empty sequence rather than an error.
    pub fn list_databases(&self, user: &str) -> Result<Vec<String>> {
        let user_dir = self.config.data_root.join(user);
        let entries = match std::fs::read_dir(&user_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    // ---- data operations --------------------------------------------------

    pub fn insert(&self, user: &str, db: &str, collection: &str, record: Record) -> Result<String> {
        if is_catalog(db, collection) {
            self.open_catalog(user, db)?;
            // catalog insert has no id requirement (spec.md §4.5); MissingId
            // is scoped to LSM update_one only (§7).
            let id = record_id(&record).unwrap_or_default();
            let guard = self.catalogs.read().map_err(|_| StoreError::LockPoisoned("catalogs"))?;
            let handle = guard
                .get(&(user.to_string(), db.to_string()))
                .ok_or(StoreError::NotFound)?;
            let _write_guard = handle.write_lock.lock().map_err(|_| StoreError::LockPoisoned("catalog_write"))?;
            handle.wal.append(&WalEntry::insert(user, db, collection, record.clone()))?;
            container::append(&handle.container_path, &record)?;
            Ok(id)
        } else {
            self.open_lsm(user, db, collection)?;
            let guard = self.collections.read().map_err(|_| StoreError::LockPoisoned("collections"))?;
            let coll = guard
                .get(&(user.to_string(), db.to_string(), collection.to_string()))
                .ok_or(StoreError::NotFound)?;
            coll.put(record)
        }
    }

    pub fn insert_vector(&self, user: &str, db: &str, collection: &str, record: Record) -> Result<String> {
        // vectors are ordinary records as far as storage is concerned;
        // `vector`/`modality` fields are interpreted only at query_vector time.
        self.insert(user, db, collection, record)
    }

    fn load_live_records(&self, user: &str, db: &str, collection: &str) -> Result<Vec<Record>> {
        if is_catalog(db, collection) {
            self.open_catalog(user, db)?;
            let guard = self.catalogs.read().map_err(|_| StoreError::LockPoisoned("catalogs"))?;
            let handle = guard
                .get(&(user.to_string(), db.to_string()))
                .ok_or(StoreError::NotFound)?;
            Ok(container::read_all(&handle.container_path)?
                .into_iter()
                .filter(|r| !is_tombstone(r))
                .collect())
        } else {
            self.open_lsm(user, db, collection)?;
            let guard = self.collections.read().map_err(|_| StoreError::LockPoisoned("collections"))?;
            let coll = guard
                .get(&(user.to_string(), db.to_string(), collection.to_string()))
                .ok_or(StoreError::NotFound)?;
            coll.get_all_live()
        }
    }

    pub fn find(&self, user: &str, db: &str, collection: &str, filter_doc: &Value) -> Result<Vec<Record>> {
        let filter = Filter::parse(filter_doc);
        Ok(self
            .load_live_records(user, db, collection)?
            .into_iter()
            .filter(|r| filter.eval(r))
            .collect())
    }

    pub fn query_vector(&self, user: &str, db: &str, collection: &str, query: &VectorQuery) -> Result<Vec<Record>> {
        let candidates = self.load_live_records(user, db, collection)?;
        Ok(vector::search(candidates, query))
    }

    /// Applies `update` (operator form or replacement form) to the first
    /// record matching `filter_doc`. Returns `false` (not an error) when no
    /// record matches, per spec.md §4.5/§7.
    pub fn update_one(&self, user: &str, db: &str, collection: &str, filter_doc: &Value, update: &Value) -> Result<bool> {
        let filter = Filter::parse(filter_doc);

        if is_catalog(db, collection) {
            self.open_catalog(user, db)?;
            let guard = self.catalogs.read().map_err(|_| StoreError::LockPoisoned("catalogs"))?;
            let handle = guard
                .get(&(user.to_string(), db.to_string()))
                .ok_or(StoreError::NotFound)?;
            let _write_guard = handle.write_lock.lock().map_err(|_| StoreError::LockPoisoned("catalog_write"))?;

            let mut records = container::read_all(&handle.container_path)?;
            let Some(pos) = records.iter().position(|r| filter.eval(r)) else {
                return Ok(false);
            };
            let updated = apply_update(&records[pos], update);
            records[pos] = updated.clone();

            handle.wal.append(&WalEntry::update(user, db, collection, updated))?;
            container::write_all(&handle.container_path, &records)?;
            Ok(true)
        } else {
            self.open_lsm(user, db, collection)?;
            let guard = self.collections.read().map_err(|_| StoreError::LockPoisoned("collections"))?;
            let coll = guard
                .get(&(user.to_string(), db.to_string(), collection.to_string()))
                .ok_or(StoreError::NotFound)?;

            let records = coll.get_all_live()?;
            let Some(current) = records.into_iter().find(|r| filter.eval(r)) else {
                return Ok(false);
            };
            let updated = apply_update(&current, update);
            if record_id(&updated).is_none() {
                return Err(StoreError::MissingId);
            }
            coll.put(updated)?;
            Ok(true)
        }
    }

    /// Deletes the first record matching `filter_doc`. Returns `false` when
    /// no (non-tombstone) record matches.
    pub fn delete_one(&self, user: &str, db: &str, collection: &str, filter_doc: &Value) -> Result<bool> {
        let filter = Filter::parse(filter_doc);

        if is_catalog(db, collection) {
            self.open_catalog(user, db)?;
            let guard = self.catalogs.read().map_err(|_| StoreError::LockPoisoned("catalogs"))?;
            let handle = guard
                .get(&(user.to_string(), db.to_string()))
                .ok_or(StoreError::NotFound)?;
            let _write_guard = handle.write_lock.lock().map_err(|_| StoreError::LockPoisoned("catalog_write"))?;

            let mut records = container::read_all(&handle.container_path)?;
            let Some(pos) = records.iter().position(|r| !is_tombstone(r) && filter.eval(r)) else {
                return Ok(false);
            };
            let removed = records.remove(pos);
            let id = record_id(&removed);

            handle.wal.append(&WalEntry::delete(user, db, collection, id.as_deref().unwrap_or_default()))?;
            container::write_all(&handle.container_path, &records)?;
            Ok(true)
        } else {
            self.open_lsm(user, db, collection)?;
            let guard = self.collections.read().map_err(|_| StoreError::LockPoisoned("collections"))?;
            let coll = guard
                .get(&(user.to_string(), db.to_string(), collection.to_string()))
                .ok_or(StoreError::NotFound)?;

            let records = coll.get_all_live()?;
            let Some(matched) = records.into_iter().find(|r| filter.eval(r)) else {
                return Ok(false);
            };
            let id = record_id(&matched).ok_or(StoreError::MissingId)?;
            coll.delete(&id)?;
            Ok(true)
        }
    }

    /// Runs `compact` on every open LSM collection. Called both directly
    /// (for tests that want deterministic compaction) and by the
    /// background maintenance thread.
    pub fn compact_all(&self) -> Result<()> {
        let guard = self.collections.read().map_err(|_| StoreError::LockPoisoned("collections"))?;
        for ((user, db, collection), coll) in guard.iter() {
            if let Err(e) = coll.compact() {
                warn!(user, db, collection, error = %e, "compaction failed, will retry next tick");
            }
        }
        Ok(())
    }

    /// Starts the background maintenance thread if it is not already
    /// running. Idempotent: a second call while already running is a no-op.
    pub fn start_maintenance(self: std::sync::Arc<Self>) {
        if self
            .maintenance_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let engine = std::sync::Arc::clone(&self);
        let running = std::sync::Arc::clone(&self.maintenance_running);
        let interval = self.config.maintenance_interval;

        let handle = thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                if let Err(e) = engine.compact_all() {
                    warn!(error = %e, "maintenance tick failed");
                }
                thread::sleep(interval);
            }
        });

        *self.maintenance_handle.lock().expect("maintenance handle mutex") = Some(handle);
    }

    /// Clears the running flag and joins the background thread, blocking
    /// until it observes the flag within its current sleep and exits.
    pub fn stop_maintenance(&self) {
        self.maintenance_running.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.maintenance_handle.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Applies `update` to `current`, returning a new record. Replacement form
/// (no top-level `$`-prefixed key) is normalized to `{"$set": update}`
/// before operator application, per spec.md §4.5.
fn apply_update(current: &Record, update: &Value) -> Record {
    let mut doc = current.clone();

    let is_operator_form = update
        .as_object()
        .is_some_and(|map| map.keys().any(|k| k.starts_with('$')));

    let ops = if is_operator_form {
        update.clone()
    } else {
        serde_json::json!({ "$set": update })
    };

    let Some(ops) = ops.as_object() else {
        return doc;
    };

    if let Some(Value::Object(set_fields)) = ops.get("$set") {
        for (k, v) in set_fields {
            doc.insert(k.clone(), v.clone());
        }
    }
    if let Some(Value::Array(unset_fields)) = ops.get("$unset") {
        for k in unset_fields {
            if let Some(k) = k.as_str() {
                doc.remove(k);
            }
        }
    }
    if let Some(Value::Object(inc_fields)) = ops.get("$inc") {
        for (k, v) in inc_fields {
            let current = doc.get(k).and_then(Value::as_i64).unwrap_or(0);
            let delta = v.as_i64().unwrap_or(0);
            doc.insert(k.clone(), serde_json::json!(current + delta));
        }
    }

    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn rec(json: Value) -> Record {
        json.as_object().unwrap().clone()
    }

    fn test_engine(dir: &Path) -> StoreEngine {
        let config = StoreConfig::builder()
            .data_root(dir)
            .memtable_limit(8)
            .compaction_threshold(4)
            .build()
            .unwrap();
        StoreEngine::new(config).unwrap()
    }

    #[test]
    fn s1_catalog_round_trip() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.create_database("u", "system").unwrap();
        engine.create_collection("u", "system", "users").unwrap();
        engine.insert("u", "system", "users", rec(json!({"id": 1, "email": "a"}))).unwrap();
        engine.insert("u", "system", "users", rec(json!({"id": 2, "email": "b"}))).unwrap();

        let found = engine
            .find("u", "system", "users", &json!({"$or": [{"email": "a"}, {"email": "b"}]}))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].get("email").unwrap(), "a");
    }

    #[test]
    fn s2_update_with_operator() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.create_collection("u", "system", "users").unwrap();
        engine.insert("u", "system", "users", rec(json!({"id": 2, "email": "b"}))).unwrap();

        let updated = engine
            .update_one("u", "system", "users", &json!({"id": 2}), &json!({"$set": {"email": "z"}}))
            .unwrap();
        assert!(updated);

        let found = engine.find("u", "system", "users", &json!({"id": 2})).unwrap();
        assert_eq!(found[0].get("email").unwrap(), "z");
    }

    #[test]
    fn s3_replacement_form_update() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.create_collection("u", "system", "users").unwrap();
        engine.insert("u", "system", "users", rec(json!({"id": 1, "email": "a"}))).unwrap();

        let updated = engine
            .update_one("u", "system", "users", &json!({"id": 1}), &json!({"email": "q"}))
            .unwrap();
        assert!(updated);

        let found = engine.find("u", "system", "users", &json!({"id": 1})).unwrap();
        assert_eq!(found[0].get("email").unwrap(), "q");
        assert_eq!(found[0].get("id").unwrap(), &json!(1));
    }

    #[test]
    fn s4_lsm_insert_flush_find() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.create_collection("u", "mydb", "c").unwrap();
        for i in 0..10 {
            engine.insert("u", "mydb", "c", rec(json!({"id": i}))).unwrap();
        }
        let found = engine.find("u", "mydb", "c", &json!({})).unwrap();
        assert_eq!(found.len(), 10);
    }

    #[test]
    fn s5_delete_then_compact() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.create_collection("u", "mydb", "c").unwrap();
        for i in 0..10 {
            engine.insert("u", "mydb", "c", rec(json!({"id": i}))).unwrap();
        }

        let deleted = engine.delete_one("u", "mydb", "c", &json!({"id": 3})).unwrap();
        assert!(deleted);
        assert!(engine.find("u", "mydb", "c", &json!({"id": 3})).unwrap().is_empty());

        engine.compact_all().unwrap();
        assert!(engine.find("u", "mydb", "c", &json!({"id": 3})).unwrap().is_empty());
        assert_eq!(engine.find("u", "mydb", "c", &json!({})).unwrap().len(), 9);
    }

    #[test]
    fn s6_vector_top_k() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.create_collection("u", "mydb", "c").unwrap();
        engine.insert_vector("u", "mydb", "c", rec(json!({"id": "a", "vector": [1, 0], "modality": "t"}))).unwrap();
        engine.insert_vector("u", "mydb", "c", rec(json!({"id": "b", "vector": [0, 1], "modality": "t"}))).unwrap();
        engine.insert_vector("u", "mydb", "c", rec(json!({"id": "c", "vector": [1, 1], "modality": "x"}))).unwrap();

        let query = VectorQuery {
            vector: vec![1.0, 0.0],
            k: 2,
            metric: crate::vector::Metric::Cosine,
            filter: None,
            modality: Some("t".to_string()),
        };
        let results = engine.query_vector("u", "mydb", "c", &query).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].get("id").unwrap(), "a");
        assert_eq!(results[1].get("id").unwrap(), "b");
    }

    #[test]
    fn update_one_returns_false_when_no_match() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.create_collection("u", "mydb", "c").unwrap();
        let result = engine.update_one("u", "mydb", "c", &json!({"id": "missing"}), &json!({"x": 1})).unwrap();
        assert!(!result);
    }

    #[test]
    fn list_databases_for_missing_user_is_empty() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        assert!(engine.list_databases("ghost").unwrap().is_empty());
    }

    #[test]
    fn create_database_and_collection_are_idempotent() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.create_database("u", "d").unwrap();
        engine.create_database("u", "d").unwrap();
        engine.create_collection("u", "d", "c").unwrap();
        engine.create_collection("u", "d", "c").unwrap();
        assert!(engine.find("u", "d", "c", &json!({})).unwrap().is_empty());
    }
}
