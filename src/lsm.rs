//! Per-collection LSM engine. See spec.md §4.4. One [`LsmCollection`] owns
//! the memtable, WAL, and SST directory for a single `(user, db, coll)`
//! triple not routed to the catalog path (§4.5).

use crate::error::{Result, StoreError};
use crate::memtable::MemTable;
use crate::record::{is_tombstone, record_id, tombstone, Record};
use crate::sstable;
use crate::wal::{WalEntry, WriteAheadLog};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

pub struct LsmCollection {
    memtable: Mutex<MemTable>,
    wal: WriteAheadLog,
    lsm_dir: PathBuf,
    user: String,
    db: String,
    collection: String,
    memtable_limit: usize,
    compaction_threshold: usize,
}

impl LsmCollection {
    /// Opens (or creates) the collection rooted at `db_dir`, replaying its
    /// WAL into the memtable. Replay applies entries directly to the
    /// memtable rather than through `put`/`delete`, per spec.md §9's
    /// "replay re-entry hazard" note — re-invoking the logged operations
    /// would double-log them.
    pub fn open(
        db_dir: &Path,
        user: &str,
        db: &str,
        collection: &str,
        memtable_limit: usize,
        compaction_threshold: usize,
    ) -> Result<Self> {
        let lsm_dir = db_dir.join(format!("{collection}.lsm"));
        let wal_path = db_dir.join("wal").join(format!("{collection}.wal"));
        std::fs::create_dir_all(&lsm_dir)?;

        let wal = WriteAheadLog::open(&wal_path)?;
        let mut memtable = MemTable::new(memtable_limit);
        for entry in WriteAheadLog::read_all(&wal_path)? {
            Self::apply_replayed_entry(&mut memtable, entry);
        }

        info!(
            user, db, collection,
            memtable_records = memtable.len(),
            "LSM collection opened"
        );

        Ok(Self {
            memtable: Mutex::new(memtable),
            wal,
            lsm_dir,
            user: user.to_string(),
            db: db.to_string(),
            collection: collection.to_string(),
            memtable_limit,
            compaction_threshold,
        })
    }

    fn apply_replayed_entry(memtable: &mut MemTable, entry: WalEntry) {
        match entry.record {
            Some(record) => {
                let id = entry.id.unwrap_or_else(|| record_id(&record).unwrap_or_default());
                memtable.insert_with_id(id, record);
            }
            None => {
                if let Some(id) = entry.id {
                    memtable.insert_with_id(id.clone(), tombstone(&id));
                }
            }
        }
    }

    fn memtable_lock(&self) -> Result<MutexGuard<'_, MemTable>> {
        self.memtable
            .lock()
            .map_err(|_| StoreError::LockPoisoned("lsm_memtable"))
    }

    /// Writes the WAL entry, then inserts into the memtable, flushing if
    /// the memtable has reached capacity. Returns the id the record was
    /// stored under (the caller's `id` if present, else a synthesized one).
    pub fn put(&self, mut record: Record) -> Result<String> {
        // Reserve the id before the WAL append so the logged entry and the
        // memtable entry agree, even when the id is synthesized.
        let id = match record_id(&record) {
            Some(id) => id,
            None => {
                let synthesized = sstable::new_sst_id();
                record.insert("id".to_string(), serde_json::Value::String(synthesized.clone()));
                synthesized
            }
        };

        self.wal
            .append(&WalEntry::insert(&self.user, &self.db, &self.collection, record.clone()))?;

        let mut memtable = self.memtable_lock()?;
        memtable.insert_with_id(id.clone(), record);
        let should_flush = memtable.should_flush();
        drop(memtable);

        if should_flush {
            self.flush()?;
        }
        Ok(id)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.wal
            .append(&WalEntry::delete(&self.user, &self.db, &self.collection, id))?;

        let mut memtable = self.memtable_lock()?;
        memtable.insert_with_id(id.to_string(), tombstone(id));
        let should_flush = memtable.should_flush();
        drop(memtable);

        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes the current memtable to a fresh SST, then clears it and
    /// truncates the WAL — the WAL is now redundant with the SST it was
    /// protecting. A no-op on an empty memtable. Any I/O failure aborts
    /// before the memtable is touched, so the WAL remains authoritative
    /// and a subsequent replay reconstructs the lost memtable.
    pub fn flush(&self) -> Result<()> {
        let mut memtable = self.memtable_lock()?;
        if memtable.is_empty() {
            return Ok(());
        }
        let records: Vec<Record> = memtable.iter_ordered().map(|(_, r)| r.clone()).collect();

        sstable::create(&self.lsm_dir, &records)?;
        let cleared = memtable.clear();
        drop(memtable);

        self.wal.clear()?;
        info!(
            user = %self.user, db = %self.db, collection = %self.collection,
            cleared, "memtable flushed"
        );
        Ok(())
    }

    /// Merges SSTs once `compaction_threshold` is reached. Reconciliation
    /// is last-writer-wins by id, newer SST (by creation order) beating
    /// older. The merged output is written and durable before any input
    /// SST is deleted.
    pub fn compact(&self) -> Result<()> {
        let _guard = self.memtable_lock()?; // serialize with put/flush, per §5
        let inputs = sstable::list_in_creation_order(&self.lsm_dir)?;
        if inputs.len() < self.compaction_threshold {
            return Ok(());
        }

        let mut merged: HashMap<String, Record> = HashMap::new();
        for path in &inputs {
            for record in sstable::read(path)? {
                if let Some(id) = record_id(&record) {
                    merged.insert(id, record);
                }
            }
        }
        let merged_records: Vec<Record> = merged.into_values().collect();

        sstable::create(&self.lsm_dir, &merged_records)?;

        for path in &inputs {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove compacted SST input");
            }
            let bloom_path = path.with_extension("sst.bloom");
            let _ = std::fs::remove_file(&bloom_path);
        }

        info!(
            user = %self.user, db = %self.db, collection = %self.collection,
            inputs = inputs.len(), merged = merged_records.len(), "compaction complete"
        );
        Ok(())
    }

    /// Reads every SST in creation order, then overlays the memtable
    /// (memtable wins per id), returning the merged sequence. Tombstones
    /// are included; spec.md §4.5 makes the dispatch layer responsible for
    /// filtering them out.
    pub fn get_all(&self) -> Result<Vec<Record>> {
        let memtable = self.memtable_lock()?;

        let mut by_id: HashMap<String, Record> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for path in sstable::list_in_creation_order(&self.lsm_dir)? {
            for record in sstable::read(&path)? {
                if let Some(id) = record_id(&record) {
                    if !by_id.contains_key(&id) {
                        order.push(id.clone());
                    }
                    by_id.insert(id, record);
                }
            }
        }
        for (id, record) in memtable.iter_ordered() {
            if !by_id.contains_key(id) {
                order.push(id.clone());
            }
            by_id.insert(id.clone(), record.clone());
        }
        drop(memtable);

        Ok(order.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }

    /// `get_all` with tombstones dropped — what every dispatch-layer read
    /// operation (`find`, `query_vector`) actually wants.
    pub fn get_all_live(&self) -> Result<Vec<Record>> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|r| !is_tombstone(r))
            .collect())
    }
}
