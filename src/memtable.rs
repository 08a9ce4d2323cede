//! In-memory staging area for one LSM collection. See spec.md §4.4. The
//! memtable is the sole place a `put`/`delete` lands before a flush writes
//! it out to an SST; every lookup overlays it on top of the flushed SSTs.

use crate::record::{record_id, Record};
use std::collections::BTreeMap;

pub struct MemTable {
    data: BTreeMap<String, Record>,
    limit: usize,
    next_synth_id: u64,
}

impl MemTable {
    pub fn new(limit: usize) -> Self {
        Self {
            data: BTreeMap::new(),
            limit,
            next_synth_id: 0,
        }
    }

    /// Inserts `record`, keyed by `record["id"]` if present, otherwise by a
    /// synthesized id assigned to the record before insertion. Returns the
    /// id used, so callers (the WAL entry, the dispatch response) can refer
    /// to it.
    pub fn insert(&mut self, mut record: Record) -> String {
        let id = match record_id(&record) {
            Some(id) => id,
            None => {
                let id = self.synthesize_id();
                record.insert("id".to_string(), serde_json::Value::String(id.clone()));
                id
            }
        };
        self.data.insert(id.clone(), record);
        id
    }

    /// Inserts a record under a caller-known id (used by WAL replay, where
    /// the id was already decided at append time).
    pub fn insert_with_id(&mut self, id: String, record: Record) {
        self.data.insert(id, record);
    }

    fn synthesize_id(&mut self) -> String {
        let id = format!("_gen{:016x}", self.next_synth_id);
        self.next_synth_id += 1;
        id
    }

    pub fn should_flush(&self) -> bool {
        self.data.len() >= self.limit
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.data.get(id)
    }

    /// Iterates in id order. Spec.md §4.4 notes this ordering is not a
    /// correctness requirement, only a convenience for deterministic tests.
    pub fn iter_ordered(&self) -> impl Iterator<Item = (&String, &Record)> {
        self.data.iter()
    }

    pub fn take_all(&mut self) -> Vec<(String, Record)> {
        std::mem::take(&mut self.data).into_iter().collect()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.data.len();
        self.data.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(json: serde_json::Value) -> Record {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn insert_keys_by_existing_id() {
        let mut mt = MemTable::new(8);
        let id = mt.insert(rec(json!({"id": "a", "v": 1})));
        assert_eq!(id, "a");
        assert_eq!(mt.get("a").unwrap().get("v").unwrap(), 1);
    }

    #[test]
    fn insert_synthesizes_id_when_absent() {
        let mut mt = MemTable::new(8);
        let id1 = mt.insert(rec(json!({"v": 1})));
        let id2 = mt.insert(rec(json!({"v": 2})));
        assert_ne!(id1, id2);
        assert_eq!(mt.get(&id1).unwrap().get("id").unwrap(), &id1);
    }

    #[test]
    fn overwrite_by_id_does_not_grow_len() {
        let mut mt = MemTable::new(8);
        mt.insert(rec(json!({"id": "a", "v": 1})));
        mt.insert(rec(json!({"id": "a", "v": 2})));
        assert_eq!(mt.len(), 1);
        assert_eq!(mt.get("a").unwrap().get("v").unwrap(), 2);
    }

    #[test]
    fn should_flush_at_limit() {
        let mut mt = MemTable::new(2);
        assert!(!mt.should_flush());
        mt.insert(rec(json!({"id": "a"})));
        mt.insert(rec(json!({"id": "b"})));
        assert!(mt.should_flush());
    }
}
