//! On-disk SST files for the LSM path. See spec.md §6: one JSON-text
//! record per line, UTF-8, newline-terminated — deliberately simpler than
//! a block-indexed binary format, since this store's working sets are
//! small collections scanned in full rather than point-queried by key.
//!
//! An SST carries an optional Bloom filter sidecar (`<id>.sst.bloom`),
//! written alongside it by [`create`]. Per spec.md §9 the sidecar is purely
//! an optimization hook: nothing in this module consults it on read, so a
//! missing or stale sidecar never affects query results (a future
//! point-lookup path can read it without touching the on-disk record
//! format).

use crate::error::Result;
use crate::record::Record;
use bloomfilter::Bloom;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

static DISAMBIGUATOR: AtomicU64 = AtomicU64::new(0);

/// Generates a filename stem unique within the process: nanosecond
/// timestamp plus a monotonic counter, so two flushes landing in the same
/// nanosecond (or a clock that doesn't advance) still sort distinctly and
/// never collide. See spec.md §9's note on SST naming collisions.
pub fn new_sst_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let disambiguator = DISAMBIGUATOR.fetch_add(1, Ordering::Relaxed);
    format!("{nanos:020}-{disambiguator:06}")
}

/// Writes `records` to a fresh SST under `lsm_dir`, named by [`new_sst_id`].
/// Returns the path written. The write goes to a temp path first and is
/// renamed into place, so a reader never observes a partial SST.
pub fn create(lsm_dir: &Path, records: &[Record]) -> Result<PathBuf> {
    fs::create_dir_all(lsm_dir)?;
    let id = new_sst_id();
    let path = lsm_dir.join(format!("{id}.sst"));
    let tmp_path = lsm_dir.join(format!("{id}.sst.tmp"));

    let write_result = (|| -> Result<()> {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, &path)?;
    debug!(path = %path.display(), count = records.len(), "SST written");

    if let Err(e) = write_bloom_sidecar(&path, records) {
        warn!(path = %path.display(), error = %e, "failed to write bloom sidecar");
    }
    Ok(path)
}

/// Reads every decodable record from an SST. A corrupt or truncated
/// trailing line is logged and skipped rather than failing the read, same
/// swallow-and-count policy as the record container.
pub fn read(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Record>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), error = %e, "corrupt SST line skipped"),
        }
    }
    Ok(records)
}

/// Lists `*.sst` files under `lsm_dir` in creation order (oldest first),
/// derived from the lexicographic order of [`new_sst_id`]'s zero-padded
/// timestamp prefix.
pub fn list_in_creation_order(lsm_dir: &Path) -> Result<Vec<PathBuf>> {
    if !lsm_dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(lsm_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "sst"))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Writes an (unused-for-correctness) Bloom sidecar alongside an SST, set
/// from the ids present in `records`. Called from [`create`] after the SST
/// itself is durable; a failure here is logged and does not fail the flush.
fn write_bloom_sidecar(sst_path: &Path, records: &[Record]) -> Result<()> {
    let mut bloom = Bloom::<str>::new_for_fp_rate(records.len().max(1), 0.01)
        .map_err(|e| crate::error::StoreError::Decode(e.to_string()))?;
    for record in records {
        if let Some(id) = crate::record::record_id(record) {
            bloom.set(&id);
        }
    }
    let bloom_path = sst_path.with_extension("sst.bloom");
    fs::write(bloom_path, bloom.into_bytes())?;
    Ok(())
}
