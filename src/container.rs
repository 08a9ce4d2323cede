//! The record container: a length-prefixed sequence of JSON-text frames
//! used for the catalog `(·, "system", "users")` collection. See spec.md
//! §4.1. Every mutation is a full `write_all` rewrite, committed by an
//! atomic rename — readers can never observe a half-written file.

use crate::error::Result;
use crate::record::Record;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Appends a single record frame to `path`, creating parent directories and
/// the file itself as needed. The length and payload are written and
/// flushed in one go before returning, so a reader never observes a
/// partial frame written by this call.
pub fn append(path: &Path, record: &Record) -> Result<()> {
    ensure_parent(path)?;
    let payload = serde_json::to_vec(record)?;
    let length = payload.len() as u32;

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&length.to_le_bytes())?;
    file.write_all(&payload)?;
    file.flush()?;
    file.sync_all()?;

    debug!(path = %path.display(), bytes = payload.len(), "container frame appended");
    Ok(())
}

/// Reads every decodable frame from `path`. A missing file yields an empty
/// sequence rather than an error. A per-frame decode error (or a truncated
/// trailing frame) is logged and that frame is skipped; the rest of the
/// file is still read.
pub fn read_all(path: &Path) -> Result<Vec<Record>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut skipped = 0usize;

    loop {
        let mut length_buf = [0u8; 4];
        match reader.read_exact(&mut length_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let length = u32::from_le_bytes(length_buf) as usize;

        let mut payload = vec![0u8; length];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(path = %path.display(), "truncated trailing container frame skipped");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        match serde_json::from_slice::<Record>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt container frame skipped");
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, "container decode errors skipped");
    }
    Ok(records)
}

/// Rewrites the whole container atomically: all records are written to a
/// sibling `.tmp` file, flushed, then renamed over `path`. The rename is
/// the commit point.
pub fn write_all(path: &Path, records: &[Record]) -> Result<()> {
    ensure_parent(path)?;
    let tmp_path = path.with_extension("bin.tmp");

    let write_result = (|| -> Result<()> {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            let payload = serde_json::to_vec(record)?;
            let length = payload.len() as u32;
            writer.write_all(&length.to_le_bytes())?;
            writer.write_all(&payload)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), count = records.len(), "container rewritten atomically");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn rec(id: &str) -> Record {
        json!({"id": id}).as_object().unwrap().clone()
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.bin");
        assert_eq!(read_all(&path).unwrap(), Vec::new());
    }

    #[test]
    fn append_then_read_all_round_trips_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coll.bin");
        append(&path, &rec("a")).unwrap();
        append(&path, &rec("b")).unwrap();

        let records = read_all(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("id").unwrap(), "a");
        assert_eq!(records[1].get("id").unwrap(), "b");
    }

    #[test]
    fn write_all_is_atomic_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coll.bin");
        append(&path, &rec("a")).unwrap();

        write_all(&path, &[rec("x"), rec("y"), rec("z")]).unwrap();
        let records = read_all(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("id").unwrap(), "x");

        // no leftover temp file
        assert!(!path.with_extension("bin.tmp").exists());
    }

    #[test]
    fn corrupt_trailing_frame_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coll.bin");
        append(&path, &rec("a")).unwrap();

        // append a frame header promising more bytes than actually follow
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(b"short").unwrap();

        let records = read_all(&path).unwrap();
        assert_eq!(records.len(), 1);
    }
}
