//! Write-ahead log. See spec.md §4.2. Every WAL file in this tree — the
//! per-collection LSM WALs and the catalog's `wal/db.wal` — uses the framed
//! binary format: `u8 opcode`, `u32 LE length`, then `length` bytes of a
//! JSON-text payload. `append` is synchronous and durable before it
//! returns; `replay` (driven from [`crate::engine`]) never re-enters
//! dispatch (see the "replay re-entry hazard" note in spec.md §9) — it
//! hands decoded entries straight to the memtable/container.

use crate::error::{Result, StoreError};
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Insert = 1,
    Update = 2,
    Delete = 3,
}

impl Opcode {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(Opcode::Insert),
            2 => Ok(Opcode::Update),
            3 => Ok(Opcode::Delete),
            other => Err(StoreError::Decode(format!("unknown WAL opcode {other}"))),
        }
    }
}

/// A decoded logical operation. `record` carries the full document for
/// INSERT/UPDATE; `id` carries the target id for DELETE (and, redundantly,
/// for UPDATE so replay doesn't need to re-derive it).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalEntry {
    pub opcode: Opcode,
    pub user: String,
    pub db: String,
    pub collection: String,
    pub id: Option<String>,
    pub record: Option<Record>,
}

impl WalEntry {
    pub fn insert(user: &str, db: &str, collection: &str, record: Record) -> Self {
        Self {
            opcode: Opcode::Insert,
            user: user.to_string(),
            db: db.to_string(),
            collection: collection.to_string(),
            id: crate::record::record_id(&record),
            record: Some(record),
        }
    }

    pub fn update(user: &str, db: &str, collection: &str, record: Record) -> Self {
        let mut entry = Self::insert(user, db, collection, record);
        entry.opcode = Opcode::Update;
        entry
    }

    pub fn delete(user: &str, db: &str, collection: &str, id: &str) -> Self {
        Self {
            opcode: Opcode::Delete,
            user: user.to_string(),
            db: db.to_string(),
            collection: collection.to_string(),
            id: Some(id.to_string()),
            record: None,
        }
    }
}

pub struct WriteAheadLog {
    file: Mutex<BufWriter<File>>,
    pub path: PathBuf,
}

impl WriteAheadLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Appends one entry. The write is flushed and fsynced before
    /// returning, satisfying spec.md's durability contract: a `put`/
    /// `delete` that returns success has its WAL entry on stable storage.
    pub fn append(&self, entry: &WalEntry) -> Result<()> {
        let payload = serde_json::to_vec(entry)?;
        let length = payload.len() as u32;

        let mut writer = self
            .file
            .lock()
            .map_err(|_| StoreError::LockPoisoned("wal_writer"))?;
        writer.write_all(&[entry.opcode as u8])?;
        writer.write_all(&length.to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        debug!(path = %self.path.display(), opcode = ?entry.opcode, "WAL entry appended");
        Ok(())
    }

    /// Reads every well-formed entry from `path`. A truncated trailing
    /// entry, or one whose payload fails to decode, is logged and skipped
    /// rather than treated as a fatal error.
    pub fn read_all(path: &Path) -> Result<Vec<WalEntry>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();

        loop {
            let mut opcode_buf = [0u8; 1];
            match reader.read_exact(&mut opcode_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let opcode = match Opcode::from_byte(opcode_buf[0]) {
                Ok(op) => op,
                Err(_) => {
                    warn!(path = %path.display(), "unrecognized WAL opcode, stopping replay of tail");
                    break;
                }
            };

            let mut length_buf = [0u8; 4];
            match reader.read_exact(&mut length_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(path = %path.display(), "truncated trailing WAL entry skipped");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            let length = u32::from_le_bytes(length_buf) as usize;

            let mut payload = vec![0u8; length];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(path = %path.display(), "truncated trailing WAL entry skipped");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            match serde_json::from_slice::<WalEntry>(&payload) {
                Ok(mut entry) => {
                    entry.opcode = opcode;
                    entries.push(entry);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt WAL entry skipped");
                }
            }
        }

        Ok(entries)
    }

    /// Alternate decode path for the line-oriented text format spec.md
    /// permits: one JSON payload per line, opcode embedded in the
    /// payload's own fields. Present so a WAL written by that encoder can
    /// still be recovered; this crate's own [`WriteAheadLog::append`]
    /// never emits this format.
    pub fn read_line_oriented(path: &Path) -> Result<Vec<WalEntry>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %path.display(), error = %e, "corrupt WAL line skipped"),
            }
        }
        Ok(entries)
    }

    /// Truncates the log. Must only be called once all prior entries are
    /// reflected in durable SSTs or a container file.
    pub fn clear(&self) -> Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| StoreError::LockPoisoned("wal_writer"))?;
        guard.flush()?;

        let truncated = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        truncated.sync_all()?;

        let appendable = OpenOptions::new().create(true).append(true).open(&self.path)?;
        *guard = BufWriter::new(appendable);
        Ok(())
    }
}
