//! Append-only edit log.
//!
//! Each edit is length-prefixed and bincode-encoded:
//!
//! ```text
//! [length: u32 LE][record: bincode bytes][crc32c: u32 LE]
//! ```
//!
//! Replay stops at the first frame that fails its length or checksum and
//! truncates the file there, so a torn tail from a crash costs at most the
//! record that was mid-write.

use crate::hash::ContentHash;
use crate::{AtomError, Modality, Result};
use sema_vector::AtomId;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// One durable mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    AtomCreated {
        atom: AtomId,
        hash: ContentHash,
        modality: Modality,
        payload: Vec<u8>,
        created_at_ms: u64,
    },
    RefIncremented {
        atom: AtomId,
    },
    Released {
        atom: AtomId,
    },
    EmbeddingCommitted {
        atom: AtomId,
        model_id: String,
        vector: Vec<f32>,
    },
    RelationAdded {
        source: AtomId,
        target: AtomId,
        relation_type: String,
        weight: f32,
    },
}

/// Append-only log handle.
pub struct AtomLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl AtomLog {
    /// Open (or create) the log at `path`, replaying existing records.
    ///
    /// Returns the handle positioned for append plus every record that
    /// survived checksum validation, in write order.
    pub fn open(path: &Path) -> Result<(Self, Vec<LogRecord>)> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut records = Vec::new();
        let mut valid_len = 0u64;

        if path.exists() {
            let mut bytes = Vec::new();
            File::open(path)?.read_to_end(&mut bytes)?;

            let mut offset = 0usize;
            loop {
                if offset + 4 > bytes.len() {
                    break;
                }
                let len =
                    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
                let payload_start = offset + 4;
                let payload_end = payload_start + len;
                if payload_end + 4 > bytes.len() {
                    break; // torn tail
                }

                let payload = &bytes[payload_start..payload_end];
                let stored_crc =
                    u32::from_le_bytes(bytes[payload_end..payload_end + 4].try_into().unwrap());
                if crc32c::crc32c(payload) != stored_crc {
                    tracing::warn!(
                        offset,
                        "log checksum mismatch, truncating tail of {}",
                        path.display()
                    );
                    break;
                }

                match bincode::deserialize::<LogRecord>(payload) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        tracing::warn!(offset, "undecodable log record ({}), truncating", e);
                        break;
                    }
                }

                offset = payload_end + 4;
                valid_len = offset as u64;
            }

            // Drop whatever follows the last good frame
            let actual_len = bytes.len() as u64;
            if valid_len < actual_len {
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::debug!(
            records = records.len(),
            "opened atom log {}",
            path.display()
        );

        Ok((
            Self {
                writer: BufWriter::new(file),
                path: path.to_path_buf(),
            },
            records,
        ))
    }

    /// Append a record and flush it to the OS.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let payload = bincode::serialize(record)
            .map_err(|e| AtomError::LogCorrupt(format!("encode failed: {}", e)))?;
        let crc = crc32c::crc32c(&payload);

        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    /// fsync the log file.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
