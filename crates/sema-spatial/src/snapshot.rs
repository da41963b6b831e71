//! Durable index snapshots.
//!
//! A sealed generation serializes to `gen-{id}.snap`; a `CURRENT` pointer
//! file names the active snapshot. The snapshot is a cache of a derived
//! structure: corruption or loss is never fatal, the caller discards it and
//! rebuilds from the atom store + embeddings + anchor set.
//!
//! # File format
//! ```text
//! [magic: u32 LE][payload_len: u64 LE][payload: bincode][crc32c(payload): u32 LE]
//! ```

use crate::generation::IndexGeneration;
use crate::{Result, SpatialError};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: u32 = 0x53_45_4d_41; // "SEMA"
const CURRENT_FILE: &str = "CURRENT";

/// Write a generation snapshot and repoint `CURRENT` at it.
///
/// The snapshot file is written and synced before `CURRENT` is updated, so
/// a crash between the two steps leaves the previous snapshot active.
pub fn save(generation: &IndexGeneration, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let name = format!("gen-{}.snap", generation.generation_id);
    let path = dir.join(&name);

    let payload = bincode::serialize(generation)
        .map_err(|e| SpatialError::SnapshotCorrupt(format!("encode failed: {}", e)))?;
    let crc = crc32c::crc32c(&payload);

    let mut file = File::create(&path)?;
    file.write_all(&MAGIC.to_le_bytes())?;
    file.write_all(&(payload.len() as u64).to_le_bytes())?;
    file.write_all(&payload)?;
    file.write_all(&crc.to_le_bytes())?;
    file.sync_all()?;

    fs::write(dir.join(CURRENT_FILE), name.as_bytes())?;

    tracing::info!(
        generation_id = generation.generation_id,
        anchor_set_version = generation.anchor_set_version,
        bytes = payload.len(),
        "wrote index snapshot"
    );
    Ok(path)
}

/// Load the generation named by `CURRENT`.
///
/// Returns `SnapshotMissing` when no snapshot exists and `SnapshotCorrupt`
/// on any framing, checksum, or decode failure — both of which the caller
/// treats as "rebuild from durable stores".
pub fn load_current(dir: &Path) -> Result<IndexGeneration> {
    let current = dir.join(CURRENT_FILE);
    if !current.exists() {
        return Err(SpatialError::SnapshotMissing(dir.to_path_buf()));
    }

    let name = fs::read_to_string(&current)?;
    let path = dir.join(name.trim());
    if !path.exists() {
        return Err(SpatialError::SnapshotCorrupt(format!(
            "CURRENT points at missing file {}",
            path.display()
        )));
    }

    let mut bytes = Vec::new();
    File::open(&path)?.read_to_end(&mut bytes)?;

    if bytes.len() < 16 {
        return Err(SpatialError::SnapshotCorrupt("truncated header".into()));
    }

    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(SpatialError::SnapshotCorrupt(format!(
            "bad magic {:#x}",
            magic
        )));
    }

    let payload_len = u64::from_le_bytes(bytes[4..12].try_into().unwrap()) as usize;
    let payload_end = 12 + payload_len;
    if bytes.len() < payload_end + 4 {
        return Err(SpatialError::SnapshotCorrupt("truncated payload".into()));
    }

    let payload = &bytes[12..payload_end];
    let stored_crc = u32::from_le_bytes(bytes[payload_end..payload_end + 4].try_into().unwrap());
    let actual_crc = crc32c::crc32c(payload);
    if stored_crc != actual_crc {
        return Err(SpatialError::SnapshotCorrupt(format!(
            "crc mismatch: stored {:#x}, actual {:#x}",
            stored_crc, actual_crc
        )));
    }

    bincode::deserialize(payload)
        .map_err(|e| SpatialError::SnapshotCorrupt(format!("decode failed: {}", e)))
}
