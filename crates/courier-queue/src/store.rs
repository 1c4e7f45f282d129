//! Durable record store for queued messages.
//!
//! One JSON file per record in a two-level directory structure:
//!   {root}/{peer_hex}/{message_id_hex}.json
//!
//! Writes are atomic: write to temp file, fsync, then rename. Records
//! mutate on retry scheduling, so a put replaces any existing file — a
//! crash mid-write leaves either the old record or the new one, never a
//! corrupt mix.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use memmap2::Mmap;

use courier_core::message::{MessageId, PeerId};

use crate::queue::QueuedMessage;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed at {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("corrupt record at {0}: {1}")]
    Corrupt(PathBuf, serde_json::Error),
}

/// File-backed key-value store, keyed by (peer, message id).
#[derive(Clone)]
pub struct QueueStore {
    root: PathBuf,
}

impl QueueStore {
    /// Open a store rooted at the given directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::Io(root.clone(), e))?;
        Ok(Self { root })
    }

    /// Persist a record. Durable upon return.
    pub fn put(
        &self,
        peer_id: &PeerId,
        message_id: &MessageId,
        record: &QueuedMessage,
    ) -> Result<(), StoreError> {
        let path = self.record_path(peer_id, message_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
        }

        let data =
            serde_json::to_vec(record).map_err(|e| StoreError::Corrupt(path.clone(), e))?;

        // Atomic write: tmp file → rename over any previous version.
        let tmp_path = path.with_extension("tmp");
        {
            let mut file =
                fs::File::create(&tmp_path).map_err(|e| StoreError::Io(tmp_path.clone(), e))?;
            file.write_all(&data)
                .map_err(|e| StoreError::Io(tmp_path.clone(), e))?;
            file.sync_all()
                .map_err(|e| StoreError::Io(tmp_path.clone(), e))?;
        }
        fs::rename(&tmp_path, &path).map_err(|e| StoreError::Io(path.clone(), e))?;

        tracing::trace!(
            peer = hex::encode(&peer_id[..8]),
            message_id = hex::encode(&message_id[..8]),
            "record persisted"
        );
        Ok(())
    }

    /// Read one record. Returns None if absent.
    pub fn get(
        &self,
        peer_id: &PeerId,
        message_id: &MessageId,
    ) -> Result<Option<QueuedMessage>, StoreError> {
        let path = self.record_path(peer_id, message_id);
        if !path.exists() {
            return Ok(None);
        }

        let file = fs::File::open(&path).map_err(|e| StoreError::Io(path.clone(), e))?;
        // Safety: file is opened read-only and the mmap is never mutated.
        let mmap = unsafe { Mmap::map(&file).map_err(|e| StoreError::Io(path.clone(), e))? };

        let record =
            serde_json::from_slice(&mmap).map_err(|e| StoreError::Corrupt(path.clone(), e))?;
        Ok(Some(record))
    }

    /// Remove one record. Idempotent.
    pub fn delete(&self, peer_id: &PeerId, message_id: &MessageId) -> Result<(), StoreError> {
        let path = self.record_path(peer_id, message_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(path, e)),
        }
    }

    /// All persisted records for one peer, in directory order.
    pub fn list_all(&self, peer_id: &PeerId) -> Result<Vec<QueuedMessage>, StoreError> {
        let dir = self.root.join(hex::encode(peer_id));
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&dir).map_err(|e| StoreError::Io(dir.clone(), e))?;
        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                // Leftover tmp file from an interrupted write; the old
                // record (if any) is still authoritative.
                continue;
            }
            let file = fs::File::open(&path).map_err(|e| StoreError::Io(path.clone(), e))?;
            let mmap = unsafe { Mmap::map(&file).map_err(|e| StoreError::Io(path.clone(), e))? };
            match serde_json::from_slice(&mmap) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping corrupt record");
                }
            }
        }
        Ok(records)
    }

    /// All peers with at least one persisted record.
    pub fn list_peers(&self) -> Result<Vec<PeerId>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::Io(self.root.clone(), e))?;
        let mut peers = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(bytes) = hex::decode(name) else {
                continue;
            };
            if let Ok(peer) = <PeerId>::try_from(bytes.as_slice()) {
                peers.push(peer);
            }
        }
        Ok(peers)
    }

    fn record_path(&self, peer_id: &PeerId, message_id: &MessageId) -> PathBuf {
        self.root
            .join(hex::encode(peer_id))
            .join(format!("{}.json", hex::encode(message_id)))
    }
}
