use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One durable record per archive: the raw byte payload, a store timestamp,
/// and the size. There is no versioning field; a changed archive at the same
/// identifier is indistinguishable from a stale cache unless the identifier
/// itself encodes a version.
///
/// Records are immutable once stored. `put` fully replaces any prior entry;
/// there is no partial update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub archive_id: String,
    pub payload: Bytes,
    pub stored_at_ms: u64,
}

impl ArchiveRecord {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Unavailable,
    Corrupt(String),
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable => write!(f, "archive storage unavailable"),
            StoreError::Corrupt(msg) => write!(f, "archive storage corrupt: {msg}"),
            StoreError::Io(msg) => write!(f, "archive storage error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Durable byte-range cache store, keyed by archive identifier.
///
/// `get` on a cold store or unknown key is `Ok(None)`, not an error; callers
/// fall back to a full remote download.
pub trait ArchiveStore {
    fn get(&self, archive_id: &str) -> Result<Option<ArchiveRecord>, StoreError>;
    fn put(&mut self, record: ArchiveRecord) -> Result<(), StoreError>;
    fn remove(&mut self, archive_id: &str) -> Result<bool, StoreError>;
    fn clear(&mut self) -> Result<(), StoreError>;
}

/// Deterministic in-memory store, primarily for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryArchiveStore {
    entries: std::collections::BTreeMap<String, ArchiveRecord>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ArchiveStore for MemoryArchiveStore {
    fn get(&self, archive_id: &str) -> Result<Option<ArchiveRecord>, StoreError> {
        Ok(self.entries.get(archive_id).cloned())
    }

    fn put(&mut self, record: ArchiveRecord) -> Result<(), StoreError> {
        self.entries.insert(record.archive_id.clone(), record);
        Ok(())
    }

    fn remove(&mut self, archive_id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(archive_id).is_some())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveMeta {
    archive_id: String,
    stored_at_ms: u64,
    len: u64,
}

/// Filesystem-backed store: one payload file per key named by the blake3 hex
/// of the archive id, with a JSON metadata sidecar.
///
/// Writes go through a temp file and rename, so a crashed or aborted `put`
/// never leaves a readable partial record (the sidecar is written last and
/// readers require it). Unexpected read failures degrade to a miss rather
/// than propagating, per the subsystem's error model.
#[derive(Debug)]
pub struct FsArchiveStore {
    root: PathBuf,
}

impl FsArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_for(archive_id: &str) -> String {
        blake3::hash(archive_id.as_bytes()).to_hex().to_string()
    }

    fn payload_path(&self, archive_id: &str) -> PathBuf {
        self.root.join(format!("{}.bin", Self::key_for(archive_id)))
    }

    fn meta_path(&self, archive_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", Self::key_for(archive_id)))
    }

    fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| StoreError::Io(e.to_string()))?;
            file.write_all(contents)
                .map_err(|e| StoreError::Io(e.to_string()))?;
            file.sync_all().map_err(|e| StoreError::Io(e.to_string()))?;
        }
        fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))
    }
}

impl ArchiveStore for FsArchiveStore {
    fn get(&self, archive_id: &str) -> Result<Option<ArchiveRecord>, StoreError> {
        let meta_raw = match fs::read(self.meta_path(archive_id)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(archive_id, error = %e, "archive metadata read failed, treating as miss");
                return Ok(None);
            }
        };
        let meta: ArchiveMeta = match serde_json::from_slice(&meta_raw) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(archive_id, error = %e, "archive metadata corrupt, treating as miss");
                return Ok(None);
            }
        };
        let payload = match fs::read(self.payload_path(archive_id)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(archive_id, error = %e, "archive payload read failed, treating as miss");
                return Ok(None);
            }
        };
        if payload.len() as u64 != meta.len {
            warn!(
                archive_id,
                expected = meta.len,
                actual = payload.len(),
                "archive payload size mismatch, treating as miss"
            );
            return Ok(None);
        }
        Ok(Some(ArchiveRecord {
            archive_id: meta.archive_id,
            payload: Bytes::from(payload),
            stored_at_ms: meta.stored_at_ms,
        }))
    }

    fn put(&mut self, record: ArchiveRecord) -> Result<(), StoreError> {
        let meta = ArchiveMeta {
            archive_id: record.archive_id.clone(),
            stored_at_ms: record.stored_at_ms,
            len: record.payload.len() as u64,
        };
        let meta_raw = serde_json::to_vec(&meta).map_err(|e| StoreError::Io(e.to_string()))?;

        // Payload first, sidecar last: a record only becomes visible once
        // both files are complete.
        Self::write_atomic(&self.payload_path(&record.archive_id), &record.payload)?;
        Self::write_atomic(&self.meta_path(&record.archive_id), &meta_raw)
    }

    fn remove(&mut self, archive_id: &str) -> Result<bool, StoreError> {
        let existed = self.meta_path(archive_id).exists();
        // Sidecar first so a half-removed record reads as a miss.
        let _ = fs::remove_file(self.meta_path(archive_id));
        let _ = fs::remove_file(self.payload_path(archive_id));
        Ok(existed)
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::Io(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if matches!(ext, Some("bin") | Some("json") | Some("tmp")) {
                fs::remove_file(&path).map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        Ok(())
    }
}
