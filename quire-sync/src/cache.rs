//! Local snapshot cache: the write-through mirror of the live document.
//!
//! On-disk layout (bincode-encoded [`CacheEnvelope`]):
//! ```text
//! ┌────────────────┬──────────────┬────────────┬──────────┬─────────────────┐
//! │ schema_version │ fingerprint  │ written_at │ checksum │ payload         │
//! │ u32            │ string       │ u64 (ms)   │ u64      │ LZ4(JSON doc)   │
//! └────────────────┴──────────────┴────────────┴──────────┴─────────────────┘
//! ```
//!
//! The cache has no authority. A snapshot whose schema version is unknown or
//! whose checksum does not match is discarded rather than loaded, so a stale
//! shape from an older build never poisons a new session.

use quire_core::{fingerprint, fnv1a_64, ContentDocument};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::clock::unix_millis;

/// Bumped whenever the cached document shape changes incompatibly.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Cache errors.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// Reading or writing the backing file failed
    IoError(String),
    /// Envelope or document could not be encoded
    SerializationError(String),
    /// Envelope or document could not be decoded
    DeserializationError(String),
    /// LZ4 payload could not be decompressed
    CompressionError(String),
    /// Snapshot written by an incompatible build
    SchemaMismatch { found: u32, expected: u32 },
    /// Payload does not match its recorded checksum
    ChecksumMismatch,
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::IoError(e) => write!(f, "Cache I/O error: {e}"),
            CacheError::SerializationError(e) => write!(f, "Cache serialization error: {e}"),
            CacheError::DeserializationError(e) => write!(f, "Cache deserialization error: {e}"),
            CacheError::CompressionError(e) => write!(f, "Cache compression error: {e}"),
            CacheError::SchemaMismatch { found, expected } => {
                write!(f, "Cache schema v{found} does not match v{expected}")
            }
            CacheError::ChecksumMismatch => write!(f, "Cache checksum mismatch"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::IoError(e.to_string())
    }
}

/// Versioned container around one document snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    pub schema_version: u32,
    pub fingerprint: String,
    /// Milliseconds since the Unix epoch
    pub written_at: u64,
    pub checksum: u64,
    /// LZ4-compressed JSON document
    pub payload: Vec<u8>,
}

impl CacheEnvelope {
    pub fn seal(doc: &ContentDocument) -> Result<Self, CacheError> {
        let json = serde_json::to_vec(doc)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;
        let payload = lz4_flex::compress_prepend_size(&json);
        Ok(Self {
            schema_version: CACHE_SCHEMA_VERSION,
            fingerprint: fingerprint(doc).to_string(),
            written_at: unix_millis(),
            checksum: fnv1a_64(&payload),
            payload,
        })
    }

    pub fn open(&self) -> Result<ContentDocument, CacheError> {
        if self.schema_version != CACHE_SCHEMA_VERSION {
            return Err(CacheError::SchemaMismatch {
                found: self.schema_version,
                expected: CACHE_SCHEMA_VERSION,
            });
        }
        if fnv1a_64(&self.payload) != self.checksum {
            return Err(CacheError::ChecksumMismatch);
        }
        let json = lz4_flex::decompress_size_prepended(&self.payload)
            .map_err(|e| CacheError::CompressionError(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| CacheError::DeserializationError(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CacheError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        let (envelope, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CacheError::DeserializationError(e.to_string()))?;
        Ok(envelope)
    }
}

/// Encode a document into cache bytes.
pub fn encode_snapshot(doc: &ContentDocument) -> Result<Vec<u8>, CacheError> {
    CacheEnvelope::seal(doc)?.encode()
}

/// Decode cache bytes back into a document.
pub fn decode_snapshot(bytes: &[u8]) -> Result<ContentDocument, CacheError> {
    CacheEnvelope::decode(bytes)?.open()
}

/// Best-effort local mirror of the live document.
pub trait LocalCache: Send {
    /// Load the last snapshot. `Ok(None)` when nothing usable is cached.
    fn load(&self) -> Result<Option<ContentDocument>, CacheError>;

    /// Replace the snapshot. Called synchronously on every mutation.
    fn store(&mut self, doc: &ContentDocument) -> Result<(), CacheError>;

    fn clear(&mut self) -> Result<(), CacheError>;
}

/// Discard unusable snapshots instead of failing the load.
fn load_or_discard(bytes: &[u8]) -> Result<Option<ContentDocument>, CacheError> {
    match decode_snapshot(bytes) {
        Ok(doc) => Ok(Some(doc)),
        Err(e @ (CacheError::SchemaMismatch { .. }
        | CacheError::ChecksumMismatch
        | CacheError::DeserializationError(_)
        | CacheError::CompressionError(_))) => {
            log::warn!("Discarding local snapshot: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Snapshot file on disk, replaced atomically via write-then-rename.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LocalCache for FileCache {
    fn load(&self) -> Result<Option<ContentDocument>, CacheError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        load_or_discard(&bytes)
    }

    fn store(&mut self, doc: &ContentDocument) -> Result<(), CacheError> {
        let bytes = encode_snapshot(doc)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let temp = self.temp_path();
        std::fs::write(&temp, &bytes)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process cache. Clones share the same slot, which lets tests simulate
/// a reload by handing a clone to a second engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw snapshot bytes, if any.
    pub fn raw(&self) -> Option<Vec<u8>> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    /// Overwrite the raw bytes, e.g. with a snapshot from an older build.
    pub fn put_raw(&self, bytes: Vec<u8>) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(bytes);
        }
    }
}

impl LocalCache for MemoryCache {
    fn load(&self) -> Result<Option<ContentDocument>, CacheError> {
        match self.raw() {
            Some(bytes) => load_or_discard(&bytes),
            None => Ok(None),
        }
    }

    fn store(&mut self, doc: &ContentDocument) -> Result<(), CacheError> {
        self.put_raw(encode_snapshot(doc)?);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample() -> ContentDocument {
        ContentDocument::new()
            .with_section("hero", json!({"title": "Hello", "_iconCache": "blob:1"}))
            .with_section("catalogItemsA", json!([{"name": "a"}, {"name": "b"}]))
    }

    #[test]
    fn test_snapshot_keeps_transient_fields() {
        let doc = sample();
        let bytes = encode_snapshot(&doc).unwrap();
        let back = decode_snapshot(&bytes).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_envelope_records_fingerprint() {
        let doc = sample();
        let envelope = CacheEnvelope::seal(&doc).unwrap();
        assert_eq!(envelope.schema_version, CACHE_SCHEMA_VERSION);
        assert_eq!(envelope.fingerprint, fingerprint(&doc).to_string());
    }

    #[test]
    fn test_schema_mismatch_is_discarded() {
        let mut envelope = CacheEnvelope::seal(&sample()).unwrap();
        envelope.schema_version = CACHE_SCHEMA_VERSION + 1;
        let cache = MemoryCache::new();
        cache.put_raw(envelope.encode().unwrap());

        assert!(matches!(
            envelope.open(),
            Err(CacheError::SchemaMismatch { .. })
        ));
        assert_eq!(cache.load().unwrap(), None);
    }

    #[test]
    fn test_corrupt_payload_is_discarded() {
        let mut envelope = CacheEnvelope::seal(&sample()).unwrap();
        if let Some(byte) = envelope.payload.last_mut() {
            *byte ^= 0xFF;
        }
        assert!(matches!(envelope.open(), Err(CacheError::ChecksumMismatch)));

        let cache = MemoryCache::new();
        cache.put_raw(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(cache.load().unwrap(), None);
    }

    #[test]
    fn test_memory_cache_clones_share_slot() {
        let mut writer = MemoryCache::new();
        let reader = writer.clone();
        assert_eq!(reader.load().unwrap(), None);

        writer.store(&sample()).unwrap();
        assert_eq!(reader.load().unwrap(), Some(sample()));

        writer.clear().unwrap();
        assert_eq!(reader.load().unwrap(), None);
    }

    #[test]
    fn test_file_cache_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("content.snapshot");

        let mut cache = FileCache::new(&path);
        assert_eq!(cache.load().unwrap(), None);
        cache.store(&sample()).unwrap();

        let reopened = FileCache::new(&path);
        assert_eq!(reopened.load().unwrap(), Some(sample()));
        assert!(!dir.path().join("nested").join("content.snapshot.tmp").exists());

        cache.clear().unwrap();
        assert_eq!(reopened.load().unwrap(), None);
        // Clearing twice is fine
        cache.clear().unwrap();
    }
}
