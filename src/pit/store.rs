// =============================================================================
// PIT Snapshot Store — content-addressed, compressed, immutable
// =============================================================================
//
// Layout on disk:
//
//   <root>/<entity>/<id>.gz      gzip-compressed canonical JSON payload
//   <root>/manifest.json         metadata index, atomically rewritten
//
// Writes go through a tmp + rename pair so a crash mid-store never leaves a
// partial snapshot. Ids are time-ordered (see `ids`), so directory listings
// and the manifest agree on recency. Snapshots are immutable after write;
// the only destructive operation is age-based cleanup.
// =============================================================================

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::{ScanError, ScanResult};
use crate::pit::ids::IdGenerator;

// =============================================================================
// Metadata
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub snapshot_id: String,
    pub entity: String,
    pub data_type: String,
    pub record_count: usize,
    pub stored_at: DateTime<Utc>,
    pub compressed_size: u64,
    /// sha256 hex over the uncompressed canonical JSON.
    pub signature_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    snapshots: Vec<SnapshotMetadata>,
}

// =============================================================================
// Store
// =============================================================================

pub struct PitStore {
    root: PathBuf,
    ids: IdGenerator,
    manifest: Mutex<Manifest>,
}

impl PitStore {
    /// Open (or create) a store rooted at `root`, loading any existing
    /// manifest.
    pub fn open(root: impl AsRef<Path>) -> ScanResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| ScanError::IntegrityFailure(format!("cannot create store root: {e}")))?;

        let manifest_path = root.join("manifest.json");
        let manifest = if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)
                .map_err(|e| ScanError::IntegrityFailure(format!("unreadable manifest: {e}")))?;
            serde_json::from_str(&content)
                .map_err(|e| ScanError::IntegrityFailure(format!("corrupt manifest: {e}")))?
        } else {
            Manifest::default()
        };

        info!(root = %root.display(), snapshots = manifest.snapshots.len(), "PIT store opened");
        Ok(Self {
            root,
            ids: IdGenerator::new(),
            manifest: Mutex::new(manifest),
        })
    }

    // -------------------------------------------------------------------------
    // Store
    // -------------------------------------------------------------------------

    /// Serialize, hash, compress, and atomically persist `payload` under
    /// `entity`. Returns the new snapshot id.
    pub fn store<T: Serialize>(&self, entity: &str, payload: &T) -> ScanResult<String> {
        if entity.is_empty() || entity.contains(['/', '\\', ':']) {
            return Err(ScanError::InvalidInput(format!(
                "invalid entity name '{entity}'"
            )));
        }

        let json = serde_json::to_vec(payload)
            .map_err(|e| ScanError::InvalidInput(format!("unserializable payload: {e}")))?;

        let record_count = match serde_json::from_slice::<serde_json::Value>(&json) {
            Ok(serde_json::Value::Array(items)) => items.len(),
            _ => 1,
        };

        let mut hasher = Sha256::new();
        hasher.update(&json);
        let signature_hash = hex::encode(hasher.finalize());

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .and_then(|_| encoder.finish())
            .map_err(|e| ScanError::IntegrityFailure(format!("gzip failed: {e}")))
            .and_then(|compressed| {
                let id = self.ids.next();
                let entity_dir = self.root.join(entity);
                std::fs::create_dir_all(&entity_dir).map_err(|e| {
                    ScanError::IntegrityFailure(format!("cannot create entity dir: {e}"))
                })?;

                // Atomic write: tmp sibling then rename. Cancellation or a
                // crash leaves no partial `<id>.gz`.
                let final_path = entity_dir.join(format!("{id}.gz"));
                let tmp_path = entity_dir.join(format!("{id}.gz.tmp"));
                std::fs::write(&tmp_path, &compressed)
                    .map_err(|e| ScanError::IntegrityFailure(format!("tmp write failed: {e}")))?;
                std::fs::rename(&tmp_path, &final_path)
                    .map_err(|e| ScanError::IntegrityFailure(format!("rename failed: {e}")))?;

                let meta = SnapshotMetadata {
                    snapshot_id: id.clone(),
                    entity: entity.to_string(),
                    data_type: std::any::type_name::<T>().to_string(),
                    record_count,
                    stored_at: Utc::now(),
                    compressed_size: compressed.len() as u64,
                    signature_hash,
                };

                {
                    let mut manifest = self.manifest.lock();
                    manifest.snapshots.push(meta);
                    self.write_manifest(&manifest)?;
                }

                debug!(id = %id, entity, bytes = compressed.len(), "snapshot stored");
                Ok(id)
            })
    }

    // -------------------------------------------------------------------------
    // Get
    // -------------------------------------------------------------------------

    /// Read and decompress a snapshot into `T`. Corruption (non-gzip data,
    /// bad CRC, hash mismatch) is an integrity failure.
    pub fn get<T: DeserializeOwned>(&self, id: &str) -> ScanResult<T> {
        let meta = self
            .manifest
            .lock()
            .snapshots
            .iter()
            .find(|m| m.snapshot_id == id)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(format!("snapshot '{id}'")))?;

        let path = self.root.join(&meta.entity).join(format!("{id}.gz"));
        let compressed = std::fs::read(&path)
            .map_err(|e| ScanError::NotFound(format!("snapshot file '{}': {e}", path.display())))?;

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        decoder.read_to_end(&mut json).map_err(|e| {
            ScanError::IntegrityFailure(format!("snapshot '{id}' failed to decompress: {e}"))
        })?;

        let mut hasher = Sha256::new();
        hasher.update(&json);
        let actual = hex::encode(hasher.finalize());
        if actual != meta.signature_hash {
            return Err(ScanError::IntegrityFailure(format!(
                "snapshot '{id}' hash mismatch: stored {}, computed {actual}",
                meta.signature_hash
            )));
        }

        serde_json::from_slice(&json).map_err(|e| {
            ScanError::IntegrityFailure(format!("snapshot '{id}' is not valid payload JSON: {e}"))
        })
    }

    // -------------------------------------------------------------------------
    // List / cleanup
    // -------------------------------------------------------------------------

    /// Metadata sorted stored-at descending. An empty entity lists all.
    pub fn list(&self, entity: &str, limit: usize) -> Vec<SnapshotMetadata> {
        let manifest = self.manifest.lock();
        let mut items: Vec<SnapshotMetadata> = manifest
            .snapshots
            .iter()
            .filter(|m| entity.is_empty() || m.entity == entity)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.stored_at.cmp(&a.stored_at).then(b.snapshot_id.cmp(&a.snapshot_id)));
        items.truncate(limit);
        items
    }

    /// Delete snapshots older than `max_age`; returns how many went.
    pub fn cleanup(&self, max_age: Duration) -> ScanResult<usize> {
        let cutoff = Utc::now() - max_age;
        let mut manifest = self.manifest.lock();

        let (expired, kept): (Vec<SnapshotMetadata>, Vec<SnapshotMetadata>) = manifest
            .snapshots
            .drain(..)
            .partition(|m| m.stored_at < cutoff);

        for meta in &expired {
            let path = self
                .root
                .join(&meta.entity)
                .join(format!("{}.gz", meta.snapshot_id));
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(id = %meta.snapshot_id, error = %e, "expired snapshot file already gone");
            }
        }

        manifest.snapshots = kept;
        self.write_manifest(&manifest)?;

        let deleted = expired.len();
        if deleted > 0 {
            info!(deleted, "PIT cleanup complete");
        }
        Ok(deleted)
    }

    fn write_manifest(&self, manifest: &Manifest) -> ScanResult<()> {
        let path = self.root.join("manifest.json");
        let tmp = self.root.join("manifest.json.tmp");
        let content = serde_json::to_string_pretty(manifest)
            .map_err(|e| ScanError::IntegrityFailure(format!("manifest serialize: {e}")))?;
        std::fs::write(&tmp, content)
            .map_err(|e| ScanError::IntegrityFailure(format!("manifest tmp write: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| ScanError::IntegrityFailure(format!("manifest rename: {e}")))?;
        Ok(())
    }
}
