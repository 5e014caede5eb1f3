#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pocket-store-fs** – Filesystem cache tier for Pocket.
//!
//! Entries live in a human-navigable directory tree: one directory per
//! sanitised function name, one subdirectory per fingerprint prefix, holding
//! a textual `meta.json` and an opaque `value.bin`. Writes go to temp
//! siblings and are renamed into place, value first and metadata last, so a
//! concurrent reader observes a complete entry or none at all. Writes are
//! content-addressed and idempotent; no file locking is needed.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::warn;

use pocket_core::{EntryMeta, EntryPath, EntryStore, StoreError, StoredEntry};

/// Textual metadata file, parseable without loading the blob.
pub const META_FILE: &str = "meta.json";

/// Opaque value blob written by the configured codec.
pub const VALUE_FILE: &str = "value.bin";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

//─────────────────────────────
//  Filesystem store
//─────────────────────────────

/// A durable entry store rooted at a base cache directory.
///
/// Construction performs no i/o; directories appear on first write, so a
/// store can be pointed at a path that does not exist yet.
#[derive(Debug, Clone)]
pub struct FsStore {
    base: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `base`.
    pub fn open(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The base cache directory this store owns.
    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    fn entry_dir(&self, path: &EntryPath) -> PathBuf {
        self.base.join(path.relative())
    }

    /// Write bytes to a temp sibling, then rename into the final name.
    fn write_atomic(dir: &Path, final_name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".{final_name}.tmp.{}.{seq}", std::process::id()));
        let target = dir.join(final_name);
        fs::write(&tmp, bytes).map_err(|e| StoreError::io(tmp.display(), e))?;
        fs::rename(&tmp, &target).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::io(target.display(), e)
        })
    }

    /// Read one entry directory into a [`StoredEntry`], if it is complete.
    fn read_entry_dir(fn_dir: &str, fp_dir: &str, dir: &Path) -> Option<StoredEntry> {
        let meta_path = dir.join(META_FILE);
        let meta_bytes = match fs::read(&meta_path) {
            Ok(b) => b,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %meta_path.display(), error = %e, "skipping unreadable entry");
                }
                return None;
            }
        };
        let meta: EntryMeta = match serde_json::from_slice(&meta_bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %meta_path.display(), error = %e, "skipping corrupt entry metadata");
                return None;
            }
        };
        let value_len = match fs::metadata(dir.join(VALUE_FILE)) {
            Ok(m) => m.len(),
            Err(_) => {
                warn!(path = %dir.display(), "skipping half-written entry without value blob");
                return None;
            }
        };
        Some(StoredEntry {
            path: EntryPath::from_segments(fn_dir, fp_dir),
            meta,
            disk_bytes: meta_bytes.len() as u64 + value_len,
        })
    }
}

#[async_trait]
impl EntryStore for FsStore {
    async fn read(&self, path: &EntryPath) -> Result<Option<(EntryMeta, Vec<u8>)>, StoreError> {
        let dir = self.entry_dir(path);
        let meta_path = dir.join(META_FILE);
        let meta_bytes = match fs::read(&meta_path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(meta_path.display(), e)),
        };
        let meta: EntryMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| StoreError::corrupt(meta_path.display(), e))?;

        let value_path = dir.join(VALUE_FILE);
        let value = match fs::read(&value_path) {
            Ok(b) => b,
            // Metadata without a blob is a half-written entry, not an error.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(value_path.display(), e)),
        };
        Ok(Some((meta, value)))
    }

    async fn write(
        &self,
        path: &EntryPath,
        meta: &EntryMeta,
        value: &[u8],
    ) -> Result<(), StoreError> {
        let dir = self.entry_dir(path);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(dir.display(), e))?;

        let meta_bytes = serde_json::to_vec_pretty(meta)
            .map_err(|e| StoreError::corrupt(dir.display(), e))?;

        // Value first, metadata last: metadata presence marks completeness.
        Self::write_atomic(&dir, VALUE_FILE, value)?;
        Self::write_atomic(&dir, META_FILE, &meta_bytes)?;
        Ok(())
    }

    async fn delete(&self, path: &EntryPath) -> Result<bool, StoreError> {
        let dir = self.entry_dir(path);
        let mut removed = false;
        // Metadata first so a concurrent reader stops seeing the entry
        // before the blob disappears underneath it.
        for name in [META_FILE, VALUE_FILE] {
            let file = dir.join(name);
            match fs::remove_file(&file) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(file.display(), e)),
            }
        }
        // Best-effort pruning of now-empty directories.
        let _ = fs::remove_dir(&dir);
        if let Some(parent) = dir.parent() {
            let _ = fs::remove_dir(parent);
        }
        Ok(removed)
    }

    async fn enumerate(&self, fn_prefix: Option<&str>) -> Result<Vec<StoredEntry>, StoreError> {
        let mut entries = Vec::new();
        let fn_dirs = match fs::read_dir(&self.base) {
            Ok(iter) => iter,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(StoreError::io(self.base.display(), e)),
        };
        for fn_dir in fn_dirs.flatten() {
            if !fn_dir.path().is_dir() {
                continue;
            }
            let fn_name = fn_dir.file_name().to_string_lossy().into_owned();
            if let Some(prefix) = fn_prefix {
                if !fn_name.starts_with(prefix) {
                    continue;
                }
            }
            let fp_dirs = match fs::read_dir(fn_dir.path()) {
                Ok(iter) => iter,
                Err(e) => {
                    warn!(path = %fn_dir.path().display(), error = %e, "skipping unreadable cache directory");
                    continue;
                }
            };
            for fp_dir in fp_dirs.flatten() {
                if !fp_dir.path().is_dir() {
                    continue;
                }
                let fp_name = fp_dir.file_name().to_string_lossy().into_owned();
                if let Some(entry) = Self::read_entry_dir(&fn_name, &fp_name, &fp_dir.path()) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    async fn nuke(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.base) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(self.base.display(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pocket_core::Fingerprint;

    fn sample_meta(fn_name: &str, canonical: &str) -> (EntryMeta, EntryPath) {
        let fp = Fingerprint::from_canonical(canonical);
        let meta = EntryMeta {
            fn_name: fn_name.to_string(),
            id: canonical.to_string(),
            fingerprint: fp,
            encoder_version: "pocket-msgpack/1".to_string(),
            created_at: Utc::now(),
            args_summary: vec!["7".to_string()],
        };
        let path = EntryPath::for_call(fn_name, &fp, 120);
        (meta, path)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path());
        let (meta, path) = sample_meta("stats/mean", "(stats/mean 7)");

        store.write(&path, &meta, b"blob-bytes").await.unwrap();
        let (read_meta, read_value) = store.read(&path).await.unwrap().unwrap();
        assert_eq!(read_meta, meta);
        assert_eq!(read_value, b"blob-bytes");
    }

    #[tokio::test]
    async fn missing_entries_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path());
        let (_, path) = sample_meta("stats/mean", "(stats/mean 8)");
        assert!(store.read(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn half_written_entries_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path());
        let (meta, path) = sample_meta("stats/mean", "(stats/mean 9)");

        // Metadata present, blob missing: treat as absent, not as an error.
        let entry_dir = dir.path().join(path.relative());
        fs::create_dir_all(&entry_dir).unwrap();
        fs::write(
            entry_dir.join(META_FILE),
            serde_json::to_vec_pretty(&meta).unwrap(),
        )
        .unwrap();
        assert!(store.read(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_metadata_is_a_typed_error_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path());
        let (_, path) = sample_meta("stats/mean", "(stats/mean 10)");

        let entry_dir = dir.path().join(path.relative());
        fs::create_dir_all(&entry_dir).unwrap();
        fs::write(entry_dir.join(META_FILE), b"not json").unwrap();
        fs::write(entry_dir.join(VALUE_FILE), b"blob").unwrap();

        let err = store.read(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn enumerate_skips_corrupt_and_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path());

        let (meta_a, path_a) = sample_meta("stats/mean", "(stats/mean 1)");
        let (meta_b, path_b) = sample_meta("train/fit", "(train/fit 1)");
        store.write(&path_a, &meta_a, b"a").await.unwrap();
        store.write(&path_b, &meta_b, b"b").await.unwrap();

        // A corrupt sibling entry is skipped, never raised.
        let corrupt_dir = dir.path().join("stats_mean").join("deadbeefdeadbeef");
        fs::create_dir_all(&corrupt_dir).unwrap();
        fs::write(corrupt_dir.join(META_FILE), b"not json").unwrap();
        fs::write(corrupt_dir.join(VALUE_FILE), b"x").unwrap();

        let all = store.enumerate(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let stats_only = store.enumerate(Some("stats_mean")).await.unwrap();
        assert_eq!(stats_only.len(), 1);
        assert_eq!(stats_only[0].meta.fn_name, "stats/mean");
        assert!(stats_only[0].disk_bytes > 0);
    }

    #[tokio::test]
    async fn delete_removes_entry_and_prunes_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path());
        let (meta, path) = sample_meta("stats/mean", "(stats/mean 11)");

        store.write(&path, &meta, b"blob").await.unwrap();
        assert!(store.delete(&path).await.unwrap());
        assert!(store.read(&path).await.unwrap().is_none());
        assert!(!store.delete(&path).await.unwrap());
        assert!(!dir.path().join(path.relative()).exists());
    }

    #[tokio::test]
    async fn rewrite_replaces_entry_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path());
        let (meta, path) = sample_meta("stats/mean", "(stats/mean 12)");

        store.write(&path, &meta, b"first").await.unwrap();
        store.write(&path, &meta, b"second").await.unwrap();
        let (_, value) = store.read(&path).await.unwrap().unwrap();
        assert_eq!(value, b"second");
    }

    #[tokio::test]
    async fn nuke_removes_everything_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cache");
        let store = FsStore::open(&base);
        let (meta, path) = sample_meta("stats/mean", "(stats/mean 13)");

        store.write(&path, &meta, b"blob").await.unwrap();
        store.nuke().await.unwrap();
        assert!(!base.exists());
        store.nuke().await.unwrap();
        assert!(store.enumerate(None).await.unwrap().is_empty());
    }
}
