//! Content-addressed blob store for raw fetched payloads.
//!
//! Each payload is written once under its hex content hash; fragmentation
//! later reads it back by the same name. Re-writing an existing hash is a
//! no-op (the existing file wins), which is what makes the store safe to
//! share between concurrent process workers.

use std::path::{Path, PathBuf};

use leakscan_shared::{LeakscanError, Result};

/// Write-once-by-content-hash file storage.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (and create if needed) a blob store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| LeakscanError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Path of the blob for `content_hash`.
    pub fn path_for(&self, content_hash: &str) -> PathBuf {
        self.root.join(content_hash)
    }

    /// Store `data` under `content_hash`. Returns `false` if the blob
    /// already existed.
    pub fn write(&self, content_hash: &str, data: &[u8]) -> Result<bool> {
        let path = self.path_for(content_hash);
        if path.exists() {
            return Ok(false);
        }
        std::fs::write(&path, data).map_err(|e| LeakscanError::io(&path, e))?;
        Ok(true)
    }

    /// Read the blob stored under `content_hash`.
    pub fn read(&self, content_hash: &str) -> Result<Vec<u8>> {
        let path = self.path_for(content_hash);
        std::fs::read(&path).map_err(|e| LeakscanError::io(&path, e))
    }

    /// Whether a blob exists for `content_hash`.
    pub fn contains(&self, content_hash: &str) -> bool {
        self.path_for(content_hash).exists()
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leakscan_shared::content_hash;

    fn temp_store() -> BlobStore {
        let dir = std::env::temp_dir().join(format!("leakscan-blob-{}", uuid::Uuid::now_v7()));
        BlobStore::open(dir).expect("open blob store")
    }

    #[test]
    fn write_and_read_roundtrip() {
        let store = temp_store();
        let data = b"AWS_SECRET_ACCESS_KEY=example";
        let hash = content_hash(data);

        assert!(store.write(&hash, data).expect("write"));
        assert!(store.contains(&hash));
        assert_eq!(store.read(&hash).expect("read"), data);

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn write_is_once_only() {
        let store = temp_store();
        let hash = content_hash(b"first");

        assert!(store.write(&hash, b"first").expect("first write"));
        assert!(!store.write(&hash, b"second").expect("second write"));
        // the original content survives
        assert_eq!(store.read(&hash).expect("read"), b"first");

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn read_missing_blob_errors() {
        let store = temp_store();
        assert!(store.read("deadbeef").is_err());
        let _ = std::fs::remove_dir_all(store.root());
    }
}
