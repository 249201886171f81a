//! Blob Storage
//!
//! Key/value byte store for originals, signed artifacts, signature images,
//! generated certificates and temporary QR images.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, Result};

pub trait BlobStore: Send + Sync {
    fn save(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Fails with `Error::FileNotFound` when the key is absent.
    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;
}

/// In-process store, used by tests and short-lived CLI runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read_guard().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BlobStore for MemoryBlobStore {
    fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        self.write_guard().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.read_guard()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::FileNotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.write_guard().remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read_guard().contains_key(key))
    }
}

/// Filesystem store rooted at a directory. Keys map to relative paths.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root_dir: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        if !root_dir.exists() {
            fs::create_dir_all(&root_dir)?;
        }
        Ok(Self { root_dir })
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(Error::validation(format!("invalid blob key: {}", key)));
        }
        Ok(self.root_dir.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.full_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write-then-rename so readers never observe a half-written blob.
        let tmp = path.with_extension("partial");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.full_path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::FileNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.full_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.full_path(key)?.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryBlobStore::new();
        store.save("a/b.json", b"{}").unwrap();
        assert!(store.exists("a/b.json").unwrap());
        assert_eq!(store.read("a/b.json").unwrap(), b"{}");
        store.delete("a/b.json").unwrap();
        assert!(!store.exists("a/b.json").unwrap());
        assert_eq!(store.read("a/b.json").unwrap_err().kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_fs_store_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        store.save("signed/x/1.json", b"data").unwrap();
        assert_eq!(store.read("signed/x/1.json").unwrap(), b"data");
        store.delete("signed/x/1.json").unwrap();
        store.delete("signed/x/1.json").unwrap();
        assert_eq!(
            store.read("signed/x/1.json").unwrap_err().kind(),
            ErrorKind::FileNotFound
        );
    }

    #[test]
    fn test_fs_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(store.save("../outside", b"x").is_err());
        assert!(store.save("/etc/passwd", b"x").is_err());
        assert!(store.read("").is_err());
    }
}
