//! File-backed `CacheStore`: one file per logical key under the OS app-data
//! directory, AES-256-GCM encrypted at rest, writes serialized behind a
//! single `Mutex` and committed via temp-file-then-rename.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::cache::CacheStore;
use crate::encryption;
use crate::errors::{Error, Result, StorageError};

/// Rooted at `<app-data>/argus/<storage_prefix>/`, one file per key.
pub struct FileCacheStore {
    root: PathBuf,
    encryption_key: [u8; encryption::KEY_SIZE],
    write_lock: Mutex<()>,
}

impl FileCacheStore {
    /// Create a store rooted under the platform app-data directory.
    ///
    /// `storage_prefix` is sanitized into a directory name (`/` and `:` become `_`)
    /// so a caller-supplied prefix like `"myapp:"` cannot escape the root.
    pub fn new(storage_prefix: &str, encryption_key: [u8; encryption::KEY_SIZE]) -> Result<Self> {
        let base = dirs::data_local_dir().ok_or(StorageError::NoDataDir)?;
        let sanitized: String = storage_prefix
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let root = base.join("argus").join(sanitized);
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, encryption_key, write_lock: Mutex::new(()) })
    }

    /// Construct a store rooted at an explicit directory (used by tests).
    pub fn at_path(root: impl Into<PathBuf>, encryption_key: [u8; encryption::KEY_SIZE]) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, encryption_key, write_lock: Mutex::new(()) })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{file_name}.bin"))
    }
}

#[async_trait::async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        let encryption_key = self.encryption_key;
        tokio::task::spawn_blocking(move || read_encrypted(&path, &encryption_key))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())).into())
            .and_then(|inner| inner)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let value = value.to_vec();
        let encryption_key = self.encryption_key;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        tokio::task::spawn_blocking(move || write_encrypted(&path, &value, &encryption_key))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())).into())
            .and_then(|inner| inner)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e)),
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())).into())
        .and_then(|inner| inner)
    }
}

fn read_encrypted(path: &Path, key: &[u8; encryption::KEY_SIZE]) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(encryption::decrypt_bytes(&bytes, key)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_encrypted(path: &Path, value: &[u8], key: &[u8; encryption::KEY_SIZE]) -> Result<()> {
    let ciphertext = encryption::encrypt_bytes(value, key)?;
    let tmp_path = path.with_extension("bin.tmp");
    std::fs::write(&tmp_path, &ciphertext)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile_like::TempDir, FileCacheStore) {
        let dir = tempfile_like::TempDir::new();
        let key = [7u8; encryption::KEY_SIZE];
        let store = FileCacheStore::at_path(dir.path(), key).unwrap();
        (dir, store)
    }

    /// Minimal scoped-temp-dir helper (no `tempfile` dependency needed for this).
    mod tempfile_like {
        use std::path::{Path, PathBuf};

        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let mut path = std::env::temp_dir();
                let unique = format!(
                    "argus-cache-test-{}-{}",
                    std::process::id(),
                    path.as_os_str().len()
                );
                path.push(unique);
                std::fs::create_dir_all(&path).unwrap();
                TempDir(path)
            }

            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (_dir, store) = test_store();
        store.set("license", b"hello").await.unwrap();
        let value = store.get("license").await.unwrap();
        assert_eq!(value, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let (_dir, store) = test_store();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = test_store();
        store.set("k", b"v").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites_previous_value() {
        let (_dir, store) = test_store();
        store.set("k", b"first").await.unwrap();
        store.set("k", b"second").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn on_disk_bytes_are_not_plaintext() {
        let (dir, store) = test_store();
        store.set("secret", b"plaintext-marker").await.unwrap();
        let raw = std::fs::read(dir.path().join("secret.bin")).unwrap();
        assert!(!raw.windows(b"plaintext-marker".len()).any(|w| w == b"plaintext-marker"));
    }
}
