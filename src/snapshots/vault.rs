//! File-backed storage for snapshot blobs.
//!
//! Blobs are content-addressed by SHA-256 digest, one file per blob, with
//! a small framed header and a CRC-32 over the content. The vault
//! directory is guarded by an advisory lock so two processes cannot share
//! it.

use crate::error::{CoreError, Result};
use crate::types::BlobDigest;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for vault blob files.
const VAULT_MAGIC: &[u8; 4] = b"SNP\0";

/// Current blob format version.
const VAULT_VERSION: u8 = 1;

/// Stores snapshot blobs on disk, keyed by content digest.
#[derive(Debug)]
pub struct SnapshotVault {
    path: PathBuf,
    _lock_file: File,
}

impl SnapshotVault {
    /// Open or create a vault at the given directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path.join(".lock"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| CoreError::VaultLocked)?;

        Ok(Self {
            path,
            _lock_file: lock_file,
        })
    }

    /// Write a blob, returning its digest.
    ///
    /// Writing the same content twice is a no-op. The file is written to a
    /// temporary name and renamed into place, so a crash mid-write never
    /// leaves a readable partial blob under the digest key.
    pub fn put(&self, content: &[u8]) -> Result<BlobDigest> {
        let digest = BlobDigest::from_bytes(content);
        let blob_path = self.blob_path(&digest);
        if blob_path.exists() {
            return Ok(digest);
        }

        let tmp_path = blob_path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(VAULT_MAGIC)?;
            file.write_all(&[VAULT_VERSION])?;
            file.write_all(&crc32fast::hash(content).to_le_bytes())?;
            file.write_all(&(content.len() as u64).to_le_bytes())?;
            file.write_all(content)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &blob_path)?;

        Ok(digest)
    }

    /// Read a blob back, verifying framing, checksum, and digest.
    pub fn get(&self, digest: &BlobDigest) -> Result<Vec<u8>> {
        let blob_path = self.blob_path(digest);
        if !blob_path.exists() {
            return Err(CoreError::Corruption(format!(
                "snapshot blob {} missing from vault",
                digest
            )));
        }

        let mut file = File::open(&blob_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != VAULT_MAGIC {
            return Err(CoreError::InvalidFormat("invalid blob magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != VAULT_VERSION {
            return Err(CoreError::InvalidFormat(format!(
                "unsupported blob version: {}",
                version[0]
            )));
        }

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut content = vec![0u8; len];
        file.read_exact(&mut content)?;

        let computed = crc32fast::hash(&content);
        if computed != stored_checksum {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed,
            });
        }

        let actual = BlobDigest::from_bytes(&content);
        if actual != *digest {
            return Err(CoreError::Corruption(format!(
                "blob digest mismatch: expected {}, got {}",
                digest, actual
            )));
        }

        Ok(content)
    }

    /// Whether a blob exists.
    pub fn exists(&self, digest: &BlobDigest) -> bool {
        self.blob_path(digest).exists()
    }

    /// Delete a blob. Deleting an absent blob is a no-op.
    pub fn delete(&self, digest: &BlobDigest) -> Result<()> {
        let blob_path = self.blob_path(digest);
        if blob_path.exists() {
            fs::remove_file(&blob_path)?;
        }
        Ok(())
    }

    fn blob_path(&self, digest: &BlobDigest) -> PathBuf {
        self.path.join(format!("{}.snap", digest.to_hex()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let vault = SnapshotVault::open(dir.path().join("vault")).unwrap();

        let digest = vault.put(b"exported project tree").unwrap();
        assert!(vault.exists(&digest));
        assert_eq!(vault.get(&digest).unwrap(), b"exported project tree");
    }

    #[test]
    fn test_put_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let vault = SnapshotVault::open(dir.path().join("vault")).unwrap();

        let a = vault.put(b"same bytes").unwrap();
        let b = vault.put(b"same bytes").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_delete_then_get_reports_missing() {
        let dir = TempDir::new().unwrap();
        let vault = SnapshotVault::open(dir.path().join("vault")).unwrap();

        let digest = vault.put(b"ephemeral").unwrap();
        vault.delete(&digest).unwrap();
        vault.delete(&digest).unwrap(); // idempotent

        assert!(vault.get(&digest).is_err());
    }

    #[test]
    fn test_corrupted_blob_is_detected() {
        let dir = TempDir::new().unwrap();
        let vault = SnapshotVault::open(dir.path().join("vault")).unwrap();

        let digest = vault.put(b"pristine content").unwrap();

        // Flip a content byte on disk.
        let blob_path = dir
            .path()
            .join("vault")
            .join(format!("{}.snap", digest.to_hex()));
        let mut bytes = fs::read(&blob_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&blob_path, bytes).unwrap();

        let err = vault.get(&digest).unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_second_open_of_locked_vault_fails() {
        let dir = TempDir::new().unwrap();
        let _vault = SnapshotVault::open(dir.path().join("vault")).unwrap();

        let err = SnapshotVault::open(dir.path().join("vault")).unwrap_err();
        assert!(matches!(err, CoreError::VaultLocked));
    }
}
