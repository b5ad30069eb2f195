// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Plain file access under the boundary's storage root.
//!
//! ## Security Note
//!
//! Under Gramine the storage root is mounted as `type = "encrypted"`, so
//! files written here (the master secret, audit logs) are encrypted and
//! bound to the enclave identity by the runtime. Records that need
//! per-record authentication go through [`super::SealedStore`] instead.
//!
//! In simulation mode these files are ordinary host files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use zeroize::Zeroizing;

use super::{StoragePaths, StorageError, StorageResult};
use crate::crypto::random_bytes;

/// Length of a freshly generated master secret.
pub const MASTER_SECRET_LEN: usize = 32;

/// File operations rooted at a boundary instance's storage directory.
#[derive(Debug, Clone)]
pub struct BoundaryFs {
    paths: StoragePaths,
    initialized: bool,
}

impl BoundaryFs {
    /// Does NOT create any directories. Call `initialize()` first.
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            initialized: false,
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Create the directory structure. Safe to call multiple times.
    pub fn initialize(&mut self) -> StorageResult<()> {
        let dirs = [
            self.paths.root().to_path_buf(),
            self.paths.platform_dir(),
            self.paths.audit_dir(),
        ];

        for dir in dirs {
            fs::create_dir_all(&dir).map_err(unavailable)?;
        }

        self.initialized = true;
        Ok(())
    }

    /// Write-read-delete probe of the storage root.
    pub fn health_check(&self) -> StorageResult<()> {
        self.ensure_initialized()?;

        let test_file = self.paths.root().join(".health_check");
        let test_data = b"health_check_data";

        fs::write(&test_file, test_data)?;
        let read_data = fs::read(&test_file)?;
        fs::remove_file(&test_file)?;

        if read_data != test_data {
            return Err(StorageError::IntegrityViolation(
                "health check data mismatch".to_string(),
            ));
        }
        Ok(())
    }

    /// Load the platform master secret, creating it on first start.
    pub fn load_or_create_master_secret(&self) -> StorageResult<Zeroizing<Vec<u8>>> {
        self.ensure_initialized()?;
        let path = self.paths.master_secret();

        match self.read_raw(&path) {
            Ok(secret) if secret.len() == MASTER_SECRET_LEN => Ok(Zeroizing::new(secret)),
            Ok(mut secret) => {
                let len = secret.len();
                zeroize::Zeroize::zeroize(&mut secret);
                Err(StorageError::IntegrityViolation(format!(
                    "master secret has unexpected length {len}"
                )))
            }
            Err(StorageError::NotFound(_)) => {
                let secret = Zeroizing::new(random_bytes(MASTER_SECRET_LEN)?);
                self.write_raw(&path, &secret)?;
                tracing::info!("Generated new platform master secret");
                Ok(secret)
            }
            Err(e) => Err(e),
        }
    }

    /// Write raw bytes (atomic write via rename).
    pub fn write_raw(&self, path: impl AsRef<Path>, data: &[u8]) -> StorageResult<()> {
        self.ensure_initialized()?;
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(data)?;
            file.flush()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn read_raw(&self, path: impl AsRef<Path>) -> StorageResult<Vec<u8>> {
        self.ensure_initialized()?;

        let mut file = File::open(path.as_ref()).map_err(|e| not_found_or(e, path.as_ref()))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Append one line, creating the file if needed.
    pub fn append_line(&self, path: impl AsRef<Path>, line: &str) -> StorageResult<()> {
        self.ensure_initialized()?;
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    /// Uses `File::open()` instead of `Path::exists()` because Gramine's
    /// encrypted filesystem can fail `stat()` on encrypted files.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        File::open(path.as_ref()).is_ok()
    }

    pub fn delete(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        self.ensure_initialized()?;
        fs::remove_file(path.as_ref()).map_err(|e| not_found_or(e, path.as_ref()))?;
        Ok(())
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }
}

fn not_found_or(err: io::Error, path: &Path) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(path.display().to_string())
    } else {
        StorageError::Io(err)
    }
}

fn unavailable(err: io::Error) -> StorageError {
    StorageError::Unavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BoundaryFs) {
        let temp = TempDir::new().unwrap();
        let mut fs = BoundaryFs::new(StoragePaths::new(temp.path()));
        fs.initialize().unwrap();
        (temp, fs)
    }

    #[test]
    fn initialize_creates_directories() {
        let (_temp, fs) = setup();
        assert!(fs.paths().platform_dir().exists());
        assert!(fs.paths().audit_dir().exists());
    }

    #[test]
    fn write_and_read_raw() {
        let (_temp, fs) = setup();
        let data = b"raw test data with\nnewlines\nand bytes: \x00\x01\x02";
        let path = fs.paths().root().join("nested").join("blob.bin");
        fs.write_raw(&path, data).unwrap();
        assert_eq!(fs.read_raw(&path).unwrap(), data);
    }

    #[test]
    fn append_line_accumulates() {
        let (_temp, fs) = setup();
        let path = fs.paths().audit_events_file("2026-01-01");
        fs.append_line(&path, "one").unwrap();
        fs.append_line(&path, "two").unwrap();
        assert_eq!(fs.read_raw(&path).unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn master_secret_is_stable_across_loads() {
        let (temp, fs) = setup();
        let first = fs.load_or_create_master_secret().unwrap();
        assert_eq!(first.len(), MASTER_SECRET_LEN);

        let mut reopened = BoundaryFs::new(StoragePaths::new(temp.path()));
        reopened.initialize().unwrap();
        let second = reopened.load_or_create_master_secret().unwrap();
        assert_eq!(*first, *second);
    }

    #[test]
    fn truncated_master_secret_is_rejected() {
        let (_temp, fs) = setup();
        fs.write_raw(fs.paths().master_secret(), b"short").unwrap();
        assert!(matches!(
            fs.load_or_create_master_secret(),
            Err(StorageError::IntegrityViolation(_))
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_temp, fs) = setup();
        let path = fs.paths().root().join("absent");
        assert!(!fs.exists(&path));
        assert!(matches!(fs.read_raw(&path), Err(StorageError::NotFound(_))));
        assert!(matches!(fs.delete(&path), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn health_check_works() {
        let (_temp, fs) = setup();
        fs.health_check().expect("health check should pass");
    }

    #[test]
    fn uninitialized_fs_returns_error() {
        let fs = BoundaryFs::new(StoragePaths::new("/tmp/never-init"));
        assert!(matches!(
            fs.read_raw("/tmp/any.bin"),
            Err(StorageError::NotInitialized)
        ));
    }
}
