//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A single-file storage backend.
///
/// - `flush()` calls `File::flush()`
/// - `sync()` calls `File::sync_all()`
/// - `replace()` writes a sibling `.compact` file, syncs it and renames it
///   over the log
///
/// [`open_exclusive`](Self::open_exclusive) additionally takes an advisory
/// lock so only one process appends to a subscription log at a time. The lock
/// is released when the backend is dropped.
///
/// # Example
///
/// ```no_run
/// use subsync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open_exclusive(Path::new("subscriptions.log")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
    locked: bool,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path without locking.
    ///
    /// Read-only tools (the CLI's `inspect` and `verify`) use this.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
            locked: false,
        })
    }

    /// Opens or creates the file and takes an exclusive advisory lock on it.
    ///
    /// Parent directories are created when missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another handle holds the lock.
    pub fn open_exclusive(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut backend = Self::open(path)?;
        if backend.file.read().try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: path.display().to_string(),
            });
        }
        backend.locked = true;
        Ok(backend)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if this handle holds the exclusive lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn replacement_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".compact");
        PathBuf::from(name)
    }

    /// Writes `data` to the replacement file and makes it durable.
    fn write_replacement(&self, temp_path: &Path, data: &[u8]) -> StorageResult<File> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)?;
        if self.locked && file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: temp_path.display().to_string(),
            });
        }
        file.write_all(data)?;
        file.sync_all()?;
        Ok(file)
    }
}

/// Makes a rename inside the log's directory durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

/// NTFS journals metadata updates; directories cannot be synced.
#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> StorageResult<()> {
    Ok(())
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        if data.is_empty() {
            return Ok(offset);
        }

        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let temp_path = self.replacement_path();
        let replacement = match self.write_replacement(&temp_path, data) {
            Ok(file) => file,
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                return Err(e);
            }
        };
        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }

        // The old handle, and with it the old lock, goes away here.
        *self.file.write() = replacement;
        *self.size.write() = data.len() as u64;
        sync_parent_dir(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subs.log");

        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_at(0, 11).unwrap(), b"hello world");
        assert!(matches!(
            backend.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subs.log");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 10);
        assert_eq!(backend.read_at(0, 10).unwrap(), b"persistent");
    }

    #[test]
    fn exclusive_open_creates_dirs_and_locks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("subs.log");

        let first = FileBackend::open_exclusive(&path).unwrap();
        assert!(first.is_locked());
        assert!(path.exists());

        let second = FileBackend::open_exclusive(&path);
        assert!(matches!(second, Err(StorageError::Locked { .. })));

        drop(first);
        assert!(FileBackend::open_exclusive(&path).is_ok());
    }

    #[test]
    fn replace_swaps_the_file_and_keeps_the_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subs.log");

        let mut backend = FileBackend::open_exclusive(&path).unwrap();
        backend.append(b"a long log with many records").unwrap();
        backend.replace(b"short").unwrap();

        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(backend.read_at(0, 5).unwrap(), b"short");
        assert_eq!(backend.append(b"!").unwrap(), 5);
        assert!(!dir.path().join("subs.log.compact").exists());
        assert!(matches!(
            FileBackend::open_exclusive(&path),
            Err(StorageError::Locked { .. })
        ));

        drop(backend);
        assert_eq!(std::fs::read(&path).unwrap(), b"short!");
    }

    #[test]
    fn failed_replace_keeps_the_old_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subs.log");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"records").unwrap();
        // A directory where the replacement file should go makes the write fail.
        std::fs::create_dir(dir.path().join("subs.log.compact")).unwrap();

        assert!(backend.replace(b"other").is_err());
        assert_eq!(backend.size().unwrap(), 7);
        assert_eq!(std::fs::read(&path).unwrap(), b"records");
    }

    #[test]
    fn truncate_shrinks_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subs.log");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello world").unwrap();
        backend.truncate(5).unwrap();

        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 5);
        assert!(backend.truncate(50).is_err());
    }
}
