//! Memory-mapped container files.
//!
//! A container is a fixed-size file holding raw share or delta payloads,
//! appended byte for byte with no per-write header. The single writable
//! container is mapped read-write; sealed containers are reopened read-only
//! on demand and served through the backend's LRU.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};
use tracing::debug;

use sharevault_proto::ContainerName;

use crate::error::{StorageError, StorageResult};

fn container_path(dir: &Path, name: &ContainerName) -> StorageResult<PathBuf> {
    Ok(dir.join(name.as_str()?))
}

/// The current append target: a read-write mapping of a fixed-size file.
pub struct WritableContainer {
    map: MmapMut,
}

impl WritableContainer {
    /// Create a new container file of exactly `size` bytes and map it
    /// read-write. Refuses to overwrite an existing file.
    pub fn create(dir: &Path, name: &ContainerName, size: usize) -> StorageResult<Self> {
        let path = container_path(dir, name)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::ContainerExists {
                        name: name.to_string(),
                    }
                } else {
                    StorageError::Io(e)
                }
            })?;
        file.set_len(size as u64)?;
        // Safety: the file was just created with this exact length and is
        // only written through this mapping for its writable lifetime.
        let map = unsafe { MmapMut::map_mut(&file)? };
        debug!(container = %name, size, "created writable container");
        Ok(WritableContainer { map })
    }

    /// Size of the mapped region.
    pub fn size(&self) -> usize {
        self.map.len()
    }

    /// Copy `data` into the mapping at `offset`.
    pub fn write_at(&mut self, name: &ContainerName, offset: usize, data: &[u8]) -> StorageResult<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.map.len())
            .ok_or_else(|| StorageError::OutOfBounds {
                name: name.to_string(),
                offset: offset as u64,
                len: data.len(),
                size: self.map.len(),
            })?;
        self.map[offset..end].copy_from_slice(data);
        Ok(())
    }
}

/// A sealed container mapped read-only.
pub struct ReadContainer {
    map: Mmap,
}

impl ReadContainer {
    /// Open an existing container read-only.
    pub fn open(dir: &Path, name: &ContainerName) -> StorageResult<Self> {
        let path = container_path(dir, name)?;
        if !path.exists() {
            return Err(StorageError::ContainerMissing {
                name: name.to_string(),
            });
        }
        let file = File::open(&path)?;
        // Safety: containers are append-only and never truncated after
        // sealing; the mapping stays valid for the life of the handle.
        let map = unsafe { Mmap::map(&file)? };
        Ok(ReadContainer { map })
    }

    /// Size of the mapped region.
    pub fn size(&self) -> usize {
        self.map.len()
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`.
    pub fn read_at(&self, name: &ContainerName, offset: u64, out: &mut [u8]) -> StorageResult<()> {
        let start = usize::try_from(offset).map_err(|_| StorageError::OutOfBounds {
            name: name.to_string(),
            offset,
            len: out.len(),
            size: self.map.len(),
        })?;
        let end = start
            .checked_add(out.len())
            .filter(|&end| end <= self.map.len())
            .ok_or_else(|| StorageError::OutOfBounds {
                name: name.to_string(),
                offset,
                len: out.len(),
                size: self.map.len(),
            })?;
        out.copy_from_slice(&self.map[start..end]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn name(s: &[u8; 16]) -> ContainerName {
        ContainerName(*s)
    }

    #[test]
    fn create_write_reopen_read() {
        let dir = tempdir().unwrap();
        let n = name(b"aaaaaaaaaaaaaaaa");

        let mut writable = WritableContainer::create(dir.path(), &n, 4096).unwrap();
        assert_eq!(writable.size(), 4096);
        writable.write_at(&n, 0, b"hello").unwrap();
        writable.write_at(&n, 100, b"world").unwrap();
        drop(writable);

        let reader = ReadContainer::open(dir.path(), &n).unwrap();
        assert_eq!(reader.size(), 4096);
        let mut out = [0u8; 5];
        reader.read_at(&n, 0, &mut out).unwrap();
        assert_eq!(&out, b"hello");
        reader.read_at(&n, 100, &mut out).unwrap();
        assert_eq!(&out, b"world");
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let n = name(b"aaaaaaaaaaaaaaaa");
        WritableContainer::create(dir.path(), &n, 1024).unwrap();
        assert!(matches!(
            WritableContainer::create(dir.path(), &n, 1024),
            Err(StorageError::ContainerExists { .. })
        ));
    }

    #[test]
    fn rejects_out_of_bounds_access() {
        let dir = tempdir().unwrap();
        let n = name(b"aaaaaaaaaaaaaaaa");
        let mut writable = WritableContainer::create(dir.path(), &n, 64).unwrap();
        assert!(matches!(
            writable.write_at(&n, 60, b"too long"),
            Err(StorageError::OutOfBounds { .. })
        ));
        drop(writable);

        let reader = ReadContainer::open(dir.path(), &n).unwrap();
        let mut out = [0u8; 8];
        assert!(matches!(
            reader.read_at(&n, 60, &mut out),
            Err(StorageError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn missing_container_is_reported() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ReadContainer::open(dir.path(), &name(b"bbbbbbbbbbbbbbbb")),
            Err(StorageError::ContainerMissing { .. })
        ));
    }
}
