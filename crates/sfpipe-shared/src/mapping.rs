//! File and shared-memory mappings
//!
//! A session owns at most one [`FileMapping`] (read-only view of the served
//! file) and one [`SharedRegion`] (read-write POSIX shared memory the client
//! reads results from). Both release their resources on drop: the file
//! mapping is unmapped, the shared region is unmapped and its name unlinked.

use crate::translate::FileRange;
use memmap2::{Mmap, MmapMut, MmapOptions};
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::ffi::{CStr, CString};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while establishing or using a mapping
#[derive(Debug, Error)]
pub enum MappingError {
    /// The file could not be opened or inspected
    #[error("cannot open {path:?}: {source}")]
    Open {
        /// Requested path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The path names a directory, FIFO, device or socket
    #[error("{0:?} is not a regular file")]
    NotAFile(PathBuf),

    /// `mmap` failed
    #[error("cannot map {target}: {source}")]
    Map {
        /// What was being mapped
        target: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// `shm_open` or `ftruncate` failed
    #[error("cannot create shared memory {name:?}: {source}")]
    SharedMemory {
        /// Object name
        name: String,
        /// Underlying errno
        #[source]
        source: nix::Error,
    },

    /// Shared memory names are `/` followed by at least one non-slash byte
    #[error("{0:?} is not a valid shared memory name")]
    InvalidName(String),

    /// A copy or store falls outside a mapping
    #[error("bytes {start}..{end} fall outside a {size}-byte mapping")]
    OutOfRange {
        /// First byte
        start: usize,
        /// One past the last byte
        end: usize,
        /// Length of the mapping
        size: usize,
    },
}

/// Read-only mapping of a whole file
pub struct FileMapping {
    path: PathBuf,
    // empty files cannot be mmapped
    map: Option<Mmap>,
}

impl FileMapping {
    /// Open `path` read-only and map all of it
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MappingError> {
        let path = path.as_ref();
        let open_error = |source| MappingError::Open {
            path: path.to_path_buf(),
            source,
        };

        if !std::fs::metadata(path).map_err(open_error)?.is_file() {
            return Err(MappingError::NotAFile(path.to_path_buf()));
        }

        // a FIFO swapped in after the check must not block the open
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)
            .map_err(open_error)?;
        let meta = file.metadata().map_err(open_error)?;
        if !meta.is_file() {
            return Err(MappingError::NotAFile(path.to_path_buf()));
        }
        let len = meta.len();

        let map = if len == 0 {
            None
        } else {
            // SAFETY: Mmap::map is unsafe because the file may be truncated or
            // modified by another process while mapped. Served files are treated
            // as immutable inputs, the mapping is only ever read through
            // bounds-checked slices, and it is dropped with the session.
            let map = unsafe { Mmap::map(&file) }.map_err(|source| MappingError::Map {
                target: path.display().to_string(),
                source,
            })?;
            Some(map)
        };

        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    /// Path the mapping was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole file
    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    /// File length in bytes
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    /// True for a zero-length file
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FileMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMapping")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

/// Named POSIX shared memory, mapped read-write
pub struct SharedRegion {
    name: CString,
    map: MmapMut,
}

impl SharedRegion {
    /// Create (or re-create) the object `name` with exactly `size` bytes
    ///
    /// Any object already carrying the name is unlinked first, so the region
    /// always starts zero-filled. `name` must look like `/something` with no
    /// further slashes.
    pub fn create(name: &str, size: usize) -> Result<Self, MappingError> {
        let c_name = shm_name(name)?;

        // ENOENT is the common case
        let _ = shm_unlink(c_name.as_c_str());

        let fd = shm_open(
            c_name.as_c_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IWGRP | Mode::S_IROTH,
        )
        .map_err(|source| MappingError::SharedMemory {
            name: name.to_string(),
            source,
        })?;

        if let Err(source) = ftruncate(&fd, size as i64) {
            let _ = shm_unlink(c_name.as_c_str());
            return Err(MappingError::SharedMemory {
                name: name.to_string(),
                source,
            });
        }

        let file = File::from(fd);

        // SAFETY: the object was just sized to `size` bytes and is only resized
        // by this session. Other processes may write to it concurrently, which
        // is the point of shared memory; we never hand out references that
        // outlive a single copy.
        let map = match unsafe { MmapOptions::new().len(size).map_mut(&file) } {
            Ok(map) => map,
            Err(source) => {
                let _ = shm_unlink(c_name.as_c_str());
                return Err(MappingError::Map {
                    target: format!("shared memory {name:?}"),
                    source,
                });
            }
        };

        Ok(Self { name: c_name, map })
    }

    /// Name the object was created under
    pub fn name(&self) -> &CStr {
        &self.name
    }

    /// Current contents of the region
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Region size in bytes
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True for a zero-sized region
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Copy `src` to the start of the region
    pub fn fill_from(&mut self, src: &[u8]) -> Result<(), MappingError> {
        let size = self.len();
        let dest = self
            .map
            .get_mut(..src.len())
            .ok_or(MappingError::OutOfRange {
                start: 0,
                end: src.len(),
                size,
            })?;
        dest.copy_from_slice(src);
        Ok(())
    }

    /// Store `value` little-endian at `offset`
    pub fn write_word(&mut self, offset: u32, value: u32) -> Result<(), MappingError> {
        let start = offset as usize;
        let end = start + 4;
        let size = self.len();
        let dest = self
            .map
            .get_mut(start..end)
            .ok_or(MappingError::OutOfRange { start, end, size })?;
        dest.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        let _ = shm_unlink(self.name.as_c_str());
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

/// Copy a translated file range to the start of the shared region
pub fn copy_into_shared(
    region: &mut SharedRegion,
    file: &FileMapping,
    range: FileRange,
) -> Result<(), MappingError> {
    let src = file
        .bytes()
        .get(range.as_range())
        .ok_or(MappingError::OutOfRange {
            start: range.start,
            end: range.end(),
            size: file.len(),
        })?;
    region.fill_from(src)
}

fn shm_name(name: &str) -> Result<CString, MappingError> {
    let valid = name.len() > 1 && name.starts_with('/') && !name[1..].contains('/');
    if !valid {
        return Err(MappingError::InvalidName(name.to_string()));
    }
    CString::new(name).map_err(|_| MappingError::InvalidName(name.to_string()))
}
