//! Real shared-memory backing for cross-process streams.
//!
//! A POSIX shm segment for each stream: a
//! file under `/dev/shm` sized to the ring, created by the server, mapped
//! by both server and client. The header stays a process-local
//! [`crate::header::ShmHeader`] (see [`crate::backing`] module docs) — only
//! the sample bytes are shared here.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::AtomicU8;

use memmap2::MmapMut;

use crate::backing::ShmBacking;
use crate::error::ShmError;

/// A POSIX shm-backed region mapped from `/dev/shm/<name>`.
///
/// The workspace-wide `unsafe_code = "deny"` lint is overridden locally for
/// the single cast that reinterprets the mapped `&mut [u8]` as `&[AtomicU8]`
/// — narrowly scoped to this one FFI boundary.
pub struct PosixBacking {
    _mmap: MmapMut,
    data: &'static [AtomicU8],
    path: PathBuf,
}

impl PosixBacking {
    /// Create (or truncate) a shm segment of `len` bytes under `dir` named
    /// `name` and map it.
    pub fn create(dir: &std::path::Path, name: &str, len: usize) -> Result<Self, ShmError> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| ShmError::Mapping {
                name: name.to_string(),
                source,
            })?;
        file.set_len(len as u64).map_err(|source| ShmError::Mapping {
            name: name.to_string(),
            source,
        })?;

        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| ShmError::Mapping {
            name: name.to_string(),
            source,
        })?;

        // SAFETY: `mmap` owns `len` bytes of memory for the lifetime of this
        // struct (it is stored alongside the slice and dropped together).
        // `AtomicU8` has the same size, alignment, and bit-validity as `u8`,
        // so reinterpreting the mapped bytes as atomics is sound as long as
        // every access — in this crate and in the remote process mapping
        // the same segment — goes through an atomic operation, which is the
        // contract `ShmBacking` implementors must uphold.
        #[allow(unsafe_code)]
        let data: &'static [AtomicU8] = unsafe {
            let ptr = mmap.as_mut_ptr().cast::<AtomicU8>();
            std::slice::from_raw_parts(ptr, len)
        };

        Ok(Self {
            _mmap: mmap,
            data,
            path,
        })
    }

    /// Open an existing shm segment previously created by [`Self::create`].
    pub fn open(dir: &std::path::Path, name: &str, len: usize) -> Result<Self, ShmError> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| ShmError::Mapping {
                name: name.to_string(),
                source,
            })?;

        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| ShmError::Mapping {
            name: name.to_string(),
            source,
        })?;

        #[allow(unsafe_code)]
        let data: &'static [AtomicU8] = unsafe {
            let ptr = mmap.as_mut_ptr().cast::<AtomicU8>();
            std::slice::from_raw_parts(ptr, len)
        };

        Ok(Self {
            _mmap: mmap,
            data,
            path,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Remove the backing file from disk. Idempotent.
    pub fn unlink(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl ShmBacking for PosixBacking {
    fn bytes(&self) -> &[AtomicU8] {
        self.data
    }
}

impl Drop for PosixBacking {
    fn drop(&mut self) {
        if let Err(err) = self.unlink() {
            tracing::warn!(path = %self.path.display(), %err, "failed to unlink shm segment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_reopen_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let name = "auralink-test-segment";

        {
            let backing = PosixBacking::create(dir.path(), name, 64).unwrap();
            backing.bytes()[0].store(0x42, std::sync::atomic::Ordering::Relaxed);
        }

        let reopened = PosixBacking::open(dir.path(), name, 64).unwrap();
        assert_eq!(
            reopened.bytes()[0].load(std::sync::atomic::Ordering::Relaxed),
            0x42
        );
    }
}
