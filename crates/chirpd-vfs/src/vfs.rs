//! Backend trait the protocol layer drives. One implementation talks to the
//! local disk; tests may substitute their own.

use crate::error::FsResult;
use crate::types::{FileStat, FsStat, OpenFlags};

/// An open file handle returned by [`Vfs::open`].
///
/// All I/O is positioned; the protocol carries explicit offsets so there is
/// no cursor to share between commands. Handles cross task boundaries, so
/// implementations must be shareable.
pub trait VfsFile: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`. Returns the byte count,
    /// zero at end of file.
    fn pread(&self, buf: &mut [u8], offset: i64) -> FsResult<usize>;

    /// Writes `buf` at `offset`, returning the byte count written.
    fn pwrite(&self, buf: &[u8], offset: i64) -> FsResult<usize>;

    /// Metadata for the open file.
    fn fstat(&self) -> FsResult<FileStat>;

    /// Truncates or extends the open file to `length` bytes.
    fn ftruncate(&self, length: i64) -> FsResult<()>;

    /// Flushes file data and metadata to stable storage.
    fn fsync(&self) -> FsResult<()>;

    /// Changes permission bits on the open file.
    fn fchmod(&self, mode: i64) -> FsResult<()>;
}

/// Storage backend. Paths are virtual: already sanitized, absolute, and
/// rooted at the export root the backend was built with.
pub trait Vfs: Send + Sync {
    /// Opens a file, creating it per `flags`, with `mode` applied on create.
    fn open(&self, path: &str, flags: OpenFlags, mode: i64) -> FsResult<Box<dyn VfsFile>>;

    /// Metadata, following symlinks.
    fn stat(&self, path: &str) -> FsResult<FileStat>;

    /// Metadata of the link itself.
    fn lstat(&self, path: &str) -> FsResult<FileStat>;

    /// Filesystem totals for the volume holding `path`.
    fn statfs(&self, path: &str) -> FsResult<FsStat>;

    /// Checks accessibility per `amode` (the F_OK/R_OK/W_OK/X_OK bits).
    fn access(&self, path: &str, amode: i64) -> FsResult<()>;

    /// Lists entry names in a directory, including dot entries.
    fn list_dir(&self, path: &str) -> FsResult<Vec<String>>;

    /// Creates a directory with the given permission bits.
    fn mkdir(&self, path: &str, mode: i64) -> FsResult<()>;

    /// Removes an empty directory.
    fn rmdir(&self, path: &str) -> FsResult<()>;

    /// Removes a file or directory tree recursively.
    fn rmall(&self, path: &str) -> FsResult<()>;

    /// Removes a file or symlink.
    fn unlink(&self, path: &str) -> FsResult<()>;

    /// Renames within the backend.
    fn rename(&self, from: &str, to: &str) -> FsResult<()>;

    /// Creates a hard link at `to` pointing at `from`.
    fn link(&self, from: &str, to: &str) -> FsResult<()>;

    /// Creates a symbolic link at `to` with target `from`.
    fn symlink(&self, from: &str, to: &str) -> FsResult<()>;

    /// Reads a symlink target.
    fn readlink(&self, path: &str) -> FsResult<String>;

    /// Truncates a file by path.
    fn truncate(&self, path: &str, length: i64) -> FsResult<()>;

    /// Changes permission bits by path.
    fn chmod(&self, path: &str, mode: i64) -> FsResult<()>;

    /// Sets access and modification times (seconds since the epoch).
    fn utime(&self, path: &str, atime: i64, mtime: i64) -> FsResult<()>;

    /// Reads a whole file into memory. Intended for small control files.
    fn read_file(&self, path: &str) -> FsResult<Vec<u8>>;

    /// Atomically replaces a file's contents. Intended for small control
    /// files; implementations write a sibling and rename over.
    fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()>;

    /// Size of a regular file, following symlinks.
    fn file_size(&self, path: &str) -> FsResult<i64> {
        Ok(self.stat(path)?.size)
    }

    /// Content digest of a regular file.
    fn hash(&self, path: &str) -> FsResult<[u8; 32]>;
}
