//! Local-disk backend: virtual paths map under an export root directory.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::error::{FsError, FsResult};
use crate::types::{FileStat, FsStat, OpenFlags};
use crate::vfs::{Vfs, VfsFile};

/// Backend serving a directory tree on the local filesystem.
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    /// Creates a backend rooted at `root`. The directory must already exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Export root on the host filesystem.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a sanitized virtual path under the export root.
    fn real(&self, path: &str) -> PathBuf {
        let rel = path.trim_start_matches('/');
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    fn c_path(p: &Path) -> FsResult<CString> {
        CString::new(p.as_os_str().as_bytes()).map_err(|_| FsError::InvalidArgument)
    }
}

fn stat_from_meta(meta: &fs::Metadata) -> FileStat {
    FileStat {
        dev: meta.dev() as i64,
        ino: meta.ino() as i64,
        mode: meta.mode() as i64,
        nlink: meta.nlink() as i64,
        uid: meta.uid() as i64,
        gid: meta.gid() as i64,
        rdev: meta.rdev() as i64,
        size: meta.size() as i64,
        blksize: meta.blksize() as i64,
        blocks: meta.blocks() as i64,
        atime: meta.atime(),
        mtime: meta.mtime(),
        ctime: meta.ctime(),
    }
}

struct LocalFile {
    file: File,
}

impl VfsFile for LocalFile {
    fn pread(&self, buf: &mut [u8], offset: i64) -> FsResult<usize> {
        if offset < 0 {
            return Err(FsError::InvalidArgument);
        }
        Ok(self.file.read_at(buf, offset as u64)?)
    }

    fn pwrite(&self, buf: &[u8], offset: i64) -> FsResult<usize> {
        if offset < 0 {
            return Err(FsError::InvalidArgument);
        }
        Ok(self.file.write_at(buf, offset as u64)?)
    }

    fn fstat(&self) -> FsResult<FileStat> {
        Ok(stat_from_meta(&self.file.metadata()?))
    }

    fn ftruncate(&self, length: i64) -> FsResult<()> {
        if length < 0 {
            return Err(FsError::InvalidArgument);
        }
        self.file.set_len(length as u64)?;
        Ok(())
    }

    fn fsync(&self) -> FsResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn fchmod(&self, mode: i64) -> FsResult<()> {
        let perms = fs::Permissions::from_mode(mode as u32 & 0o7777);
        self.file.set_permissions(perms)?;
        Ok(())
    }
}

impl Vfs for LocalFs {
    fn open(&self, path: &str, flags: OpenFlags, mode: i64) -> FsResult<Box<dyn VfsFile>> {
        let mut opts = OpenOptions::new();
        opts.read(flags.read || flags.is_read_only());
        opts.write(flags.write || flags.append || flags.truncate);
        opts.append(flags.append);
        opts.create(flags.create);
        opts.truncate(flags.truncate);
        if flags.excl {
            opts.create_new(true);
        }
        let mut custom = 0;
        if flags.sync {
            custom |= libc::O_SYNC;
        }
        if custom != 0 {
            opts.custom_flags(custom);
        }
        opts.mode(mode as u32 & 0o7777);
        let file = opts.open(self.real(path))?;
        if file.metadata()?.is_dir() {
            return Err(FsError::IsDirectory);
        }
        Ok(Box::new(LocalFile { file }))
    }

    fn stat(&self, path: &str) -> FsResult<FileStat> {
        Ok(stat_from_meta(&fs::metadata(self.real(path))?))
    }

    fn lstat(&self, path: &str) -> FsResult<FileStat> {
        Ok(stat_from_meta(&fs::symlink_metadata(self.real(path))?))
    }

    fn statfs(&self, path: &str) -> FsResult<FsStat> {
        let cpath = Self::c_path(&self.real(path))?;
        let mut out: libc::statfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statfs(cpath.as_ptr(), &mut out) };
        if rc != 0 {
            return Err(FsError::from_errno(
                std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
            ));
        }
        Ok(FsStat {
            kind: out.f_type as i64,
            bsize: out.f_bsize as i64,
            blocks: out.f_blocks as i64,
            bfree: out.f_bfree as i64,
            bavail: out.f_bavail as i64,
            files: out.f_files as i64,
            ffree: out.f_ffree as i64,
        })
    }

    fn access(&self, path: &str, amode: i64) -> FsResult<()> {
        let cpath = Self::c_path(&self.real(path))?;
        let rc = unsafe { libc::access(cpath.as_ptr(), amode as libc::c_int) };
        if rc != 0 {
            return Err(FsError::from_errno(
                std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
            ));
        }
        Ok(())
    }

    fn list_dir(&self, path: &str) -> FsResult<Vec<String>> {
        let mut names = vec![".".to_string(), "..".to_string()];
        for entry in fs::read_dir(self.real(path))? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn mkdir(&self, path: &str, mode: i64) -> FsResult<()> {
        let real = self.real(path);
        fs::create_dir(&real)?;
        // create_dir honors umask; apply the requested bits explicitly.
        fs::set_permissions(&real, fs::Permissions::from_mode(mode as u32 & 0o7777))?;
        Ok(())
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        fs::remove_dir(self.real(path))?;
        Ok(())
    }

    fn rmall(&self, path: &str) -> FsResult<()> {
        let real = self.real(path);
        let meta = fs::symlink_metadata(&real)?;
        if meta.is_dir() {
            fs::remove_dir_all(&real)?;
        } else {
            fs::remove_file(&real)?;
        }
        Ok(())
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        let real = self.real(path);
        let meta = fs::symlink_metadata(&real)?;
        if meta.is_dir() {
            return Err(FsError::IsDirectory);
        }
        fs::remove_file(&real)?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        fs::rename(self.real(from), self.real(to))?;
        Ok(())
    }

    fn link(&self, from: &str, to: &str) -> FsResult<()> {
        fs::hard_link(self.real(from), self.real(to))?;
        Ok(())
    }

    fn symlink(&self, from: &str, to: &str) -> FsResult<()> {
        // The link target is stored verbatim, as the client supplied it.
        std::os::unix::fs::symlink(from, self.real(to))?;
        Ok(())
    }

    fn readlink(&self, path: &str) -> FsResult<String> {
        let target = fs::read_link(self.real(path))?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn truncate(&self, path: &str, length: i64) -> FsResult<()> {
        if length < 0 {
            return Err(FsError::InvalidArgument);
        }
        let file = OpenOptions::new().write(true).open(self.real(path))?;
        file.set_len(length as u64)?;
        Ok(())
    }

    fn chmod(&self, path: &str, mode: i64) -> FsResult<()> {
        fs::set_permissions(
            self.real(path),
            fs::Permissions::from_mode(mode as u32 & 0o7777),
        )?;
        Ok(())
    }

    fn utime(&self, path: &str, atime: i64, mtime: i64) -> FsResult<()> {
        let cpath = Self::c_path(&self.real(path))?;
        let times = libc::utimbuf {
            actime: atime as libc::time_t,
            modtime: mtime as libc::time_t,
        };
        let rc = unsafe { libc::utime(cpath.as_ptr(), &times) };
        if rc != 0 {
            return Err(FsError::from_errno(
                std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
            ));
        }
        Ok(())
    }

    fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        Ok(fs::read(self.real(path))?)
    }

    fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let real = self.real(path);
        let tmp = real.with_extension("tmp~");
        fs::write(&tmp, data)?;
        if let Err(e) = fs::rename(&tmp, &real) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn hash(&self, path: &str) -> FsResult<[u8; 32]> {
        let mut file = File::open(self.real(path))?;
        if file.metadata()?.is_dir() {
            return Err(FsError::IsDirectory);
        }
        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; 65536];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(*hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, LocalFs) {
        let dir = TempDir::new().unwrap();
        let fs = LocalFs::new(dir.path());
        (dir, fs)
    }

    #[test]
    fn test_open_write_read_roundtrip() {
        let (_dir, fs) = fixture();
        let f = fs
            .open("/hello.txt", OpenFlags::write_create_truncate(), 0o644)
            .unwrap();
        assert_eq!(f.pwrite(b"chirp", 0).unwrap(), 5);
        drop(f);

        let f = fs.open("/hello.txt", OpenFlags::read_only(), 0).unwrap();
        let mut buf = [0u8; 16];
        let n = f.pread(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"chirp");
    }

    #[test]
    fn test_pread_past_eof_returns_zero() {
        let (_dir, fs) = fixture();
        fs.write_file("/f", b"ab").unwrap();
        let f = fs.open("/f", OpenFlags::read_only(), 0).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(f.pread(&mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn test_stat_vs_lstat_on_symlink() {
        let (_dir, fs) = fixture();
        fs.write_file("/target", b"data").unwrap();
        fs.symlink("/target", "/ln").unwrap();
        assert!(fs.lstat("/ln").unwrap().is_symlink());
        // stat follows the absolute virtual target only if the host resolves
        // it; relative targets always resolve.
        fs.symlink("target", "/ln2").unwrap();
        assert!(fs.stat("/ln2").unwrap().is_file());
    }

    #[test]
    fn test_mkdir_rmdir() {
        let (_dir, fs) = fixture();
        fs.mkdir("/sub", 0o700).unwrap();
        assert!(fs.stat("/sub").unwrap().is_dir());
        fs.rmdir("/sub").unwrap();
        assert_eq!(fs.stat("/sub"), Err(FsError::NotFound));
    }

    #[test]
    fn test_rmdir_nonempty_fails() {
        let (_dir, fs) = fixture();
        fs.mkdir("/sub", 0o755).unwrap();
        fs.write_file("/sub/f", b"x").unwrap();
        let err = fs.rmdir("/sub").unwrap_err();
        assert!(err == FsError::NotEmpty || err == FsError::Busy);
    }

    #[test]
    fn test_rmall_removes_tree() {
        let (_dir, fs) = fixture();
        fs.mkdir("/sub", 0o755).unwrap();
        fs.mkdir("/sub/deeper", 0o755).unwrap();
        fs.write_file("/sub/deeper/f", b"x").unwrap();
        fs.rmall("/sub").unwrap();
        assert_eq!(fs.stat("/sub"), Err(FsError::NotFound));
    }

    #[test]
    fn test_unlink_refuses_directory() {
        let (_dir, fs) = fixture();
        fs.mkdir("/sub", 0o755).unwrap();
        assert_eq!(fs.unlink("/sub"), Err(FsError::IsDirectory));
    }

    #[test]
    fn test_list_dir_has_dot_entries() {
        let (_dir, fs) = fixture();
        fs.write_file("/a", b"1").unwrap();
        let names = fs.list_dir("/").unwrap();
        assert!(names.contains(&".".to_string()));
        assert!(names.contains(&"..".to_string()));
        assert!(names.contains(&"a".to_string()));
    }

    #[test]
    fn test_rename_and_truncate() {
        let (_dir, fs) = fixture();
        fs.write_file("/a", b"hello world").unwrap();
        fs.rename("/a", "/b").unwrap();
        fs.truncate("/b", 5).unwrap();
        assert_eq!(fs.read_file("/b").unwrap(), b"hello");
    }

    #[test]
    fn test_write_file_atomic_replace() {
        let (_dir, fs) = fixture();
        fs.write_file("/ctl", b"one").unwrap();
        fs.write_file("/ctl", b"two").unwrap();
        assert_eq!(fs.read_file("/ctl").unwrap(), b"two");
    }

    #[test]
    fn test_hash_is_stable() {
        let (_dir, fs) = fixture();
        fs.write_file("/f", b"content").unwrap();
        let a = fs.hash("/f").unwrap();
        let b = fs.hash("/f").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, *blake3::hash(b"content").as_bytes());
    }

    #[test]
    fn test_open_excl_fails_on_existing() {
        let (_dir, fs) = fixture();
        fs.write_file("/f", b"x").unwrap();
        let flags = OpenFlags {
            write: true,
            create: true,
            excl: true,
            ..OpenFlags::default()
        };
        assert!(matches!(
            fs.open("/f", flags, 0o644),
            Err(FsError::AlreadyExists)
        ));
    }

    #[test]
    fn test_handles_are_shareable_across_tasks() {
        fn shareable<T: Send + Sync + ?Sized>() {}
        shareable::<dyn VfsFile>();
        shareable::<dyn Vfs>();
    }

    #[test]
    fn test_utime_sets_mtime() {
        let (_dir, fs) = fixture();
        fs.write_file("/f", b"x").unwrap();
        fs.utime("/f", 1000, 2000).unwrap();
        let st = fs.stat("/f").unwrap();
        assert_eq!(st.atime, 1000);
        assert_eq!(st.mtime, 2000);
    }
}
