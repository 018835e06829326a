//! Plain data types crossing the backend interface.

/// File metadata in the order the wire protocol reports it: a stat record
/// is these thirteen fields as whitespace-separated decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStat {
    pub dev: i64,
    pub ino: i64,
    pub mode: i64,
    pub nlink: i64,
    pub uid: i64,
    pub gid: i64,
    pub rdev: i64,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl FileStat {
    /// Returns true if the mode bits describe a directory.
    pub fn is_dir(&self) -> bool {
        (self.mode as u32) & libc::S_IFMT == libc::S_IFDIR
    }

    /// Returns true if the mode bits describe a regular file.
    pub fn is_file(&self) -> bool {
        (self.mode as u32) & libc::S_IFMT == libc::S_IFREG
    }

    /// Returns true if the mode bits describe a symbolic link.
    pub fn is_symlink(&self) -> bool {
        (self.mode as u32) & libc::S_IFMT == libc::S_IFLNK
    }
}

/// Filesystem totals, reported on the wire as seven decimal fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStat {
    pub kind: i64,
    pub bsize: i64,
    pub blocks: i64,
    pub bfree: i64,
    pub bavail: i64,
    pub files: i64,
    pub ffree: i64,
}

/// Open disposition, decoded from the protocol's flag letters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
    pub excl: bool,
    pub sync: bool,
}

impl OpenFlags {
    /// Plain read-only open.
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Write open that creates and truncates, as `putfile` needs.
    pub fn write_create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    /// True when no write-implying flag is present.
    pub fn is_read_only(&self) -> bool {
        !self.write && !self.create && !self.truncate && !self.append
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stat_is_dir() {
        let st = FileStat {
            mode: (libc::S_IFDIR | 0o755) as i64,
            ..FileStat::default()
        };
        assert!(st.is_dir());
        assert!(!st.is_file());
        assert!(!st.is_symlink());
    }

    #[test]
    fn test_file_stat_is_file() {
        let st = FileStat {
            mode: (libc::S_IFREG | 0o644) as i64,
            ..FileStat::default()
        };
        assert!(st.is_file());
        assert!(!st.is_dir());
    }

    #[test]
    fn test_file_stat_is_symlink() {
        let st = FileStat {
            mode: (libc::S_IFLNK | 0o777) as i64,
            ..FileStat::default()
        };
        assert!(st.is_symlink());
    }

    #[test]
    fn test_open_flags_read_only() {
        let f = OpenFlags::read_only();
        assert!(f.read);
        assert!(f.is_read_only());
    }

    #[test]
    fn test_open_flags_write_create_truncate() {
        let f = OpenFlags::write_create_truncate();
        assert!(f.write && f.create && f.truncate);
        assert!(!f.is_read_only());
    }
}
