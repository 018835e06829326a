//! Errno-style error type shared by every backend operation.

use thiserror::Error;

/// Backend filesystem error. Variants mirror the POSIX errno values a
/// storage backend can surface; the protocol layer translates these to wire
/// codes exactly once, when the response line is written.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// EACCES
    #[error("permission denied")]
    PermissionDenied,
    /// EPERM
    #[error("operation not permitted")]
    NotPermitted,
    /// EROFS
    #[error("read-only filesystem")]
    ReadOnly,
    /// ENOENT
    #[error("no such file or directory")]
    NotFound,
    /// EEXIST
    #[error("file already exists")]
    AlreadyExists,
    /// EFBIG
    #[error("file too large")]
    TooBig,
    /// ENOSPC / EDQUOT
    #[error("no space left on device")]
    NoSpace,
    /// ENOMEM
    #[error("out of memory")]
    NoMemory,
    /// EINVAL
    #[error("invalid argument")]
    InvalidArgument,
    /// ENOSYS
    #[error("function not implemented")]
    NotImplemented,
    /// EMFILE / ENFILE
    #[error("too many open files")]
    TooManyOpen,
    /// EBUSY
    #[error("device or resource busy")]
    Busy,
    /// EAGAIN
    #[error("resource temporarily unavailable")]
    TryAgain,
    /// EBADF
    #[error("bad file descriptor")]
    BadDescriptor,
    /// EISDIR
    #[error("is a directory")]
    IsDirectory,
    /// ENOTDIR
    #[error("not a directory")]
    NotDirectory,
    /// ENOTEMPTY
    #[error("directory not empty")]
    NotEmpty,
    /// EXDEV
    #[error("cross-device link")]
    CrossDevice,
    /// ESPIPE
    #[error("illegal seek on a pipe")]
    IsPipe,
    /// ENOTSUP
    #[error("operation not supported")]
    NotSupported,
    /// ENAMETOOLONG
    #[error("file name too long")]
    NameTooLong,
    /// ESRCH
    #[error("no such process")]
    NoSuchProcess,
    /// EHOSTUNREACH
    #[error("host unreachable")]
    Unreachable,
    /// Anything without a more specific classification.
    #[error("i/o error")]
    Io,
}

/// Result alias using [`FsError`].
pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Classifies a raw OS errno value.
    pub fn from_errno(code: i32) -> Self {
        match code {
            libc::EACCES => FsError::PermissionDenied,
            libc::EPERM => FsError::NotPermitted,
            libc::EROFS => FsError::ReadOnly,
            libc::ENOENT => FsError::NotFound,
            libc::EEXIST => FsError::AlreadyExists,
            libc::EFBIG => FsError::TooBig,
            libc::ENOSPC | libc::EDQUOT => FsError::NoSpace,
            libc::ENOMEM => FsError::NoMemory,
            libc::EINVAL => FsError::InvalidArgument,
            libc::ENOSYS => FsError::NotImplemented,
            libc::EMFILE | libc::ENFILE => FsError::TooManyOpen,
            libc::EBUSY => FsError::Busy,
            libc::EAGAIN => FsError::TryAgain,
            libc::EBADF => FsError::BadDescriptor,
            libc::EISDIR => FsError::IsDirectory,
            libc::ENOTDIR => FsError::NotDirectory,
            libc::ENOTEMPTY => FsError::NotEmpty,
            libc::EXDEV => FsError::CrossDevice,
            libc::ESPIPE => FsError::IsPipe,
            libc::ENOTSUP => FsError::NotSupported,
            libc::ENAMETOOLONG => FsError::NameTooLong,
            libc::ESRCH => FsError::NoSuchProcess,
            libc::EHOSTUNREACH => FsError::Unreachable,
            _ => FsError::Io,
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        if let Some(code) = e.raw_os_error() {
            return FsError::from_errno(code);
        }
        match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound,
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
            std::io::ErrorKind::InvalidInput => FsError::InvalidArgument,
            std::io::ErrorKind::Unsupported => FsError::NotSupported,
            _ => FsError::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_errno_common() {
        assert_eq!(FsError::from_errno(libc::EACCES), FsError::PermissionDenied);
        assert_eq!(FsError::from_errno(libc::ENOENT), FsError::NotFound);
        assert_eq!(FsError::from_errno(libc::EEXIST), FsError::AlreadyExists);
        assert_eq!(FsError::from_errno(libc::ENOTEMPTY), FsError::NotEmpty);
        assert_eq!(FsError::from_errno(libc::EDQUOT), FsError::NoSpace);
        assert_eq!(FsError::from_errno(libc::ENOSPC), FsError::NoSpace);
    }

    #[test]
    fn test_from_errno_unknown_falls_back_to_io() {
        assert_eq!(FsError::from_errno(99999), FsError::Io);
    }

    #[test]
    fn test_from_io_error_kind() {
        let e = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(FsError::from(e), FsError::NotFound);
    }

    #[test]
    fn test_from_io_error_raw_os() {
        let e = std::io::Error::from_raw_os_error(libc::EISDIR);
        assert_eq!(FsError::from(e), FsError::IsDirectory);
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(FsError::PermissionDenied.to_string(), "permission denied");
        assert_eq!(FsError::NotEmpty.to_string(), "directory not empty");
    }
}
