//! Wire error codes and the single translation point from backend errors.
//!
//! Clients see a negative decimal code on the response line; the mapping
//! from [`FsError`] is total and applied exactly once, when the response is
//! written.

use chirpd_vfs::FsError;

pub const NOT_AUTHENTICATED: i64 = -1;
pub const NOT_AUTHORIZED: i64 = -2;
pub const DOESNT_EXIST: i64 = -3;
pub const ALREADY_EXISTS: i64 = -4;
pub const TOO_BIG: i64 = -5;
pub const NO_SPACE: i64 = -6;
pub const NO_MEMORY: i64 = -7;
pub const INVALID_REQUEST: i64 = -8;
pub const TOO_MANY_OPEN: i64 = -9;
pub const BUSY: i64 = -10;
pub const TRY_AGAIN: i64 = -11;
pub const BAD_FD: i64 = -12;
pub const IS_DIR: i64 = -13;
pub const NOT_DIR: i64 = -14;
pub const NOT_EMPTY: i64 = -15;
pub const CROSS_DEVICE_LINK: i64 = -16;
pub const GRP_UNREACHABLE: i64 = -20;
pub const NO_SUCH_PROCESS: i64 = -21;
pub const IS_A_PIPE: i64 = -22;
pub const NOT_SUPPORTED: i64 = -23;
pub const NAME_TOO_LONG: i64 = -24;
pub const UNKNOWN: i64 = -127;

/// Translates a backend error to its wire code.
pub fn to_wire(e: FsError) -> i64 {
    match e {
        FsError::PermissionDenied | FsError::NotPermitted | FsError::ReadOnly => NOT_AUTHORIZED,
        FsError::NotFound => DOESNT_EXIST,
        FsError::AlreadyExists => ALREADY_EXISTS,
        FsError::TooBig => TOO_BIG,
        FsError::NoSpace => NO_SPACE,
        FsError::NoMemory => NO_MEMORY,
        FsError::InvalidArgument | FsError::NotImplemented => INVALID_REQUEST,
        FsError::TooManyOpen => TOO_MANY_OPEN,
        FsError::Busy => BUSY,
        FsError::TryAgain => TRY_AGAIN,
        FsError::BadDescriptor => BAD_FD,
        FsError::IsDirectory => IS_DIR,
        FsError::NotDirectory => NOT_DIR,
        FsError::NotEmpty => NOT_EMPTY,
        FsError::CrossDevice => CROSS_DEVICE_LINK,
        FsError::Unreachable => GRP_UNREACHABLE,
        FsError::NoSuchProcess => NO_SUCH_PROCESS,
        FsError::IsPipe => IS_A_PIPE,
        FsError::NotSupported => NOT_SUPPORTED,
        FsError::NameTooLong => NAME_TOO_LONG,
        FsError::Io => UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_errors_collapse() {
        assert_eq!(to_wire(FsError::PermissionDenied), NOT_AUTHORIZED);
        assert_eq!(to_wire(FsError::NotPermitted), NOT_AUTHORIZED);
        assert_eq!(to_wire(FsError::ReadOnly), NOT_AUTHORIZED);
    }

    #[test]
    fn test_distinct_codes() {
        assert_eq!(to_wire(FsError::NotFound), DOESNT_EXIST);
        assert_eq!(to_wire(FsError::AlreadyExists), ALREADY_EXISTS);
        assert_eq!(to_wire(FsError::NoSpace), NO_SPACE);
        assert_eq!(to_wire(FsError::NotEmpty), NOT_EMPTY);
        assert_eq!(to_wire(FsError::BadDescriptor), BAD_FD);
        assert_eq!(to_wire(FsError::IsDirectory), IS_DIR);
        assert_eq!(to_wire(FsError::NotDirectory), NOT_DIR);
    }

    #[test]
    fn test_fallback_is_unknown() {
        assert_eq!(to_wire(FsError::Io), UNKNOWN);
    }

    #[test]
    fn test_all_codes_negative() {
        for e in [
            FsError::PermissionDenied,
            FsError::NotFound,
            FsError::NoSpace,
            FsError::InvalidArgument,
            FsError::Io,
        ] {
            assert!(to_wire(e) < 0);
        }
    }
}
