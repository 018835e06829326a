//! Chirp backend filesystem interface: traits, errno-style errors, and the
//! local-disk backend.

pub mod error;
pub mod local;
pub mod types;
pub mod vfs;

pub use error::{FsError, FsResult};
pub use local::LocalFs;
pub use types::{FileStat, FsStat, OpenFlags};
pub use vfs::{Vfs, VfsFile};
