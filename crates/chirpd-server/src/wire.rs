//! Wire grammar: one command per line, positional arguments, and a signed
//! decimal result line optionally followed by a verb-specific payload.

use chirpd_core::path;
use chirpd_vfs::{FileStat, FsError, FsResult, FsStat, OpenFlags};

/// A parsed command. Path arguments are already sanitized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Pread { fd: i64, length: i64, offset: i64 },
    Sread { fd: i64, length: i64, stride_length: i64, stride_skip: i64, offset: i64 },
    Pwrite { fd: i64, length: i64, offset: i64 },
    Swrite { fd: i64, length: i64, stride_length: i64, stride_skip: i64, offset: i64 },
    Close { fd: i64 },
    Fchmod { fd: i64, mode: i64 },
    Fchown { fd: i64, uid: i64, gid: i64 },
    Fsync { fd: i64 },
    Ftruncate { fd: i64, length: i64 },
    Fstat { fd: i64 },
    Fstatfs { fd: i64 },

    Whoami { length: i64 },
    Readlink { path: String, length: i64 },
    Getdir { path: String },
    Getlongdir { path: String },
    Getacl { path: String },
    Getfile { path: String },
    Putfile { path: String, mode: i64, length: i64 },
    Getstream { path: String },
    Putstream { path: String },
    Open { path: String, flags: OpenFlags, mode: i64 },
    Unlink { path: String },
    Access { path: String, mode: i64 },
    Chmod { path: String, mode: i64 },
    Chown { path: String, uid: i64, gid: i64 },
    Lchown { path: String, uid: i64, gid: i64 },
    Truncate { path: String, length: i64 },
    Rename { from: String, to: String },
    Link { from: String, to: String },
    Symlink { target: String, link: String },
    Setacl { path: String, subject: String, rights: String },
    Resetacl { path: String, rights: String },
    Mkdir { path: String, mode: i64 },
    Rmdir { path: String },
    Rmall { path: String },
    Utime { path: String, actime: i64, modtime: i64 },
    Stat { path: String },
    Lstat { path: String },
    Statfs { path: String },
    Lsalloc { path: String },
    Mkalloc { path: String, size: i64, mode: i64 },
    Hash { path: String },

    TicketRegister { subject: String, duration: i64, length: i64 },
    TicketGet { name: String },
    TicketList { subject: String },
    TicketModify { name: String, path: String, rights: String },
    TicketDelete { name: String },

    JobCreate { length: i64 },
    JobStatus { id: i64 },
    JobWait { id: i64, timeout: i64 },
    JobKill { id: i64 },
}

impl Request {
    /// Parses one command line. Unknown verbs and malformed argument lists
    /// are both invalid requests.
    pub fn parse(line: &str) -> FsResult<Request> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or(FsError::InvalidArgument)?;
        let args: Vec<&str> = parts.collect();

        let req = match (verb, args.as_slice()) {
            ("pread", [fd, length, offset]) => Request::Pread {
                fd: int(fd)?,
                length: int(length)?,
                offset: int(offset)?,
            },
            ("sread", [fd, length, sl, ss, offset]) => Request::Sread {
                fd: int(fd)?,
                length: int(length)?,
                stride_length: int(sl)?,
                stride_skip: int(ss)?,
                offset: int(offset)?,
            },
            ("pwrite", [fd, length, offset]) => Request::Pwrite {
                fd: int(fd)?,
                length: int(length)?,
                offset: int(offset)?,
            },
            ("swrite", [fd, length, sl, ss, offset]) => Request::Swrite {
                fd: int(fd)?,
                length: int(length)?,
                stride_length: int(sl)?,
                stride_skip: int(ss)?,
                offset: int(offset)?,
            },
            ("close", [fd]) => Request::Close { fd: int(fd)? },
            ("fchmod", [fd, mode]) => Request::Fchmod {
                fd: int(fd)?,
                mode: int(mode)?,
            },
            ("fchown", [fd, uid, gid]) => Request::Fchown {
                fd: int(fd)?,
                uid: int(uid)?,
                gid: int(gid)?,
            },
            ("fsync", [fd]) => Request::Fsync { fd: int(fd)? },
            ("ftruncate", [fd, length]) => Request::Ftruncate {
                fd: int(fd)?,
                length: int(length)?,
            },
            ("fstat", [fd]) => Request::Fstat { fd: int(fd)? },
            ("fstatfs", [fd]) => Request::Fstatfs { fd: int(fd)? },

            ("whoami", [length]) => Request::Whoami { length: int(length)? },
            ("readlink", [p, length]) => Request::Readlink {
                path: path::fix(p),
                length: int(length)?,
            },
            ("getdir", [p]) => Request::Getdir { path: path::fix(p) },
            ("getlongdir", [p]) => Request::Getlongdir { path: path::fix(p) },
            ("getacl", [p]) => Request::Getacl { path: path::fix(p) },
            ("getfile", [p]) => Request::Getfile { path: path::fix(p) },
            ("putfile", [p, mode, length]) => Request::Putfile {
                path: path::fix(p),
                mode: int(mode)?,
                length: int(length)?,
            },
            ("getstream", [p]) => Request::Getstream { path: path::fix(p) },
            ("putstream", [p]) => Request::Putstream { path: path::fix(p) },
            ("open", [p, flags, mode]) => Request::Open {
                path: path::fix(p),
                flags: parse_open_flags(flags),
                mode: int(mode)?,
            },
            ("unlink", [p]) => Request::Unlink { path: path::fix(p) },
            ("access", [p, mode]) => Request::Access {
                path: path::fix(p),
                mode: int(mode)?,
            },
            ("chmod", [p, mode]) => Request::Chmod {
                path: path::fix(p),
                mode: int(mode)?,
            },
            ("chown", [p, uid, gid]) => Request::Chown {
                path: path::fix(p),
                uid: int(uid)?,
                gid: int(gid)?,
            },
            ("lchown", [p, uid, gid]) => Request::Lchown {
                path: path::fix(p),
                uid: int(uid)?,
                gid: int(gid)?,
            },
            ("truncate", [p, length]) => Request::Truncate {
                path: path::fix(p),
                length: int(length)?,
            },
            ("rename", [from, to]) => Request::Rename {
                from: path::fix(from),
                to: path::fix(to),
            },
            ("link", [from, to]) => Request::Link {
                from: path::fix(from),
                to: path::fix(to),
            },
            // The link target is arbitrary data, checked when followed.
            ("symlink", [target, link]) => Request::Symlink {
                target: (*target).to_string(),
                link: path::fix(link),
            },
            ("setacl", [p, subject, rights]) => Request::Setacl {
                path: path::fix(p),
                subject: (*subject).to_string(),
                rights: (*rights).to_string(),
            },
            ("resetacl", [p, rights]) => Request::Resetacl {
                path: path::fix(p),
                rights: (*rights).to_string(),
            },
            ("mkdir", [p, mode]) => Request::Mkdir {
                path: path::fix(p),
                mode: int(mode)?,
            },
            ("rmdir", [p]) => Request::Rmdir { path: path::fix(p) },
            ("rmall", [p]) => Request::Rmall { path: path::fix(p) },
            ("utime", [p, actime, modtime]) => Request::Utime {
                path: path::fix(p),
                actime: int(actime)?,
                modtime: int(modtime)?,
            },
            ("stat", [p]) => Request::Stat { path: path::fix(p) },
            ("lstat", [p]) => Request::Lstat { path: path::fix(p) },
            ("statfs", [p]) => Request::Statfs { path: path::fix(p) },
            ("lsalloc", [p]) => Request::Lsalloc { path: path::fix(p) },
            ("mkalloc", [p, size, mode]) => Request::Mkalloc {
                path: path::fix(p),
                size: int(size)?,
                mode: int(mode)?,
            },
            ("hash", [p]) => Request::Hash { path: path::fix(p) },

            ("ticket_register", [subject, duration, length]) => Request::TicketRegister {
                subject: (*subject).to_string(),
                duration: int(duration)?,
                length: int(length)?,
            },
            ("ticket_get", [name]) => Request::TicketGet {
                name: (*name).to_string(),
            },
            ("ticket_list", [subject]) => Request::TicketList {
                subject: (*subject).to_string(),
            },
            ("ticket_modify", [name, p, rights]) => Request::TicketModify {
                name: (*name).to_string(),
                path: path::fix(p),
                rights: (*rights).to_string(),
            },
            ("ticket_delete", [name]) => Request::TicketDelete {
                name: (*name).to_string(),
            },

            ("job_create", [length]) => Request::JobCreate { length: int(length)? },
            ("job_status", [id]) => Request::JobStatus { id: int(id)? },
            ("job_wait", [id, timeout]) => Request::JobWait {
                id: int(id)?,
                timeout: int(timeout)?,
            },
            ("job_kill", [id]) => Request::JobKill { id: int(id)? },

            _ => return Err(FsError::NotImplemented),
        };
        Ok(req)
    }

    /// Bytes that follow the command line on the wire, for verbs carrying a
    /// buffered payload.
    pub fn payload_len(&self) -> Option<i64> {
        match self {
            Request::Pwrite { length, .. }
            | Request::Swrite { length, .. }
            | Request::TicketRegister { length, .. }
            | Request::JobCreate { length } => Some(*length),
            _ => None,
        }
    }
}

fn int(token: &str) -> FsResult<i64> {
    token.parse().map_err(|_| FsError::InvalidArgument)
}

/// Open dispositions arrive as a string of flag letters: `r` read,
/// `w` write, `c` create, `t` truncate, `a` append, `x` exclusive,
/// `s` synchronous.
fn parse_open_flags(token: &str) -> OpenFlags {
    OpenFlags {
        read: token.contains('r'),
        write: token.contains('w'),
        create: token.contains('c'),
        truncate: token.contains('t'),
        append: token.contains('a'),
        excl: token.contains('x'),
        sync: token.contains('s'),
    }
}

/// A successful response, before rendering.
#[derive(Debug)]
pub enum Reply {
    /// Just a result code.
    Code(i64),
    /// Length-prefixed raw bytes: `<len>` line, then the bytes.
    Data(Vec<u8>),
    /// `0` line followed by a 13-field stat record.
    Stat(FileStat),
    /// `0` line followed by a 7-field statfs record.
    StatFs(FsStat),
    /// `0` line, one line per item, terminated by a blank line.
    Listing(Vec<String>),
    /// Descriptor on the result line, stat record on the next.
    Handle { fd: i64, stat: FileStat },
    /// `0` line followed by a single payload line.
    Line(String),
}

/// 13 whitespace-separated decimal fields, the order fixed by the protocol.
pub fn stat_record(st: &FileStat) -> String {
    format!(
        "{} {} {} {} {} {} {} {} {} {} {} {} {}",
        st.dev,
        st.ino,
        st.mode,
        st.nlink,
        st.uid,
        st.gid,
        st.rdev,
        st.size,
        st.blksize,
        st.blocks,
        st.atime,
        st.mtime,
        st.ctime
    )
}

/// 7 whitespace-separated decimal fields.
pub fn statfs_record(st: &FsStat) -> String {
    format!(
        "{} {} {} {} {} {} {}",
        st.kind, st.bsize, st.blocks, st.bfree, st.bavail, st.files, st.ffree
    )
}

/// Renders a reply to the bytes written on the transport.
pub fn render(reply: &Reply) -> Vec<u8> {
    match reply {
        Reply::Code(code) => format!("{code}\n").into_bytes(),
        Reply::Data(data) => {
            let mut out = format!("{}\n", data.len()).into_bytes();
            out.extend_from_slice(data);
            out
        }
        Reply::Stat(st) => format!("0\n{}\n", stat_record(st)).into_bytes(),
        Reply::StatFs(st) => format!("0\n{}\n", statfs_record(st)).into_bytes(),
        Reply::Listing(items) => {
            let mut out = String::from("0\n");
            for item in items {
                out.push_str(item);
                out.push('\n');
            }
            out.push('\n');
            out.into_bytes()
        }
        Reply::Handle { fd, stat } => format!("{fd}\n{}\n", stat_record(stat)).into_bytes(),
        Reply::Line(line) => format!("0\n{line}\n").into_bytes(),
    }
}
