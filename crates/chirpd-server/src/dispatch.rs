//! Per-connection command dispatch.
//!
//! One dispatcher exists per authenticated session. It owns the session's
//! open-file table, applies the authorization rule for every verb, pairs
//! each size-changing backend call with an allocation reservation, and
//! returns an [`Outcome`] the transport layer renders. Backend errors flow
//! out untranslated; the session converts them to wire codes exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chirpd_core::{path, ticket, AclStore, AllocTracker, Reservation, Rights, Ticket, TicketRegistry};
use chirpd_vfs::{FsError, FsResult, OpenFlags, Vfs, VfsFile};
use tracing::debug;

use crate::config::ServerConfig;
use crate::jobs::JobStore;
use crate::stats::ServerStats;
use crate::wire::{stat_record, Reply, Request};

/// What the transport should do with a dispatched command.
pub enum Outcome {
    /// Write a rendered reply and await the next command.
    Reply(Reply),
    /// Write `<size>` then exactly `size` bytes read from the handle.
    SendFile { size: i64, file: Box<dyn VfsFile> },
    /// Write `0`, stream the handle to end of file, then close the
    /// connection.
    SendStream { file: Box<dyn VfsFile> },
    /// Read exactly `length` bytes into the handle, commit the reservation,
    /// then reply with `length`.
    Receive {
        file: Box<dyn VfsFile>,
        length: i64,
        reservation: Reservation,
    },
    /// Write `0`, then append everything the client sends until it closes.
    ReceiveStream { file: Box<dyn VfsFile>, path: String },
}

struct OpenFile {
    file: Box<dyn VfsFile>,
    path: String,
}

/// Read-only handle for a directory opened via `open`. Data access fails
/// the way a directory descriptor does, but fstat works.
struct DirHandle {
    fs: Arc<dyn Vfs>,
    path: String,
}

impl VfsFile for DirHandle {
    fn pread(&self, _buf: &mut [u8], _offset: i64) -> FsResult<usize> {
        Err(FsError::IsDirectory)
    }
    fn pwrite(&self, _buf: &[u8], _offset: i64) -> FsResult<usize> {
        Err(FsError::IsDirectory)
    }
    fn fstat(&self) -> FsResult<chirpd_vfs::FileStat> {
        self.fs.stat(&self.path)
    }
    fn ftruncate(&self, _length: i64) -> FsResult<()> {
        Err(FsError::IsDirectory)
    }
    fn fsync(&self) -> FsResult<()> {
        Ok(())
    }
    fn fchmod(&self, mode: i64) -> FsResult<()> {
        self.fs.chmod(&self.path, mode)
    }
}

/// Executes commands on behalf of one authenticated subject.
pub struct Dispatcher {
    fs: Arc<dyn Vfs>,
    acl: Arc<AclStore>,
    alloc: Arc<AllocTracker>,
    tickets: Arc<TicketRegistry>,
    jobs: Arc<dyn JobStore>,
    config: Arc<ServerConfig>,
    stats: Arc<ServerStats>,
    subject: String,
    fds: HashMap<i64, OpenFile>,
    next_fd: i64,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fs: Arc<dyn Vfs>,
        acl: Arc<AclStore>,
        alloc: Arc<AllocTracker>,
        tickets: Arc<TicketRegistry>,
        jobs: Arc<dyn JobStore>,
        config: Arc<ServerConfig>,
        stats: Arc<ServerStats>,
        subject: String,
    ) -> Self {
        Self {
            fs,
            acl,
            alloc,
            tickets,
            jobs,
            config,
            stats,
            subject,
            fds: HashMap::new(),
            next_fd: 1,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    fn check(&self, target: &str, required: Rights) -> FsResult<()> {
        self.acl.check(target, &self.subject, required)
    }

    fn check_link(&self, target: &str, required: Rights) -> FsResult<()> {
        self.acl.check_link(target, &self.subject, required)
    }

    fn check_dir(&self, dir: &str, required: Rights) -> FsResult<()> {
        self.acl.check_dir(dir, &self.subject, required)
    }

    /// DELETE either on the entry or held within it, for directory removal.
    fn check_delete(&self, target: &str) -> FsResult<()> {
        self.check_link(target, Rights::DELETE)
            .or_else(|_| self.check_dir(target, Rights::DELETE))
    }

    fn is_superuser(&self) -> bool {
        self.config.superuser.as_deref() == Some(self.subject.as_str())
    }

    fn fd(&self, fd: i64) -> FsResult<&OpenFile> {
        self.fds.get(&fd).ok_or(FsError::BadDescriptor)
    }

    fn insert_fd(&mut self, file: Box<dyn VfsFile>, path: String) -> i64 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.fds.insert(fd, OpenFile { file, path });
        fd
    }

    fn is_dir(&self, target: &str) -> bool {
        self.fs.stat(target).map(|st| st.is_dir()).unwrap_or(false)
    }

    /// Runs one command. Errors carry backend semantics; the caller maps
    /// them to wire codes.
    pub fn dispatch(&mut self, req: Request, payload: &[u8]) -> FsResult<Outcome> {
        use Request::*;
        match req {
            Pread { fd, length, offset } => self.do_pread(fd, length, offset),
            Sread {
                fd,
                length,
                stride_length,
                stride_skip,
                offset,
            } => self.do_sread(fd, length, stride_length, stride_skip, offset),
            Pwrite { fd, offset, .. } => self.do_pwrite(fd, payload, offset),
            Swrite {
                fd,
                stride_length,
                stride_skip,
                offset,
                ..
            } => self.do_swrite(fd, payload, stride_length, stride_skip, offset),
            Close { fd } => {
                self.fds.remove(&fd).ok_or(FsError::BadDescriptor)?;
                self.alloc.flush()?;
                Ok(code(0))
            }
            Fchmod { fd, mode } => {
                self.fd(fd)?.file.fchmod(mode)?;
                Ok(code(0))
            }
            // Ownership is fixed by the process; accept and ignore.
            Fchown { fd, .. } => {
                self.fd(fd)?;
                Ok(code(0))
            }
            Fsync { fd } => {
                self.fd(fd)?.file.fsync()?;
                Ok(code(0))
            }
            Ftruncate { fd, length } => self.do_ftruncate(fd, length),
            Fstat { fd } => Ok(Outcome::Reply(Reply::Stat(self.fd(fd)?.file.fstat()?))),
            Fstatfs { fd } => {
                let path = self.fd(fd)?.path.clone();
                self.do_statfs_at(&path)
            }

            Whoami { length } => {
                let n = usize::try_from(length).unwrap_or(0).min(self.subject.len());
                Ok(Outcome::Reply(Reply::Data(self.subject.as_bytes()[..n].to_vec())))
            }
            Readlink { path, length } => {
                self.check_link(&path, Rights::READ)?;
                let mut target = self.fs.readlink(&path)?.into_bytes();
                target.truncate(usize::try_from(length).unwrap_or(0));
                Ok(Outcome::Reply(Reply::Data(target)))
            }
            Getdir { path } => {
                self.check_dir(&path, Rights::LIST)?;
                let names = self
                    .fs
                    .list_dir(&path)?
                    .into_iter()
                    .filter(|n| !path::is_service_name(n))
                    .collect();
                Ok(Outcome::Reply(Reply::Listing(names)))
            }
            Getlongdir { path } => self.do_getlongdir(&path),
            Getacl { path } => {
                // Deliberately unchecked: subjects may always discover what
                // rights a directory would grant them.
                let lines = self
                    .acl
                    .entries(&path)?
                    .iter()
                    .map(|e| format!("{} {}", e.subject, e.rights.to_text()))
                    .collect();
                Ok(Outcome::Reply(Reply::Listing(lines)))
            }
            Getfile { path } => self.do_getfile(&path),
            Putfile { path, mode, length } => self.do_putfile(&path, mode, length),
            Getstream { path } => {
                let file = self.open_for_read(&path)?;
                Ok(Outcome::SendStream { file })
            }
            Putstream { path } => {
                let (file, reservation) = self.open_for_put(&path, 0o777, 0)?;
                // The open truncated any previous contents; keep the freed
                // space released.
                reservation.commit();
                Ok(Outcome::ReceiveStream { file, path })
            }
            Open { path, flags, mode } => self.do_open(&path, flags, mode),
            Unlink { path } => self.do_unlink(&path),
            Access { path, mode } => {
                self.check(&path, Rights::from_access_mode(mode))?;
                self.fs.access(&path, mode)?;
                Ok(code(0))
            }
            Chmod { path, mode } => {
                self.check(&path, Rights::WRITE)?;
                self.fs.chmod(&path, mode)?;
                Ok(code(0))
            }
            Chown { path, .. } => {
                self.check(&path, Rights::WRITE)?;
                Ok(code(0))
            }
            Lchown { path, .. } => {
                self.check_link(&path, Rights::WRITE)?;
                Ok(code(0))
            }
            Truncate { path, length } => {
                self.check(&path, Rights::WRITE)?;
                let reservation = self.alloc.reserve(&path, length)?;
                self.fs.truncate(&path, length)?;
                reservation.commit();
                Ok(code(0))
            }
            Rename { from, to } => self.do_rename(&from, &to),
            Link { from, to } => {
                self.check(&from, Rights::READ | Rights::WRITE)?;
                self.check(&to, Rights::WRITE)?;
                self.fs.link(&from, &to)?;
                Ok(code(0))
            }
            // Only the link itself is authorized; the target is checked
            // whenever something follows it.
            Symlink { target, link } => {
                self.check(&link, Rights::WRITE)?;
                self.fs.symlink(&target, &link)?;
                Ok(code(0))
            }
            Setacl {
                path,
                subject,
                rights,
            } => {
                self.check_dir(&path, Rights::ADMIN)?;
                self.acl
                    .set(&path, &subject, Rights::from_text(&rights), false)?;
                Ok(code(0))
            }
            Resetacl { path, rights } => {
                self.check_dir(&path, Rights::ADMIN)?;
                let rights = Rights::from_text(&rights) | Rights::ADMIN;
                let subject = self.subject.clone();
                self.acl.set(&path, &subject, rights, true)?;
                Ok(code(0))
            }
            Mkdir { path, mode } => self.do_mkdir(&path, mode),
            Rmdir { path } => self.do_rmdir(&path, false),
            Rmall { path } => self.do_rmdir(&path, true),
            Utime {
                path,
                actime,
                modtime,
            } => {
                self.check(&path, Rights::WRITE)?;
                self.fs.utime(&path, actime, modtime)?;
                Ok(code(0))
            }
            Stat { path } => {
                self.check(&path, Rights::LIST)?;
                Ok(Outcome::Reply(Reply::Stat(self.fs.stat(&path)?)))
            }
            Lstat { path } => {
                self.check_link(&path, Rights::LIST)?;
                Ok(Outcome::Reply(Reply::Stat(self.fs.lstat(&path)?)))
            }
            Statfs { path } => {
                self.check(&path, Rights::LIST)?;
                self.do_statfs_at(&path)
            }
            Lsalloc { path } => {
                self.check_link(&path, Rights::LIST)?;
                let (root, limit, inuse) = self.alloc.lsalloc(&path)?;
                Ok(Outcome::Reply(Reply::Line(format!("{root} {limit} {inuse}"))))
            }
            Mkalloc { path, size, mode } => self.do_mkalloc(&path, size, mode),
            Hash { path } => {
                self.check(&path, Rights::READ)?;
                if self.is_dir(&path) {
                    return Err(FsError::IsDirectory);
                }
                Ok(Outcome::Reply(Reply::Data(self.fs.hash(&path)?.to_vec())))
            }

            TicketRegister {
                subject, duration, ..
            } => self.do_ticket_register(&subject, duration, payload),
            TicketGet { name } => self.do_ticket_get(&name),
            TicketList { subject } => self.do_ticket_list(&subject),
            TicketModify {
                name,
                path,
                rights,
            } => self.do_ticket_modify(&name, &path, &rights),
            TicketDelete { name } => {
                self.lookup_own_ticket(&name)?;
                self.tickets.delete(digest_of(&name));
                Ok(code(0))
            }

            JobCreate { .. } => {
                self.require_execute()?;
                let spec =
                    serde_json::from_slice(payload).map_err(|_| FsError::InvalidArgument)?;
                let id = self.jobs.submit(spec)?;
                Ok(code(id))
            }
            JobStatus { id } => {
                self.require_execute()?;
                let report = self.jobs.status(id)?;
                Ok(Outcome::Reply(Reply::Data(report.to_string().into_bytes())))
            }
            JobWait { id, timeout } => {
                self.require_execute()?;
                let capped = u64::try_from(timeout)
                    .unwrap_or(0)
                    .min(self.config.job_wait_max_secs);
                let report = self.jobs.wait(id, Duration::from_secs(capped))?;
                Ok(Outcome::Reply(Reply::Data(report.to_string().into_bytes())))
            }
            JobKill { id } => {
                self.require_execute()?;
                self.jobs.kill(id)?;
                Ok(code(0))
            }
        }
    }

    fn do_pread(&mut self, fd: i64, length: i64, offset: i64) -> FsResult<Outcome> {
        if length < 0 || offset < 0 {
            return Err(FsError::InvalidArgument);
        }
        let want = usize::try_from(length)
            .unwrap_or(usize::MAX)
            .min(self.config.max_buffer_size);
        let mut buf = vec![0u8; want];
        let n = self.fd(fd)?.file.pread(&mut buf, offset)?;
        buf.truncate(n);
        self.stats.record_read(n as u64);
        Ok(Outcome::Reply(Reply::Data(buf)))
    }

    fn do_sread(
        &mut self,
        fd: i64,
        length: i64,
        stride_length: i64,
        stride_skip: i64,
        offset: i64,
    ) -> FsResult<Outcome> {
        if length < 0 || stride_length <= 0 || stride_skip <= 0 || offset < 0 {
            return Err(FsError::InvalidArgument);
        }
        let total = usize::try_from(length)
            .unwrap_or(usize::MAX)
            .min(self.config.max_buffer_size);
        let stride = usize::try_from(stride_length).unwrap_or(usize::MAX);
        let mut out = Vec::with_capacity(total.min(1 << 20));
        let mut off = offset;
        while out.len() < total {
            let chunk = stride.min(total - out.len());
            let mut buf = vec![0u8; chunk];
            let n = self.fd(fd)?.file.pread(&mut buf, off)?;
            out.extend_from_slice(&buf[..n]);
            if n < chunk {
                break;
            }
            off = off.saturating_add(stride_skip);
        }
        self.stats.record_read(out.len() as u64);
        Ok(Outcome::Reply(Reply::Data(out)))
    }

    fn do_pwrite(&mut self, fd: i64, payload: &[u8], offset: i64) -> FsResult<Outcome> {
        if offset < 0 {
            return Err(FsError::InvalidArgument);
        }
        let path = self.fd(fd)?.path.clone();
        let current = self.fs.file_size(&path).unwrap_or(0);
        let end = offset
            .checked_add(payload.len() as i64)
            .ok_or(FsError::InvalidArgument)?;
        let reservation = self.alloc.reserve(&path, current.max(end))?;
        let n = self.fd(fd)?.file.pwrite(payload, offset)?;
        reservation.commit();
        self.stats.record_written(n as u64);
        Ok(code(n as i64))
    }

    fn do_swrite(
        &mut self,
        fd: i64,
        payload: &[u8],
        stride_length: i64,
        stride_skip: i64,
        offset: i64,
    ) -> FsResult<Outcome> {
        if stride_length <= 0 || stride_skip <= 0 || offset < 0 {
            return Err(FsError::InvalidArgument);
        }
        let stride = usize::try_from(stride_length).unwrap_or(usize::MAX);
        let mut end = offset;
        let mut probe = offset;
        for chunk in payload.chunks(stride) {
            let chunk_end = probe
                .checked_add(chunk.len() as i64)
                .ok_or(FsError::InvalidArgument)?;
            end = end.max(chunk_end);
            probe = probe.checked_add(stride_skip).ok_or(FsError::InvalidArgument)?;
        }

        let path = self.fd(fd)?.path.clone();
        let current = self.fs.file_size(&path).unwrap_or(0);
        let reservation = self.alloc.reserve(&path, current.max(end))?;

        let mut written = 0usize;
        let mut off = offset;
        for chunk in payload.chunks(stride) {
            written += self.fd(fd)?.file.pwrite(chunk, off)?;
            off = off.saturating_add(stride_skip);
        }
        reservation.commit();
        self.stats.record_written(written as u64);
        Ok(code(written as i64))
    }

    fn do_ftruncate(&mut self, fd: i64, length: i64) -> FsResult<Outcome> {
        if length < 0 {
            return Err(FsError::InvalidArgument);
        }
        let path = self.fd(fd)?.path.clone();
        let reservation = self.alloc.reserve(&path, length)?;
        self.fd(fd)?.file.ftruncate(length)?;
        reservation.commit();
        Ok(code(0))
    }

    fn do_getlongdir(&mut self, dir: &str) -> FsResult<Outcome> {
        self.check_dir(dir, Rights::LIST)?;
        let mut lines = Vec::new();
        for name in self.fs.list_dir(dir)? {
            if path::is_service_name(&name) {
                continue;
            }
            let Ok(st) = self.fs.lstat(&path::join(dir, &name)) else {
                continue;
            };
            lines.push(name);
            lines.push(stat_record(&st));
        }
        Ok(Outcome::Reply(Reply::Listing(lines)))
    }

    fn open_for_read(&mut self, target: &str) -> FsResult<Box<dyn VfsFile>> {
        if self.is_dir(target) {
            return Err(FsError::IsDirectory);
        }
        self.check(target, Rights::READ)?;
        self.fs.open(target, OpenFlags::read_only(), 0)
    }

    /// WRITE grants replacement; PUT alone grants creation of a file that
    /// does not exist yet.
    fn open_for_put(
        &mut self,
        target: &str,
        mode: i64,
        length: i64,
    ) -> FsResult<(Box<dyn VfsFile>, Reservation)> {
        if self.is_dir(target) {
            return Err(FsError::IsDirectory);
        }
        match self.check(target, Rights::WRITE) {
            Ok(()) => {}
            Err(FsError::PermissionDenied) => {
                self.check(target, Rights::PUT)?;
                // PUT only ever creates; an existing file is reported as
                // such, not as a rights failure.
                if self.fs.stat(target).is_ok() {
                    return Err(FsError::AlreadyExists);
                }
            }
            Err(e) => return Err(e),
        }
        let reservation = self.alloc.reserve(target, length)?;
        let file = self.fs.open(target, OpenFlags::write_create_truncate(), mode)?;
        Ok((file, reservation))
    }

    fn do_getfile(&mut self, target: &str) -> FsResult<Outcome> {
        let file = self.open_for_read(target)?;
        let size = file.fstat()?.size;
        Ok(Outcome::SendFile { size, file })
    }

    fn do_putfile(&mut self, target: &str, mode: i64, length: i64) -> FsResult<Outcome> {
        if length < 0 {
            return Err(FsError::InvalidArgument);
        }
        let (file, reservation) = self.open_for_put(target, mode, length)?;
        Ok(Outcome::Receive {
            file,
            length,
            reservation,
        })
    }

    fn do_open(&mut self, target: &str, flags: OpenFlags, mode: i64) -> FsResult<Outcome> {
        if self.is_dir(target) {
            if !flags.is_read_only() {
                return Err(FsError::IsDirectory);
            }
            self.check_dir(target, Rights::LIST)?;
            let handle = DirHandle {
                fs: Arc::clone(&self.fs),
                path: target.to_string(),
            };
            let st = handle.fstat()?;
            let fd = self.insert_fd(Box::new(handle), target.to_string());
            return Ok(Outcome::Reply(Reply::Handle { fd, stat: st }));
        }

        match self.check(target, Rights::from_open_flags(flags)) {
            Ok(()) => {}
            Err(FsError::PermissionDenied) if flags.create => {
                self.check(target, Rights::PUT)?;
                if self.fs.stat(target).is_ok() {
                    return Err(FsError::AlreadyExists);
                }
            }
            Err(e) => return Err(e),
        }

        let reservation = if flags.truncate {
            Some(self.alloc.reserve(target, 0)?)
        } else {
            None
        };
        let file = self.fs.open(target, flags, mode)?;
        if let Some(r) = reservation {
            r.commit();
        }
        let st = file.fstat()?;
        let fd = self.insert_fd(file, target.to_string());
        debug!(fd, path = target, "opened");
        Ok(Outcome::Reply(Reply::Handle { fd, stat: st }))
    }

    fn do_unlink(&mut self, target: &str) -> FsResult<Outcome> {
        self.check_delete(target)?;
        let reservation = self.alloc.reserve(target, 0)?;
        self.fs.unlink(target)?;
        reservation.commit();
        Ok(code(0))
    }

    fn do_rmdir(&mut self, target: &str, recursive: bool) -> FsResult<Outcome> {
        self.check_delete(target)?;
        let reservation = if self.alloc.enabled() {
            let usage = self.alloc.tree_usage(target)?;
            Some(self.alloc.reserve_delta(path::dirname(target), -usage)?)
        } else {
            None
        };
        if recursive {
            self.fs.rmall(target)?;
        } else {
            self.acl.rmdir(target)?;
        }
        if let Some(r) = reservation {
            r.commit();
        }
        self.alloc.invalidate(target);
        Ok(code(0))
    }

    fn do_mkdir(&mut self, target: &str, mode: i64) -> FsResult<Outcome> {
        if self.check(target, Rights::RESERVE).is_ok() {
            self.fs.mkdir(target, mode)?;
            let subject = self.subject.clone();
            if self.acl.init_reserve(target, &subject).is_err() {
                let _ = self.fs.rmdir(target);
                return Err(FsError::PermissionDenied);
            }
        } else if self.check(target, Rights::WRITE).is_ok() {
            self.fs.mkdir(target, mode)?;
            if self.acl.init_copy(target).is_err() {
                let _ = self.fs.rmdir(target);
                return Err(FsError::PermissionDenied);
            }
        } else if self.is_dir(target) {
            return Err(FsError::AlreadyExists);
        } else {
            return Err(FsError::PermissionDenied);
        }
        Ok(code(0))
    }

    fn do_mkalloc(&mut self, target: &str, size: i64, mode: i64) -> FsResult<Outcome> {
        if size < 0 {
            return Err(FsError::InvalidArgument);
        }
        if self.check(target, Rights::RESERVE).is_ok() {
            self.alloc.mkalloc(target, size, mode)?;
            let subject = self.subject.clone();
            if self.acl.init_reserve(target, &subject).is_err() {
                let _ = self.fs.rmall(target);
                return Err(FsError::PermissionDenied);
            }
        } else if self.check(target, Rights::WRITE).is_ok() {
            self.alloc.mkalloc(target, size, mode)?;
            if self.acl.init_copy(target).is_err() {
                let _ = self.fs.rmall(target);
                return Err(FsError::PermissionDenied);
            }
        } else if self.is_dir(target) {
            return Err(FsError::AlreadyExists);
        } else {
            return Err(FsError::PermissionDenied);
        }
        Ok(code(0))
    }

    fn do_rename(&mut self, from: &str, to: &str) -> FsResult<Outcome> {
        self.check(from, Rights::READ | Rights::DELETE)?;
        self.check(to, Rights::WRITE)?;
        if !self.alloc.enabled() {
            self.fs.rename(from, to)?;
            return Ok(code(0));
        }
        // Charge the destination root before the move, release the source
        // root after; a failed rename leaves both untouched.
        let usage = self.alloc.tree_usage(from)?;
        let charge = self.alloc.reserve_delta(path::dirname(to), usage)?;
        self.fs.rename(from, to)?;
        charge.commit();
        self.alloc
            .reserve_delta(path::dirname(from), -usage)?
            .commit();
        self.alloc.invalidate(from);
        Ok(code(0))
    }

    fn do_statfs_at(&mut self, target: &str) -> FsResult<Outcome> {
        let mut st = self.fs.statfs(target)?;
        self.alloc.adjust_statfs(target, &mut st)?;
        Ok(Outcome::Reply(Reply::StatFs(st)))
    }

    fn require_execute(&self) -> FsResult<()> {
        if self.config.allow_execute {
            Ok(())
        } else {
            Err(FsError::NotSupported)
        }
    }

    fn do_ticket_register(
        &mut self,
        subject: &str,
        duration: i64,
        payload: &[u8],
    ) -> FsResult<Outcome> {
        if duration <= 0 {
            return Err(FsError::InvalidArgument);
        }
        let owner = if subject == "self" {
            self.subject.clone()
        } else if self.is_superuser() {
            subject.to_string()
        } else {
            return Err(FsError::PermissionDenied);
        };
        let credential = String::from_utf8_lossy(payload).into_owned();
        if credential.trim().is_empty() {
            return Err(FsError::InvalidArgument);
        }
        let digest = self.tickets.register(
            &owner,
            credential.trim_end(),
            Duration::from_secs(duration as u64),
        );
        debug!(owner = %owner, digest = %digest, "ticket registered");
        Ok(code(0))
    }

    /// A ticket is visible to its owner, its bearer, and the superuser.
    fn lookup_own_ticket(&self, name: &str) -> FsResult<Ticket> {
        let digest = digest_of(name);
        let t = self.tickets.get(digest).ok_or(FsError::NotFound)?;
        let bearer = format!("{}{digest}", ticket::TICKET_SUBJECT_PREFIX);
        if t.owner == self.subject || self.subject == bearer || self.is_superuser() {
            Ok(t)
        } else {
            Err(FsError::PermissionDenied)
        }
    }

    fn do_ticket_get(&mut self, name: &str) -> FsResult<Outcome> {
        let t = self.lookup_own_ticket(name)?;
        let remaining = t
            .expires_at
            .duration_since(SystemTime::now())
            .unwrap_or_default()
            .as_secs();
        let mut lines = vec![
            t.owner.clone(),
            urlencoding::encode(&t.credential).into_owned(),
            remaining.to_string(),
        ];
        for (dir, rights) in &t.rights {
            lines.push(format!("{dir} {}", rights.to_text()));
        }
        Ok(Outcome::Reply(Reply::Listing(lines)))
    }

    fn do_ticket_list(&mut self, subject: &str) -> FsResult<Outcome> {
        let owner = if subject == "self" {
            self.subject.as_str()
        } else if self.is_superuser() {
            subject
        } else {
            return Err(FsError::PermissionDenied);
        };
        Ok(Outcome::Reply(Reply::Listing(self.tickets.list(owner))))
    }

    fn do_ticket_modify(&mut self, name: &str, dir: &str, rights: &str) -> FsResult<Outcome> {
        self.lookup_own_ticket(name)?;
        let mask = Rights::from_text(rights);
        // A ticket can only delegate rights its owner could exercise.
        if !mask.is_empty() && !self.is_superuser() {
            self.check_dir(dir, mask)?;
        }
        if !self.tickets.modify(digest_of(name), dir, mask) {
            return Err(FsError::NotFound);
        }
        Ok(code(0))
    }
}

fn digest_of(name: &str) -> &str {
    ticket::subject_digest(name).unwrap_or(name)
}

fn code(value: i64) -> Outcome {
    Outcome::Reply(Reply::Code(value))
}
