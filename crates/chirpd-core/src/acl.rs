//! Per-directory access control lists.
//!
//! Each directory carries a reserved file of `<subject-pattern> <rights>`
//! lines. Resolution ORs together the rights of every entry matching the
//! caller, including wildcard patterns and `group:` references. Absence of
//! a readable ACL means no rights, never all rights.

use std::sync::Arc;

use chirpd_vfs::{FsError, FsResult, Vfs};
use tracing::{debug, warn};

use crate::group::GroupLookup;
use crate::path::{self, ACL_BASE_NAME};
use crate::rights::Rights;
use crate::ticket::{self, TicketRegistry};

/// One ACL line: a subject pattern and the rights it grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub subject: String,
    pub rights: Rights,
}

impl AclEntry {
    pub fn new(subject: impl Into<String>, rights: Rights) -> Self {
        Self {
            subject: subject.into(),
            rights,
        }
    }
}

/// Authorization settings fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct AclConfig {
    /// Subject that implicitly holds LIST and ADMIN everywhere.
    pub superuser: Option<String>,
    /// Masks every resolved grant to READ and LIST.
    pub read_only: bool,
    /// Entries assumed for directories that carry no ACL of their own.
    pub default_acl: Vec<AclEntry>,
}

/// ACL resolution and maintenance over a backend filesystem.
pub struct AclStore {
    fs: Arc<dyn Vfs>,
    groups: Arc<dyn GroupLookup>,
    tickets: Arc<TicketRegistry>,
    config: AclConfig,
}

/// Parses ACL file text. Lines that do not carry a subject followed by a
/// run of rights characters are skipped, matching the lenient reader the
/// file format has always had.
pub fn parse_entries(text: &str) -> Vec<AclEntry> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(subject), Some(token)) = (parts.next(), parts.next()) else {
            continue;
        };
        let rights_run: String = token
            .chars()
            .take_while(|c| "rwldpvax()".contains(*c))
            .collect();
        if rights_run.is_empty() {
            continue;
        }
        entries.push(AclEntry::new(subject, Rights::from_text(&rights_run)));
    }
    entries
}

/// Renders entries back to file text, one line per entry.
pub fn serialize_entries(entries: &[AclEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.subject);
        out.push(' ');
        out.push_str(&entry.rights.to_text());
        out.push('\n');
    }
    out
}

/// Matches a subject against an ACL pattern, where `*` spans any run of
/// characters and `?` any single one.
pub fn pattern_match(pattern: &str, subject: &str) -> bool {
    fn matches(p: &[u8], s: &[u8]) -> bool {
        match (p.first(), s.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], s) || (!s.is_empty() && matches(p, &s[1..]))
            }
            (Some(b'?'), Some(_)) => matches(&p[1..], &s[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &s[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), subject.as_bytes())
}

impl AclStore {
    pub fn new(
        fs: Arc<dyn Vfs>,
        groups: Arc<dyn GroupLookup>,
        tickets: Arc<TicketRegistry>,
        config: AclConfig,
    ) -> Self {
        Self {
            fs,
            groups,
            tickets,
            config,
        }
    }

    fn acl_path(dir: &str) -> String {
        path::join(dir, ACL_BASE_NAME)
    }

    /// Loads a directory's ACL, falling back to the configured default when
    /// the directory exists but carries none. A missing directory is an
    /// error distinct from "no rights".
    fn load(&self, dir: &str) -> FsResult<Vec<AclEntry>> {
        match self.fs.stat(dir) {
            Ok(st) if st.is_dir() => {}
            Ok(_) => return Err(FsError::NotDirectory),
            Err(FsError::NotFound) if !self.config.default_acl.is_empty() => {
                return Ok(self.config.default_acl.clone());
            }
            Err(e) => return Err(e),
        }
        match self.fs.read_file(&Self::acl_path(dir)) {
            Ok(data) => Ok(parse_entries(&String::from_utf8_lossy(&data))),
            Err(FsError::NotFound) if !self.config.default_acl.is_empty() => {
                Ok(self.config.default_acl.clone())
            }
            Err(e) => Err(e),
        }
    }

    /// The ACL entries of a directory, for display. Errors propagate, so a
    /// missing ACL surfaces as not-found rather than an empty list.
    pub fn entries(&self, dir: &str) -> FsResult<Vec<AclEntry>> {
        self.load(dir)
    }

    /// Accumulated rights `subject` holds in `dir`. A missing or unreadable
    /// ACL yields no rights.
    pub fn resolve(&self, subject: &str, dir: &str) -> FsResult<Rights> {
        let mut rights = if let Some(digest) = ticket::subject_digest(subject) {
            match self.tickets.get(digest) {
                Some(t) => self.resolve_entries(&t.owner, dir) & t.rights_for(dir),
                None => Rights::NONE,
            }
        } else {
            self.resolve_entries(subject, dir)
        };
        if self.config.read_only {
            rights = rights & (Rights::READ | Rights::LIST);
        }
        Ok(rights)
    }

    fn resolve_entries(&self, subject: &str, dir: &str) -> Rights {
        let entries = match self.load(dir) {
            Ok(entries) => entries,
            Err(FsError::NotFound) => return Rights::NONE,
            Err(e) => {
                warn!(dir, error = %e, "acl unreadable");
                return Rights::NONE;
            }
        };
        let mut rights = Rights::NONE;
        for entry in &entries {
            if pattern_match(&entry.subject, subject) {
                rights |= entry.rights;
            } else if entry.subject.starts_with("group:")
                && self.groups.is_member(&entry.subject, subject)
            {
                rights |= entry.rights;
            }
        }
        rights
    }

    /// Checks that `subject` holds `required` in `dir`. The superuser
    /// implicitly holds LIST and ADMIN.
    pub fn check_dir(&self, dir: &str, subject: &str, required: Rights) -> FsResult<()> {
        let mut held = self.resolve(subject, dir)?;
        if self.config.superuser.as_deref() == Some(subject) {
            held |= Rights::LIST | Rights::ADMIN;
        }
        if held.contains(required) {
            Ok(())
        } else {
            debug!(dir, subject, required = %required, held = %held, "access denied");
            Err(FsError::PermissionDenied)
        }
    }

    /// Checks rights on a path, following a symlink target.
    pub fn check(&self, target: &str, subject: &str, required: Rights) -> FsResult<()> {
        self.do_check(target, subject, required, true)
    }

    /// Checks rights on a path without following a symlink.
    pub fn check_link(&self, target: &str, subject: &str, required: Rights) -> FsResult<()> {
        self.do_check(target, subject, required, false)
    }

    fn do_check(
        &self,
        target: &str,
        subject: &str,
        mut required: Rights,
        follow: bool,
    ) -> FsResult<()> {
        let mut target = target.to_string();

        // A pure delete acts on the link itself, never its target.
        if follow && required != Rights::DELETE {
            if let Ok(link) = self.fs.readlink(&target) {
                target = if link.starts_with('/') {
                    path::collapse(&link)
                } else {
                    path::collapse(&format!("{}/{}", path::dirname(&target), link))
                };
                debug!(target = %target, "symlink followed for acl check");
            }
        }

        // The ACL file protects itself: writing it takes ADMIN, and it can
        // never be deleted directly.
        if path::is_acl_file(&target) {
            if required.contains(Rights::DELETE) {
                return Err(FsError::PermissionDenied);
            }
            if required.contains(Rights::WRITE) {
                required = required.without(Rights::WRITE) | Rights::ADMIN;
            }
        }

        self.check_dir(path::dirname(&target), subject, required)
    }

    /// Rewrites one subject's entry in a directory's ACL. With `reset` the
    /// previous contents are discarded entirely. Entries left with no
    /// rights are dropped.
    pub fn set(&self, dir: &str, subject: &str, rights: Rights, reset: bool) -> FsResult<()> {
        match self.fs.stat(dir) {
            Ok(st) if st.is_dir() => {}
            Ok(_) => return Err(FsError::NotDirectory),
            Err(_) => return Err(FsError::NotDirectory),
        }

        let mut entries = if reset {
            Vec::new()
        } else {
            match self.fs.read_file(&Self::acl_path(dir)) {
                Ok(data) => parse_entries(&String::from_utf8_lossy(&data)),
                // A directory that never had an ACL gets a fresh one,
                // seeded from the default when configured.
                Err(FsError::NotFound) => self.config.default_acl.clone(),
                Err(_) => return Err(FsError::PermissionDenied),
            }
        };

        if let Some(entry) = entries.iter_mut().find(|e| e.subject == subject) {
            entry.rights = rights;
        } else {
            entries.push(AclEntry::new(subject, rights));
        }
        entries.retain(|e| !e.rights.is_empty());

        self.write_entries(dir, &entries)
    }

    fn write_entries(&self, dir: &str, entries: &[AclEntry]) -> FsResult<()> {
        self.fs
            .write_file(&Self::acl_path(dir), serialize_entries(entries).as_bytes())
    }

    /// Installs an owner ACL at the storage root if none exists yet.
    pub fn init_root(&self, owner: &str) -> FsResult<()> {
        if self.load("/").map(|e| !e.is_empty()).unwrap_or(false) {
            return Ok(());
        }
        debug!(owner, "installing root acl");
        self.write_entries("/", &[AclEntry::new(owner, Rights::FULL)])
    }

    /// Seeds a new directory's ACL by copying its parent's.
    pub fn init_copy(&self, dir: &str) -> FsResult<()> {
        let entries = self.load(path::dirname(dir))?;
        self.write_entries(dir, &entries)
    }

    /// Seeds a new directory's ACL from the parent's RESERVE sub-rights for
    /// `subject`. A RESERVE grant with no sub-rights confers the full
    /// ordinary set, a long-standing compatibility rule.
    pub fn init_reserve(&self, dir: &str, subject: &str) -> FsResult<()> {
        let parent_rights = self.resolve(subject, path::dirname(dir))?;
        let mut rights = parent_rights.reserve_to_ordinary();
        if rights.is_empty() {
            rights = Rights::FULL;
        }
        self.write_entries(dir, &[AclEntry::new(subject, rights)])
    }

    /// Removes a directory that is empty apart from its ACL file.
    pub fn rmdir(&self, dir: &str) -> FsResult<()> {
        for name in self.fs.list_dir(dir)? {
            if name == "." || name == ".." || name == ACL_BASE_NAME {
                continue;
            }
            return Err(FsError::NotEmpty);
        }
        self.fs.rmall(dir)
    }
}
