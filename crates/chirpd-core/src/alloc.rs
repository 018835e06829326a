//! Subtree space allocations.
//!
//! An allocation root is a directory carrying a reserved state file of
//! `<limit> <inuse>`. Space is accounted in whole blocks against the
//! nearest enclosing root. Every size-changing operation reserves space
//! first through a [`Reservation`] guard; dropping the guard rolls the
//! provisional update back, committing keeps it. At startup the tracker
//! rebuilds every root's usage from the actual tree, so a crash can never
//! leak quota permanently.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chirpd_vfs::{FsError, FsResult, FsStat, Vfs};
use tracing::{debug, info};

use crate::path::{self, ALLOC_STATE_NAME};

const BLOCK_SIZE: i64 = 4096;

/// Blocks actually consumed by a file of the given logical size. Sizes come
/// off the wire, so the result saturates instead of wrapping.
pub fn space_consumed(size: i64) -> i64 {
    let size = size.max(0);
    let mut blocks = size / BLOCK_SIZE;
    if size % BLOCK_SIZE != 0 {
        blocks += 1;
    }
    blocks.saturating_mul(BLOCK_SIZE)
}

#[derive(Debug, Clone)]
struct AllocState {
    limit: i64,
    inuse: i64,
    dirty: bool,
}

#[derive(Default)]
struct Tables {
    /// Root directory -> allocation state.
    states: HashMap<String, AllocState>,
    /// Directory -> its nearest allocation root.
    roots: HashMap<String, String>,
}

/// Tracks per-subtree space allocations over a backend filesystem.
pub struct AllocTracker {
    fs: Arc<dyn Vfs>,
    enabled: bool,
    inner: Mutex<Tables>,
}

/// A provisional allocation update. Dropping it undoes the update;
/// [`Reservation::commit`] makes it permanent.
#[must_use = "an uncommitted reservation rolls back on drop"]
pub struct Reservation {
    tracker: Option<Arc<AllocTracker>>,
    root: String,
    delta: i64,
    committed: bool,
}

impl Reservation {
    fn noop() -> Reservation {
        Reservation {
            tracker: None,
            root: String::new(),
            delta: 0,
            committed: true,
        }
    }

    /// Keeps the provisional update.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed && self.delta != 0 {
            if let Some(tracker) = &self.tracker {
                tracker.adjust(&self.root, -self.delta);
            }
        }
    }
}

impl AllocTracker {
    /// Tracker that accounts nothing; every reservation is a no-op.
    pub fn disabled(fs: Arc<dyn Vfs>) -> Self {
        Self {
            fs,
            enabled: false,
            inner: Mutex::new(Tables::default()),
        }
    }

    /// Installs (or resets) the root allocation of `limit` bytes and
    /// rebuilds usage for every allocation root by scanning the tree.
    pub fn init(fs: Arc<dyn Vfs>, limit: i64) -> FsResult<Self> {
        if limit == 0 {
            return Ok(Self::disabled(fs));
        }
        let tracker = Self {
            fs,
            enabled: true,
            inner: Mutex::new(Tables::default()),
        };
        tracker
            .fs
            .write_file(&state_path("/"), format!("{limit} 0\n").as_bytes())?;
        info!(limit, "beginning allocation recovery scan");
        {
            let mut tables = tracker.inner.lock().map_err(|_| FsError::Io)?;
            tracker.load_state("/", &mut tables, true)?;
            tracker.recover("/", "/", &mut tables)?;
        }
        tracker.flush()?;
        info!("allocation recovery complete");
        Ok(tracker)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Reserves space for `file_path` to grow (or shrink) to `new_size`.
    /// Deleting a file is a reservation for size zero, taken before the
    /// backend delete and committed only once it succeeds.
    pub fn reserve(self: &Arc<Self>, file_path: &str, new_size: i64) -> FsResult<Reservation> {
        if !self.enabled {
            return Ok(Reservation::noop());
        }
        let current = match self.fs.file_size(file_path) {
            Ok(size) => size,
            Err(FsError::NotFound) => 0,
            Err(e) => return Err(e),
        };
        let delta = space_consumed(new_size).saturating_sub(space_consumed(current));
        self.reserve_delta(path::dirname(file_path), delta)
    }

    /// Reserves a raw block delta against the root enclosing `dir`.
    pub fn reserve_delta(self: &Arc<Self>, dir: &str, delta: i64) -> FsResult<Reservation> {
        if !self.enabled || delta == 0 {
            return Ok(Reservation::noop());
        }
        let mut tables = self.inner.lock().map_err(|_| FsError::Io)?;
        let root = self
            .find_root(dir, &mut tables)?
            .ok_or(FsError::NotFound)?;
        let state = self
            .state_mut(&root, &mut tables)?;
        if delta > 0 && state.limit > 0 {
            let wanted = state.inuse.checked_add(delta).unwrap_or(i64::MAX);
            if wanted > state.limit {
                debug!(root = %root, delta, inuse = state.inuse, limit = state.limit, "allocation exhausted");
                return Err(FsError::NoSpace);
            }
        }
        state.inuse = state.inuse.saturating_add(delta).max(0);
        state.dirty = true;
        Ok(Reservation {
            tracker: Some(Arc::clone(self)),
            root,
            delta,
            committed: false,
        })
    }

    /// Total blocks a tree consumes against its enclosing root. A nested
    /// allocation root counts as its whole limit.
    pub fn tree_usage(&self, dir: &str) -> FsResult<i64> {
        let st = self.fs.lstat(dir)?;
        if !st.is_dir() {
            return Ok(space_consumed(st.size));
        }
        if let Ok(data) = self.fs.read_file(&state_path(dir)) {
            let (limit, _) = parse_state(&data)?;
            return Ok(limit);
        }
        self.sum_dir(dir)
    }

    fn sum_dir(&self, dir: &str) -> FsResult<i64> {
        let mut total = 0;
        for name in self.fs.list_dir(dir)? {
            if name == "." || name == ".." || path::is_service_name(&name) {
                continue;
            }
            let child = path::join(dir, &name);
            let st = self.fs.lstat(&child)?;
            if st.is_dir() {
                total = self.tree_usage(&child)?.saturating_add(total);
            } else if st.is_file() {
                total = space_consumed(st.size).saturating_add(total);
            }
        }
        Ok(total)
    }

    /// Drops cached state under a deleted subtree.
    pub fn invalidate(&self, prefix: &str) {
        if !self.enabled {
            return;
        }
        if let Ok(mut tables) = self.inner.lock() {
            let under = |p: &str| p == prefix || p.starts_with(&format!("{prefix}/"));
            tables.states.retain(|root, _| !under(root));
            tables.roots.retain(|dir, root| !under(dir) && !under(root));
        }
    }

    /// Creates `dir` as a fresh allocation root of `limit` bytes, charged
    /// in full against the enclosing allocation.
    pub fn mkalloc(self: &Arc<Self>, dir: &str, limit: i64, mode: i64) -> FsResult<()> {
        if !self.enabled {
            return Err(FsError::NotImplemented);
        }
        let parent = self.reserve_delta(path::dirname(dir), limit)?;
        self.fs.mkdir(dir, mode)?;
        if let Err(e) = self
            .fs
            .write_file(&state_path(dir), format!("{limit} 0\n").as_bytes())
        {
            let _ = self.fs.rmdir(dir);
            return Err(e);
        }
        parent.commit();
        debug!(dir, limit, "allocation created");
        self.flush()
    }

    /// The allocation governing `path`: its root directory, limit, and use.
    pub fn lsalloc(&self, path: &str) -> FsResult<(String, i64, i64)> {
        if !self.enabled {
            return Err(FsError::NotImplemented);
        }
        let mut tables = self.inner.lock().map_err(|_| FsError::Io)?;
        let root = self
            .find_root(path, &mut tables)?
            .ok_or(FsError::NotFound)?;
        let state = self.state_mut(&root, &mut tables)?.clone();
        Ok((root, state.limit, state.inuse))
    }

    fn is_root_dir(&self, dir: &str) -> bool {
        self.fs.stat(&state_path(dir)).is_ok()
    }

    /// Rewrites filesystem totals to reflect the allocation's limits.
    pub fn adjust_statfs(&self, path: &str, st: &mut FsStat) -> FsResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let (_, limit, inuse) = self.lsalloc(path)?;
        if st.bsize <= 0 {
            st.bsize = BLOCK_SIZE;
        }
        let avail = (limit - inuse).max(0);
        st.blocks = limit / st.bsize;
        st.bfree = avail / st.bsize;
        st.bavail = avail / st.bsize;
        Ok(())
    }

    /// Writes every dirty allocation state back to its file.
    pub fn flush(&self) -> FsResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut tables = self.inner.lock().map_err(|_| FsError::Io)?;
        for (root, state) in tables.states.iter_mut() {
            if state.dirty {
                debug!(root = %root, inuse = state.inuse, "storing allocation state");
                self.fs.write_file(
                    &state_path(root),
                    format!("{} {}\n", state.limit, state.inuse).as_bytes(),
                )?;
                state.dirty = false;
            }
        }
        Ok(())
    }

    /// Current `(limit, inuse)` of the root governing `dir`.
    pub fn usage(&self, dir: &str) -> FsResult<(i64, i64)> {
        let (_, limit, inuse) = self.lsalloc(&path::join(dir, "x"))?;
        Ok((limit, inuse))
    }

    fn adjust(&self, root: &str, change: i64) {
        if let Ok(mut tables) = self.inner.lock() {
            if let Some(state) = tables.states.get_mut(root) {
                state.inuse = state.inuse.saturating_add(change).max(0);
                state.dirty = true;
            }
        }
    }

    fn find_root(&self, dir: &str, tables: &mut Tables) -> FsResult<Option<String>> {
        if let Some(root) = tables.roots.get(dir) {
            return Ok(Some(root.clone()));
        }
        let mut d = dir.to_string();
        loop {
            if tables.states.contains_key(&d) || self.fs.stat(&state_path(&d)).is_ok() {
                tables.roots.insert(dir.to_string(), d.clone());
                return Ok(Some(d));
            }
            if d == "/" {
                return Ok(None);
            }
            d = path::dirname(&d).to_string();
        }
    }

    fn state_mut<'t>(
        &self,
        root: &str,
        tables: &'t mut Tables,
    ) -> FsResult<&'t mut AllocState> {
        if !tables.states.contains_key(root) {
            self.load_state(root, tables, false)?;
        }
        tables.states.get_mut(root).ok_or(FsError::NotFound)
    }

    fn load_state(&self, root: &str, tables: &mut Tables, recovering: bool) -> FsResult<()> {
        let data = self.fs.read_file(&state_path(root))?;
        let (limit, mut inuse) = parse_state(&data)?;
        let mut dirty = false;
        if recovering {
            inuse = 0;
            dirty = true;
        }
        tables.states.insert(
            root.to_string(),
            AllocState {
                limit,
                inuse,
                dirty,
            },
        );
        Ok(())
    }

    fn recover(&self, dir: &str, root: &str, tables: &mut Tables) -> FsResult<()> {
        for name in self.fs.list_dir(dir)? {
            if name == "." || name == ".." || path::is_service_name(&name) {
                continue;
            }
            let child = path::join(dir, &name);
            let st = self.fs.lstat(&child)?;
            if st.is_dir() {
                if self.is_root_dir(&child) {
                    self.load_state(&child, tables, true)?;
                    self.recover(&child, &child, tables)?;
                    let limit = tables
                        .states
                        .get(&child)
                        .map(|s| s.limit)
                        .unwrap_or(0);
                    if let Some(state) = tables.states.get_mut(root) {
                        state.inuse = state.inuse.saturating_add(limit);
                        state.dirty = true;
                    }
                } else {
                    self.recover(&child, root, tables)?;
                }
            } else if st.is_file() {
                if let Some(state) = tables.states.get_mut(root) {
                    state.inuse = state.inuse.saturating_add(space_consumed(st.size));
                    state.dirty = true;
                }
            }
        }
        Ok(())
    }
}

fn state_path(dir: &str) -> String {
    path::join(dir, ALLOC_STATE_NAME)
}

fn parse_state(data: &[u8]) -> FsResult<(i64, i64)> {
    let text = String::from_utf8_lossy(data);
    let mut fields = text.split_whitespace();
    let limit = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or(FsError::InvalidArgument)?;
    let inuse = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or(FsError::InvalidArgument)?;
    Ok((limit, inuse))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chirpd_vfs::LocalFs;
    use tempfile::TempDir;

    fn fixture(limit: i64) -> (TempDir, Arc<AllocTracker>) {
        let dir = TempDir::new().unwrap();
        let fs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path()));
        let tracker = Arc::new(AllocTracker::init(fs, limit).unwrap());
        (dir, tracker)
    }

    #[test]
    fn test_space_consumed_rounds_to_blocks() {
        assert_eq!(space_consumed(0), 0);
        assert_eq!(space_consumed(1), 4096);
        assert_eq!(space_consumed(4096), 4096);
        assert_eq!(space_consumed(4097), 8192);
        assert_eq!(space_consumed(-1), 0);
        assert_eq!(space_consumed(i64::MAX), i64::MAX);
    }

    #[test]
    fn test_init_zero_limit_is_disabled() {
        let dir = TempDir::new().unwrap();
        let fs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path()));
        let tracker = Arc::new(AllocTracker::init(fs, 0).unwrap());
        assert!(!tracker.enabled());
        assert_eq!(tracker.lsalloc("/x"), Err(FsError::NotImplemented));
        tracker.reserve("/x", 100).unwrap().commit();
    }

    #[test]
    fn test_recovery_counts_existing_files() {
        let dir = TempDir::new().unwrap();
        let fs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path()));
        fs.mkdir("/sub", 0o755).unwrap();
        fs.write_file("/a", &[0u8; 5000]).unwrap();
        fs.write_file("/sub/b", &[0u8; 100]).unwrap();
        let tracker = Arc::new(AllocTracker::init(fs, 1 << 20).unwrap());
        let (_, inuse) = tracker.usage("/").unwrap();
        assert_eq!(inuse, space_consumed(5000) + space_consumed(100));
    }

    #[test]
    fn test_reserve_commit_charges_root() {
        let (_dir, tracker) = fixture(1 << 20);
        tracker.reserve("/f", 100).unwrap().commit();
        let (_, inuse) = tracker.usage("/").unwrap();
        assert_eq!(inuse, 4096);
    }

    #[test]
    fn test_reserve_rollback_on_drop() {
        let (_dir, tracker) = fixture(1 << 20);
        let r = tracker.reserve("/f", 100).unwrap();
        drop(r);
        let (_, inuse) = tracker.usage("/").unwrap();
        assert_eq!(inuse, 0);
    }

    #[test]
    fn test_reserve_over_limit_is_no_space() {
        let (_dir, tracker) = fixture(4096);
        tracker.reserve("/a", 4096).unwrap().commit();
        assert_eq!(tracker.reserve("/b", 1).err(), Some(FsError::NoSpace));
    }

    #[test]
    fn test_reserve_extreme_size_is_no_space() {
        let (_dir, tracker) = fixture(4096);
        assert_eq!(tracker.reserve("/f", i64::MAX).err(), Some(FsError::NoSpace));
        let (_, inuse) = tracker.usage("/").unwrap();
        assert_eq!(inuse, 0);
    }

    #[test]
    fn test_delete_frees_space() {
        let dir = TempDir::new().unwrap();
        let fs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path()));
        fs.write_file("/f", &[0u8; 4096]).unwrap();
        let tracker = Arc::new(AllocTracker::init(Arc::clone(&fs), 1 << 20).unwrap());
        let r = tracker.reserve("/f", 0).unwrap();
        fs.unlink("/f").unwrap();
        r.commit();
        let (_, inuse) = tracker.usage("/").unwrap();
        assert_eq!(inuse, 0);
    }

    #[test]
    fn test_failed_delete_restores_allocation() {
        let dir = TempDir::new().unwrap();
        let fs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path()));
        fs.write_file("/f", &[0u8; 4096]).unwrap();
        let tracker = Arc::new(AllocTracker::init(Arc::clone(&fs), 1 << 20).unwrap());
        {
            let _r = tracker.reserve("/f", 0).unwrap();
            // Backend delete failed; the guard rolls back on drop.
        }
        let (_, inuse) = tracker.usage("/").unwrap();
        assert_eq!(inuse, 4096);
    }

    #[test]
    fn test_usage_never_negative() {
        let (_dir, tracker) = fixture(1 << 20);
        tracker.reserve_delta("/", -99999).unwrap().commit();
        let (_, inuse) = tracker.usage("/").unwrap();
        assert_eq!(inuse, 0);
    }

    #[test]
    fn test_mkalloc_charges_parent_in_full() {
        let (_dir, tracker) = fixture(1 << 20);
        tracker.mkalloc("/scratch", 8192, 0o755).unwrap();
        let (_, root_inuse) = tracker.usage("/").unwrap();
        assert_eq!(root_inuse, 8192);
        let (root, limit, inuse) = tracker.lsalloc("/scratch/file").unwrap();
        assert_eq!(root, "/scratch");
        assert_eq!(limit, 8192);
        assert_eq!(inuse, 0);
    }

    #[test]
    fn test_mkalloc_over_parent_limit_fails() {
        let (_dir, tracker) = fixture(4096);
        assert_eq!(
            tracker.mkalloc("/big", 8192, 0o755),
            Err(FsError::NoSpace)
        );
    }

    #[test]
    fn test_nested_root_bounds_reservations() {
        let (_dir, tracker) = fixture(1 << 20);
        tracker.mkalloc("/scratch", 4096, 0o755).unwrap();
        tracker.reserve("/scratch/f", 4096).unwrap().commit();
        assert_eq!(
            tracker.reserve("/scratch/g", 1).err(),
            Some(FsError::NoSpace)
        );
        // The outer root still has plenty.
        tracker.reserve("/elsewhere", 1).unwrap().commit();
    }

    #[test]
    fn test_recovery_counts_nested_root_limit() {
        let dir = TempDir::new().unwrap();
        let fs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path()));
        fs.mkdir("/scratch", 0o755).unwrap();
        fs.write_file("/scratch/.__alloc", b"8192 0\n").unwrap();
        fs.write_file("/scratch/f", &[0u8; 100]).unwrap();
        let tracker = Arc::new(AllocTracker::init(fs, 1 << 20).unwrap());
        let (_, root_inuse) = tracker.usage("/").unwrap();
        assert_eq!(root_inuse, 8192);
        let (_, _, scratch_inuse) = tracker.lsalloc("/scratch/f").unwrap();
        assert_eq!(scratch_inuse, 4096);
    }

    #[test]
    fn test_flush_persists_state() {
        let dir = TempDir::new().unwrap();
        let fs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path()));
        let tracker = Arc::new(AllocTracker::init(Arc::clone(&fs), 1 << 20).unwrap());
        tracker.reserve("/f", 100).unwrap().commit();
        tracker.flush().unwrap();
        let data = fs.read_file("/.__alloc").unwrap();
        assert_eq!(String::from_utf8_lossy(&data), format!("{} 4096\n", 1 << 20));
    }

    #[test]
    fn test_tree_usage() {
        let dir = TempDir::new().unwrap();
        let fs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path()));
        fs.mkdir("/t", 0o755).unwrap();
        fs.mkdir("/t/sub", 0o755).unwrap();
        fs.write_file("/t/a", &[0u8; 10]).unwrap();
        fs.write_file("/t/sub/b", &[0u8; 10]).unwrap();
        let tracker = Arc::new(AllocTracker::init(fs, 1 << 20).unwrap());
        assert_eq!(tracker.tree_usage("/t").unwrap(), 8192);
    }

    #[test]
    fn test_adjust_statfs_reflects_allocation() {
        let (_dir, tracker) = fixture(1 << 20);
        tracker.reserve("/f", 4096).unwrap().commit();
        let mut st = FsStat {
            bsize: 4096,
            ..FsStat::default()
        };
        tracker.adjust_statfs("/f", &mut st).unwrap();
        assert_eq!(st.blocks, (1 << 20) / 4096);
        assert_eq!(st.bavail, ((1 << 20) - 4096) / 4096);
    }
}
