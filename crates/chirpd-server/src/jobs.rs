//! Job store interface. The server only forwards the job commands; the
//! in-memory store here backs standalone operation and tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chirpd_vfs::{FsError, FsResult};
use serde_json::{json, Value};

/// External job execution store, keyed by job id.
pub trait JobStore: Send + Sync {
    fn submit(&self, spec: Value) -> FsResult<i64>;
    fn status(&self, id: i64) -> FsResult<Value>;
    fn wait(&self, id: i64, timeout: Duration) -> FsResult<Value>;
    fn kill(&self, id: i64) -> FsResult<()>;
}

#[derive(Debug, Clone)]
struct JobRecord {
    spec: Value,
    state: &'static str,
}

/// Store that records submissions and completes them immediately. It keeps
/// the protocol exercisable without an execution backend.
#[derive(Debug, Default)]
pub struct MemJobStore {
    inner: Mutex<MemJobs>,
}

#[derive(Debug, Default)]
struct MemJobs {
    jobs: HashMap<i64, JobRecord>,
    next_id: i64,
}

impl MemJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn report(id: i64, record: &JobRecord) -> Value {
        json!({
            "id": id,
            "state": record.state,
            "spec": record.spec,
        })
    }
}

impl JobStore for MemJobStore {
    fn submit(&self, spec: Value) -> FsResult<i64> {
        let mut inner = self.inner.lock().map_err(|_| FsError::Io)?;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.jobs.insert(
            id,
            JobRecord {
                spec,
                state: "finished",
            },
        );
        Ok(id)
    }

    fn status(&self, id: i64) -> FsResult<Value> {
        let inner = self.inner.lock().map_err(|_| FsError::Io)?;
        let record = inner.jobs.get(&id).ok_or(FsError::NoSuchProcess)?;
        Ok(Self::report(id, record))
    }

    fn wait(&self, id: i64, _timeout: Duration) -> FsResult<Value> {
        // Jobs here finish at submission, so a wait never blocks.
        self.status(id)
    }

    fn kill(&self, id: i64) -> FsResult<()> {
        let mut inner = self.inner.lock().map_err(|_| FsError::Io)?;
        let record = inner.jobs.get_mut(&id).ok_or(FsError::NoSuchProcess)?;
        record.state = "killed";
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_and_status() {
        let store = MemJobStore::new();
        let id = store.submit(json!({"cmd": "/bin/true"})).unwrap();
        let status = store.status(id).unwrap();
        assert_eq!(status["state"], "finished");
        assert_eq!(status["spec"]["cmd"], "/bin/true");
    }

    #[test]
    fn test_unknown_job() {
        let store = MemJobStore::new();
        assert_eq!(store.status(42), Err(FsError::NoSuchProcess));
        assert_eq!(store.kill(42), Err(FsError::NoSuchProcess));
    }

    #[test]
    fn test_kill_changes_state() {
        let store = MemJobStore::new();
        let id = store.submit(json!({})).unwrap();
        store.kill(id).unwrap();
        assert_eq!(store.status(id).unwrap()["state"], "killed");
    }

    #[test]
    fn test_wait_returns_immediately() {
        let store = MemJobStore::new();
        let id = store.submit(json!({})).unwrap();
        let report = store.wait(id, Duration::from_secs(5)).unwrap();
        assert_eq!(report["id"], id);
    }
}
