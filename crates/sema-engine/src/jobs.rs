//! Asynchronous clustering jobs.
//!
//! Large-scope DBSCAN runs off the query path: `Engine::cluster` submits a
//! job and returns a `JobId`; the caller polls `Engine::cluster_result`.
//! Jobs run on the blocking pool, are cancellable, and read only immutable
//! snapshots, so cancellation never leaves partial state.

use parking_lot::Mutex;
use sema_geo::{CancelToken, ClusterOutcome};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle to a submitted clustering job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

/// Poll result for a job.
#[derive(Debug, Clone)]
pub enum JobStatus {
    Running,
    Finished(ClusterOutcome),
    Cancelled,
    Failed(String),
}

struct JobEntry {
    cancel: CancelToken,
    status: JobStatus,
}

/// Registry of in-flight and finished jobs.
#[derive(Default)]
pub struct JobRegistry {
    next: AtomicU64,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new running job, returning its id and cancel token.
    pub fn begin(&self) -> (JobId, CancelToken) {
        let id = JobId(self.next.fetch_add(1, Ordering::SeqCst));
        let cancel = CancelToken::new();
        self.jobs.lock().insert(
            id,
            JobEntry {
                cancel: cancel.clone(),
                status: JobStatus::Running,
            },
        );
        (id, cancel)
    }

    /// Record a job's terminal status.
    pub fn finish(&self, id: JobId, status: JobStatus) {
        if let Some(entry) = self.jobs.lock().get_mut(&id) {
            entry.status = status;
        }
    }

    /// Current status, if the job exists.
    pub fn poll(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.lock().get(&id).map(|entry| entry.status.clone())
    }

    /// Request cancellation of a running job.
    pub fn cancel(&self, id: JobId) -> bool {
        let jobs = self.jobs.lock();
        match jobs.get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }
}
