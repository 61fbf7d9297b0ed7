//! Job records, their state machine and handles for polling or waiting on them.

use crate::errors::ExceptionInfo;
use crate::generation::CommitId;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Transaction,
    Import,
    Export,
    Consolidate,
    Snapshot,
    UpdateStatistics,
}

impl JobKind {
    /// Mutation jobs are serialized through the store's queue; the rest run
    /// against a pinned commit alongside it.
    pub fn is_mutation(self) -> bool {
        !matches!(self, JobKind::Export)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            JobKind::Transaction => "Transaction",
            JobKind::Import => "Import",
            JobKind::Export => "Export",
            JobKind::Consolidate => "Consolidate",
            JobKind::Snapshot => "Snapshot",
            JobKind::UpdateStatistics => "UpdateStatistics",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    CompletedOk,
    CompletedWithErrors,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::CompletedOk | JobStatus::CompletedWithErrors)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "Queued",
            JobStatus::Running => "Running",
            JobStatus::CompletedOk => "CompletedOk",
            JobStatus::CompletedWithErrors => "CompletedWithErrors",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of a job's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: JobId,
    pub label: Option<String>,
    pub kind: JobKind,
    pub status: JobStatus,
    pub status_message: Option<String>,
    pub exception_info: Option<ExceptionInfo>,
    /// Commit the job produced (mutations) or observed (exports).
    pub commit_id: Option<CommitId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobInfo {
    pub fn job_completed_ok(&self) -> bool {
        self.status == JobStatus::CompletedOk
    }

    pub fn job_completed_with_errors(&self) -> bool {
        self.status == JobStatus::CompletedWithErrors
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// What a successful job reports back.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub message: String,
    pub commit_id: Option<CommitId>,
}

impl JobOutcome {
    pub fn new(message: impl Into<String>, commit_id: Option<CommitId>) -> Self {
        Self {
            message: message.into(),
            commit_id,
        }
    }
}

/// Shared, mutable state of one job. Only the executing worker moves it
/// forward; pollers read it and waiters block on the condition variable.
#[derive(Debug)]
pub(crate) struct JobRecord {
    state: Mutex<JobInfo>,
    done: Condvar,
}

impl JobRecord {
    pub(crate) fn new(job_id: JobId, kind: JobKind, label: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(JobInfo {
                job_id,
                label,
                kind,
                status: JobStatus::Queued,
                status_message: None,
                exception_info: None,
                commit_id: None,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
            }),
            done: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, JobInfo> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn id(&self) -> JobId {
        self.lock().job_id
    }

    pub(crate) fn info(&self) -> JobInfo {
        self.lock().clone()
    }

    /// Queued -> Running. Returns false if the job already left the queue.
    pub(crate) fn start(&self) -> bool {
        let mut state = self.lock();
        if state.status != JobStatus::Queued {
            return false;
        }
        state.status = JobStatus::Running;
        state.started_at = Some(Utc::now());
        true
    }

    pub(crate) fn pin_commit(&self, commit_id: CommitId) {
        self.lock().commit_id = Some(commit_id);
    }

    /// Moves the job into its terminal state. A job that is already terminal
    /// is left untouched.
    pub(crate) fn finish(&self, result: &anyhow::Result<JobOutcome>) {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return;
        }
        match result {
            Ok(outcome) => {
                state.status = JobStatus::CompletedOk;
                state.status_message = Some(outcome.message.clone());
                if outcome.commit_id.is_some() {
                    state.commit_id = outcome.commit_id;
                }
            }
            Err(err) => {
                state.status = JobStatus::CompletedWithErrors;
                state.status_message = Some(err.to_string());
                state.exception_info = Some(ExceptionInfo::from_error(err));
            }
        }
        state.completed_at = Some(Utc::now());
        drop(state);
        self.done.notify_all();
    }

    fn wait(&self) -> JobInfo {
        let mut state = self.lock();
        while !state.status.is_terminal() {
            state = self
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.clone()
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<JobInfo> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.status.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _) = self
                .done
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        Some(state.clone())
    }
}

/// Returned by every job submission. Polling through [`JobHandle::info`] never
/// blocks; [`JobHandle::wait`] blocks until the job is terminal.
#[derive(Debug, Clone)]
pub struct JobHandle {
    store: String,
    job_id: JobId,
    record: Arc<JobRecord>,
}

impl JobHandle {
    pub(crate) fn new(store: &str, record: Arc<JobRecord>) -> Self {
        Self {
            store: store.to_string(),
            job_id: record.id(),
            record,
        }
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn info(&self) -> JobInfo {
        self.record.info()
    }

    pub fn status(&self) -> JobStatus {
        self.record.info().status
    }

    pub fn wait(&self) -> JobInfo {
        self.record.wait()
    }

    /// Waits at most `timeout`; returns `None` if the job is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobInfo> {
        self.record.wait_timeout(timeout)
    }
}
