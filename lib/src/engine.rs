//! Job dispatch.
//!
//! Every store runs one worker thread that drains its mutation queue in FIFO
//! order, so at most one mutation executes against a store at a time. Export
//! jobs pin a commit when they are submitted and run on a thread of their own,
//! never waiting on the queue.

use crate::catalog::Catalog;
use crate::errors::JobError;
use crate::generation::CommitView;
use crate::job::{JobKind, JobOutcome, JobRecord};
use crate::snapshot::{self, SnapshotRequest};
use crate::stats::StatisticsSnapshot;
use crate::store::Store;
use crate::transaction::{self, TransactionUpdate};
use crate::transfer::{self, ExportRequest, ImportRequest};
use anyhow::{anyhow, Error, Result};
use log::{debug, error, info};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use std::thread;

/// Per-kind payload of a submitted job.
#[derive(Debug)]
pub(crate) enum JobPayload {
    Transaction(TransactionUpdate),
    Import(ImportRequest),
    Export {
        request: ExportRequest,
        view: CommitView,
    },
    Consolidate,
    Snapshot(SnapshotRequest),
    UpdateStatistics,
}

impl JobPayload {
    pub(crate) fn kind(&self) -> JobKind {
        match self {
            JobPayload::Transaction(_) => JobKind::Transaction,
            JobPayload::Import(_) => JobKind::Import,
            JobPayload::Export { .. } => JobKind::Export,
            JobPayload::Consolidate => JobKind::Consolidate,
            JobPayload::Snapshot(_) => JobKind::Snapshot,
            JobPayload::UpdateStatistics => JobKind::UpdateStatistics,
        }
    }
}

#[derive(Debug)]
pub(crate) struct QueuedJob {
    pub record: Arc<JobRecord>,
    pub payload: JobPayload,
}

pub(crate) fn worker_loop(store: Arc<Store>, catalog: Weak<Catalog>, rx: Receiver<QueuedJob>) {
    debug!("Worker for store '{}' started", store.name());
    while let Ok(job) = rx.recv() {
        run(&store, &catalog, job);
    }
    debug!("Worker for store '{}' stopped", store.name());
}

/// Runs a read-only job on its own thread.
pub(crate) fn spawn_reader(store: Arc<Store>, job: QueuedJob) -> Result<()> {
    let name = format!("quadlog-{}-{}", job.payload.kind(), job.record.id());
    thread::Builder::new()
        .name(name)
        .spawn(move || run(&store, &Weak::new(), job))?;
    Ok(())
}

fn run(store: &Store, catalog: &Weak<Catalog>, job: QueuedJob) {
    let QueuedJob { record, payload } = job;
    if !record.start() {
        return;
    }
    let kind = payload.kind();
    let job_id = record.id();
    debug!("Running {} job {} on store '{}'", kind, job_id, store.name());

    let result = if store.is_deleted() {
        Err(Error::new(JobError::not_found("Store deleted")))
    } else {
        panic::catch_unwind(AssertUnwindSafe(|| {
            execute(store, catalog, &record, payload)
        }))
        .unwrap_or_else(|_| Err(anyhow!("{} job {} panicked", kind, job_id)))
    };

    match &result {
        Ok(outcome) => info!(
            "{} job {} on store '{}' completed: {}",
            kind,
            job_id,
            store.name(),
            outcome.message
        ),
        Err(e) => error!(
            "{} job {} on store '{}' failed: {:#}",
            kind,
            job_id,
            store.name(),
            e
        ),
    }
    record.finish(&result);
}

fn execute(
    store: &Store,
    catalog: &Weak<Catalog>,
    record: &JobRecord,
    payload: JobPayload,
) -> Result<JobOutcome> {
    match payload {
        JobPayload::Transaction(update) => transaction::execute(store, &update),
        JobPayload::Import(request) => transfer::execute_import(store, &request),
        JobPayload::Export { request, view } => {
            record.pin_commit(view.commit_id());
            transfer::execute_export(store, &request, &view)
        }
        JobPayload::Consolidate => consolidate(store),
        JobPayload::Snapshot(request) => snapshot::execute(store, catalog, &request),
        JobPayload::UpdateStatistics => update_statistics(store),
    }
}

fn consolidate(store: &Store) -> Result<JobOutcome> {
    let commit_id = store.log().latest();
    let changed = store.log().consolidate()?;
    let message = if changed {
        format!("Consolidated store at commit {}", commit_id)
    } else {
        "Store already consolidated".to_string()
    };
    Ok(JobOutcome::new(message, Some(commit_id)))
}

fn update_statistics(store: &Store) -> Result<JobOutcome> {
    let view = store.log().pin();
    let snapshot = StatisticsSnapshot::compute(&view);
    let message = format!(
        "Computed statistics for commit {}: {} quads, {} predicates",
        snapshot.commit_id,
        snapshot.total_triple_count,
        snapshot.predicate_triple_counts.len()
    );
    store.set_statistics(snapshot)?;
    Ok(JobOutcome::new(message, Some(view.commit_id())))
}
