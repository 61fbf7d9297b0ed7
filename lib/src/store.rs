//! A named store: its commit log, job registry, statistics cache and the
//! worker thread that executes its mutation jobs.

use crate::catalog::Catalog;
use crate::codec::WriteOptions;
use crate::commit_log::CommitLog;
use crate::config::Config;
use crate::consts::{STATISTICS_FILE, STORE_METADATA_FILE};
use crate::engine::{self, JobPayload, QueuedJob};
use crate::errors::{ArgumentError, ArgumentErrorKind, ClientError};
use crate::generation::{CommitId, CommitView};
use crate::job::{JobHandle, JobId, JobInfo, JobRecord};
use crate::stats::StatisticsSnapshot;
use crate::util::{load_json, remove_dir_if_exists, save_json};
use anyhow::{anyhow, Error, Result};
use chrono::prelude::*;
use log::{debug, info, warn};
use oxigraph::model::Quad;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreMetadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn write_options(config: &Config) -> WriteOptions {
    WriteOptions {
        zstd: config.compress,
        sync: config.sync_writes,
    }
}

/// Rejects `skip`/`take` combinations that cannot describe a page.
pub(crate) fn validate_page(take: usize) -> Result<()> {
    if take == 0 {
        return Err(Error::new(ArgumentError::new(
            "take",
            ArgumentErrorKind::OutOfRange("must be greater than zero".to_string()),
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct Store {
    name: String,
    dir: Option<PathBuf>,
    config: Arc<Config>,
    created_at: DateTime<Utc>,
    log: CommitLog,
    jobs: Mutex<Vec<Arc<JobRecord>>>,
    statistics: RwLock<Option<StatisticsSnapshot>>,
    queue: Mutex<Option<Sender<QueuedJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    deleted: AtomicBool,
}

impl Store {
    /// Wraps an initialised commit log into a new store, recording its
    /// metadata when the store is persistent.
    pub(crate) fn new(
        name: &str,
        dir: Option<PathBuf>,
        config: Arc<Config>,
        log: CommitLog,
    ) -> Result<Self> {
        let metadata = StoreMetadata {
            name: name.to_string(),
            created_at: Utc::now(),
        };
        if let Some(dir) = &dir {
            save_json(
                &dir.join(STORE_METADATA_FILE),
                &metadata,
                config.sync_writes,
            )?;
        }
        Ok(Self::assemble(metadata, dir, config, log, None))
    }

    /// Reopens a persistent store from its directory.
    pub(crate) fn open(dir: &Path, config: Arc<Config>) -> Result<Self> {
        let metadata: StoreMetadata = load_json(&dir.join(STORE_METADATA_FILE))?;
        let log = CommitLog::open(dir, write_options(&config))?;
        let stats_path = dir.join(STATISTICS_FILE);
        let statistics = if stats_path.exists() {
            match load_json::<StatisticsSnapshot>(&stats_path) {
                Ok(stats) if stats.commit_id == log.latest() => Some(stats),
                Ok(_) => {
                    debug!("Discarding stale statistics for store '{}'", metadata.name);
                    None
                }
                Err(e) => {
                    warn!(
                        "Ignoring unreadable statistics for store '{}': {}",
                        metadata.name, e
                    );
                    None
                }
            }
        } else {
            None
        };
        Ok(Self::assemble(
            metadata,
            Some(dir.to_path_buf()),
            config,
            log,
            statistics,
        ))
    }

    fn assemble(
        metadata: StoreMetadata,
        dir: Option<PathBuf>,
        config: Arc<Config>,
        log: CommitLog,
        statistics: Option<StatisticsSnapshot>,
    ) -> Self {
        Self {
            name: metadata.name,
            dir,
            config,
            created_at: metadata.created_at,
            log,
            jobs: Mutex::new(Vec::new()),
            statistics: RwLock::new(statistics),
            queue: Mutex::new(None),
            worker: Mutex::new(None),
            deleted: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn log(&self) -> &CommitLog {
        &self.log
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    /// Publishes a new commit on top of `base` and drops statistics computed
    /// for an earlier commit.
    pub(crate) fn commit(
        &self,
        base: CommitId,
        added: HashSet<Quad>,
        removed: HashSet<Quad>,
    ) -> Result<CommitView> {
        let view = self.log.append(base, added, removed)?;
        self.invalidate_statistics();
        Ok(view)
    }

    /// The cached statistics, if they were computed for the current commit.
    pub(crate) fn statistics(&self) -> Option<StatisticsSnapshot> {
        let cached = self
            .statistics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        cached.filter(|s| s.commit_id == self.log.latest())
    }

    pub(crate) fn set_statistics(&self, snapshot: StatisticsSnapshot) -> Result<()> {
        if let Some(dir) = &self.dir {
            save_json(
                &dir.join(STATISTICS_FILE),
                &snapshot,
                self.config.sync_writes,
            )?;
        }
        *self
            .statistics
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        Ok(())
    }

    fn invalidate_statistics(&self) {
        let previous = self
            .statistics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(_), Some(dir)) = (previous, &self.dir) {
            if let Err(e) = std::fs::remove_file(dir.join(STATISTICS_FILE)) {
                debug!("Could not remove statistics for '{}': {}", self.name, e);
            }
        }
    }

    /// Registers a job and hands it to the worker (mutations) or to a thread
    /// of its own (read-only jobs). Never waits for the job to run.
    ///
    /// The id is assigned, the job handed off and the record listed under
    /// the registry lock, so id order, queue order and listing order agree.
    /// A job that cannot be handed off is never listed.
    pub(crate) fn submit(
        self: &Arc<Self>,
        payload: JobPayload,
        label: Option<String>,
    ) -> Result<JobHandle> {
        if self.is_deleted() {
            return Err(Error::new(ClientError::StoreNotFound(self.name.clone())));
        }
        let kind = payload.kind();
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let id = jobs.len() as JobId + 1;
        let record = JobRecord::new(id, kind, label);
        let job = QueuedJob {
            record: record.clone(),
            payload,
        };
        if kind.is_mutation() {
            let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let sender = queue
                .as_ref()
                .ok_or_else(|| Error::new(ClientError::StoreNotFound(self.name.clone())))?;
            sender
                .send(job)
                .map_err(|_| anyhow!("Worker for store '{}' is not running", self.name))?;
        } else {
            engine::spawn_reader(self.clone(), job)?;
        }
        jobs.push(record.clone());
        drop(jobs);
        debug!("Submitted {} job {} on store '{}'", kind, id, self.name);
        Ok(JobHandle::new(&self.name, record))
    }

    /// Jobs ordered from the most recently submitted.
    pub(crate) fn jobs(&self, skip: usize, take: usize) -> Vec<JobInfo> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.iter()
            .rev()
            .skip(skip)
            .take(take)
            .map(|r| r.info())
            .collect()
    }

    pub(crate) fn job(&self, job_id: JobId) -> Option<JobInfo> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        // ids are assigned in submission order starting at 1
        usize::try_from(job_id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|idx| jobs.get(idx))
            .filter(|r| r.id() == job_id)
            .map(|r| r.info())
    }

    pub(crate) fn start_worker(self: &Arc<Self>, catalog: Weak<Catalog>) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let store = self.clone();
        let join = thread::Builder::new()
            .name(format!("quadlog-worker-{}", self.name))
            .spawn(move || engine::worker_loop(store, catalog, rx))?;
        *self.queue.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(join);
        Ok(())
    }

    /// Closes the queue and waits for the worker to drain it.
    pub(crate) fn shutdown(&self) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let join = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            if join.thread().id() == thread::current().id() {
                return;
            }
            if join.join().is_err() {
                warn!("Worker for store '{}' panicked", self.name);
            }
        }
    }

    /// Marks the store deleted, fails every job still queued, stops the
    /// worker and removes the store's files.
    pub(crate) fn destroy(&self) -> Result<()> {
        self.deleted.store(true, Ordering::SeqCst);
        self.shutdown();
        if let Some(dir) = &self.dir {
            remove_dir_if_exists(dir)?;
        }
        info!("Deleted store '{}'", self.name);
        Ok(())
    }
}
