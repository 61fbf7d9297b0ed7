//! The public entry point: [`QuadLog`] wraps a store catalog and exposes store
//! management, job submission, polling and read operations.
//!
//! Argument and client errors are returned synchronously, before anything is
//! queued. Failures while a job runs are reported through its [`JobInfo`].

use crate::catalog::{validate_store_name, Catalog};
use crate::commit_log::CommitPointInfo;
use crate::config::Config;
use crate::engine::JobPayload;
use crate::errors::ClientError;
use crate::generation::CommitId;
use crate::job::{JobHandle, JobId, JobInfo};
use crate::query::{self, QueryOutcome, QueryRequest};
use crate::snapshot::SnapshotRequest;
use crate::stats::StatisticsSnapshot;
use crate::store::{validate_page, Store};
use crate::transaction::TransactionUpdate;
use crate::transfer::{ExportRequest, ImportRequest};
use anyhow::{Error, Result};
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Initializes logging for the quadlog library.
///
/// If `QUADLOG_LOG` is set, its value is copied into `RUST_LOG`, so it takes
/// precedence. The logger itself (e.g. `env_logger::init()`) must be set up
/// after calling this.
pub fn init_logging() {
    if let Ok(log_level) = std::env::var("QUADLOG_LOG") {
        std::env::set_var("RUST_LOG", log_level);
    }
}

/// Summary of a single store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub commit_id: CommitId,
    pub quad_count: usize,
    pub commit_points: usize,
    /// Bytes used by the store directory; `None` for in-memory stores.
    pub size_on_disk: Option<u64>,
}

pub struct QuadLog {
    catalog: Arc<Catalog>,
}

impl QuadLog {
    /// Opens (or initialises) the catalog at `config.root`.
    pub fn open(config: Config) -> Result<Self> {
        Ok(Self {
            catalog: Catalog::open(config)?,
        })
    }

    /// Opens a catalog that keeps every store in memory.
    pub fn temporary() -> Result<Self> {
        let config = Config::builder()
            .root(std::env::temp_dir())
            .temporary(true)
            .build()?;
        Self::open(config)
    }

    pub fn config(&self) -> &Config {
        self.catalog.config()
    }

    fn store(&self, name: &str) -> Result<Arc<Store>> {
        let name = validate_store_name(Some(name))?;
        self.catalog.get(name)
    }

    pub fn create_store(&self, name: &str) -> Result<()> {
        self.catalog.create(name)?;
        Ok(())
    }

    /// Deletes a store and its data. Jobs still queued against it complete
    /// with errors.
    pub fn delete_store(&self, name: &str) -> Result<()> {
        let name = validate_store_name(Some(name))?;
        self.catalog.delete(name)
    }

    pub fn does_store_exist(&self, name: &str) -> Result<bool> {
        let name = validate_store_name(Some(name))?;
        Ok(self.catalog.exists(name))
    }

    /// Store names in lexicographic order.
    pub fn list_stores(&self) -> Vec<String> {
        self.catalog.names()
    }

    pub fn store_info(&self, name: &str) -> Result<StoreInfo> {
        let store = self.store(name)?;
        let view = store.log().pin();
        let size_on_disk = store.dir().map(|dir| {
            walkdir::WalkDir::new(dir)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum()
        });
        Ok(StoreInfo {
            name: store.name().to_string(),
            created_at: store.created_at(),
            commit_id: view.commit_id(),
            quad_count: view.len(),
            commit_points: store.log().commit_points().len(),
            size_on_disk,
        })
    }

    /// Queues a transaction.
    pub fn execute_transaction(
        &self,
        store: &str,
        update: TransactionUpdate,
        label: Option<&str>,
    ) -> Result<JobHandle> {
        self.store(store)?
            .submit(JobPayload::Transaction(update), label.map(str::to_string))
    }

    pub fn start_import(
        &self,
        store: &str,
        request: ImportRequest,
        label: Option<&str>,
    ) -> Result<JobHandle> {
        self.store(store)?
            .submit(JobPayload::Import(request), label.map(str::to_string))
    }

    /// Starts an export of the store's current commit. The commit is pinned
    /// now; transactions queued afterwards do not affect the export.
    pub fn start_export(
        &self,
        store: &str,
        request: ExportRequest,
        label: Option<&str>,
    ) -> Result<JobHandle> {
        let store = self.store(store)?;
        let view = store.log().pin();
        store.submit(
            JobPayload::Export { request, view },
            label.map(str::to_string),
        )
    }

    pub fn consolidate_store(&self, store: &str, label: Option<&str>) -> Result<JobHandle> {
        self.store(store)?
            .submit(JobPayload::Consolidate, label.map(str::to_string))
    }

    /// Queues the creation of a new store from a commit of `store`.
    pub fn create_snapshot(
        &self,
        store: &str,
        request: SnapshotRequest,
        label: Option<&str>,
    ) -> Result<JobHandle> {
        let target = validate_store_name(Some(&request.target_store_name))?;
        let source = self.store(store)?;
        if self.catalog.exists(target) {
            return Err(Error::new(ClientError::StoreExists(target.to_string())));
        }
        source.submit(JobPayload::Snapshot(request), label.map(str::to_string))
    }

    pub fn update_statistics(&self, store: &str, label: Option<&str>) -> Result<JobHandle> {
        self.store(store)?
            .submit(JobPayload::UpdateStatistics, label.map(str::to_string))
    }

    /// The most recent statistics, or `None` if none were computed for the
    /// current commit.
    pub fn get_statistics(&self, store: &str) -> Result<Option<StatisticsSnapshot>> {
        Ok(self.store(store)?.statistics())
    }

    /// Commit points from the most recent, paged by `skip`/`take`.
    pub fn get_commit_points(
        &self,
        store: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<CommitPointInfo>> {
        validate_store_name(Some(store))?;
        validate_page(take)?;
        Ok(self
            .store(store)?
            .log()
            .commit_points()
            .into_iter()
            .skip(skip)
            .take(take)
            .collect())
    }

    pub fn get_commit_point(
        &self,
        store: &str,
        commit_id: CommitId,
    ) -> Result<Option<CommitPointInfo>> {
        Ok(self.store(store)?.log().commit_point(commit_id))
    }

    pub fn get_job_info(&self, store: &str, job_id: JobId) -> Result<JobInfo> {
        self.store(store)?.job(job_id).ok_or_else(|| {
            Error::new(ClientError::JobNotFound {
                store: store.to_string(),
                job_id,
            })
        })
    }

    /// Jobs from the most recently submitted, paged by `skip`/`take`.
    pub fn get_jobs(&self, store: &str, skip: usize, take: usize) -> Result<Vec<JobInfo>> {
        validate_store_name(Some(store))?;
        validate_page(take)?;
        Ok(self.store(store)?.jobs(skip, take))
    }

    /// Runs a SPARQL query against the current (or requested) commit.
    pub fn execute_query(&self, store: &str, request: &QueryRequest) -> Result<QueryOutcome> {
        let store = self.store(store)?;
        let view = match request.commit_id {
            Some(id) => store.log().read(id).ok_or_else(|| {
                Error::new(ClientError::CommitNotFound {
                    store: store.name().to_string(),
                    commit_id: id,
                })
            })?,
            None => store.log().pin(),
        };
        query::evaluate(&view, request)
    }
}
