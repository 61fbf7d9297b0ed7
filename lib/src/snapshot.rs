//! Snapshot jobs: fork a new store from a commit of an existing one.

use crate::catalog::Catalog;
use crate::commit_log::CommitLog;
use crate::errors::JobError;
use crate::generation::CommitId;
use crate::job::JobOutcome;
use crate::options::PersistenceMode;
use crate::store::Store;
use anyhow::{anyhow, Error, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Weak;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub target_store_name: String,
    pub persistence_mode: PersistenceMode,
    /// Commit to copy; the source's current commit when the job starts if
    /// unset.
    pub source_commit: Option<CommitId>,
}

impl SnapshotRequest {
    pub fn new(target_store_name: impl Into<String>, persistence_mode: PersistenceMode) -> Self {
        Self {
            target_store_name: target_store_name.into(),
            persistence_mode,
            source_commit: None,
        }
    }

    pub fn at_commit(mut self, commit_id: CommitId) -> Self {
        self.source_commit = Some(commit_id);
        self
    }
}

pub(crate) fn execute(
    store: &Store,
    catalog: &Weak<Catalog>,
    request: &SnapshotRequest,
) -> Result<JobOutcome> {
    let catalog = catalog
        .upgrade()
        .ok_or_else(|| anyhow!("The store catalog has been closed"))?;
    let view = match request.source_commit {
        Some(id) => store.log().read(id).ok_or_else(|| {
            Error::new(JobError::not_found(format!(
                "Commit {} is not available in store '{}'",
                id,
                store.name()
            )))
        })?,
        None => store.log().pin(),
    };

    let mode = request.persistence_mode;
    catalog.create_store_with(&request.target_store_name, |dir, write| {
        CommitLog::fork(&view, mode, dir, write)
    })?;
    info!(
        "Created store '{}' from commit {} of '{}' ({})",
        request.target_store_name,
        view.commit_id(),
        store.name(),
        mode
    );
    Ok(JobOutcome::new(
        format!(
            "Created store '{}' from commit {} ({})",
            request.target_store_name,
            view.commit_id(),
            mode
        ),
        Some(view.commit_id()),
    ))
}
