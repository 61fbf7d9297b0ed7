//! Transaction jobs: preconditions, pattern deletes and inserts applied as a
//! single new commit.

use crate::errors::JobError;
use crate::job::JobOutcome;
use crate::pattern::{
    match_delete, match_existence, parse_graph_name, parse_insert_data, parse_patterns,
    unmatched,
};
use crate::store::Store;
use anyhow::{Error, Result};
use derive_builder::Builder;
use log::debug;
use oxigraph::model::Quad;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A mutation request. Every part is optional; the text fields hold
/// N-Quads-style statements, one per line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(default, setter(into, strip_option))]
pub struct TransactionUpdate {
    /// Patterns that must each match at least one quad of the current commit.
    pub existence_preconditions: Option<String>,
    /// Patterns selecting the quads to remove.
    pub delete_patterns: Option<String>,
    /// Quads to add. Must not contain the wildcard IRI.
    pub insert_data: Option<String>,
    /// Graph for statements that name none. The store's default graph when
    /// unset.
    pub default_graph_uri: Option<String>,
}

impl TransactionUpdate {
    pub fn builder() -> TransactionUpdateBuilder {
        TransactionUpdateBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.existence_preconditions.is_none()
            && self.delete_patterns.is_none()
            && self.insert_data.is_none()
    }
}

pub(crate) fn execute(store: &Store, update: &TransactionUpdate) -> Result<JobOutcome> {
    let default_graph = parse_graph_name(update.default_graph_uri.as_deref())?;
    let preconditions = parse_patterns(
        update.existence_preconditions.as_deref().unwrap_or(""),
        &default_graph,
    )?;
    let deletes = parse_patterns(
        update.delete_patterns.as_deref().unwrap_or(""),
        &default_graph,
    )?;
    let inserts = parse_insert_data(update.insert_data.as_deref().unwrap_or(""), &default_graph)?;

    // single writer: nothing can advance the head between pin and commit
    let view = store.log().pin();
    if !match_existence(&view, &preconditions) {
        let failed = unmatched(&view, &preconditions);
        return Err(Error::new(JobError::precondition_failed(format!(
            "Transaction preconditions failed: {} of {} patterns matched no quad at commit {} (first: {})",
            failed.len(),
            preconditions.len(),
            view.commit_id(),
            failed
                .first()
                .map(|p| p.to_string())
                .unwrap_or_default()
        ))));
    }

    let removed = match_delete(&view, &deletes);
    let added: HashSet<Quad> = inserts.into_iter().collect();
    let (removed_count, added_count) = (removed.len(), added.len());
    debug!(
        "Transaction on '{}' against commit {}: {} to delete, {} to insert",
        store.name(),
        view.commit_id(),
        removed_count,
        added_count
    );
    let base = view.commit_id();
    // release the pin so the head can be patched in place
    drop(view);
    let commit = store.commit(base, added, removed)?;
    Ok(JobOutcome::new(
        format!(
            "Committed {} ({} quads deleted, {} inserted)",
            commit.commit_id(),
            removed_count,
            added_count
        ),
        Some(commit.commit_id()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_only_given_parts() {
        let update = TransactionUpdate::builder()
            .insert_data("<http://example.org/s> <http://example.org/p> <http://example.org/o> .")
            .default_graph_uri("http://example.org/g")
            .build()
            .unwrap();
        assert!(update.existence_preconditions.is_none());
        assert!(update.delete_patterns.is_none());
        assert_eq!(
            update.default_graph_uri.as_deref(),
            Some("http://example.org/g")
        );
        assert!(!update.is_empty());
        assert!(TransactionUpdate::default().is_empty());
    }
}
