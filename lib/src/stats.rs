//! Per-predicate and total quad counts for a commit.

use crate::generation::{CommitId, CommitView};
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub commit_id: CommitId,
    pub computed_at: DateTime<Utc>,
    pub total_triple_count: u64,
    pub predicate_triple_counts: BTreeMap<String, u64>,
}

impl StatisticsSnapshot {
    pub fn compute(view: &CommitView) -> Self {
        let mut predicate_triple_counts = BTreeMap::new();
        for quad in view.iter() {
            *predicate_triple_counts
                .entry(quad.predicate.as_str().to_string())
                .or_insert(0u64) += 1;
        }
        Self {
            commit_id: view.commit_id(),
            computed_at: Utc::now(),
            total_triple_count: view.len() as u64,
            predicate_triple_counts,
        }
    }
}
