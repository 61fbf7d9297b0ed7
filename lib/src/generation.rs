//! Immutable generations of a store and pinned, read-only views over them.
//!
//! A generation is either a *base* (a complete quad set) or a *delta* (quads
//! added and removed relative to its parent). Generations are chained through
//! `Arc`s, so a reader holding a [`CommitView`] keeps its generation and every
//! ancestor it depends on alive. Generations retired by consolidation delete
//! their backing file only when the last reference goes away.

use chrono::prelude::*;
use log::{debug, warn};
use oxigraph::model::Quad;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type CommitId = u64;

#[derive(Debug)]
pub enum GenerationBody {
    Base(HashSet<Quad>),
    Delta {
        added: HashSet<Quad>,
        removed: HashSet<Quad>,
    },
}

impl GenerationBody {
    pub fn is_base(&self) -> bool {
        matches!(self, GenerationBody::Base(_))
    }

    pub(crate) fn apply_to(&self, quads: &mut HashSet<Quad>) {
        match self {
            GenerationBody::Base(all) => {
                quads.clone_from(all);
            }
            GenerationBody::Delta { added, removed } => {
                for q in removed {
                    quads.remove(q);
                }
                quads.extend(added.iter().cloned());
            }
        }
    }
}

#[derive(Debug)]
pub struct Generation {
    id: CommitId,
    timestamp: DateTime<Utc>,
    parent: Option<Arc<Generation>>,
    body: Arc<GenerationBody>,
    quad_count: usize,
    file: Option<PathBuf>,
    retired: AtomicBool,
}

impl Generation {
    pub(crate) fn new(
        id: CommitId,
        timestamp: DateTime<Utc>,
        parent: Option<Arc<Generation>>,
        body: Arc<GenerationBody>,
        quad_count: usize,
        file: Option<PathBuf>,
    ) -> Self {
        Self {
            id,
            timestamp,
            parent,
            body,
            quad_count,
            file,
            retired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> CommitId {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn parent(&self) -> Option<&Arc<Generation>> {
        self.parent.as_ref()
    }

    pub fn parent_id(&self) -> Option<CommitId> {
        self.parent.as_ref().map(|p| p.id)
    }

    pub fn body(&self) -> &Arc<GenerationBody> {
        &self.body
    }

    pub fn is_base(&self) -> bool {
        self.body.is_base()
    }

    /// Number of quads in the materialized commit.
    pub fn quad_count(&self) -> usize {
        self.quad_count
    }

    pub fn file(&self) -> Option<&PathBuf> {
        self.file.as_ref()
    }

    /// Marks the backing file for deletion once the generation is dropped.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    /// The chain from the nearest base up to and including this generation.
    pub fn lineage(self: &Arc<Self>) -> Vec<Arc<Generation>> {
        let mut chain = vec![self.clone()];
        let mut current = self.clone();
        while !current.is_base() {
            match current.parent.clone() {
                Some(parent) => {
                    chain.push(parent.clone());
                    current = parent;
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// Finds this generation or the ancestor with the given commit id.
    pub fn find(self: &Arc<Self>, id: CommitId) -> Option<Arc<Generation>> {
        let mut current = Some(self.clone());
        while let Some(generation) = current {
            if generation.id == id {
                return Some(generation);
            }
            if generation.id < id {
                return None;
            }
            current = generation.parent.clone();
        }
        None
    }

    /// Replays the chain to produce the full quad set of this commit.
    pub fn materialize(self: &Arc<Self>) -> HashSet<Quad> {
        let mut quads = HashSet::with_capacity(self.quad_count);
        for generation in self.lineage() {
            generation.body.apply_to(&mut quads);
        }
        quads
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        if self.retired.load(Ordering::SeqCst) {
            if let Some(path) = self.file.take() {
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!("Reclaimed generation file {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(
                        "Failed to reclaim generation file {}: {}",
                        path.display(),
                        e
                    ),
                }
            }
        }
        // unlink the ancestor chain iteratively so long histories do not
        // recurse through nested drops
        let mut next = self.parent.take();
        while let Some(parent) = next {
            match Arc::try_unwrap(parent) {
                Ok(mut generation) => next = generation.parent.take(),
                Err(_) => break,
            }
        }
    }
}

/// A read-only view pinned to one commit. The view is unaffected by later
/// appends and by consolidation for as long as it is held.
#[derive(Debug, Clone)]
pub struct CommitView {
    generation: Option<Arc<Generation>>,
    quads: Arc<HashSet<Quad>>,
}

impl CommitView {
    pub(crate) fn new(generation: Arc<Generation>, quads: Arc<HashSet<Quad>>) -> Self {
        Self {
            generation: Some(generation),
            quads,
        }
    }

    /// Builds a view of the given generation by replaying its history.
    pub(crate) fn replay(generation: Arc<Generation>) -> Self {
        let quads = Arc::new(generation.materialize());
        Self::new(generation, quads)
    }

    /// A view over a bare quad set that belongs to no commit log.
    pub fn detached(quads: HashSet<Quad>) -> Self {
        Self {
            generation: None,
            quads: Arc::new(quads),
        }
    }

    pub fn commit_id(&self) -> CommitId {
        self.generation.as_ref().map_or(0, |g| g.id())
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.generation.as_ref().map(|g| g.timestamp())
    }

    pub fn generation(&self) -> Option<&Arc<Generation>> {
        self.generation.as_ref()
    }

    pub fn contains(&self, quad: &Quad) -> bool {
        self.quads.contains(quad)
    }

    pub fn len(&self) -> usize {
        self.quads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Quad> {
        self.quads.iter()
    }

    pub fn quads(&self) -> &Arc<HashSet<Quad>> {
        &self.quads
    }
}
