//! The per-store commit log.
//!
//! The log is an append-only chain of [`Generation`]s ending in the current
//! head. Only the store's mutation worker appends; readers pin the head (or an
//! older commit) as a [`CommitView`] and never observe later appends.
//!
//! On disk the log is a directory holding `commits.json` (the manifest: the
//! chain from its base to the head) and one file per generation under
//! `generations/`. A commit is published by writing its generation file and
//! then atomically replacing the manifest; files the manifest does not mention
//! are leftovers of an interrupted publish and are swept on open.

use crate::codec::{read_generation, write_generation, WriteOptions};
use crate::consts::{COMMIT_MANIFEST_FILE, GENERATIONS_DIR, GENERATION_EXTENSION};
use crate::errors::JobError;
use crate::generation::{CommitId, CommitView, Generation, GenerationBody};
use crate::options::PersistenceMode;
use crate::util::{load_json, save_json};
use anyhow::{anyhow, Error, Result};
use chrono::prelude::*;
use log::{debug, info, warn};
use oxigraph::model::Quad;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Public description of one commit point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPointInfo {
    pub commit_id: CommitId,
    pub timestamp: DateTime<Utc>,
    pub parent_id: Option<CommitId>,
    pub quad_count: usize,
    pub is_base: bool,
}

impl CommitPointInfo {
    fn from_generation(generation: &Generation) -> Self {
        Self {
            commit_id: generation.id(),
            timestamp: generation.timestamp(),
            parent_id: generation.parent_id(),
            quad_count: generation.quad_count(),
            is_base: generation.is_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    id: CommitId,
    timestamp: DateTime<Utc>,
    quad_count: usize,
    base: bool,
    file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    head: CommitId,
    generations: Vec<ManifestEntry>,
}

#[derive(Debug, Clone)]
struct Head {
    generation: Arc<Generation>,
    quads: Arc<HashSet<Quad>>,
}

#[derive(Debug)]
pub struct CommitLog {
    dir: Option<PathBuf>,
    write: WriteOptions,
    head: RwLock<Head>,
}

fn generation_file_name(id: CommitId, base: bool) -> String {
    format!(
        "{:020}-{}.{}",
        id,
        if base { "base" } else { "delta" },
        GENERATION_EXTENSION
    )
}

fn manifest_for(head: &Arc<Generation>) -> Manifest {
    let generations = head
        .lineage()
        .iter()
        .map(|g| ManifestEntry {
            id: g.id(),
            timestamp: g.timestamp(),
            quad_count: g.quad_count(),
            base: g.is_base(),
            file: generation_file_name(g.id(), g.is_base()),
        })
        .collect();
    Manifest {
        head: head.id(),
        generations,
    }
}

fn empty_base() -> GenerationBody {
    GenerationBody::Base(HashSet::new())
}

impl CommitLog {
    /// A log that lives only in memory.
    pub fn in_memory() -> Self {
        let generation = Arc::new(Generation::new(
            0,
            Utc::now(),
            None,
            Arc::new(empty_base()),
            0,
            None,
        ));
        Self {
            dir: None,
            write: WriteOptions::default(),
            head: RwLock::new(Head {
                generation,
                quads: Arc::new(HashSet::new()),
            }),
        }
    }

    /// Creates a new persistent log in `dir` holding only the initial empty
    /// commit.
    pub fn create(dir: &Path, write: WriteOptions) -> Result<Self> {
        if dir.join(COMMIT_MANIFEST_FILE).exists() {
            return Err(anyhow!("A commit log already exists in {}", dir.display()));
        }
        std::fs::create_dir_all(dir.join(GENERATIONS_DIR))?;
        let generation = Self::publish_base(dir, write, 0, Utc::now(), Arc::new(empty_base()), 0)?;
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            write,
            head: RwLock::new(Head {
                generation,
                quads: Arc::new(HashSet::new()),
            }),
        })
    }

    /// Opens an existing log, rebuilding the generation chain from the
    /// manifest and removing generation files the manifest does not reference.
    pub fn open(dir: &Path, write: WriteOptions) -> Result<Self> {
        let manifest: Manifest = load_json(&dir.join(COMMIT_MANIFEST_FILE))?;
        let gen_dir = dir.join(GENERATIONS_DIR);

        let mut parent: Option<Arc<Generation>> = None;
        for (idx, entry) in manifest.generations.iter().enumerate() {
            if (idx == 0) != entry.base {
                return Err(anyhow!(
                    "Manifest in {} is malformed: generation {} is out of place",
                    dir.display(),
                    entry.id
                ));
            }
            let path = gen_dir.join(&entry.file);
            let decoded = read_generation(&path)?;
            if decoded.commit_id != entry.id || decoded.body.is_base() != entry.base {
                return Err(anyhow!(
                    "Generation file {} does not match its manifest entry",
                    path.display()
                ));
            }
            parent = Some(Arc::new(Generation::new(
                entry.id,
                entry.timestamp,
                parent.take(),
                Arc::new(decoded.body),
                entry.quad_count,
                Some(path),
            )));
        }
        let generation = parent
            .filter(|g| g.id() == manifest.head)
            .ok_or_else(|| anyhow!("Manifest in {} has no head generation", dir.display()))?;

        let referenced: HashSet<&str> = manifest
            .generations
            .iter()
            .map(|e| e.file.as_str())
            .collect();
        for entry in std::fs::read_dir(&gen_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let keep = name.to_str().is_some_and(|n| referenced.contains(n));
            if !keep && entry.file_type()?.is_file() {
                warn!("Removing orphaned generation file {}", entry.path().display());
                std::fs::remove_file(entry.path())?;
            }
        }

        let quads = Arc::new(generation.materialize());
        debug!(
            "Opened commit log {} at commit {} ({} quads)",
            dir.display(),
            generation.id(),
            quads.len()
        );
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            write,
            head: RwLock::new(Head { generation, quads }),
        })
    }

    /// Creates a new log whose content equals `view`. `AppendOnly` carries the
    /// history leading to the view over, sharing generation bodies with the
    /// source; `Rewrite` materializes the view as a single base generation.
    pub fn fork(
        view: &CommitView,
        mode: PersistenceMode,
        dir: Option<&Path>,
        write: WriteOptions,
    ) -> Result<Self> {
        let source = view
            .generation()
            .ok_or_else(|| anyhow!("Cannot fork a view that belongs to no commit log"))?;
        if let Some(dir) = dir {
            std::fs::create_dir_all(dir.join(GENERATIONS_DIR))?;
        }

        let generation = match mode {
            PersistenceMode::Rewrite => {
                let body = Arc::new(GenerationBody::Base(view.quads().as_ref().clone()));
                match dir {
                    Some(dir) => Self::publish_base(
                        dir,
                        write,
                        source.id(),
                        Utc::now(),
                        body,
                        view.len(),
                    )?,
                    None => Arc::new(Generation::new(
                        source.id(),
                        Utc::now(),
                        None,
                        body,
                        view.len(),
                        None,
                    )),
                }
            }
            PersistenceMode::AppendOnly => {
                let mut parent: Option<Arc<Generation>> = None;
                for g in source.lineage() {
                    let file = match dir {
                        Some(dir) => Some(Self::carry_file(dir, &g, write)?),
                        None => None,
                    };
                    parent = Some(Arc::new(Generation::new(
                        g.id(),
                        g.timestamp(),
                        parent.take(),
                        g.body().clone(),
                        g.quad_count(),
                        file,
                    )));
                }
                let head = parent.ok_or_else(|| anyhow!("Source history is empty"))?;
                if let Some(dir) = dir {
                    save_json(&dir.join(COMMIT_MANIFEST_FILE), &manifest_for(&head), write.sync)?;
                }
                head
            }
        };

        Ok(Self {
            dir: dir.map(Path::to_path_buf),
            write,
            head: RwLock::new(Head {
                generation,
                quads: view.quads().clone(),
            }),
        })
    }

    // Places the file of `generation` into `dir`, hard-linking the source file
    // when there is one and encoding the body otherwise.
    fn carry_file(dir: &Path, generation: &Generation, write: WriteOptions) -> Result<PathBuf> {
        let target = dir
            .join(GENERATIONS_DIR)
            .join(generation_file_name(generation.id(), generation.is_base()));
        match generation.file() {
            Some(source) => {
                if std::fs::hard_link(source, &target).is_err() {
                    debug!(
                        "Hard link from {} failed, copying instead",
                        source.display()
                    );
                    std::fs::copy(source, &target)?;
                }
            }
            None => write_generation(&target, generation.id(), generation.body(), write)?,
        }
        Ok(target)
    }

    fn publish_base(
        dir: &Path,
        write: WriteOptions,
        id: CommitId,
        timestamp: DateTime<Utc>,
        body: Arc<GenerationBody>,
        quad_count: usize,
    ) -> Result<Arc<Generation>> {
        let path = dir.join(GENERATIONS_DIR).join(generation_file_name(id, true));
        write_generation(&path, id, &body, write)?;
        let generation = Arc::new(Generation::new(
            id,
            timestamp,
            None,
            body,
            quad_count,
            Some(path.clone()),
        ));
        if let Err(e) = save_json(
            &dir.join(COMMIT_MANIFEST_FILE),
            &manifest_for(&generation),
            write.sync,
        ) {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
        Ok(generation)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn is_persistent(&self) -> bool {
        self.dir.is_some()
    }

    fn head(&self) -> Head {
        self.head
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current commit id.
    pub fn latest(&self) -> CommitId {
        self.head().generation.id()
    }

    /// Pins the current commit.
    pub fn pin(&self) -> CommitView {
        let head = self.head();
        CommitView::new(head.generation, head.quads)
    }

    /// Pins the given commit, if it is still resolvable.
    pub fn read(&self, id: CommitId) -> Option<CommitView> {
        let head = self.head();
        if head.generation.id() == id {
            return Some(CommitView::new(head.generation, head.quads));
        }
        head.generation.find(id).map(CommitView::replay)
    }

    /// Commit points from the most recent to the oldest still retained.
    pub fn commit_points(&self) -> Vec<CommitPointInfo> {
        let mut points: Vec<CommitPointInfo> = self
            .head()
            .generation
            .lineage()
            .iter()
            .map(|g| CommitPointInfo::from_generation(g))
            .collect();
        points.reverse();
        points
    }

    pub fn commit_point(&self, id: CommitId) -> Option<CommitPointInfo> {
        self.head()
            .generation
            .find(id)
            .map(|g| CommitPointInfo::from_generation(&g))
    }

    /// Appends a generation holding `(base - removed) ∪ added`.
    ///
    /// `base` must be the current head. The generation file and the manifest
    /// are written before the head advances; if either write fails the head
    /// is left unchanged. The materialized head is updated in place, so the
    /// cost is proportional to the delta unless a reader still pins the head.
    pub fn append(
        &self,
        base: CommitId,
        added: HashSet<Quad>,
        removed: HashSet<Quad>,
    ) -> Result<CommitView> {
        let (parent, added, removed, quad_count) = {
            let state = self.head.read().unwrap_or_else(PoisonError::into_inner);
            if state.generation.id() != base {
                return Err(Error::new(JobError::precondition_failed(format!(
                    "Commit {} is not the current commit ({})",
                    base,
                    state.generation.id()
                ))));
            }
            let removed: HashSet<Quad> = removed
                .into_iter()
                .filter(|q| state.quads.contains(q) && !added.contains(q))
                .collect();
            let added: HashSet<Quad> = added
                .into_iter()
                .filter(|q| !state.quads.contains(q))
                .collect();
            let quad_count = state.quads.len() - removed.len() + added.len();
            (state.generation.clone(), added, removed, quad_count)
        };

        let id = base + 1;
        let body = Arc::new(GenerationBody::Delta { added, removed });
        let file = match &self.dir {
            Some(dir) => {
                let path = dir.join(GENERATIONS_DIR).join(generation_file_name(id, false));
                write_generation(&path, id, &body, self.write)?;
                Some(path)
            }
            None => None,
        };
        let generation = Arc::new(Generation::new(
            id,
            Utc::now(),
            Some(parent),
            body.clone(),
            quad_count,
            file.clone(),
        ));
        if let Some(dir) = &self.dir {
            if let Err(e) = save_json(
                &dir.join(COMMIT_MANIFEST_FILE),
                &manifest_for(&generation),
                self.write.sync,
            ) {
                if let Some(path) = file {
                    let _ = std::fs::remove_file(path);
                }
                return Err(e);
            }
        }

        let quads = self.advance(generation.clone(), &body);
        debug!("Published commit {} ({} quads)", id, quads.len());
        Ok(CommitView::new(generation, quads))
    }

    // Moves the head to `generation`. When no reader shares the head's quad
    // set it is patched in place under the lock; otherwise a copy is patched
    // outside the lock so pinning is never blocked by the copy.
    fn advance(&self, generation: Arc<Generation>, body: &GenerationBody) -> Arc<HashSet<Quad>> {
        let shared = {
            let mut state = self.head.write().unwrap_or_else(PoisonError::into_inner);
            match Arc::get_mut(&mut state.quads) {
                Some(quads) => {
                    body.apply_to(quads);
                    state.generation = generation;
                    return state.quads.clone();
                }
                None => state.quads.clone(),
            }
        };
        let mut quads = shared.as_ref().clone();
        drop(shared);
        body.apply_to(&mut quads);
        let quads = Arc::new(quads);
        let mut state = self.head.write().unwrap_or_else(PoisonError::into_inner);
        *state = Head {
            generation,
            quads: quads.clone(),
        };
        quads
    }

    /// Replaces the chain with a single base generation holding the head's
    /// content, keeping the head's commit id. Superseded generations are
    /// retired and their files removed once no reader pins them. Returns
    /// `false` when the log already consists of a single base.
    pub fn consolidate(&self) -> Result<bool> {
        let head = self.head();
        let lineage = head.generation.lineage();
        if lineage.len() <= 1 {
            return Ok(false);
        }

        let id = head.generation.id();
        let body = Arc::new(GenerationBody::Base(head.quads.as_ref().clone()));
        let generation = match &self.dir {
            Some(dir) => Self::publish_base(
                dir,
                self.write,
                id,
                head.generation.timestamp(),
                body,
                head.quads.len(),
            )?,
            None => Arc::new(Generation::new(
                id,
                head.generation.timestamp(),
                None,
                body,
                head.quads.len(),
                None,
            )),
        };

        let mut state = self.head.write().unwrap_or_else(PoisonError::into_inner);
        *state = Head {
            generation,
            quads: head.quads.clone(),
        };
        drop(state);
        for g in &lineage {
            g.retire();
        }
        info!(
            "Consolidated {} generations into commit {}",
            lineage.len(),
            id
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::{GraphName, Literal, NamedNode};

    fn quad(s: &str) -> Quad {
        Quad::new(
            NamedNode::new(format!("http://example.org/{}", s)).unwrap(),
            NamedNode::new("http://example.org/p").unwrap(),
            Literal::new_simple_literal(s),
            GraphName::DefaultGraph,
        )
    }

    fn set(items: &[&str]) -> HashSet<Quad> {
        items.iter().map(|s| quad(s)).collect()
    }

    fn opts() -> WriteOptions {
        WriteOptions {
            zstd: true,
            sync: false,
        }
    }

    fn generation_files(dir: &Path) -> usize {
        std::fs::read_dir(dir.join(GENERATIONS_DIR)).unwrap().count()
    }

    #[test]
    fn append_advances_head_and_pins_are_frozen() {
        let log = CommitLog::in_memory();
        assert_eq!(log.latest(), 0);
        let pinned = log.pin();

        let v1 = log.append(0, set(&["a", "b"]), HashSet::new()).unwrap();
        assert_eq!(v1.commit_id(), 1);
        let v2 = log.append(1, set(&["c"]), set(&["a"])).unwrap();
        assert_eq!(v2.commit_id(), 2);

        assert!(pinned.is_empty());
        assert_eq!(log.read(1).unwrap().len(), 2);
        assert_eq!(log.pin().len(), 2);
        assert!(log.pin().contains(&quad("c")));

        let points = log.commit_points();
        assert_eq!(
            points.iter().map(|p| p.commit_id).collect::<Vec<_>>(),
            vec![2, 1, 0]
        );
        assert_eq!(log.commit_point(1).unwrap().parent_id, Some(0));
    }

    #[test]
    fn append_against_stale_base_is_rejected() {
        let log = CommitLog::in_memory();
        log.append(0, set(&["a"]), HashSet::new()).unwrap();
        assert!(log.append(0, set(&["b"]), HashSet::new()).is_err());
        assert_eq!(log.latest(), 1);
    }

    #[test]
    fn append_patches_unshared_head_in_place() {
        let log = CommitLog::in_memory();
        log.append(0, set(&["a", "b"]), HashSet::new()).unwrap();
        let before = Arc::as_ptr(log.pin().quads());

        // no reader holds the head: the same set is patched
        let view = log.append(1, set(&["c"]), set(&["a"])).unwrap();
        assert_eq!(Arc::as_ptr(view.quads()), before);
        assert_eq!(view.len(), 2);
        drop(view);

        // a pinned head is copied and left untouched
        let pinned = log.pin();
        let view = log.append(2, set(&["d"]), HashSet::new()).unwrap();
        assert_ne!(Arc::as_ptr(view.quads()), Arc::as_ptr(pinned.quads()));
        assert_eq!(pinned.len(), 2);
        assert!(!pinned.contains(&quad("d")));
        assert_eq!(view.len(), 3);
        assert_eq!(log.read(2).unwrap().len(), 2);
        assert_eq!(log.pin().generation().unwrap().quad_count(), 3);
    }

    #[test]
    fn persistent_log_reopens_and_sweeps_orphans() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = CommitLog::create(dir.path(), opts()).unwrap();
            log.append(0, set(&["a", "b"]), HashSet::new()).unwrap();
            log.append(1, HashSet::new(), set(&["b"])).unwrap();
        }
        let orphan = dir
            .path()
            .join(GENERATIONS_DIR)
            .join(generation_file_name(9, false));
        std::fs::write(&orphan, b"partial").unwrap();

        let log = CommitLog::open(dir.path(), opts()).unwrap();
        assert!(!orphan.exists());
        assert_eq!(log.latest(), 2);
        assert_eq!(log.pin().len(), 1);
        assert_eq!(log.read(1).unwrap().len(), 2);
    }

    #[test]
    fn consolidation_keeps_content_and_reclaims_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommitLog::create(dir.path(), opts()).unwrap();
        log.append(0, set(&["a", "b"]), HashSet::new()).unwrap();
        log.append(1, set(&["c"]), set(&["a"])).unwrap();
        assert_eq!(generation_files(dir.path()), 3);

        let reader = log.read(1).unwrap();
        assert!(log.consolidate().unwrap());
        assert_eq!(log.latest(), 2);
        assert_eq!(log.pin().len(), 2);
        assert_eq!(log.commit_points().len(), 1);

        // the pinned reader still holds commit 1 and everything it depends on
        assert_eq!(reader.len(), 2);
        assert!(reader.contains(&quad("a")));
        drop(reader);
        assert_eq!(generation_files(dir.path()), 1);

        assert!(!log.consolidate().unwrap());
        let reopened = CommitLog::open(dir.path(), opts()).unwrap();
        assert_eq!(reopened.latest(), 2);
        assert_eq!(reopened.pin().len(), 2);

        let next = log.append(2, set(&["d"]), HashSet::new()).unwrap();
        assert_eq!(next.commit_id(), 3);
    }

    #[test]
    fn forks_match_the_source_view() {
        let dir = tempfile::tempdir().unwrap();
        let source = CommitLog::create(&dir.path().join("source"), opts()).unwrap();
        source.append(0, set(&["a"]), HashSet::new()).unwrap();
        let view = source.append(1, set(&["b"]), HashSet::new()).unwrap();
        source.append(2, HashSet::new(), set(&["a", "b"])).unwrap();

        let appended = CommitLog::fork(
            &view,
            PersistenceMode::AppendOnly,
            Some(&dir.path().join("append")),
            opts(),
        )
        .unwrap();
        assert_eq!(appended.latest(), 2);
        assert_eq!(appended.commit_points().len(), 3);
        assert_eq!(appended.pin().len(), 2);

        let rewritten = CommitLog::fork(
            &view,
            PersistenceMode::Rewrite,
            Some(&dir.path().join("rewrite")),
            opts(),
        )
        .unwrap();
        assert_eq!(rewritten.latest(), 2);
        assert_eq!(rewritten.commit_points().len(), 1);

        // the forks are independent of each other and of the source
        appended.append(2, set(&["z"]), HashSet::new()).unwrap();
        assert_eq!(rewritten.pin().len(), 2);
        assert_eq!(source.pin().len(), 0);

        let reopened = CommitLog::open(&dir.path().join("append"), opts()).unwrap();
        assert_eq!(reopened.pin().len(), 3);
    }
}
