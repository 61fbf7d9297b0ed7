//! Import and export jobs. File names are resolved against the configured
//! import directory unless they are absolute.

use crate::errors::JobError;
use crate::generation::CommitView;
use crate::job::JobOutcome;
use crate::pattern::parse_graph_name;
use crate::store::Store;
use crate::util::{format_for_path, read_rdf_file, read_rdf_text, write_atomically, write_quads};
use anyhow::{Error, Result};
use log::info;
use oxigraph::io::RdfFormat;
use oxigraph::model::{GraphName, Quad};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    /// A file, relative to the import directory unless absolute.
    File(PathBuf),
    /// RDF text held in memory.
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: ImportSource,
    /// Overrides the format guessed from the file extension. Text sources
    /// default to N-Quads.
    pub format: Option<RdfFormat>,
    /// Graph for triples and default-graph quads of the source.
    pub default_graph_uri: Option<String>,
}

impl ImportRequest {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ImportSource::File(path.into()),
            format: None,
            default_graph_uri: None,
        }
    }

    pub fn text(content: impl Into<String>, format: RdfFormat) -> Self {
        Self {
            source: ImportSource::Text(content.into()),
            format: Some(format),
            default_graph_uri: None,
        }
    }

    pub fn with_default_graph(mut self, iri: impl Into<String>) -> Self {
        self.default_graph_uri = Some(iri.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Target file, relative to the import directory unless absolute.
    pub file_name: PathBuf,
    /// Output format; guessed from the file extension, N-Quads otherwise.
    pub format: Option<RdfFormat>,
    /// Restricts the export to one graph. Formats without named graphs always
    /// export a single graph: this one, or the default graph.
    pub graph_uri: Option<String>,
}

impl ExportRequest {
    pub fn new(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
            format: None,
            graph_uri: None,
        }
    }

    pub fn with_format(mut self, format: RdfFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_graph(mut self, iri: impl Into<String>) -> Self {
        self.graph_uri = Some(iri.into());
        self
    }
}

fn resolve(store: &Store, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        store.config().import_dir().join(path)
    }
}

fn load(store: &Store, request: &ImportRequest, default_graph: &GraphName) -> Result<Vec<Quad>> {
    let parsed = match &request.source {
        ImportSource::File(path) => {
            let path = resolve(store, path);
            if !path.is_file() {
                return Err(Error::new(JobError::not_found(format!(
                    "Import file {} not found",
                    path.display()
                ))));
            }
            read_rdf_file(&path, request.format, default_graph)
        }
        ImportSource::Text(content) => read_rdf_text(
            content,
            request.format.unwrap_or(RdfFormat::NQuads),
            default_graph,
        ),
    };
    parsed.map_err(|e| {
        Error::new(JobError::invalid_data(format!(
            "Failed to parse import data: {}",
            e
        )))
    })
}

pub(crate) fn execute_import(store: &Store, request: &ImportRequest) -> Result<JobOutcome> {
    let default_graph = parse_graph_name(request.default_graph_uri.as_deref())?;
    let quads: HashSet<Quad> = load(store, request, &default_graph)?.into_iter().collect();
    let count = quads.len();
    let base = store.log().latest();
    let commit = store.commit(base, quads, HashSet::new())?;
    info!(
        "Imported {} quads into store '{}' as commit {}",
        count,
        store.name(),
        commit.commit_id()
    );
    Ok(JobOutcome::new(
        format!("Imported {} quads as commit {}", count, commit.commit_id()),
        Some(commit.commit_id()),
    ))
}

pub(crate) fn execute_export(
    store: &Store,
    request: &ExportRequest,
    view: &CommitView,
) -> Result<JobOutcome> {
    let path = resolve(store, &request.file_name);
    let format = request
        .format
        .or_else(|| format_for_path(&path))
        .unwrap_or(RdfFormat::NQuads);
    let graph = parse_graph_name(request.graph_uri.as_deref())?;

    let selected: Vec<&Quad> = match &request.graph_uri {
        Some(_) => view.iter().filter(|q| q.graph_name == graph).collect(),
        None => view.iter().collect(),
    };
    let bytes = write_quads(
        Vec::new(),
        selected.iter().copied(),
        format,
        graph.as_ref(),
    )?;
    write_atomically(&path, &bytes, store.config().sync_writes)?;
    Ok(JobOutcome::new(
        format!(
            "Exported commit {} to {}",
            view.commit_id(),
            path.display()
        ),
        Some(view.commit_id()),
    ))
}
