use anyhow::{anyhow, Result};

use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::prelude::*;

use oxigraph::io::{RdfFormat, RdfParser, RdfSerializer};
use oxigraph::model::{GraphName, GraphNameRef, Quad, TripleRef};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use log::{debug, info};

use crate::options::rdf_format_from_name;

/// Guess the RDF format of a file from its extension.
pub fn format_for_path(path: &Path) -> Option<RdfFormat> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(rdf_format_from_name)
}

/// Reads every statement of an RDF file. Triples (and quads in the default
/// graph) are placed into `default_graph`.
pub fn read_rdf_file(
    file: &Path,
    format: Option<RdfFormat>,
    default_graph: &GraphName,
) -> Result<Vec<Quad>> {
    debug!("Reading file: {}", file.display());
    let format = format
        .or_else(|| format_for_path(file))
        .unwrap_or(RdfFormat::NTriples);
    let content = BufReader::new(std::fs::File::open(file)?);
    let parser = RdfParser::from_format(format).with_default_graph(default_graph.clone());
    let mut quads = Vec::new();
    for quad in parser.for_reader(content) {
        quads.push(quad?);
    }
    Ok(quads)
}

/// Parses RDF text held in memory.
pub fn read_rdf_text(text: &str, format: RdfFormat, default_graph: &GraphName) -> Result<Vec<Quad>> {
    let parser = RdfParser::from_format(format).with_default_graph(default_graph.clone());
    let mut quads = Vec::new();
    for quad in parser.for_reader(text.as_bytes()) {
        quads.push(quad?);
    }
    Ok(quads)
}

/// Serializes quads to `writer`. Formats without dataset support only receive
/// the quads of `graph`, written as triples.
pub fn write_quads<'a, W: Write>(
    writer: W,
    quads: impl Iterator<Item = &'a Quad>,
    format: RdfFormat,
    graph: GraphNameRef<'_>,
) -> Result<W> {
    let mut serializer = RdfSerializer::from_format(format).for_writer(writer);
    if format.supports_datasets() {
        for quad in quads {
            serializer.serialize_quad(quad)?;
        }
    } else {
        for quad in quads.filter(|q| q.graph_name.as_ref() == graph) {
            serializer.serialize_triple(TripleRef {
                subject: quad.subject.as_ref(),
                predicate: quad.predicate.as_ref(),
                object: quad.object.as_ref(),
            })?;
        }
    }
    Ok(serializer.finish()?)
}

/// Writes `bytes` to `path` through a temporary file in the same directory and
/// an atomic rename; readers see either the old or the new content.
pub fn write_atomically(path: &Path, bytes: &[u8], sync: bool) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("Path {} has no parent directory", path.display()))?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    if sync {
        tmp.as_file().sync_all()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn save_json<T: Serialize>(path: &Path, value: &T, sync: bool) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomically(path, &bytes, sync)
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

/// Directory name for a store: store names may contain characters that are
/// not valid in paths, so the directory is keyed by the name's hash.
/// A fresh directory name for a new incarnation of the store `name`. Names
/// never repeat, so files of a deleted store cannot collide with those of a
/// store later created under the same name.
pub fn store_dir_name(name: &str) -> String {
    static INCARNATION: AtomicU64 = AtomicU64::new(0);
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(
        &Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&INCARNATION.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        info!("Removing directory {}", path.display());
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}
