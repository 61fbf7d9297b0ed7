//! Shared option types that replace boolean flag parameters in the Rust API.

use anyhow::{anyhow, Error};
use oxigraph::io::RdfFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Controls how a snapshot materializes the target store.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub enum PersistenceMode {
    /// Continue the source history: the target receives every generation up to
    /// the chosen commit, sharing structure with the source.
    #[default]
    AppendOnly,
    /// Materialize the chosen commit as a single fresh generation.
    Rewrite,
}

impl PersistenceMode {
    pub fn is_append_only(self) -> bool {
        matches!(self, PersistenceMode::AppendOnly)
    }
}

impl FromStr for PersistenceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "appendonly" | "append-only" | "append" => Ok(PersistenceMode::AppendOnly),
            "rewrite" => Ok(PersistenceMode::Rewrite),
            other => Err(anyhow!("Unknown persistence mode '{}'", other)),
        }
    }
}

impl fmt::Display for PersistenceMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PersistenceMode::AppendOnly => write!(f, "AppendOnly"),
            PersistenceMode::Rewrite => write!(f, "Rewrite"),
        }
    }
}

/// Resolve an RDF format from a short name, file extension or media type.
pub fn rdf_format_from_name(name: &str) -> Option<RdfFormat> {
    let name = name.trim().trim_start_matches('.').to_ascii_lowercase();
    match name.as_str() {
        "nq" | "nquads" | "n-quads" => Some(RdfFormat::NQuads),
        "nt" | "ntriples" | "n-triples" => Some(RdfFormat::NTriples),
        "ttl" | "turtle" => Some(RdfFormat::Turtle),
        "trig" => Some(RdfFormat::TriG),
        "rdf" | "xml" | "rdfxml" | "rdf-xml" | "owl" => Some(RdfFormat::RdfXml),
        "n3" => Some(RdfFormat::N3),
        _ => RdfFormat::from_extension(&name).or_else(|| RdfFormat::from_media_type(&name)),
    }
}
