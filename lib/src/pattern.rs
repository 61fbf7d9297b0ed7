//! Parsing of line-oriented quad text and the precondition / delete pattern matcher.
//!
//! Pattern text uses N-Quads statements. The [`WILDCARD`] IRI in any position
//! matches every value in that position; in the graph position it matches
//! every graph, the default graph included. A statement without a graph refers
//! to the default graph supplied by the caller.

use crate::consts::WILDCARD;
use crate::errors::JobError;
use crate::generation::CommitView;
use anyhow::{Error, Result};
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::{GraphName, NamedNode, NamedOrBlankNode, Quad, QuadRef, Term};
use std::collections::HashSet;
use std::fmt;

/// A quad in which any position may be left open.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuadPattern {
    pub subject: Option<NamedOrBlankNode>,
    pub predicate: Option<NamedNode>,
    pub object: Option<Term>,
    pub graph: Option<GraphName>,
}

impl QuadPattern {
    /// Builds a pattern from a parsed quad, opening every position that holds
    /// the wildcard IRI.
    pub fn from_quad(quad: Quad) -> Self {
        let subject = match quad.subject {
            NamedOrBlankNode::NamedNode(ref n) if n.as_ref() == WILDCARD => None,
            s => Some(s),
        };
        let predicate = if quad.predicate.as_ref() == WILDCARD {
            None
        } else {
            Some(quad.predicate)
        };
        let object = match quad.object {
            Term::NamedNode(ref n) if n.as_ref() == WILDCARD => None,
            o => Some(o),
        };
        let graph = match quad.graph_name {
            GraphName::NamedNode(ref n) if n.as_ref() == WILDCARD => None,
            g => Some(g),
        };
        Self {
            subject,
            predicate,
            object,
            graph,
        }
    }

    /// True when no position is open, so the pattern denotes exactly one quad.
    pub fn is_ground(&self) -> bool {
        self.subject.is_some()
            && self.predicate.is_some()
            && self.object.is_some()
            && self.graph.is_some()
    }

    fn as_ground_quad(&self) -> Option<Quad> {
        Some(Quad::new(
            self.subject.clone()?,
            self.predicate.clone()?,
            self.object.clone()?,
            self.graph.clone()?,
        ))
    }

    pub fn matches(&self, quad: QuadRef<'_>) -> bool {
        self.subject
            .as_ref()
            .map_or(true, |s| s.as_ref() == quad.subject)
            && self
                .predicate
                .as_ref()
                .map_or(true, |p| p.as_ref() == quad.predicate)
            && self
                .object
                .as_ref()
                .map_or(true, |o| o.as_ref() == quad.object)
            && self
                .graph
                .as_ref()
                .map_or(true, |g| g.as_ref() == quad.graph_name)
    }
}

impl From<Quad> for QuadPattern {
    fn from(quad: Quad) -> Self {
        QuadPattern::from_quad(quad)
    }
}

impl fmt::Display for QuadPattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.subject {
            Some(s) => write!(f, "{} ", s)?,
            None => write!(f, "* ")?,
        }
        match &self.predicate {
            Some(p) => write!(f, "{} ", p)?,
            None => write!(f, "* ")?,
        }
        match &self.object {
            Some(o) => write!(f, "{}", o)?,
            None => write!(f, "*")?,
        }
        match &self.graph {
            Some(GraphName::DefaultGraph) => Ok(()),
            Some(g) => write!(f, " {}", g),
            None => write!(f, " *"),
        }
    }
}

// Statements may omit the terminating '.'; N-Quads requires it.
fn normalize_statements(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        out.push_str(line);
        if !line.ends_with('.') {
            out.push_str(" .");
        }
        out.push('\n');
    }
    out
}

/// Parses quad text, placing statements without an explicit graph into
/// `default_graph`.
pub fn parse_quads(text: &str, default_graph: &GraphName) -> Result<Vec<Quad>> {
    let normalized = normalize_statements(text);
    let parser = RdfParser::from_format(RdfFormat::NQuads).with_default_graph(default_graph.clone());
    parser
        .for_reader(normalized.as_bytes())
        .map(|res| {
            res.map_err(|e| {
                Error::new(JobError::invalid_data(format!(
                    "Malformed quad data: {}",
                    e
                )))
            })
        })
        .collect()
}

/// Resolves an optional graph IRI; `None` or an empty string selects the
/// default graph.
pub fn parse_graph_name(iri: Option<&str>) -> Result<GraphName> {
    match iri.map(str::trim) {
        None | Some("") => Ok(GraphName::DefaultGraph),
        Some(iri) => NamedNode::new(iri)
            .map(GraphName::NamedNode)
            .map_err(|e| {
                Error::new(JobError::invalid_data(format!(
                    "Invalid graph IRI '{}': {}",
                    iri, e
                )))
            }),
    }
}

/// Parses pattern text into quad patterns.
pub fn parse_patterns(text: &str, default_graph: &GraphName) -> Result<Vec<QuadPattern>> {
    Ok(parse_quads(text, default_graph)?
        .into_iter()
        .map(QuadPattern::from_quad)
        .collect())
}

/// Parses insert data, rejecting any statement that uses the wildcard IRI.
pub fn parse_insert_data(text: &str, default_graph: &GraphName) -> Result<Vec<Quad>> {
    let quads = parse_quads(text, default_graph)?;
    if let Some(q) = quads
        .iter()
        .find(|q| !QuadPattern::from_quad((*q).clone()).is_ground())
    {
        return Err(Error::new(JobError::invalid_data(format!(
            "Insert data must not contain the wildcard IRI: {}",
            q
        ))));
    }
    Ok(quads)
}

fn has_match(view: &CommitView, pattern: &QuadPattern) -> bool {
    if let Some(quad) = pattern.as_ground_quad() {
        return view.contains(&quad);
    }
    view.iter().any(|q| pattern.matches(q.as_ref()))
}

/// True when every pattern matches at least one quad of the view.
pub fn match_existence(view: &CommitView, patterns: &[QuadPattern]) -> bool {
    patterns.iter().all(|p| has_match(view, p))
}

/// The patterns that match nothing in the view.
pub fn unmatched<'a>(view: &CommitView, patterns: &'a [QuadPattern]) -> Vec<&'a QuadPattern> {
    patterns.iter().filter(|p| !has_match(view, p)).collect()
}

/// Selects every quad of the view matched by at least one pattern.
pub fn match_delete(view: &CommitView, patterns: &[QuadPattern]) -> HashSet<Quad> {
    let mut selected = HashSet::new();
    let (ground, open): (Vec<&QuadPattern>, Vec<&QuadPattern>) =
        patterns.iter().partition(|p| p.is_ground());
    for pattern in ground {
        if let Some(quad) = pattern.as_ground_quad() {
            if view.contains(&quad) {
                selected.insert(quad);
            }
        }
    }
    if !open.is_empty() {
        for quad in view.iter() {
            if open.iter().any(|p| p.matches(quad.as_ref())) {
                selected.insert(quad.clone());
            }
        }
    }
    selected
}
