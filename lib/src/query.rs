//! SPARQL queries over a pinned commit.
//!
//! Evaluation is delegated to oxigraph: the pinned quads are loaded into a
//! scratch in-memory store and the query runs against it. Later commits are
//! never visible to a query that has already pinned its view.

use crate::errors::ClientError;
use crate::generation::{CommitId, CommitView};
use anyhow::{anyhow, Error, Result};
use chrono::prelude::*;
use oxigraph::model::{GraphName, NamedNode, Quad, Term, Triple, Variable};
use oxigraph::sparql::{QueryResults, SparqlEvaluator};
use oxigraph::store::Store as OxStore;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub query: String,
    /// Graphs whose union forms the default graph of the query. Empty
    /// entries are ignored; if none remain the store's default graph is used.
    pub default_graph_uris: Vec<String>,
    /// Fails with [`ClientError::NotModified`] when the pinned commit is not
    /// newer than this instant.
    pub if_not_modified_since: Option<DateTime<Utc>>,
    /// Query an older commit point instead of the current one.
    pub commit_id: Option<CommitId>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_default_graph(mut self, iri: impl Into<String>) -> Self {
        self.default_graph_uris.push(iri.into());
        self
    }

    pub fn if_not_modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.if_not_modified_since = Some(since);
        self
    }

    pub fn at_commit(mut self, commit_id: CommitId) -> Self {
        self.commit_id = Some(commit_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Solutions {
        variables: Vec<Variable>,
        rows: Vec<Vec<Option<Term>>>,
    },
    Boolean(bool),
    Graph(Vec<Triple>),
}

impl QueryResult {
    /// Rows for SELECT, triples for CONSTRUCT/DESCRIBE, 1 for ASK.
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Solutions { rows, .. } => rows.len(),
            QueryResult::Boolean(_) => 1,
            QueryResult::Graph(triples) => triples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    /// Commit the query was evaluated against.
    pub commit_id: CommitId,
    pub result: QueryResult,
}

fn default_graphs(request: &QueryRequest) -> Result<HashSet<GraphName>> {
    request
        .default_graph_uris
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            NamedNode::new(s)
                .map(GraphName::NamedNode)
                .map_err(|e| anyhow!("Invalid default graph IRI '{}': {}", s, e))
        })
        .collect()
}

/// Evaluates `request` against `view`.
pub fn evaluate(view: &CommitView, request: &QueryRequest) -> Result<QueryOutcome> {
    if let (Some(since), Some(committed)) = (request.if_not_modified_since, view.timestamp()) {
        if committed <= since {
            return Err(Error::new(ClientError::NotModified));
        }
    }
    let defaults = default_graphs(request)?;

    let scratch = OxStore::new()?;
    let mut loader = scratch.bulk_loader();
    if defaults.is_empty() {
        loader.load_quads(view.iter().cloned())?;
    } else {
        // the selected graphs replace the default graph; named graphs stay
        // addressable under their own names
        loader.load_quads(
            view.iter()
                .filter(|q| !q.graph_name.is_default_graph())
                .cloned(),
        )?;
        loader.load_quads(
            view.iter()
                .filter(|q| defaults.contains(&q.graph_name))
                .map(|q| {
                    Quad::new(
                        q.subject.clone(),
                        q.predicate.clone(),
                        q.object.clone(),
                        GraphName::DefaultGraph,
                    )
                }),
        )?;
    }
    loader.commit()?;

    let results = SparqlEvaluator::new()
        .parse_query(&request.query)
        .map_err(|e| anyhow!("Invalid SPARQL query: {}", e))?
        .on_store(&scratch)
        .execute()?;
    let result = match results {
        QueryResults::Solutions(solutions) => {
            let variables = solutions.variables().to_vec();
            let mut rows = Vec::new();
            for solution in solutions {
                let solution = solution?;
                rows.push(variables.iter().map(|v| solution.get(v).cloned()).collect());
            }
            QueryResult::Solutions { variables, rows }
        }
        QueryResults::Boolean(value) => QueryResult::Boolean(value),
        QueryResults::Graph(triples) => {
            QueryResult::Graph(triples.collect::<Result<Vec<_>, _>>()?)
        }
    };
    Ok(QueryOutcome {
        commit_id: view.commit_id(),
        result,
    })
}
