//! RDF store wrapper.
//!
//! [`KnowledgeStore`] is the single owner of the persistent graph. It
//! dispatches SPARQL by form (SELECT/ASK/CONSTRUCT/DESCRIBE), serializes all
//! writes behind one lock, and evaluates every read with the default graph
//! set to the union of all graphs so context-scoped data stays visible.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use oxigraph::io::{DatasetFormat, GraphFormat};
use oxigraph::model::{GraphName, GraphNameRef, NamedNode, Quad, Term, Triple};
use oxigraph::sparql::{Query, QueryResults, Update};
use oxigraph::store::Store;
use tracing::{debug, warn};

use crate::error::KnowledgeError;
use crate::reasoner;
use crate::KnowledgeResult;

/// Backend selection for a [`KnowledgeStore`]
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Durable store rooted at the given directory; survives process restarts
    Disk(PathBuf),
    /// Volatile store for tests and one-shot runs
    Memory,
}

/// One SELECT solution: variable name to bound term
pub type SolutionRow = HashMap<String, Term>;

/// Result of [`KnowledgeStore::query`], one variant per SPARQL query form
#[derive(Debug)]
pub enum QueryOutcome {
    /// SELECT results
    Solutions(Vec<SolutionRow>),
    /// ASK result
    Boolean(bool),
    /// CONSTRUCT / DESCRIBE results
    Graph(Vec<Triple>),
}

impl QueryOutcome {
    /// Unwrap SELECT rows, treating other forms as empty
    pub fn into_rows(self) -> Vec<SolutionRow> {
        match self {
            QueryOutcome::Solutions(rows) => rows,
            _ => Vec::new(),
        }
    }
}

/// The engine's knowledge base
pub struct KnowledgeStore {
    inner: Store,
    // Single-writer kernel: all mutations funnel through this lock.
    write_lock: Mutex<()>,
}

impl KnowledgeStore {
    /// Open or create a store per the given config
    pub fn open(config: &StoreConfig) -> KnowledgeResult<Self> {
        let inner = match config {
            StoreConfig::Disk(path) => {
                Store::open(path).map_err(|e| KnowledgeError::Store(e.to_string()))?
            }
            StoreConfig::Memory => {
                Store::new().map_err(|e| KnowledgeError::Store(e.to_string()))?
            }
        };
        Ok(Self {
            inner,
            write_lock: Mutex::new(()),
        })
    }

    /// Shorthand for an in-memory store
    pub fn in_memory() -> KnowledgeResult<Self> {
        Self::open(&StoreConfig::Memory)
    }

    /// Shorthand for a durable store at `path`
    pub fn on_disk(path: impl AsRef<Path>) -> KnowledgeResult<Self> {
        Self::open(&StoreConfig::Disk(path.as_ref().to_path_buf()))
    }

    fn parse_query(sparql: &str) -> KnowledgeResult<Query> {
        let mut query =
            Query::parse(sparql, None).map_err(|e| KnowledgeError::Query(e.to_string()))?;
        query.dataset_mut().set_default_graph_as_union();
        Ok(query)
    }

    /// Execute a SPARQL query, dispatching on its form
    pub fn query(&self, sparql: &str) -> KnowledgeResult<QueryOutcome> {
        let query = Self::parse_query(sparql)?;
        let results = self
            .inner
            .query(query)
            .map_err(|e| KnowledgeError::Query(e.to_string()))?;
        match results {
            QueryResults::Solutions(solutions) => {
                let mut rows = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(|e| KnowledgeError::Query(e.to_string()))?;
                    let mut row = SolutionRow::new();
                    for (var, term) in solution.iter() {
                        row.insert(var.as_str().to_string(), term.clone());
                    }
                    rows.push(row);
                }
                debug!(rows = rows.len(), "select query evaluated");
                Ok(QueryOutcome::Solutions(rows))
            }
            QueryResults::Boolean(value) => Ok(QueryOutcome::Boolean(value)),
            QueryResults::Graph(triples) => {
                let mut out = Vec::new();
                for triple in triples {
                    out.push(triple.map_err(|e| KnowledgeError::Query(e.to_string()))?);
                }
                Ok(QueryOutcome::Graph(out))
            }
        }
    }

    /// Evaluate an ASK query
    pub fn ask(&self, sparql: &str) -> KnowledgeResult<bool> {
        match self.query(sparql)? {
            QueryOutcome::Boolean(value) => Ok(value),
            other => Err(KnowledgeError::Query(format!(
                "expected ASK to yield a boolean, got {other:?}"
            ))),
        }
    }

    /// Execute a SPARQL update. Writes are serialized.
    pub fn update(&self, sparql: &str) -> KnowledgeResult<()> {
        let update =
            Update::parse(sparql, None).map_err(|e| KnowledgeError::Update(e.to_string()))?;
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        self.inner
            .update(update)
            .map_err(|e| KnowledgeError::Update(e.to_string()))
    }

    /// Bulk-append triples, into the default graph or a named context
    pub fn add_triples(
        &self,
        triples: impl IntoIterator<Item = Triple>,
        context: Option<&NamedNode>,
    ) -> KnowledgeResult<usize> {
        let graph: GraphName = match context {
            Some(name) => name.clone().into(),
            None => GraphName::DefaultGraph,
        };
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let mut count = 0;
        for triple in triples {
            let quad = Quad::new(triple.subject, triple.predicate, triple.object, graph.clone());
            self.inner
                .insert(&quad)
                .map_err(|e| KnowledgeError::Store(e.to_string()))?;
            count += 1;
        }
        debug!(count, "triples added");
        Ok(count)
    }

    /// Fetch a single value of `property` on `subject`. Warns and returns the
    /// first match when the property is unexpectedly multi-valued.
    pub fn get_single(
        &self,
        subject: &NamedNode,
        property: &NamedNode,
    ) -> KnowledgeResult<Option<Term>> {
        let mut values = Vec::new();
        for quad in self.inner.quads_for_pattern(
            Some(subject.as_ref().into()),
            Some(property.as_ref()),
            None,
            None,
        ) {
            let quad = quad.map_err(|e| KnowledgeError::Store(e.to_string()))?;
            values.push(quad.object);
        }
        if values.len() > 1 {
            warn!(
                subject = subject.as_str(),
                property = property.as_str(),
                count = values.len(),
                "multiple values where one was expected, returning first"
            );
        }
        Ok(values.into_iter().next())
    }

    /// All values of `property` on `subject`
    pub fn get_all(
        &self,
        subject: &NamedNode,
        property: &NamedNode,
    ) -> KnowledgeResult<Vec<Term>> {
        let mut values = Vec::new();
        for quad in self.inner.quads_for_pattern(
            Some(subject.as_ref().into()),
            Some(property.as_ref()),
            None,
            None,
        ) {
            let quad = quad.map_err(|e| KnowledgeError::Store(e.to_string()))?;
            values.push(quad.object);
        }
        Ok(values)
    }

    /// Delete every triple matching `(subject, property, *)` across all
    /// graphs. Returns the number of quads removed.
    pub fn delete_subject_predicate(
        &self,
        subject: &NamedNode,
        property: &NamedNode,
    ) -> KnowledgeResult<usize> {
        let matches: Vec<Quad> = self
            .inner
            .quads_for_pattern(
                Some(subject.as_ref().into()),
                Some(property.as_ref()),
                None,
                None,
            )
            .collect::<Result<_, _>>()
            .map_err(|e| KnowledgeError::Store(e.to_string()))?;
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        for quad in &matches {
            self.inner
                .remove(quad)
                .map_err(|e| KnowledgeError::Store(e.to_string()))?;
        }
        Ok(matches.len())
    }

    /// All triples matching the given pattern, across all graphs
    pub fn triples_matching(
        &self,
        subject: Option<&NamedNode>,
        predicate: Option<&NamedNode>,
        object: Option<&Term>,
    ) -> KnowledgeResult<Vec<Triple>> {
        let mut out = Vec::new();
        for quad in self.inner.quads_for_pattern(
            subject.map(|s| s.as_ref().into()),
            predicate.map(|p| p.as_ref()),
            object.map(|o| o.as_ref()),
            None,
        ) {
            let quad = quad.map_err(|e| KnowledgeError::Store(e.to_string()))?;
            out.push(Triple::new(quad.subject, quad.predicate, quad.object));
        }
        Ok(out)
    }

    /// Whether the default graph contains `triple`
    pub fn contains(&self, triple: &Triple) -> KnowledgeResult<bool> {
        let quad = Quad::new(
            triple.subject.clone(),
            triple.predicate.clone(),
            triple.object.clone(),
            GraphName::DefaultGraph,
        );
        self.inner
            .contains(&quad)
            .map_err(|e| KnowledgeError::Store(e.to_string()))
    }

    /// Total quad count across all graphs
    pub fn len(&self) -> KnowledgeResult<usize> {
        self.inner
            .len()
            .map_err(|e| KnowledgeError::Store(e.to_string()))
    }

    /// Whether the store holds no quads
    pub fn is_empty(&self) -> KnowledgeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Run the forward-closure reasoner over the current graph. Idempotent;
    /// triggered explicitly after bulk loads or at planner checkpoints.
    pub fn reason(&self) -> KnowledgeResult<usize> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        reasoner::forward_closure(&self.inner)
    }

    /// Load Turtle data into the default graph or a named context
    pub fn load_turtle(&self, data: &[u8], context: Option<&NamedNode>) -> KnowledgeResult<()> {
        let graph: GraphName = match context {
            Some(name) => name.clone().into(),
            None => GraphName::DefaultGraph,
        };
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        self.inner
            .load_graph(data, GraphFormat::Turtle, &graph, None)
            .map_err(|e| KnowledgeError::Store(e.to_string()))
    }

    /// Serialize the default graph as Turtle
    pub fn dump_turtle(&self, writer: &mut impl Write) -> KnowledgeResult<()> {
        self.inner
            .dump_graph(writer, GraphFormat::Turtle, GraphNameRef::DefaultGraph)
            .map_err(|e| KnowledgeError::Serialization(e.to_string()))
    }

    /// Serialize the whole dataset as N-Quads
    pub fn dump_nquads(&self, writer: &mut impl Write) -> KnowledgeResult<()> {
        self.inner
            .dump_dataset(writer, DatasetFormat::NQuads)
            .map_err(|e| KnowledgeError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::{Literal, NamedNode};

    fn node(iri: &str) -> NamedNode {
        NamedNode::new(iri).unwrap()
    }

    #[test]
    fn query_dispatches_on_form() {
        let store = KnowledgeStore::in_memory().unwrap();
        store
            .add_triples(
                [Triple::new(
                    node("http://example.com/ns#a"),
                    node("http://example.com/ns#p"),
                    Literal::from(1),
                )],
                None,
            )
            .unwrap();

        match store
            .query("SELECT ?o WHERE { <http://example.com/ns#a> <http://example.com/ns#p> ?o }")
            .unwrap()
        {
            QueryOutcome::Solutions(rows) => {
                assert_eq!(rows.len(), 1);
                assert!(rows[0].contains_key("o"));
            }
            other => panic!("expected solutions, got {other:?}"),
        }

        assert!(store
            .ask("ASK { <http://example.com/ns#a> <http://example.com/ns#p> 1 }")
            .unwrap());
        assert!(!store
            .ask("ASK { <http://example.com/ns#a> <http://example.com/ns#p> 2 }")
            .unwrap());
    }

    #[test]
    fn malformed_query_fails_synchronously() {
        let store = KnowledgeStore::in_memory().unwrap();
        let err = store.query("SELECT WHERE {").unwrap_err();
        assert!(matches!(err, KnowledgeError::Query(_)));
    }

    #[test]
    fn update_inserts_into_default_graph() {
        let store = KnowledgeStore::in_memory().unwrap();
        store
            .update(
                "INSERT DATA { <http://example.com/ns#a> <http://example.com/ns#p> \"v\" }",
            )
            .unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn context_triples_stay_visible_to_queries() {
        let store = KnowledgeStore::in_memory().unwrap();
        let ctx = node("http://example.com/runs/r1");
        store
            .add_triples(
                [Triple::new(
                    node("http://example.com/ns#a"),
                    node("http://example.com/ns#p"),
                    Literal::from(7),
                )],
                Some(&ctx),
            )
            .unwrap();
        assert!(store
            .ask("ASK { <http://example.com/ns#a> <http://example.com/ns#p> 7 }")
            .unwrap());
    }

    #[test]
    fn delete_subject_predicate_clears_old_values() {
        let store = KnowledgeStore::in_memory().unwrap();
        let s = node("http://example.com/ns#a");
        let p = node("http://example.com/ns#p");
        store
            .add_triples(
                [
                    Triple::new(s.clone(), p.clone(), Literal::from(1)),
                    Triple::new(s.clone(), p.clone(), Literal::from(2)),
                ],
                None,
            )
            .unwrap();
        assert_eq!(store.delete_subject_predicate(&s, &p).unwrap(), 2);
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn get_single_returns_first_and_tolerates_missing() {
        let store = KnowledgeStore::in_memory().unwrap();
        let s = node("http://example.com/ns#a");
        let p = node("http://example.com/ns#p");
        assert!(store.get_single(&s, &p).unwrap().is_none());
        store
            .add_triples([Triple::new(s.clone(), p.clone(), Literal::from(5))], None)
            .unwrap();
        let value = store.get_single(&s, &p).unwrap().unwrap();
        assert_eq!(value, Literal::from(5).into());
    }
}
