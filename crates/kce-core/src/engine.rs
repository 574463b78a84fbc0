//! Engine assembly.
//!
//! Wires the knowledge store, blob sink, provenance recorder, rule engine,
//! node executor, plan executor and planner from a single [`EngineConfig`],
//! and exposes the run boundary: load definitions, solve problems, query.

use std::sync::Arc;

use oxigraph::model::NamedNode;
use tracing::info;
use uuid::Uuid;

use kce_dsl::{load_initial_state, CatalogLoader, InitialStateDocument, TargetDescription};
use kce_knowledge::{
    FileBlobSink, HumanReadableSink, KnowledgeStore, MemoryBlobSink,
};

use crate::cancel::CancelHandle;
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::node::NodeExecutor;
use crate::plan::PlanExecutor;
use crate::planner::{CandidateOracle, ExecutionMode, Planner};
use crate::provenance::ProvenanceRecorder;
use crate::rules::RuleEngine;
use crate::types::ExecutionReport;
use crate::CoreResult;

/// The assembled kernel
pub struct Engine {
    store: Arc<KnowledgeStore>,
    sink: Arc<dyn HumanReadableSink>,
    planner: Planner,
}

impl Engine {
    /// Assemble every component from the given config
    pub fn new(config: EngineConfig) -> CoreResult<Self> {
        let store = Arc::new(KnowledgeStore::open(&config.store)?);
        let sink: Arc<dyn HumanReadableSink> = match &config.blob_root {
            Some(root) => Arc::new(FileBlobSink::new(root.clone())),
            None => Arc::new(MemoryBlobSink::new()),
        };
        let recorder = Arc::new(ProvenanceRecorder::new(store.clone(), sink.clone()));
        let rules = Arc::new(RuleEngine::new(store.clone(), recorder.clone()));
        let nodes = Arc::new(NodeExecutor::new(
            store.clone(),
            recorder.clone(),
            config.clone(),
        ));
        let plan_executor = Arc::new(PlanExecutor::new(nodes, rules.clone()));
        let planner = Planner::new(store.clone(), recorder, rules, plan_executor, config);
        Ok(Self {
            store,
            sink,
            planner,
        })
    }

    /// Replace the expert-mode oracle
    pub fn with_oracle(mut self, oracle: Arc<dyn CandidateOracle>) -> Self {
        self.planner = self.planner.with_oracle(oracle);
        self
    }

    /// The shared knowledge store
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// The human-readable blob sink
    pub fn sink(&self) -> &Arc<dyn HumanReadableSink> {
        &self.sink
    }

    /// A catalogue loader bound to this engine's store
    pub fn loader(&self) -> CatalogLoader {
        CatalogLoader::new(self.store.clone())
    }

    /// Load every definition document under `dir`
    pub fn load_definitions(&self, dir: impl AsRef<std::path::Path>) -> CoreResult<usize> {
        Ok(self.loader().load_dir(dir)?)
    }

    /// Solve a problem: merge the initial state under a fresh context, then
    /// run the planner until the goal holds or no progress is possible.
    /// The returned handle cancels the run from another task.
    pub fn prepare_run(&self, run_id: Option<String>) -> (String, CancelHandle) {
        let run_id = run_id.unwrap_or_else(|| format!("run-{}", Uuid::new_v4()));
        (run_id, CancelHandle::new())
    }

    /// Execute a prepared run to completion.
    pub async fn solve(
        &self,
        target: &TargetDescription,
        initial: &InitialStateDocument,
        run_id: &str,
        mode: ExecutionMode,
        cancel: CancelHandle,
    ) -> CoreResult<ExecutionReport> {
        let base_uri = format!("{}{run_id}/instance/", kce_knowledge::vocab::KCE_RUN_NS);
        let triples = load_initial_state(initial, &base_uri)?;

        // The first entity of the initial state is the operating context;
        // an empty document gets a synthetic one.
        let workflow_context = match triples.first() {
            Some(triple) => match &triple.subject {
                oxigraph::model::Subject::NamedNode(n) => n.clone(),
                _ => synthetic_context(&base_uri)?,
            },
            None => synthetic_context(&base_uri)?,
        };

        info!(
            run_id,
            context = workflow_context.as_str(),
            triples = triples.len(),
            "solving problem"
        );
        self.planner
            .solve(target, triples, &workflow_context, run_id, mode, cancel)
            .await
    }

    /// Convenience wrapper: fresh run id, default cancel handle.
    pub async fn solve_problem(
        &self,
        target: &TargetDescription,
        initial: &InitialStateDocument,
        run_id: Option<String>,
        mode: ExecutionMode,
    ) -> CoreResult<ExecutionReport> {
        let (run_id, cancel) = self.prepare_run(run_id);
        self.solve(target, initial, &run_id, mode, cancel).await
    }
}

fn synthetic_context(base_uri: &str) -> CoreResult<NamedNode> {
    NamedNode::new(format!("{base_uri}context"))
        .map_err(|e| CoreError::Definition(format!("invalid context uri: {e}")))
}
