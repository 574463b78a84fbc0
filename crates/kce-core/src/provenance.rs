//! Provenance recorder.
//!
//! Records every kernel event as an `ExecutionStateNode` chained to its
//! predecessor via `previousState`, stores the human-readable payload
//! through the knowledge layer's blob sink, and attributes output triples
//! with `prov:wasGeneratedBy`. A single recorder instance is injected into
//! the plan executor, node executor, rule engine and planner.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use oxigraph::model::vocab::xsd;
use oxigraph::model::{Literal, NamedNode, Subject, Term, Triple};
use tracing::debug;
use uuid::Uuid;

use kce_knowledge::vocab;
use kce_knowledge::{HumanReadableSink, KnowledgeStore};

use crate::cancel::CancelHandle;
use crate::types::{FailureReason, RunOutcome};
use crate::CoreResult;

/// Kinds of execution events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A node is about to be invoked
    NodeStarted,
    /// A node's write batch has been applied
    NodeSucceeded,
    /// A node failed; detail carries the error
    NodeFailed,
    /// A rule consequent was applied for one binding set
    RuleFired,
    /// The planner recorded a decision (selection, no-progress, failure)
    PlannerDecision,
    /// The goal ASK holds
    GoalReached,
}

impl EventKind {
    /// Graph term for this kind
    pub fn as_node(&self) -> NamedNode {
        match self {
            EventKind::NodeStarted => vocab::EVENT_NODE_STARTED,
            EventKind::NodeSucceeded => vocab::EVENT_NODE_SUCCEEDED,
            EventKind::NodeFailed => vocab::EVENT_NODE_FAILED,
            EventKind::RuleFired => vocab::EVENT_RULE_FIRED,
            EventKind::PlannerDecision => vocab::EVENT_PLANNER_DECISION,
            EventKind::GoalReached => vocab::EVENT_GOAL_REACHED,
        }
        .into_owned()
    }

    /// Short token used in event ids and payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NodeStarted => "NodeStarted",
            EventKind::NodeSucceeded => "NodeSucceeded",
            EventKind::NodeFailed => "NodeFailed",
            EventKind::RuleFired => "RuleFired",
            EventKind::PlannerDecision => "PlannerDecision",
            EventKind::GoalReached => "GoalReached",
        }
    }
}

/// One event to record
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// Node or rule the event concerns, when any
    pub operation: Option<NamedNode>,
    /// Free-text detail (error messages, planner reasons)
    pub detail: Option<String>,
    /// Input snapshot (resolved parameter values at spawn time)
    pub inputs: Option<serde_json::Value>,
    /// Output snapshot (script outputs, applied counts)
    pub outputs: Option<serde_json::Value>,
    /// Copied from the node definition, metadata only
    pub has_external_side_effect: Option<bool>,
}

impl Event {
    /// A bare event of the given kind
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            operation: None,
            detail: None,
            inputs: None,
            outputs: None,
            has_external_side_effect: None,
        }
    }

    /// Attach the operation URI
    pub fn operation(mut self, uri: &NamedNode) -> Self {
        self.operation = Some(uri.clone());
        self
    }

    /// Attach free-text detail
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach an input snapshot
    pub fn inputs(mut self, inputs: serde_json::Value) -> Self {
        self.inputs = Some(inputs);
        self
    }

    /// Attach an output snapshot
    pub fn outputs(mut self, outputs: serde_json::Value) -> Self {
        self.outputs = Some(outputs);
        self
    }

    /// Attach the node's external-side-effect flag
    pub fn side_effect(mut self, flag: bool) -> Self {
        self.has_external_side_effect = Some(flag);
        self
    }
}

/// Mutable per-run state threaded through every component
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Caller- or engine-supplied run id
    pub run_id: String,
    /// The `ExecutionRun` resource
    pub run: NamedNode,
    /// URI of the problem-instance resource nodes operate on
    pub workflow_context: NamedNode,
    /// Cancellation flag for this run
    pub cancel: CancelHandle,
    last_state: Option<NamedNode>,
    seq: u64,
}

impl RunContext {
    /// Tail of the state-node chain
    pub fn last_state(&self) -> Option<&NamedNode> {
        self.last_state.as_ref()
    }
}

/// Records runs and state nodes into the knowledge layer
pub struct ProvenanceRecorder {
    store: Arc<KnowledgeStore>,
    sink: Arc<dyn HumanReadableSink>,
}

impl ProvenanceRecorder {
    /// Create a recorder over the given store and blob sink
    pub fn new(store: Arc<KnowledgeStore>, sink: Arc<dyn HumanReadableSink>) -> Self {
        Self { store, sink }
    }

    /// Open an `ExecutionRun` and return its mutable context
    pub fn begin_run(
        &self,
        run_id: &str,
        goal: &str,
        workflow_context: &NamedNode,
        cancel: CancelHandle,
    ) -> CoreResult<RunContext> {
        let run = NamedNode::new(format!("{}{run_id}", vocab::KCE_RUN_NS))
            .map_err(|e| crate::CoreError::Definition(format!("invalid run id: {e}")))?;
        self.store.add_triples(
            [
                Triple::new(run.clone(), vocab::RDF_TYPE.into_owned(), vocab::EXECUTION_RUN.into_owned()),
                Triple::new(run.clone(), vocab::RUN_ID.into_owned(), Literal::from(run_id)),
                Triple::new(run.clone(), vocab::STARTED_AT.into_owned(), now_literal()),
                Triple::new(run.clone(), vocab::STATUS.into_owned(), vocab::STATUS_RUNNING.into_owned()),
                Triple::new(run.clone(), vocab::GOAL.into_owned(), Literal::from(goal)),
                Triple::new(
                    run.clone(),
                    vocab::WORKFLOW_CONTEXT.into_owned(),
                    workflow_context.clone(),
                ),
            ],
            None,
        )?;
        debug!(run_id, run = run.as_str(), "run opened");
        Ok(RunContext {
            run_id: run_id.to_string(),
            run,
            workflow_context: workflow_context.clone(),
            cancel,
            last_state: None,
            seq: 0,
        })
    }

    /// Record one event: state-node triples, chain link, blob payload.
    pub async fn emit(&self, ctx: &mut RunContext, event: Event) -> CoreResult<NamedNode> {
        ctx.seq += 1;
        let event_id = format!("{:05}-{}", ctx.seq, event.kind.as_str());
        let state = NamedNode::new(format!(
            "{}{}/state/{event_id}",
            vocab::KCE_RUN_NS,
            ctx.run_id
        ))
        .map_err(|e| crate::CoreError::Definition(format!("invalid state uri: {e}")))?;

        let timestamp = Utc::now();
        let envelope = serde_json::json!({
            "event_id": event_id,
            "run_id": ctx.run_id,
            "timestamp": timestamp.to_rfc3339(),
            "event_kind": event.kind.as_str(),
            "operation": event.operation.as_ref().map(|o| o.as_str()),
            "detail": event.detail,
            "inputs": event.inputs,
            "outputs": event.outputs,
        });
        let payload = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| crate::CoreError::Serialization(e.to_string()))?;
        let blob = self.sink.store(&ctx.run_id, &event_id, &payload).await?;

        let mut triples = vec![
            Triple::new(
                state.clone(),
                vocab::RDF_TYPE.into_owned(),
                vocab::EXECUTION_STATE_NODE.into_owned(),
            ),
            Triple::new(state.clone(), vocab::BELONGS_TO_RUN.into_owned(), ctx.run.clone()),
            Triple::new(
                state.clone(),
                vocab::TIMESTAMP.into_owned(),
                Literal::new_typed_literal(timestamp.to_rfc3339(), xsd::DATE_TIME),
            ),
            Triple::new(state.clone(), vocab::EVENT_KIND.into_owned(), event.kind.as_node()),
            Triple::new(
                state.clone(),
                vocab::HUMAN_READABLE_LOG.into_owned(),
                Literal::from(blob.as_str()),
            ),
        ];
        if let Some(operation) = &event.operation {
            triples.push(Triple::new(
                state.clone(),
                vocab::OPERATION.into_owned(),
                operation.clone(),
            ));
        }
        if let Some(previous) = &ctx.last_state {
            triples.push(Triple::new(
                state.clone(),
                vocab::PREVIOUS_STATE.into_owned(),
                previous.clone(),
            ));
        }
        if let Some(detail) = &event.detail {
            triples.push(Triple::new(
                state.clone(),
                vocab::DETAIL.into_owned(),
                Literal::from(detail.as_str()),
            ));
        }
        if let Some(inputs) = &event.inputs {
            triples.push(Triple::new(
                state.clone(),
                vocab::INPUT_SNAPSHOT.into_owned(),
                Literal::from(inputs.to_string().as_str()),
            ));
        }
        if let Some(outputs) = &event.outputs {
            triples.push(Triple::new(
                state.clone(),
                vocab::OUTPUT_SNAPSHOT.into_owned(),
                Literal::from(outputs.to_string().as_str()),
            ));
        }
        if let Some(flag) = event.has_external_side_effect {
            triples.push(Triple::new(
                state.clone(),
                vocab::HAS_EXTERNAL_SIDE_EFFECT.into_owned(),
                Literal::from(flag),
            ));
        }
        self.store.add_triples(triples, None)?;
        ctx.last_state = Some(state.clone());
        Ok(state)
    }

    /// Attribute a batch of output triples to the state node that produced
    /// them: one reified statement per triple plus a direct link on every
    /// distinct subject.
    pub fn link_generated(&self, batch: &[Triple], state: &NamedNode) -> CoreResult<()> {
        let mut triples = Vec::with_capacity(batch.len() * 5);
        let mut subjects: HashSet<String> = HashSet::new();
        for written in batch {
            let stmt = NamedNode::new(format!("urn:uuid:{}", Uuid::new_v4()))
                .expect("uuid urn is a valid iri");
            triples.push(Triple::new(
                stmt.clone(),
                vocab::RDF_TYPE.into_owned(),
                vocab::RDF_STATEMENT.into_owned(),
            ));
            triples.push(Triple::new(
                stmt.clone(),
                vocab::RDF_SUBJECT.into_owned(),
                subject_as_term(&written.subject),
            ));
            triples.push(Triple::new(
                stmt.clone(),
                vocab::RDF_PREDICATE.into_owned(),
                written.predicate.clone(),
            ));
            triples.push(Triple::new(
                stmt.clone(),
                vocab::RDF_OBJECT.into_owned(),
                written.object.clone(),
            ));
            triples.push(Triple::new(
                stmt,
                vocab::PROV_WAS_GENERATED_BY.into_owned(),
                state.clone(),
            ));
            if let Subject::NamedNode(subject) = &written.subject {
                if subjects.insert(subject.as_str().to_string()) {
                    triples.push(Triple::new(
                        subject.clone(),
                        vocab::PROV_WAS_GENERATED_BY.into_owned(),
                        state.clone(),
                    ));
                }
            }
        }
        self.store.add_triples(triples, None)?;
        Ok(())
    }

    /// Link URI-valued inputs the state node read
    pub fn link_used(&self, state: &NamedNode, used: &[NamedNode]) -> CoreResult<()> {
        let triples: Vec<Triple> = used
            .iter()
            .map(|uri| {
                Triple::new(state.clone(), vocab::PROV_USED.into_owned(), uri.clone())
            })
            .collect();
        self.store.add_triples(triples, None)?;
        Ok(())
    }

    /// Close the run: final status, `endedAt`, failure reason when failed.
    pub fn end_run(&self, ctx: &RunContext, outcome: &RunOutcome) -> CoreResult<()> {
        self.store.delete_subject_predicate(&ctx.run, &vocab::STATUS.into_owned())?;
        let mut triples = vec![Triple::new(
            ctx.run.clone(),
            vocab::ENDED_AT.into_owned(),
            now_literal(),
        )];
        match outcome {
            RunOutcome::Succeeded => {
                triples.push(Triple::new(
                    ctx.run.clone(),
                    vocab::STATUS.into_owned(),
                    vocab::STATUS_SUCCEEDED.into_owned(),
                ));
            }
            RunOutcome::Failed { reason, .. } => {
                triples.push(Triple::new(
                    ctx.run.clone(),
                    vocab::STATUS.into_owned(),
                    vocab::STATUS_FAILED.into_owned(),
                ));
                let detail = match reason {
                    FailureReason::Execution(message) => format!("Execution: {message}"),
                    other => other.token().to_string(),
                };
                triples.push(Triple::new(
                    ctx.run.clone(),
                    vocab::FAILURE_REASON.into_owned(),
                    Literal::from(detail.as_str()),
                ));
            }
        }
        self.store.add_triples(triples, None)?;
        debug!(run_id = %ctx.run_id, ?outcome, "run closed");
        Ok(())
    }
}

fn now_literal() -> Literal {
    Literal::new_typed_literal(Utc::now().to_rfc3339(), xsd::DATE_TIME)
}

fn subject_as_term(subject: &Subject) -> Term {
    match subject {
        Subject::NamedNode(n) => Term::NamedNode(n.clone()),
        Subject::BlankNode(b) => Term::BlankNode(b.clone()),
        #[allow(unreachable_patterns)]
        _ => unreachable!("unsupported subject kind"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kce_knowledge::MemoryBlobSink;
    use oxigraph::model::NamedNode;

    fn recorder() -> (Arc<KnowledgeStore>, ProvenanceRecorder) {
        let store = Arc::new(KnowledgeStore::in_memory().unwrap());
        let recorder = ProvenanceRecorder::new(store.clone(), Arc::new(MemoryBlobSink::new()));
        (store, recorder)
    }

    fn ctx_node() -> NamedNode {
        NamedNode::new("http://example.com/instance/c1").unwrap()
    }

    #[tokio::test]
    async fn states_chain_through_previous_state() {
        let (store, recorder) = recorder();
        let mut ctx = recorder
            .begin_run("run-1", "ASK { ?s ?p ?o }", &ctx_node(), CancelHandle::new())
            .unwrap();

        let first = recorder
            .emit(&mut ctx, Event::new(EventKind::PlannerDecision).detail("start"))
            .await
            .unwrap();
        let second = recorder
            .emit(&mut ctx, Event::new(EventKind::GoalReached))
            .await
            .unwrap();

        assert!(store
            .ask(&format!(
                "ASK {{ <{}> <{}previousState> <{}> }}",
                second.as_str(),
                vocab::KCE_NS,
                first.as_str()
            ))
            .unwrap());
        // The first state of a run has no previousState.
        assert!(!store
            .ask(&format!(
                "ASK {{ <{}> <{}previousState> ?p }}",
                first.as_str(),
                vocab::KCE_NS
            ))
            .unwrap());
    }

    #[tokio::test]
    async fn end_run_replaces_status() {
        let (store, recorder) = recorder();
        let ctx = recorder
            .begin_run("run-2", "ASK { ?s ?p ?o }", &ctx_node(), CancelHandle::new())
            .unwrap();
        assert!(store
            .ask(&format!(
                "ASK {{ <{}> <{}status> <{}Running> }}",
                ctx.run.as_str(),
                vocab::KCE_NS,
                vocab::KCE_NS
            ))
            .unwrap());

        recorder
            .end_run(
                &ctx,
                &RunOutcome::Failed {
                    reason: FailureReason::Cancelled,
                    last_state: None,
                },
            )
            .unwrap();
        assert!(!store
            .ask(&format!(
                "ASK {{ <{}> <{}status> <{}Running> }}",
                ctx.run.as_str(),
                vocab::KCE_NS,
                vocab::KCE_NS
            ))
            .unwrap());
        assert!(store
            .ask(&format!(
                "ASK {{ <{}> <{}failureReason> \"Cancelled\" }}",
                ctx.run.as_str(),
                vocab::KCE_NS
            ))
            .unwrap());
    }

    #[tokio::test]
    async fn generated_triples_are_reified_and_subject_linked() {
        let (store, recorder) = recorder();
        let mut ctx = recorder
            .begin_run("run-3", "ASK { ?s ?p ?o }", &ctx_node(), CancelHandle::new())
            .unwrap();
        let state = recorder
            .emit(&mut ctx, Event::new(EventKind::NodeSucceeded))
            .await
            .unwrap();

        let written = Triple::new(
            ctx_node(),
            NamedNode::new("http://example.com/ns#out").unwrap(),
            Literal::from(2),
        );
        recorder.link_generated(&[written], &state).unwrap();

        assert!(store
            .ask(&format!(
                "PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>\n\
                 PREFIX prov: <http://www.w3.org/ns/prov#>\n\
                 ASK {{ ?stmt a rdf:Statement ;\n\
                        rdf:subject <{}> ;\n\
                        rdf:predicate <http://example.com/ns#out> ;\n\
                        prov:wasGeneratedBy <{}> }}",
                ctx_node().as_str(),
                state.as_str()
            ))
            .unwrap());
        assert!(store
            .ask(&format!(
                "ASK {{ <{}> <http://www.w3.org/ns/prov#wasGeneratedBy> <{}> }}",
                ctx_node().as_str(),
                state.as_str()
            ))
            .unwrap());
    }
}
