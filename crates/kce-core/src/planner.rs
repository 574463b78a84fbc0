//! Goal-directed planner with continuous replanning.
//!
//! The main loop: check the goal ASK, fire eligible rules, compute the
//! frontier of applicable-and-contributive nodes, hand one operation to the
//! plan executor, repeat. Termination is bounded by the depth budget and by
//! state-hash bookkeeping: revisiting a state with every frontier operation
//! already tried ends the run.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use oxigraph::model::{NamedNode, Term, Triple};
use tracing::{debug, info, warn};

use kce_dsl::sparql::bind_context;
use kce_dsl::TargetDescription;
use kce_knowledge::vocab;
use kce_knowledge::KnowledgeStore;

use crate::cancel::CancelHandle;
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::node::definition::{self, NodeDefinition};
use crate::plan::PlanExecutor;
use crate::provenance::{Event, EventKind, ProvenanceRecorder, RunContext};
use crate::rules::{FiredBindings, RuleEngine};
use crate::types::{ExecutionReport, FailureReason, Operation, RunOutcome};
use crate::CoreResult;

/// How a run interacts with its caller at decision points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Fully automatic
    User,
    /// Consult the oracle when candidates tie
    Expert,
}

/// The oracle's answer at a decision point
#[derive(Debug, Clone)]
pub enum OracleChoice {
    /// Pick this candidate from the tied group
    Pick(NamedNode),
    /// Accept this candidate even if it was not in the tied group
    Accept(NamedNode),
    /// Abort the run
    Abort,
}

/// Caller-provided strategy consulted in expert mode when several
/// candidates have equal priority.
#[async_trait]
pub trait CandidateOracle: Send + Sync {
    /// Choose among `candidates` given a best-effort state snapshot
    async fn choose(&self, candidates: &[NamedNode], snapshot: &serde_json::Value)
        -> OracleChoice;
}

/// Default oracle: picks the first candidate deterministically
pub struct FirstCandidateOracle;

#[async_trait]
impl CandidateOracle for FirstCandidateOracle {
    async fn choose(
        &self,
        candidates: &[NamedNode],
        _snapshot: &serde_json::Value,
    ) -> OracleChoice {
        OracleChoice::Pick(candidates[0].clone())
    }
}

struct Candidate {
    def: NodeDefinition,
    workflow_order: i64,
    coverage: usize,
}

impl Candidate {
    fn sort_key(&self) -> (i64, i64, String) {
        (
            self.workflow_order,
            -(self.coverage as i64),
            self.def.uri.as_str().to_string(),
        )
    }
}

/// The goal-directed planner
pub struct Planner {
    store: Arc<KnowledgeStore>,
    recorder: Arc<ProvenanceRecorder>,
    rules: Arc<RuleEngine>,
    plan_executor: Arc<PlanExecutor>,
    config: EngineConfig,
    oracle: Arc<dyn CandidateOracle>,
}

impl Planner {
    /// Create a planner with the default deterministic oracle
    pub fn new(
        store: Arc<KnowledgeStore>,
        recorder: Arc<ProvenanceRecorder>,
        rules: Arc<RuleEngine>,
        plan_executor: Arc<PlanExecutor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            recorder,
            rules,
            plan_executor,
            config,
            oracle: Arc::new(FirstCandidateOracle),
        }
    }

    /// Replace the expert-mode oracle
    pub fn with_oracle(mut self, oracle: Arc<dyn CandidateOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Search for and execute a plan that makes the goal hold.
    pub async fn solve(
        &self,
        target: &TargetDescription,
        initial: Vec<Triple>,
        workflow_context: &NamedNode,
        run_id: &str,
        mode: ExecutionMode,
        cancel: CancelHandle,
    ) -> CoreResult<ExecutionReport> {
        let goal = bind_context(&target.to_ask()?, workflow_context.as_str());
        let mut ctx = self
            .recorder
            .begin_run(run_id, &goal, workflow_context, cancel)?;

        if !initial.is_empty() {
            let merged = self.store.add_triples(initial, None)?;
            debug!(run_id, triples = merged, "initial state merged");
        }
        self.store.reason()?;

        let mut wanted = extract_terms(&goal);
        wanted.insert(workflow_context.as_str().to_string());
        let workflow_orders = self.load_workflow_orders()?;

        let mut cache = FiredBindings::default();
        let mut attempted: HashMap<u64, HashSet<String>> = HashMap::new();
        let mut last_step_failure: Option<String> = None;
        let mut executed: Vec<Operation> = Vec::new();
        let mut rule_passes = 0usize;
        let deadline = self.config.run_timeout.map(|limit| Instant::now() + limit);

        loop {
            if ctx.cancel.is_cancelled()
                || deadline.is_some_and(|deadline| Instant::now() >= deadline)
            {
                ctx.cancel.cancel();
                return self
                    .fail(&mut ctx, executed, FailureReason::Cancelled, "run cancelled")
                    .await;
            }

            // Goal first: a run that reaches the goal exactly at the depth
            // budget still succeeds.
            if self.store.ask(&goal)? {
                self.recorder
                    .emit(
                        &mut ctx,
                        Event::new(EventKind::GoalReached)
                            .detail(format!("goal satisfied after {} step(s)", executed.len())),
                    )
                    .await?;
                let outcome = RunOutcome::Succeeded;
                self.recorder.end_run(&ctx, &outcome)?;
                info!(run_id = %ctx.run_id, steps = executed.len(), "goal reached");
                return Ok(ExecutionReport {
                    run_id: ctx.run_id.clone(),
                    run: ctx.run.clone(),
                    outcome,
                    plan: executed,
                });
            }

            if executed.len() >= self.config.depth_budget {
                let detail = format!("depth budget of {} exhausted", self.config.depth_budget);
                return self
                    .fail(&mut ctx, executed, FailureReason::DepthExhausted, &detail)
                    .await;
            }

            match self.rules.apply(&mut ctx, &mut cache).await {
                Ok(0) => {
                    rule_passes = 0;
                }
                Ok(fired) => {
                    // A rule whose consequent keeps producing fresh binding
                    // sets would never reach a fixpoint; bound the passes.
                    rule_passes += 1;
                    if rule_passes > self.config.depth_budget {
                        let detail =
                            "rule application did not reach a fixpoint".to_string();
                        return self
                            .fail(
                                &mut ctx,
                                executed,
                                FailureReason::Execution(detail.clone()),
                                &detail,
                            )
                            .await;
                    }
                    debug!(fired, "rules fired, replanning");
                    self.store.reason()?;
                    continue;
                }
                Err(error @ CoreError::Rule { .. }) => {
                    let detail = error.to_string();
                    return self
                        .fail(
                            &mut ctx,
                            executed,
                            FailureReason::Execution(detail.clone()),
                            &detail,
                        )
                        .await;
                }
                Err(error) => return Err(error),
            }

            let wanted_before = wanted.len();
            let candidates = self.compute_frontier(&ctx, &workflow_orders, &mut wanted)?;
            let state_hash = self.state_hash(&wanted)?;
            let tried = attempted.entry(state_hash).or_default();
            let frontier: Vec<&Candidate> = candidates
                .iter()
                .filter(|c| !tried.contains(c.def.uri.as_str()))
                .collect();

            if frontier.is_empty() {
                // Goal regression widened the wanted-term set; rescan before
                // concluding anything about progress.
                if wanted.len() > wanted_before {
                    debug!(terms = wanted.len(), "wanted terms expanded, rescanning");
                    continue;
                }
                let (reason, detail) = if candidates.is_empty() {
                    (
                        FailureReason::NoProgress,
                        "no applicable and contributive node".to_string(),
                    )
                } else if let Some(failure) = last_step_failure.take() {
                    (FailureReason::Execution(failure.clone()), failure)
                } else {
                    (
                        FailureReason::RevisitedFailedState,
                        format!(
                            "state {state_hash:x} revisited with all {} frontier operation(s) exhausted",
                            candidates.len()
                        ),
                    )
                };
                return self.fail(&mut ctx, executed, reason, &detail).await;
            }

            let chosen = self.select(&frontier, mode, &ctx, executed.len()).await?;
            let Some(chosen) = chosen else {
                return self
                    .fail(
                        &mut ctx,
                        executed,
                        FailureReason::Execution("aborted by oracle".to_string()),
                        "aborted by oracle",
                    )
                    .await;
            };
            tried.insert(chosen.as_str().to_string());

            self.recorder
                .emit(
                    &mut ctx,
                    Event::new(EventKind::PlannerDecision)
                        .operation(&chosen)
                        .detail(format!("step {}: selected for execution", executed.len() + 1)),
                )
                .await?;

            let step = Operation::Node(chosen.clone());
            match self
                .plan_executor
                .execute(std::slice::from_ref(&step), &mut ctx, &mut cache)
                .await
            {
                Ok(()) => {
                    executed.push(step);
                    last_step_failure = None;
                }
                Err(failure) => {
                    if matches!(failure.error, CoreError::Cancelled) {
                        return self
                            .fail(&mut ctx, executed, FailureReason::Cancelled, "run cancelled")
                            .await;
                    }
                    warn!(
                        uri = chosen.as_str(),
                        error = %failure.error,
                        "operation failed, marked non-productive for this state"
                    );
                    last_step_failure = Some(failure.error.to_string());
                    self.recorder
                        .emit(
                            &mut ctx,
                            Event::new(EventKind::PlannerDecision)
                                .operation(&chosen)
                                .detail(format!(
                                    "operation failed, trying alternatives: {}",
                                    failure.error
                                )),
                        )
                        .await?;
                }
            }
        }
    }

    async fn fail(
        &self,
        ctx: &mut RunContext,
        executed: Vec<Operation>,
        reason: FailureReason,
        detail: &str,
    ) -> CoreResult<ExecutionReport> {
        self.recorder
            .emit(
                ctx,
                Event::new(EventKind::PlannerDecision).detail(format!("{}: {detail}", reason.token())),
            )
            .await?;
        let outcome = RunOutcome::Failed {
            reason,
            last_state: ctx.last_state().cloned(),
        };
        self.recorder.end_run(ctx, &outcome)?;
        info!(run_id = %ctx.run_id, detail, "run failed");
        Ok(ExecutionReport {
            run_id: ctx.run_id.clone(),
            run: ctx.run.clone(),
            outcome,
            plan: executed,
        })
    }

    /// Frontier: nodes whose preconditions hold against the context and
    /// whose declared effects could contribute to the goal. Opaque nodes
    /// (no effects) are only considered when a workflow names them.
    /// Unmet preconditions of contributive nodes feed the wanted-term set
    /// for later iterations (coarse goal regression).
    fn compute_frontier(
        &self,
        ctx: &RunContext,
        workflow_orders: &HashMap<String, i64>,
        wanted: &mut HashSet<String>,
    ) -> CoreResult<Vec<Candidate>> {
        let rows = self
            .store
            .query(&format!(
                "{}SELECT ?node WHERE {{ ?node a kce:AtomicNode }} ORDER BY ?node",
                vocab::SPARQL_PROLOGUE
            ))?
            .into_rows();

        let mut candidates = Vec::new();
        for row in rows {
            let Some(Term::NamedNode(uri)) = row.get("node") else {
                continue;
            };
            let def = match definition::load_node(&self.store, uri) {
                Ok(def) => def,
                Err(e) => {
                    warn!(node = uri.as_str(), error = %e, "skipping unloadable node");
                    continue;
                }
            };

            let workflow_order = workflow_orders
                .get(uri.as_str())
                .copied()
                .unwrap_or(i64::MAX);
            let coverage = effect_coverage(&def, wanted);

            // Never guess missing intent: nodes without declared effects are
            // opaque and only selectable through a loaded workflow.
            let contributive = if def.is_opaque() {
                workflow_order != i64::MAX
            } else {
                coverage > 0
            };
            if !contributive {
                continue;
            }

            if self.preconditions_hold(&def, ctx)? {
                candidates.push(Candidate {
                    def,
                    workflow_order,
                    coverage,
                });
            } else {
                // Regression: properties this contributive node still waits
                // on become interesting for the next iterations.
                for precondition in &def.preconditions {
                    wanted.extend(extract_terms(precondition));
                }
            }
        }
        candidates.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(candidates)
    }

    fn preconditions_hold(&self, def: &NodeDefinition, ctx: &RunContext) -> CoreResult<bool> {
        for precondition in &def.preconditions {
            let bound = bind_context(precondition, ctx.workflow_context.as_str());
            if !self.store.ask(&bound)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn select(
        &self,
        frontier: &[&Candidate],
        mode: ExecutionMode,
        ctx: &RunContext,
        depth: usize,
    ) -> CoreResult<Option<NamedNode>> {
        let best_key = frontier[0].sort_key();
        let tied: Vec<NamedNode> = frontier
            .iter()
            .take_while(|c| {
                let key = c.sort_key();
                (key.0, key.1) == (best_key.0, best_key.1)
            })
            .map(|c| c.def.uri.clone())
            .collect();

        if mode == ExecutionMode::Expert && tied.len() > 1 {
            let snapshot = serde_json::json!({
                "run_id": ctx.run_id,
                "depth": depth,
                "candidates": tied.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
                "graph_size": self.store.len()?,
            });
            return Ok(match self.oracle.choose(&tied, &snapshot).await {
                OracleChoice::Pick(uri) => {
                    if tied.contains(&uri) {
                        Some(uri)
                    } else {
                        warn!(uri = uri.as_str(), "oracle picked outside the tied group, using first");
                        Some(tied[0].clone())
                    }
                }
                OracleChoice::Accept(uri) => Some(uri),
                OracleChoice::Abort => None,
            });
        }
        Ok(Some(frontier[0].def.uri.clone()))
    }

    /// Cheap fingerprint of the goal-relevant subgraph: every triple whose
    /// predicate or object is a wanted term. Provenance chatter must not
    /// perturb it, or failed operations would be retried forever under
    /// ever-fresh hashes.
    fn state_hash(&self, wanted: &HashSet<String>) -> CoreResult<u64> {
        let mut lines: Vec<String> = Vec::new();
        for iri in wanted {
            let Ok(node) = NamedNode::new(iri.clone()) else {
                continue;
            };
            for triple in self.store.triples_matching(None, Some(&node), None)? {
                lines.push(triple.to_string());
            }
            let term = Term::NamedNode(node);
            for triple in self.store.triples_matching(None, None, Some(&term))? {
                lines.push(triple.to_string());
            }
        }
        lines.sort();
        lines.dedup();
        let mut hasher = DefaultHasher::new();
        lines.hash(&mut hasher);
        Ok(hasher.finish())
    }

    /// Minimum declared step order per node, across loaded workflows.
    fn load_workflow_orders(&self) -> CoreResult<HashMap<String, i64>> {
        let rows = self
            .store
            .query(&format!(
                "{}SELECT ?node ?order WHERE {{\n\
                 ?workflow a kce:Workflow ; kce:hasStep ?step .\n\
                 ?step kce:executesNode ?node ; kce:stepOrder ?order .\n\
                 }}",
                vocab::SPARQL_PROLOGUE
            ))?
            .into_rows();
        let mut orders: HashMap<String, i64> = HashMap::new();
        for row in rows {
            let (Some(Term::NamedNode(node)), Some(Term::Literal(order))) =
                (row.get("node"), row.get("order"))
            else {
                continue;
            };
            let Ok(order) = order.value().parse::<i64>() else {
                continue;
            };
            orders
                .entry(node.as_str().to_string())
                .and_modify(|existing| *existing = (*existing).min(order))
                .or_insert(order);
        }
        Ok(orders)
    }
}

fn effect_coverage(def: &NodeDefinition, wanted: &HashSet<String>) -> usize {
    let mut covered: HashSet<&str> = HashSet::new();
    for effect in &def.effects {
        if let Some(property) = &effect.property {
            if wanted.contains(property.as_str()) {
                covered.insert(property.as_str());
            }
        }
        if let Some(entity_type) = &effect.entity_type {
            if wanted.contains(entity_type.as_str()) {
                covered.insert(entity_type.as_str());
            }
        }
    }
    covered.len()
}

/// Extract the IRIs a SPARQL text mentions: `<...>` references plus CURIEs
/// resolvable through the query's own PREFIX declarations. Quoted strings
/// are skipped.
fn extract_terms(query: &str) -> HashSet<String> {
    let mut prefixes: HashMap<String, String> = HashMap::new();
    for line in query.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed
            .strip_prefix("PREFIX")
            .or_else(|| trimmed.strip_prefix("prefix"))
        {
            if let Some((prefix, ns)) = rest.split_once(':') {
                let ns = ns.trim();
                if let Some(ns) = ns.strip_prefix('<').and_then(|n| n.strip_suffix('>')) {
                    prefixes.insert(prefix.trim().to_string(), ns.to_string());
                }
            }
        }
    }

    let mut terms = HashSet::new();
    let mut chars = query.chars().peekable();
    let mut quote: Option<char> = None;
    let mut token = String::new();

    let mut flush = |token: &mut String, terms: &mut HashSet<String>| {
        if let Some((prefix, local)) = token.split_once(':') {
            if let Some(ns) = prefixes.get(prefix) {
                terms.insert(format!("{ns}{local}"));
            }
        }
        token.clear();
    };

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                flush(&mut token, &mut terms);
                quote = Some(c);
            }
            '<' => {
                flush(&mut token, &mut terms);
                let mut iri = String::new();
                for next in chars.by_ref() {
                    if next == '>' {
                        break;
                    }
                    iri.push(next);
                }
                if !iri.is_empty() {
                    terms.insert(iri);
                }
            }
            c if c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-' || c == '.' => {
                token.push(c);
            }
            _ => flush(&mut token, &mut terms),
        }
    }
    flush(&mut token, &mut terms);
    terms
}
