//! Atomic-node executor.
//!
//! Executes one node against the operating context: resolves inputs from
//! the graph, invokes the subprocess (or stored update), reifies the JSON
//! outputs into a single write batch and records provenance around the
//! whole thing. Failures are recovered locally as `NodeFailed` state nodes;
//! the planner decides what happens next.

pub(crate) mod definition;
pub(crate) mod invoke;
pub(crate) mod outputs;

use std::sync::Arc;

use oxigraph::model::{NamedNode, Term};
use serde_json::Value;
use tracing::{debug, info};

use kce_dsl::sparql::bind_context;
use kce_knowledge::KnowledgeStore;

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::provenance::{Event, EventKind, ProvenanceRecorder, RunContext};
use crate::CoreResult;

use definition::{ArgStyle, Invocation, NodeDefinition};

/// Outcome of one successful node execution
#[derive(Debug)]
pub struct NodeReport {
    /// The `NodeSucceeded` state node
    pub state: NamedNode,
    /// Triples written by the batch
    pub triples_written: usize,
}

/// Executes atomic nodes
pub struct NodeExecutor {
    store: Arc<KnowledgeStore>,
    recorder: Arc<ProvenanceRecorder>,
    config: EngineConfig,
}

impl NodeExecutor {
    /// Create an executor over the given store and recorder
    pub fn new(
        store: Arc<KnowledgeStore>,
        recorder: Arc<ProvenanceRecorder>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            recorder,
            config,
        }
    }

    /// Execute `node` against the run's operating context.
    pub async fn execute(&self, node: &NamedNode, ctx: &mut RunContext) -> CoreResult<NodeReport> {
        let def = definition::load_node(&self.store, node)?;
        match self.execute_inner(&def, ctx).await {
            Ok(report) => Ok(report),
            Err(error) => {
                let detail = match &error {
                    CoreError::Script { message, stderr, .. } if !stderr.is_empty() => {
                        format!("{message}\nstderr: {stderr}")
                    }
                    other => other.to_string(),
                };
                self.recorder
                    .emit(
                        ctx,
                        Event::new(EventKind::NodeFailed)
                            .operation(node)
                            .detail(detail)
                            .side_effect(def.has_external_side_effect),
                    )
                    .await?;
                Err(error)
            }
        }
    }

    async fn execute_inner(
        &self,
        def: &NodeDefinition,
        ctx: &mut RunContext,
    ) -> CoreResult<NodeReport> {
        let (arguments, used_uris, snapshot) = self.prepare_inputs(def, ctx)?;

        self.recorder
            .emit(
                ctx,
                Event::new(EventKind::NodeStarted)
                    .operation(&def.uri)
                    .inputs(snapshot.clone())
                    .side_effect(def.has_external_side_effect),
            )
            .await?;

        if ctx.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let (batch, output_snapshot) = match &def.invocation {
            Invocation::SubprocessScript {
                script_path,
                style,
                timeout,
            } => {
                let args = build_args(*style, &arguments);
                let timeout = timeout.unwrap_or(self.config.default_node_timeout);
                let output = invoke::run_script(
                    &def.uri,
                    script_path,
                    &args,
                    timeout,
                    self.config.kill_grace,
                    &self.config.script_env_allowlist,
                    &ctx.cancel,
                )
                .await?;

                let parsed: Value =
                    serde_json::from_str(output.stdout.trim()).map_err(|e| CoreError::Script {
                        node: def.uri.as_str().to_string(),
                        message: format!("stdout is not a single JSON object: {e}"),
                        stderr: output.stderr_tail.clone(),
                    })?;
                let object = parsed.as_object().ok_or_else(|| CoreError::Script {
                    node: def.uri.as_str().to_string(),
                    message: format!("stdout is not a JSON object: {parsed}"),
                    stderr: output.stderr_tail.clone(),
                })?;

                let batch = outputs::build_write_batch(
                    &self.store,
                    def,
                    &ctx.workflow_context,
                    object,
                )?;
                (batch, Value::Object(object.clone()))
            }
            Invocation::SparqlUpdate { update } => {
                let bound = bind_context(update, ctx.workflow_context.as_str());
                self.store.update(&bound).map_err(|e| CoreError::Script {
                    node: def.uri.as_str().to_string(),
                    message: format!("stored update failed: {e}"),
                    stderr: String::new(),
                })?;
                (outputs::WriteBatch::default(), Value::Null)
            }
        };

        let triples_written = batch.apply(&self.store)?;
        debug!(
            node = def.uri.as_str(),
            triples = triples_written,
            "write batch applied"
        );

        let state = self
            .recorder
            .emit(
                ctx,
                Event::new(EventKind::NodeSucceeded)
                    .operation(&def.uri)
                    .inputs(snapshot)
                    .outputs(serde_json::json!({
                        "script_outputs": output_snapshot,
                        "triples_written": triples_written,
                    }))
                    .side_effect(def.has_external_side_effect),
            )
            .await?;
        self.recorder.link_generated(&batch.insertions, &state)?;
        self.recorder.link_used(&state, &used_uris)?;

        if def.creates_entities() {
            self.store.reason()?;
        }

        info!(node = def.uri.as_str(), label = %def.label, "node executed");
        Ok(NodeReport {
            state,
            triples_written,
        })
    }

    /// Resolve input parameters relative to the operating context, in
    /// declared order. A required input with no value fails the node before
    /// any subprocess is spawned.
    fn prepare_inputs(
        &self,
        def: &NodeDefinition,
        ctx: &RunContext,
    ) -> CoreResult<(Vec<(String, Option<String>)>, Vec<NamedNode>, Value)> {
        let mut arguments = Vec::with_capacity(def.inputs.len());
        let mut used_uris = Vec::new();
        let mut snapshot = serde_json::Map::new();

        for param in &def.inputs {
            let value = self
                .store
                .get_single(&ctx.workflow_context, &param.property)?;
            match value {
                Some(Term::Literal(literal)) => {
                    let text = literal.value().to_string();
                    snapshot.insert(param.name.clone(), Value::String(text.clone()));
                    arguments.push((param.name.clone(), Some(text)));
                }
                Some(Term::NamedNode(uri)) => {
                    snapshot.insert(
                        param.name.clone(),
                        Value::String(uri.as_str().to_string()),
                    );
                    used_uris.push(uri.clone());
                    arguments.push((param.name.clone(), Some(uri.as_str().to_string())));
                }
                Some(other) => {
                    let text = other.to_string();
                    snapshot.insert(param.name.clone(), Value::String(text.clone()));
                    arguments.push((param.name.clone(), Some(text)));
                }
                None if param.required => {
                    return Err(CoreError::MissingInput {
                        name: param.name.clone(),
                        node: def.uri.as_str().to_string(),
                    });
                }
                None => {
                    snapshot.insert(param.name.clone(), Value::Null);
                    arguments.push((param.name.clone(), None));
                }
            }
        }
        Ok((arguments, used_uris, Value::Object(snapshot)))
    }
}

/// Turn resolved inputs into CLI arguments per the invocation style.
/// Optional inputs with no value are omitted entirely.
fn build_args(style: ArgStyle, arguments: &[(String, Option<String>)]) -> Vec<String> {
    let mut args = Vec::new();
    for (name, value) in arguments {
        let Some(value) = value else { continue };
        match style {
            ArgStyle::Named => {
                args.push(format!("--{name}"));
                args.push(value.clone());
            }
            ArgStyle::Positional => args.push(value.clone()),
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_style_pairs_flags_with_values() {
        let args = build_args(
            ArgStyle::Named,
            &[
                ("x".to_string(), Some("1".to_string())),
                ("skip".to_string(), None),
                ("y".to_string(), Some("two".to_string())),
            ],
        );
        assert_eq!(args, ["--x", "1", "--y", "two"]);
    }

    #[test]
    fn positional_style_keeps_declared_order() {
        let args = build_args(
            ArgStyle::Positional,
            &[
                ("x".to_string(), Some("1".to_string())),
                ("y".to_string(), Some("2".to_string())),
            ],
        );
        assert_eq!(args, ["1", "2"]);
    }
}
