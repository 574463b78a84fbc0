//! Plan executor.
//!
//! Drives an ordered list of (node|rule) operations for a run. Execution
//! stops at the first failing step; partial graph mutations stay in place
//! as evidence. State-node chaining is owned by the provenance recorder the
//! delegated executors emit through.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::node::NodeExecutor;
use crate::provenance::RunContext;
use crate::rules::{FiredBindings, RuleEngine};
use crate::types::Operation;

/// A failed plan step, tagged with its position
#[derive(Debug)]
pub struct StepFailure {
    /// Index of the offending step
    pub index: usize,
    /// The operation that failed
    pub operation: Operation,
    /// The underlying error
    pub error: CoreError,
}

/// Executes plans by dispatching steps to the node executor or rule engine
pub struct PlanExecutor {
    nodes: Arc<NodeExecutor>,
    rules: Arc<RuleEngine>,
}

impl PlanExecutor {
    /// Create a plan executor over the given delegates
    pub fn new(nodes: Arc<NodeExecutor>, rules: Arc<RuleEngine>) -> Self {
        Self { nodes, rules }
    }

    /// Execute `plan` in order. Returns the first failure, if any.
    pub async fn execute(
        &self,
        plan: &[Operation],
        ctx: &mut RunContext,
        cache: &mut FiredBindings,
    ) -> Result<(), StepFailure> {
        for (index, operation) in plan.iter().enumerate() {
            debug!(
                step = index + 1,
                total = plan.len(),
                kind = operation.kind(),
                uri = operation.uri().as_str(),
                "executing plan step"
            );
            let result = match operation {
                Operation::Node(uri) => self.nodes.execute(uri, ctx).await.map(|_| ()),
                Operation::Rule(uri) => {
                    self.rules.apply_one(ctx, cache, uri).await.map(|_| ())
                }
            };
            if let Err(error) = result {
                warn!(
                    step = index + 1,
                    uri = operation.uri().as_str(),
                    error = %error,
                    "plan step failed"
                );
                return Err(StepFailure {
                    index,
                    operation: operation.clone(),
                    error,
                });
            }
        }
        Ok(())
    }
}
