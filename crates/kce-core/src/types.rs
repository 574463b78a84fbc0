//! Shared kernel types.

use oxigraph::model::NamedNode;
use serde::Serialize;

/// One plannable operation. The set is closed in the core; extensions add
/// new variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Execute an atomic node
    Node(NamedNode),
    /// Apply one specific rule
    Rule(NamedNode),
}

impl Operation {
    /// The operation's URI
    pub fn uri(&self) -> &NamedNode {
        match self {
            Operation::Node(uri) | Operation::Rule(uri) => uri,
        }
    }

    /// Short tag for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Node(_) => "node",
            Operation::Rule(_) => "rule",
        }
    }
}

/// Why a run failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// No frontier node is both applicable and contributive
    NoProgress,
    /// The depth budget was exhausted before the goal held
    DepthExhausted,
    /// The same state was revisited with every frontier operation exhausted
    RevisitedFailedState,
    /// A step failed and no alternative remained
    Execution(String),
    /// The run was cancelled
    Cancelled,
}

impl FailureReason {
    /// Stable token stored on the run resource
    pub fn token(&self) -> &'static str {
        match self {
            FailureReason::NoProgress => "NoProgress",
            FailureReason::DepthExhausted => "DepthExhausted",
            FailureReason::RevisitedFailedState => "RevisitedFailedState",
            FailureReason::Execution(_) => "Execution",
            FailureReason::Cancelled => "Cancelled",
        }
    }
}

/// Terminal result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The goal ASK holds against the final graph
    Succeeded,
    /// The run ended without satisfying the goal
    Failed {
        /// Why
        reason: FailureReason,
        /// Last state node emitted before the failure, for inspection
        last_state: Option<NamedNode>,
    },
}

impl RunOutcome {
    /// Whether the run succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

/// The run boundary's single result
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Caller- or engine-supplied run id
    pub run_id: String,
    /// URI of the `ExecutionRun` resource
    pub run: NamedNode,
    /// Terminal outcome
    pub outcome: RunOutcome,
    /// Operations executed, in order
    pub plan: Vec<Operation>,
}
