//!
//! KCE Core - planning-and-execution kernel of the Knowledge-CAD-Engine
//!
//! Solves domain problems by composing declaratively-defined operations over
//! a semantic knowledge graph: a goal-directed planner selects atomic nodes
//! and rules whose combined effects make a goal ASK hold, a plan executor
//! drives them, and a provenance recorder makes every step reproducible.

#![forbid(unsafe_code)]

/// Engine assembly: wires every component from one config
pub mod engine;

/// Goal-directed planner with continuous replanning
pub mod planner;

/// Plan executor: drives ordered (node|rule) operations
pub mod plan;

/// Atomic-node executor: subprocess invocation and output reification
pub mod node;

/// Rule engine: antecedent matching and consequent application
pub mod rules;

/// Provenance recorder: execution runs and state-node chains
pub mod provenance;

/// Cancellation handle
pub mod cancel;

/// Engine configuration
pub mod config;

/// Shared kernel types
pub mod types;

/// Error types
pub mod error;

pub use cancel::CancelHandle;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::CoreError;
pub use node::{NodeExecutor, NodeReport};
pub use plan::{PlanExecutor, StepFailure};
pub use planner::{CandidateOracle, ExecutionMode, FirstCandidateOracle, OracleChoice, Planner};
pub use provenance::{Event, EventKind, ProvenanceRecorder, RunContext};
pub use rules::{FiredBindings, RuleEngine};
pub use types::{ExecutionReport, FailureReason, Operation, RunOutcome};

/// Result alias for the kernel
pub type CoreResult<T> = Result<T, CoreError>;
