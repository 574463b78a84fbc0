use thiserror::Error;

/// Kernel error taxonomy. Node and rule failures are recovered locally by
/// marking the step failed; the planner decides whether to try alternatives.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Required node input absent; the node fails before any subprocess spawn
    #[error("Missing required input '{name}' for node {node}")]
    MissingInput {
        /// Parameter name
        name: String,
        /// Node URI
        node: String,
    },

    /// Non-zero exit, unparseable stdout, or non-conforming output value
    #[error("Script error for node {node}: {message}")]
    Script {
        /// Node URI
        node: String,
        /// What went wrong
        message: String,
        /// Captured stderr tail (at most 8 KB)
        stderr: String,
    },

    /// Script exceeded its timeout and was killed
    #[error("Script for node {node} timed out after {seconds}s")]
    Timeout {
        /// Node URI
        node: String,
        /// Configured limit
        seconds: u64,
    },

    /// A rule consequent failed; aborts the solve only when the rule is critical
    #[error("Rule {rule} failed: {message}")]
    Rule {
        /// Rule URI
        rule: String,
        /// What went wrong
        message: String,
    },

    /// The planner cannot make progress
    #[error("Planning failure: {0}")]
    Planning(String),

    /// The run was cancelled externally
    #[error("Run cancelled")]
    Cancelled,

    /// Malformed or missing catalogue data encountered at execution time
    #[error("Definition error: {0}")]
    Definition(String),

    /// Knowledge-layer failure
    #[error(transparent)]
    Knowledge(#[from] kce_knowledge::KnowledgeError),

    /// Definition-layer failure
    #[error(transparent)]
    Dsl(#[from] kce_dsl::DslError),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Input/output error
    #[error("Input/output error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
