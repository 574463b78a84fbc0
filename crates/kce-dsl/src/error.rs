use thiserror::Error;

/// All errors the definition layer can produce
#[derive(Error, Debug)]
pub enum DslError {
    /// YAML parsing failure
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing failure
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed catalogue input; aborts the load
    #[error("Definition error: {0}")]
    Definition(String),

    /// Item `kind` outside the recognized set; aborts the load
    #[error("Unknown definition kind: {0}")]
    UnknownKind(String),

    /// Duplicate URI within a single load
    #[error("Duplicate definition URI: {0}")]
    DuplicateUri(String),

    /// Syntactically invalid SPARQL in a definition
    #[error("SPARQL syntax error in {context}: {message}")]
    Sparql {
        /// Which definition field held the query
        context: String,
        /// Parser message
        message: String,
    },

    /// Referenced script missing at load time
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    /// Unresolvable URI or CURIE
    #[error("Invalid URI reference: {0}")]
    InvalidUri(String),

    /// Knowledge-layer failure while loading
    #[error(transparent)]
    Knowledge(#[from] kce_knowledge::KnowledgeError),

    /// Input/output error
    #[error("Input/output error: {0}")]
    Io(#[from] std::io::Error),
}
