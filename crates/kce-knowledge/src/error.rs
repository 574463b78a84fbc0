use thiserror::Error;

/// Error type for the knowledge layer
#[derive(Error, Debug)]
pub enum KnowledgeError {
    /// Storage backend failure (open, read, write)
    #[error("Store error: {0}")]
    Store(String),

    /// Syntactically invalid or failing SPARQL query
    #[error("Query error: {0}")]
    Query(String),

    /// Syntactically invalid or failing SPARQL update
    #[error("Update error: {0}")]
    Update(String),

    /// Invalid IRI supplied to a typed API
    #[error("Invalid IRI: {0}")]
    Iri(String),

    /// Blob sink failure
    #[error("Blob sink error: {0}")]
    Blob(String),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Input/output error
    #[error("Input/output error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KnowledgeError {
    fn from(err: serde_json::Error) -> Self {
        KnowledgeError::Serialization(err.to_string())
    }
}
