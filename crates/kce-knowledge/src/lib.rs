//!
//! KCE Knowledge Layer
//!
//! Owns all RDF data for the engine. Every other crate interacts with the
//! graph exclusively through [`KnowledgeStore`] (SPARQL query/update and typed
//! triple appends) and with human-readable payloads through a
//! [`HumanReadableSink`]. Reasoning is an explicit checkpoint, never an
//! implicit side effect of a write.

#![forbid(unsafe_code)]

/// RDF store wrapper and query dispatch
pub mod store;

/// Forward-closure reasoner
pub mod reasoner;

/// Opaque blob sink for human-readable event payloads
pub mod blob;

/// Namespace and vocabulary constants
pub mod vocab;

/// Error types
pub mod error;

pub use blob::{BlobRef, FileBlobSink, HumanReadableSink, MemoryBlobSink};
pub use error::KnowledgeError;
pub use store::{KnowledgeStore, QueryOutcome, SolutionRow, StoreConfig};

/// Result alias used across the knowledge layer
pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
