//!
//! KCE definition documents.
//!
//! Parses declarative catalogue documents (atomic nodes, rules, capability
//! templates, workflows), initial problem states and target descriptions,
//! and normalizes them into triples for the knowledge layer. Script paths
//! are resolved to absolute paths at load time; SPARQL strings are parsed
//! syntactically before anything reaches the store.

#![forbid(unsafe_code)]

/// Document structures (serde layer)
pub mod documents;

/// Catalogue loader: documents to triples
pub mod loader;

/// Initial-state documents
pub mod initial_state;

/// Target descriptions (goal ASK or graph pattern)
pub mod target;

/// SPARQL template helpers
pub mod sparql;

/// Error types
pub mod error;

mod uri;

pub use documents::{DefinitionDocument, DefinitionItem};
pub use error::DslError;
pub use initial_state::{load_initial_state, InitialStateDocument};
pub use loader::CatalogLoader;
pub use target::TargetDescription;

/// Result alias for the DSL layer
pub type DslResult<T> = Result<T, DslError>;
