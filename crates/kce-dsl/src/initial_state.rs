//! Initial-state documents.
//!
//! A JSON-LD-like structured document enumerating the entities of a problem
//! instance. Value objects distinguish literals (`{value, type}`) from
//! references (`{ref}`); relative URIs resolve against the supplied base.

use std::collections::BTreeMap;

use oxigraph::model::{Literal, NamedNode, Term, Triple};
use serde::Deserialize;

use kce_knowledge::vocab;

use crate::error::DslError;
use crate::uri::is_absolute_iri;
use crate::DslResult;

/// An initial problem state
#[derive(Debug, Deserialize)]
pub struct InitialStateDocument {
    /// Entities making up the problem instance
    pub entities: Vec<EntityDef>,
    /// Optional CURIE prefixes (merged with the built-ins)
    #[serde(default)]
    pub prefixes: BTreeMap<String, String>,
}

/// One entity in the initial state
#[derive(Debug, Deserialize)]
pub struct EntityDef {
    /// Entity URI, absolute or relative to the load base
    pub uri: String,
    /// Class URIs
    #[serde(default)]
    pub types: Vec<String>,
    /// Property URI to one or many value objects
    #[serde(default)]
    pub properties: BTreeMap<String, ValueEntry>,
}

/// One value or a list of values for a property
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ValueEntry {
    /// Single value
    One(ValueObject),
    /// Multiple values
    Many(Vec<ValueObject>),
}

impl ValueEntry {
    fn iter(&self) -> impl Iterator<Item = &ValueObject> {
        match self {
            ValueEntry::One(v) => std::slice::from_ref(v).iter(),
            ValueEntry::Many(vs) => vs.iter(),
        }
    }
}

/// A literal or a reference
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ValueObject {
    /// Reference to another entity
    Reference {
        /// Target URI, absolute or relative to the load base
        #[serde(rename = "ref")]
        reference: String,
    },
    /// Typed literal
    Literal {
        /// Lexical value
        value: serde_json::Value,
        /// XSD datatype URI; inferred from the JSON type when absent
        #[serde(rename = "type", default)]
        datatype: Option<String>,
    },
}

impl InitialStateDocument {
    /// Parse from JSON text
    pub fn from_json_str(text: &str) -> DslResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse from YAML text
    pub fn from_yaml_str(text: &str) -> DslResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Compile an initial-state document into triples, resolving relative URIs
/// against `base_uri`.
pub fn load_initial_state(
    doc: &InitialStateDocument,
    base_uri: &str,
) -> DslResult<Vec<Triple>> {
    let resolver = crate::uri::UriResolver::new(&doc.prefixes);
    let resolve = |reference: &str| -> DslResult<NamedNode> {
        if is_absolute_iri(reference) || reference.contains(':') {
            resolver.resolve(reference)
        } else {
            NamedNode::new(format!("{base_uri}{reference}"))
                .map_err(|e| DslError::InvalidUri(e.to_string()))
        }
    };

    let mut triples = Vec::new();
    for entity in &doc.entities {
        let subject = resolve(&entity.uri)?;
        for class in &entity.types {
            triples.push(Triple::new(
                subject.clone(),
                vocab::RDF_TYPE.into_owned(),
                resolve(class)?,
            ));
        }
        for (property, entry) in &entity.properties {
            let predicate = resolve(property)?;
            for value in entry.iter() {
                let object: Term = match value {
                    ValueObject::Reference { reference } => resolve(reference)?.into(),
                    ValueObject::Literal { value, datatype } => {
                        json_to_literal(value, datatype.as_deref(), &resolver)?.into()
                    }
                };
                triples.push(Triple::new(subject.clone(), predicate.clone(), object));
            }
        }
    }
    Ok(triples)
}

fn json_to_literal(
    value: &serde_json::Value,
    datatype: Option<&str>,
    resolver: &crate::uri::UriResolver,
) -> DslResult<Literal> {
    if let Some(datatype) = datatype {
        let datatype = resolver.resolve(datatype)?;
        let lexical = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(Literal::new_typed_literal(lexical, datatype));
    }
    Ok(match value {
        serde_json::Value::Bool(b) => Literal::from(*b),
        serde_json::Value::Number(n) if n.is_i64() => Literal::from(n.as_i64().unwrap()),
        serde_json::Value::Number(n) => Literal::from(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) => Literal::from(s.as_str()),
        other => Literal::from(other.to_string().as_str()),
    })
}
