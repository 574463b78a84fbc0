//! Script output reification.
//!
//! On exit 0 a script's stdout must be a single JSON object. Declared
//! output parameters are coerced to their datatype and written onto the
//! operating context; the reserved `_rdf_instructions` key is an explicit,
//! authoritative graph-update program. All writes from one execution are
//! collected into a single batch: deletions (delete-then-insert per
//! subject+predicate) followed by insertions.

use std::collections::HashSet;
use std::sync::Arc;

use oxigraph::model::{Literal, NamedNode, Term, Triple};
use serde_json::{Map, Value};
use tracing::warn;

use kce_knowledge::vocab;
use kce_knowledge::KnowledgeStore;

use crate::error::CoreError;
use crate::CoreResult;

use super::definition::{NodeDefinition, ParameterSpec};

pub(crate) const RDF_INSTRUCTIONS_KEY: &str = "_rdf_instructions";

const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

const STANDARD_PREFIXES: &[(&str, &str)] = &[
    ("kce", kce_knowledge::vocab::KCE_NS),
    ("prov", kce_knowledge::vocab::PROV_NS),
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
];

/// One node execution's collected writes
#[derive(Debug, Default)]
pub(crate) struct WriteBatch {
    /// Subject+predicate pairs cleared before inserting
    pub deletions: Vec<(NamedNode, NamedNode)>,
    /// Triples inserted after the deletions
    pub insertions: Vec<Triple>,
}

impl WriteBatch {
    /// Apply deletions then insertions against the store.
    pub fn apply(&self, store: &Arc<KnowledgeStore>) -> CoreResult<usize> {
        for (subject, predicate) in &self.deletions {
            store.delete_subject_predicate(subject, predicate)?;
        }
        let count = store.add_triples(self.insertions.iter().cloned(), None)?;
        Ok(count)
    }
}

/// Build the write batch for a script's JSON output.
pub(crate) fn build_write_batch(
    store: &Arc<KnowledgeStore>,
    def: &NodeDefinition,
    ctx: &NamedNode,
    outputs: &Map<String, Value>,
) -> CoreResult<WriteBatch> {
    let mut batch = WriteBatch::default();
    let declared: HashSet<&str> = def.outputs.iter().map(|p| p.name.as_str()).collect();

    for param in &def.outputs {
        let Some(value) = outputs.get(&param.name) else {
            continue;
        };
        let term = coerce_declared_output(value, param, &def.uri)?;
        batch.deletions.push((ctx.clone(), param.property.clone()));
        batch
            .insertions
            .push(Triple::new(ctx.clone(), param.property.clone(), term));
    }

    if let Some(instructions) = outputs.get(RDF_INSTRUCTIONS_KEY) {
        let Some(instructions) = instructions.as_object() else {
            return Err(script_error(
                &def.uri,
                format!("{RDF_INSTRUCTIONS_KEY} must be a JSON object"),
            ));
        };
        apply_instructions(store, instructions, &def.uri, &mut batch)?;
    }

    for key in outputs.keys() {
        if key != RDF_INSTRUCTIONS_KEY && !declared.contains(key.as_str()) {
            warn!(node = def.uri.as_str(), key, "ignoring undeclared script output key");
        }
    }
    Ok(batch)
}

fn apply_instructions(
    store: &Arc<KnowledgeStore>,
    instructions: &Map<String, Value>,
    node: &NamedNode,
    batch: &mut WriteBatch,
) -> CoreResult<()> {
    for key in instructions.keys() {
        if !matches!(key.as_str(), "create_entities" | "update_entities" | "add_links") {
            warn!(node = node.as_str(), key, "ignoring unknown _rdf_instructions key");
        }
    }

    for entity in array(instructions, "create_entities") {
        let Some(uri) = entity.get("uri").and_then(Value::as_str) else {
            return Err(script_error(node, "create_entities item missing 'uri'"));
        };
        let Some(kind) = entity.get("type").and_then(Value::as_str) else {
            return Err(script_error(node, "create_entities item missing 'type'"));
        };
        let subject = resolve_iri(uri)
            .ok_or_else(|| script_error(node, format!("unresolvable entity uri '{uri}'")))?;
        let class = resolve_iri(kind)
            .ok_or_else(|| script_error(node, format!("unresolvable entity type '{kind}'")))?;
        batch.insertions.push(Triple::new(
            subject.clone(),
            vocab::RDF_TYPE.into_owned(),
            class,
        ));
        if let Some(properties) = entity.get("properties").and_then(Value::as_object) {
            for (property, value) in properties {
                let predicate = resolve_iri(property).ok_or_else(|| {
                    script_error(node, format!("unresolvable property uri '{property}'"))
                })?;
                let object = infer_term(store, &predicate, value)?;
                batch
                    .insertions
                    .push(Triple::new(subject.clone(), predicate, object));
            }
        }
    }

    for entity in array(instructions, "update_entities") {
        let Some(uri) = entity.get("uri").and_then(Value::as_str) else {
            return Err(script_error(node, "update_entities item missing 'uri'"));
        };
        let subject = resolve_iri(uri)
            .ok_or_else(|| script_error(node, format!("unresolvable entity uri '{uri}'")))?;
        if let Some(properties) = entity.get("properties_to_set").and_then(Value::as_object) {
            for (property, value) in properties {
                let predicate = resolve_iri(property).ok_or_else(|| {
                    script_error(node, format!("unresolvable property uri '{property}'"))
                })?;
                let object = infer_term(store, &predicate, value)?;
                // Overwrite semantics: clear the pair, then insert.
                batch.deletions.push((subject.clone(), predicate.clone()));
                batch
                    .insertions
                    .push(Triple::new(subject.clone(), predicate, object));
            }
        }
    }

    for link in array(instructions, "add_links") {
        let (Some(s), Some(p), Some(o)) = (
            link.get("subject").and_then(Value::as_str),
            link.get("predicate").and_then(Value::as_str),
            link.get("object").and_then(Value::as_str),
        ) else {
            return Err(script_error(
                node,
                "add_links item needs subject, predicate and object",
            ));
        };
        let subject =
            resolve_iri(s).ok_or_else(|| script_error(node, format!("unresolvable subject '{s}'")))?;
        let predicate =
            resolve_iri(p).ok_or_else(|| script_error(node, format!("unresolvable predicate '{p}'")))?;
        let object =
            resolve_iri(o).ok_or_else(|| script_error(node, format!("unresolvable object '{o}'")))?;
        batch
            .insertions
            .push(Triple::new(subject, predicate, object));
    }
    Ok(())
}

fn array<'a>(map: &'a Map<String, Value>, key: &str) -> impl Iterator<Item = &'a Value> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|v| v.iter())
        .unwrap_or_default()
}

/// Coerce a declared output value to its parameter datatype. A value that
/// does not conform is an error, not a silent skip.
fn coerce_declared_output(
    value: &Value,
    param: &ParameterSpec,
    node: &NamedNode,
) -> CoreResult<Term> {
    if let Value::String(s) = value {
        if is_absolute_iri(s) {
            return NamedNode::new(s.as_str())
                .map(Term::from)
                .map_err(|e| script_error(node, format!("invalid IRI output '{s}': {e}")));
        }
    }

    let datatype_local = param
        .datatype
        .as_ref()
        .and_then(|dt| dt.as_str().strip_prefix(XSD_NS));

    let fail = |got: &Value| {
        script_error(
            node,
            format!(
                "output '{}' does not conform to {}: got {got}",
                param.name,
                param
                    .datatype
                    .as_ref()
                    .map_or("xsd:string", |dt| dt.as_str()),
            ),
        )
    };

    let literal = match datatype_local {
        Some("integer") | Some("int") | Some("long") => match value {
            Value::Number(n) if n.is_i64() => Literal::from(n.as_i64().unwrap()),
            Value::String(s) => {
                Literal::from(s.parse::<i64>().map_err(|_| fail(value))?)
            }
            other => return Err(fail(other)),
        },
        Some("double") | Some("float") | Some("decimal") => match value {
            Value::Number(n) => Literal::new_typed_literal(
                n.to_string(),
                param.datatype.clone().expect("datatype checked"),
            ),
            Value::String(s) => {
                s.parse::<f64>().map_err(|_| fail(value))?;
                Literal::new_typed_literal(
                    s.clone(),
                    param.datatype.clone().expect("datatype checked"),
                )
            }
            other => return Err(fail(other)),
        },
        Some("boolean") | Some("bool") => match value {
            Value::Bool(b) => Literal::from(*b),
            Value::String(s) if s == "true" || s == "false" => Literal::from(s == "true"),
            other => return Err(fail(other)),
        },
        Some(_) => {
            let lexical = lexical_form(value);
            Literal::new_typed_literal(lexical, param.datatype.clone().expect("datatype checked"))
        }
        None => match value {
            Value::Bool(b) => Literal::from(*b),
            Value::Number(n) if n.is_i64() => Literal::from(n.as_i64().unwrap()),
            Value::Number(n) => Literal::from(n.as_f64().unwrap_or_default()),
            other => Literal::from(lexical_form(other).as_str()),
        },
    };
    Ok(Term::from(literal))
}

/// Infer a term for an `_rdf_instructions` property value: absolute IRIs and
/// resolvable CURIEs become URIs, everything else becomes a literal typed by
/// the property's declared range when available.
fn infer_term(
    store: &Arc<KnowledgeStore>,
    property: &NamedNode,
    value: &Value,
) -> CoreResult<Term> {
    if let Value::String(s) = value {
        if let Some(node) = resolve_iri(s) {
            return Ok(Term::from(node));
        }
        let range = store.get_single(property, &vocab::RDFS_RANGE.into_owned())?;
        if let Some(Term::NamedNode(datatype)) = range {
            if datatype.as_str().starts_with(XSD_NS) {
                return Ok(Term::from(Literal::new_typed_literal(s.clone(), datatype)));
            }
        }
        return Ok(Term::from(Literal::from(s.as_str())));
    }
    Ok(Term::from(match value {
        Value::Bool(b) => Literal::from(*b),
        Value::Number(n) if n.is_i64() => Literal::from(n.as_i64().unwrap()),
        Value::Number(n) => Literal::from(n.as_f64().unwrap_or_default()),
        other => Literal::from(lexical_form(other).as_str()),
    }))
}

/// Absolute IRIs pass through; CURIEs resolve against the standard prefixes.
fn resolve_iri(value: &str) -> Option<NamedNode> {
    if is_absolute_iri(value) {
        return NamedNode::new(value).ok();
    }
    let (prefix, local) = value.split_once(':')?;
    let ns = STANDARD_PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, ns)| *ns)?;
    NamedNode::new(format!("{ns}{local}")).ok()
}

fn is_absolute_iri(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://") || value.starts_with("urn:")
}

fn lexical_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn script_error(node: &NamedNode, message: impl Into<String>) -> CoreError {
    CoreError::Script {
        node: node.as_str().to_string(),
        message: message.into(),
        stderr: String::new(),
    }
}
