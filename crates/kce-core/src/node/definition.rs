//! Catalogue lookups for atomic nodes.
//!
//! Materializes everything the executor and the planner need to know about
//! a node: ordered parameters, preconditions, declarative effects and the
//! invocation spec.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use oxigraph::model::{NamedNode, Term};
use tracing::warn;

use kce_knowledge::vocab;
use kce_knowledge::{KnowledgeStore, SolutionRow};

use crate::error::CoreError;
use crate::CoreResult;

/// CLI argument passing styles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArgStyle {
    Named,
    Positional,
}

/// How a node is invoked; the set is closed in the core
#[derive(Debug, Clone)]
pub(crate) enum Invocation {
    SubprocessScript {
        script_path: PathBuf,
        style: ArgStyle,
        timeout: Option<Duration>,
    },
    SparqlUpdate {
        update: String,
    },
}

/// One declared input or output parameter, in declaration order
#[derive(Debug, Clone)]
pub(crate) struct ParameterSpec {
    pub name: String,
    pub property: NamedNode,
    pub datatype: Option<NamedNode>,
    pub required: bool,
}

/// Declarative effect kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EffectKind {
    AssertProperty,
    CreateEntity,
    AddLink,
}

/// One declarative effect, used by the planner for goal regression
#[derive(Debug, Clone)]
pub(crate) struct EffectSpec {
    pub kind: EffectKind,
    pub property: Option<NamedNode>,
    pub entity_type: Option<NamedNode>,
}

/// A fully-resolved atomic node definition
#[derive(Debug, Clone)]
pub(crate) struct NodeDefinition {
    pub uri: NamedNode,
    pub label: String,
    pub inputs: Vec<ParameterSpec>,
    pub outputs: Vec<ParameterSpec>,
    pub preconditions: Vec<String>,
    pub effects: Vec<EffectSpec>,
    pub invocation: Invocation,
    pub has_external_side_effect: bool,
}

impl NodeDefinition {
    /// A node with no declared effects is opaque to the planner.
    pub fn is_opaque(&self) -> bool {
        self.effects.is_empty()
    }

    /// Whether any declared effect creates an entity (gates post-batch
    /// reasoning).
    pub fn creates_entities(&self) -> bool {
        self.effects
            .iter()
            .any(|e| e.kind == EffectKind::CreateEntity)
    }
}

/// Load a node definition from the catalogue.
pub(crate) fn load_node(
    store: &Arc<KnowledgeStore>,
    uri: &NamedNode,
) -> CoreResult<NodeDefinition> {
    if store.get_single(uri, &vocab::HAS_INVOCATION_SPEC.into_owned())?.is_none() {
        return Err(CoreError::Definition(format!(
            "node {} has no invocation spec (is it an AtomicNode?)",
            uri.as_str()
        )));
    }

    let label = match store.get_single(uri, &vocab::RDFS_LABEL.into_owned())? {
        Some(Term::Literal(l)) => l.value().to_string(),
        _ => short_name(uri),
    };

    let inputs = load_parameters(store, uri, "kce:hasInputParameter")?;
    let outputs = load_parameters(store, uri, "kce:hasOutputParameter")?;

    let preconditions = store
        .get_all(uri, &vocab::HAS_PRECONDITION.into_owned())?
        .into_iter()
        .filter_map(|term| match term {
            Term::Literal(l) => Some(l.value().to_string()),
            _ => None,
        })
        .collect();

    let effects = load_effects(store, uri)?;
    let invocation = load_invocation(store, uri)?;

    let has_external_side_effect = matches!(
        store.get_single(uri, &vocab::HAS_EXTERNAL_SIDE_EFFECT.into_owned())?,
        Some(Term::Literal(l)) if l.value() == "true"
    );

    Ok(NodeDefinition {
        uri: uri.clone(),
        label,
        inputs,
        outputs,
        preconditions,
        effects,
        invocation,
        has_external_side_effect,
    })
}

fn load_parameters(
    store: &Arc<KnowledgeStore>,
    node: &NamedNode,
    link: &str,
) -> CoreResult<Vec<ParameterSpec>> {
    let query = format!(
        "{}SELECT ?param ?name ?prop ?datatype ?required ?order WHERE {{\n\
         <{}> {link} ?param .\n\
         ?param kce:parameterName ?name ;\n\
                kce:mapsToRdfProperty ?prop ;\n\
                kce:parameterOrder ?order .\n\
         OPTIONAL {{ ?param kce:dataType ?datatype }}\n\
         OPTIONAL {{ ?param kce:isRequired ?required }}\n\
         }} ORDER BY ?order ?name",
        vocab::SPARQL_PROLOGUE,
        node.as_str()
    );
    let rows = store.query(&query)?.into_rows();
    let mut params = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(Term::Literal(name)) = row.get("name") else {
            continue;
        };
        let Some(Term::NamedNode(property)) = row.get("prop") else {
            warn!(
                node = node.as_str(),
                "parameter without mapsToRdfProperty, skipping"
            );
            continue;
        };
        let datatype = match row.get("datatype") {
            Some(Term::NamedNode(dt)) => Some(dt.clone()),
            _ => None,
        };
        let required = matches!(
            row.get("required"),
            Some(Term::Literal(l)) if l.value() == "true"
        );
        params.push(ParameterSpec {
            name: name.value().to_string(),
            property: property.clone(),
            datatype,
            required,
        });
    }
    Ok(params)
}

fn load_effects(store: &Arc<KnowledgeStore>, node: &NamedNode) -> CoreResult<Vec<EffectSpec>> {
    let query = format!(
        "{}SELECT ?effect ?kind ?property ?entityType WHERE {{\n\
         <{}> kce:hasEffect ?effect .\n\
         ?effect kce:effectKind ?kind .\n\
         OPTIONAL {{ ?effect kce:effectProperty ?property }}\n\
         OPTIONAL {{ ?effect kce:entityType ?entityType }}\n\
         }} ORDER BY ?effect",
        vocab::SPARQL_PROLOGUE,
        node.as_str()
    );
    let rows = store.query(&query)?.into_rows();
    let mut effects = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(Term::NamedNode(kind)) = row.get("kind") else {
            continue;
        };
        let kind = if kind.as_ref() == vocab::EFFECT_ASSERT_PROPERTY {
            EffectKind::AssertProperty
        } else if kind.as_ref() == vocab::EFFECT_CREATE_ENTITY {
            EffectKind::CreateEntity
        } else if kind.as_ref() == vocab::EFFECT_ADD_LINK {
            EffectKind::AddLink
        } else {
            warn!(node = node.as_str(), kind = kind.as_str(), "unknown effect kind");
            continue;
        };
        effects.push(EffectSpec {
            kind,
            property: named(&row, "property"),
            entity_type: named(&row, "entityType"),
        });
    }
    Ok(effects)
}

fn load_invocation(store: &Arc<KnowledgeStore>, node: &NamedNode) -> CoreResult<Invocation> {
    let query = format!(
        "{}SELECT ?spec ?type ?script ?style ?timeout ?update WHERE {{\n\
         <{}> kce:hasInvocationSpec ?spec .\n\
         ?spec a ?type .\n\
         OPTIONAL {{ ?spec kce:scriptPath ?script }}\n\
         OPTIONAL {{ ?spec kce:argumentPassingStyle ?style }}\n\
         OPTIONAL {{ ?spec kce:timeoutSeconds ?timeout }}\n\
         OPTIONAL {{ ?spec kce:hasSparqlUpdateCommand ?update }}\n\
         }} LIMIT 1",
        vocab::SPARQL_PROLOGUE,
        node.as_str()
    );
    let rows = store.query(&query)?.into_rows();
    let row = rows.first().ok_or_else(|| {
        CoreError::Definition(format!("invocation spec missing for node {}", node.as_str()))
    })?;

    let kind = named(row, "type").ok_or_else(|| {
        CoreError::Definition(format!("untyped invocation spec for node {}", node.as_str()))
    })?;

    if kind.as_ref() == vocab::SUBPROCESS_SCRIPT_INVOCATION {
        let script = match row.get("script") {
            Some(Term::Literal(l)) => PathBuf::from(l.value()),
            _ => {
                return Err(CoreError::Definition(format!(
                    "script path missing for node {}",
                    node.as_str()
                )))
            }
        };
        let style = match named(row, "style") {
            Some(style) if style.as_ref() == vocab::POSITIONAL_CLI => ArgStyle::Positional,
            _ => ArgStyle::Named,
        };
        let timeout = match row.get("timeout") {
            Some(Term::Literal(l)) => l.value().parse::<u64>().ok().map(Duration::from_secs),
            _ => None,
        };
        Ok(Invocation::SubprocessScript {
            script_path: script,
            style,
            timeout,
        })
    } else if kind.as_ref() == vocab::SPARQL_UPDATE_INVOCATION {
        match row.get("update") {
            Some(Term::Literal(l)) => Ok(Invocation::SparqlUpdate {
                update: l.value().to_string(),
            }),
            _ => Err(CoreError::Definition(format!(
                "update command missing for node {}",
                node.as_str()
            ))),
        }
    } else {
        Err(CoreError::Definition(format!(
            "unsupported invocation kind {} for node {}",
            kind.as_str(),
            node.as_str()
        )))
    }
}

fn named(row: &SolutionRow, var: &str) -> Option<NamedNode> {
    match row.get(var) {
        Some(Term::NamedNode(n)) => Some(n.clone()),
        _ => None,
    }
}

fn short_name(uri: &NamedNode) -> String {
    let s = uri.as_str();
    s.rsplit(['#', '/']).next().unwrap_or(s).to_string()
}
