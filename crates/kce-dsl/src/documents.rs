//! Serde layer for definition documents.
//!
//! A definition document is a YAML mapping with optional `prefixes` and a
//! list of `items`, each discriminated by `kind`. Parsing is two-stage: the
//! `kind` field is inspected first so an unrecognized kind aborts the load
//! with a dedicated error, then the item is deserialized into its typed
//! shape. Unknown fields are collected and surfaced as warnings by the
//! loader rather than silently dropped.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::DslError;
use crate::DslResult;

/// Recognized item kinds
pub const KNOWN_KINDS: &[&str] = &["AtomicNode", "Rule", "CapabilityTemplate", "Workflow"];

/// A parsed definition document
#[derive(Debug, Default)]
pub struct DefinitionDocument {
    /// CURIE prefix table local to this document
    pub prefixes: BTreeMap<String, String>,
    /// Definition items in document order
    pub items: Vec<DefinitionItem>,
}

/// One definition item
#[derive(Debug)]
pub enum DefinitionItem {
    /// An executable step
    AtomicNode(AtomicNodeDef),
    /// A graph rewrite rule
    Rule(RuleDef),
    /// An abstract I/O signature
    CapabilityTemplate(CapabilityTemplateDef),
    /// A linear node sequence the planner may prefer
    Workflow(WorkflowDef),
}

impl DefinitionItem {
    /// The item's URI as written in the document
    pub fn uri(&self) -> &str {
        match self {
            DefinitionItem::AtomicNode(def) => &def.uri,
            DefinitionItem::Rule(def) => &def.uri,
            DefinitionItem::CapabilityTemplate(def) => &def.uri,
            DefinitionItem::Workflow(def) => &def.uri,
        }
    }

    /// Unknown fields the document carried for this item
    pub fn extra_fields(&self) -> &BTreeMap<String, Value> {
        match self {
            DefinitionItem::AtomicNode(def) => &def.extra,
            DefinitionItem::Rule(def) => &def.extra,
            DefinitionItem::CapabilityTemplate(def) => &def.extra,
            DefinitionItem::Workflow(def) => &def.extra,
        }
    }
}

/// An executable step definition
#[derive(Debug, Deserialize)]
pub struct AtomicNodeDef {
    /// Node URI (absolute or CURIE)
    pub uri: String,
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
    /// Free-text description
    #[serde(default)]
    pub description: Option<String>,
    /// Input parameters, in declared order
    #[serde(default)]
    pub inputs: Vec<ParameterDef>,
    /// Output parameters, in declared order
    #[serde(default)]
    pub outputs: Vec<ParameterDef>,
    /// SPARQL ASK preconditions over `?ctx`
    #[serde(default)]
    pub preconditions: Vec<String>,
    /// Declarative effects used for goal regression
    #[serde(default)]
    pub effects: Vec<EffectDef>,
    /// How the node is invoked
    pub invocation: InvocationDef,
    /// Capability this node claims to implement
    #[serde(default)]
    pub implements_capability: Option<CapabilityClaim>,
    /// Whether the script touches the world outside the graph
    #[serde(default)]
    pub has_external_side_effect: bool,
    #[serde(flatten)]
    #[doc(hidden)]
    pub extra: BTreeMap<String, Value>,
}

/// An input or output parameter
#[derive(Debug, Deserialize)]
pub struct ParameterDef {
    /// Name, unique within the node
    pub name: String,
    /// Property the value is read from / written to, relative to `?ctx`
    pub maps_to_rdf_property: String,
    /// XSD short name ("integer") or datatype/class URI
    #[serde(default)]
    pub data_type: Option<String>,
    /// Required flag; inputs default true, outputs default false
    #[serde(default)]
    pub is_required: Option<bool>,
    #[serde(flatten)]
    #[doc(hidden)]
    pub extra: BTreeMap<String, Value>,
}

/// A declarative effect statement
#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum EffectDef {
    /// The node asserts `property` on an entity
    AssertProperty {
        /// Target entity ("ctx" or a URI); defaults to the operating context
        #[serde(default)]
        on_entity: Option<String>,
        /// Property URI being asserted
        property: String,
        /// Output parameter that supplies the value
        #[serde(default)]
        value_from_output: Option<String>,
    },
    /// The node creates a new entity
    CreateEntity {
        /// Class URI of the created entity
        entity_type: String,
        /// Entity the new one hangs off, when declared
        #[serde(default)]
        on_entity: Option<String>,
    },
    /// The node links two entities
    AddLink {
        /// Link property URI
        property: String,
        /// Source entity ("ctx" or a URI); defaults to the operating context
        #[serde(default)]
        on_entity: Option<String>,
    },
}

/// How a node is invoked
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum InvocationDef {
    /// Spawn an external script
    SubprocessScript {
        /// Script path, relative to the defining document
        script_path: String,
        /// CLI argument style
        #[serde(default)]
        argument_passing_style: ArgumentStyle,
        /// Output parsing style
        #[serde(default)]
        output_parsing_style: OutputStyle,
        /// Per-node timeout override, seconds
        #[serde(default)]
        timeout_seconds: Option<u64>,
    },
    /// Run a stored SPARQL update against the graph
    SparqlUpdate {
        /// The update text
        update: String,
    },
}

/// Subprocess argument passing styles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ArgumentStyle {
    /// `--name value` pairs
    #[default]
    #[serde(rename = "NamedCLI")]
    NamedCli,
    /// Bare values in declared order
    #[serde(rename = "PositionalCLI")]
    PositionalCli,
}

/// Subprocess output parsing styles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum OutputStyle {
    /// A single JSON object on stdout
    #[default]
    #[serde(rename = "JSONStdout")]
    JsonStdout,
}

/// A node's claim to implement a capability template
#[derive(Debug, Deserialize)]
pub struct CapabilityClaim {
    /// Capability template URI
    pub capability: String,
    /// Template parameter name to node parameter name
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
}

/// A graph rewrite rule definition
#[derive(Debug, Deserialize)]
pub struct RuleDef {
    /// Rule URI
    pub uri: String,
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
    /// Free-text description
    #[serde(default)]
    pub description: Option<String>,
    /// SPARQL WHERE pattern (ASK, SELECT, or bare pattern)
    pub antecedent: String,
    /// SPARQL UPDATE template with `?var` placeholders
    pub consequent: String,
    /// Higher fires first
    #[serde(default)]
    pub priority: i64,
    /// Whether a consequent failure aborts the solve
    #[serde(default)]
    pub critical: bool,
    #[serde(flatten)]
    #[doc(hidden)]
    pub extra: BTreeMap<String, Value>,
}

/// An abstract I/O signature definition
#[derive(Debug, Deserialize)]
pub struct CapabilityTemplateDef {
    /// Template URI
    pub uri: String,
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
    /// Abstract input names
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Abstract output names
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(flatten)]
    #[doc(hidden)]
    pub extra: BTreeMap<String, Value>,
}

/// A linear workflow definition
#[derive(Debug, Deserialize)]
pub struct WorkflowDef {
    /// Workflow URI
    pub uri: String,
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
    /// Ordered steps
    pub steps: Vec<WorkflowStepDef>,
    #[serde(flatten)]
    #[doc(hidden)]
    pub extra: BTreeMap<String, Value>,
}

/// One workflow step
#[derive(Debug, Deserialize)]
pub struct WorkflowStepDef {
    /// Node URI this step executes
    pub node: String,
    /// Explicit order; defaults to list position
    #[serde(default)]
    pub order: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    prefixes: BTreeMap<String, String>,
    #[serde(default)]
    items: Vec<Value>,
}

impl DefinitionDocument {
    /// Parse a document from YAML text. An item without a `kind`, or with an
    /// unrecognized one, aborts the parse.
    pub fn from_yaml_str(text: &str) -> DslResult<Self> {
        let raw: RawDocument = serde_yaml::from_str(text)?;
        let mut items = Vec::with_capacity(raw.items.len());
        for (index, item) in raw.items.into_iter().enumerate() {
            items.push(Self::parse_item(item, index)?);
        }
        Ok(Self {
            prefixes: raw.prefixes,
            items,
        })
    }

    fn parse_item(mut item: Value, index: usize) -> DslResult<DefinitionItem> {
        let mapping = item.as_mapping_mut().ok_or_else(|| {
            DslError::Definition(format!("item #{index} is not a mapping"))
        })?;
        let kind_key = Value::String("kind".to_string());
        let kind = mapping
            .remove(&kind_key)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| {
                DslError::Definition(format!("item #{index} is missing a 'kind' discriminator"))
            })?;
        match kind.as_str() {
            "AtomicNode" => Ok(DefinitionItem::AtomicNode(serde_yaml::from_value(item)?)),
            "Rule" => Ok(DefinitionItem::Rule(serde_yaml::from_value(item)?)),
            "CapabilityTemplate" => Ok(DefinitionItem::CapabilityTemplate(serde_yaml::from_value(
                item,
            )?)),
            "Workflow" => Ok(DefinitionItem::Workflow(serde_yaml::from_value(item)?)),
            other => Err(DslError::UnknownKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_node_with_defaults() {
        let doc = DefinitionDocument::from_yaml_str(
            r#"
prefixes:
  ex: "http://example.com/ns#"
items:
  - kind: AtomicNode
    uri: "ex:AddOne"
    label: "Add one"
    inputs:
      - name: x
        maps_to_rdf_property: "ex:in"
        data_type: integer
    outputs:
      - name: result
        maps_to_rdf_property: "ex:out"
        data_type: integer
    invocation:
      type: SubprocessScript
      script_path: scripts/add_one.sh
"#,
        )
        .unwrap();
        assert_eq!(doc.items.len(), 1);
        let DefinitionItem::AtomicNode(node) = &doc.items[0] else {
            panic!("expected an AtomicNode");
        };
        assert_eq!(node.inputs.len(), 1);
        assert!(node.inputs[0].is_required.is_none());
        match &node.invocation {
            InvocationDef::SubprocessScript {
                argument_passing_style,
                output_parsing_style,
                timeout_seconds,
                ..
            } => {
                assert_eq!(*argument_passing_style, ArgumentStyle::NamedCli);
                assert_eq!(*output_parsing_style, OutputStyle::JsonStdout);
                assert!(timeout_seconds.is_none());
            }
            other => panic!("unexpected invocation: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_aborts() {
        let err = DefinitionDocument::from_yaml_str(
            "items:\n  - kind: Gadget\n    uri: \"ex:g\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, DslError::UnknownKind(kind) if kind == "Gadget"));
    }

    #[test]
    fn missing_kind_aborts() {
        let err =
            DefinitionDocument::from_yaml_str("items:\n  - uri: \"ex:g\"\n").unwrap_err();
        assert!(matches!(err, DslError::Definition(_)));
    }

    #[test]
    fn unknown_fields_are_collected_not_dropped() {
        let doc = DefinitionDocument::from_yaml_str(
            r#"
items:
  - kind: Rule
    uri: "http://example.com/ns#r"
    antecedent: "ASK { ?s ?p ?o }"
    consequent: "INSERT DATA { <urn:a> <urn:b> <urn:c> }"
    frobnicate: true
"#,
        )
        .unwrap();
        assert_eq!(doc.items[0].extra_fields().len(), 1);
        assert!(doc.items[0].extra_fields().contains_key("frobnicate"));
    }
}
