//! Catalogue loader.
//!
//! Turns definition documents into normalized triples. Script paths are
//! resolved to absolute paths relative to the defining document and must
//! exist; SPARQL strings are parsed syntactically (with rule templates
//! probed through a dummy-binding substitution) before anything is stored.
//! A bulk load ends with a reasoning pass.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use oxigraph::model::{Literal, NamedNode, NamedNodeRef, Term, Triple};
use oxigraph::sparql::{Query, Update};
use tracing::{info, warn};

use kce_knowledge::vocab;
use kce_knowledge::KnowledgeStore;

use crate::documents::{
    ArgumentStyle, AtomicNodeDef, CapabilityTemplateDef, DefinitionDocument, DefinitionItem,
    EffectDef, InvocationDef, OutputStyle, ParameterDef, RuleDef, WorkflowDef,
};
use crate::error::DslError;
use crate::sparql::{ensure_ask, substitute_variables};
use crate::uri::UriResolver;
use crate::DslResult;

const PROBE_IRI: &str = "<urn:kce:probe>";

/// Loads definition documents into the knowledge layer.
pub struct CatalogLoader {
    store: Arc<KnowledgeStore>,
}

impl CatalogLoader {
    /// Create a loader over the given store
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }

    /// Load a single definition file. Triggers a reasoning pass afterwards.
    pub fn load_file(&self, path: impl AsRef<Path>) -> DslResult<usize> {
        let mut seen = HashSet::new();
        let count = self.load_file_inner(path.as_ref(), &mut seen)?;
        self.store.reason()?;
        Ok(count)
    }

    /// Load every `*.yaml` / `*.yml` file under `dir` (sorted for
    /// determinism), then trigger a reasoning pass. Duplicate URIs across
    /// the whole load are rejected.
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> DslResult<usize> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            warn!(dir = %dir.display(), "no definition files found");
        }
        // Compile everything before writing anything: a bad document aborts
        // the whole load with the store untouched.
        let mut seen = HashSet::new();
        let mut batch = Vec::new();
        for path in &paths {
            batch.extend(self.compile_file(path, &mut seen)?);
        }
        let total = self.store.add_triples(batch, None)?;
        info!(dir = %dir.display(), files = paths.len(), triples = total, "definitions loaded");
        self.store.reason()?;
        Ok(total)
    }

    fn load_file_inner(&self, path: &Path, seen: &mut HashSet<String>) -> DslResult<usize> {
        let triples = self.compile_file(path, seen)?;
        let count = self.store.add_triples(triples, None)?;
        info!(path = %path.display(), triples = count, "definitions loaded");
        Ok(count)
    }

    fn compile_file(&self, path: &Path, seen: &mut HashSet<String>) -> DslResult<Vec<Triple>> {
        let text = std::fs::read_to_string(path)?;
        let document = DefinitionDocument::from_yaml_str(&text)?;
        let doc_dir = path.parent().unwrap_or_else(|| Path::new("."));
        compile_document(&document, doc_dir, seen)
    }

    /// Compile a document without touching the store. Exposed for tests and
    /// for callers that batch loads themselves.
    pub fn compile(
        &self,
        document: &DefinitionDocument,
        document_dir: &Path,
    ) -> DslResult<Vec<Triple>> {
        let mut seen = HashSet::new();
        compile_document(document, document_dir, &mut seen)
    }
}

fn compile_document(
    document: &DefinitionDocument,
    document_dir: &Path,
    seen: &mut HashSet<String>,
) -> DslResult<Vec<Triple>> {
    let resolver = UriResolver::new(&document.prefixes);
    let mut triples = Vec::new();
    for item in &document.items {
        let uri = resolver.resolve(item.uri())?;
        if !seen.insert(uri.as_str().to_string()) {
            return Err(DslError::DuplicateUri(uri.as_str().to_string()));
        }
        for field in item.extra_fields().keys() {
            warn!(item = uri.as_str(), field, "ignoring unknown definition field");
        }
        match item {
            DefinitionItem::AtomicNode(def) => {
                compile_node(def, &uri, &resolver, document_dir, &mut triples)?
            }
            DefinitionItem::Rule(def) => compile_rule(def, &uri, &resolver, &mut triples)?,
            DefinitionItem::CapabilityTemplate(def) => {
                compile_capability(def, &uri, &mut triples)
            }
            DefinitionItem::Workflow(def) => {
                compile_workflow(def, &uri, &resolver, &mut triples)?
            }
        }
    }
    Ok(triples)
}

fn push(triples: &mut Vec<Triple>, s: &NamedNode, p: NamedNodeRef<'_>, o: impl Into<Term>) {
    triples.push(Triple::new(s.clone(), p.into_owned(), o));
}

fn compile_node(
    def: &AtomicNodeDef,
    uri: &NamedNode,
    resolver: &UriResolver,
    document_dir: &Path,
    triples: &mut Vec<Triple>,
) -> DslResult<()> {
    push(triples, uri, vocab::RDF_TYPE, vocab::ATOMIC_NODE.into_owned());
    if let Some(label) = &def.label {
        push(triples, uri, vocab::RDFS_LABEL, Literal::from(label.as_str()));
    }
    if let Some(description) = &def.description {
        push(
            triples,
            uri,
            vocab::DCTERMS_DESCRIPTION,
            Literal::from(description.as_str()),
        );
    }

    compile_parameters(&def.inputs, uri, "in", true, resolver, triples)?;
    compile_parameters(&def.outputs, uri, "out", false, resolver, triples)?;

    for precondition in &def.preconditions {
        let normalized = format!("{}{}", resolver.prologue(), ensure_ask(precondition));
        Query::parse(&normalized, None).map_err(|e| DslError::Sparql {
            context: format!("precondition of {}", uri.as_str()),
            message: e.to_string(),
        })?;
        if !precondition.contains("?ctx") && !precondition.contains("$ctx") {
            warn!(
                node = uri.as_str(),
                "precondition does not mention ?ctx; it will not bind the operating context"
            );
        }
        push(
            triples,
            uri,
            vocab::HAS_PRECONDITION,
            Literal::from(normalized.as_str()),
        );
    }

    for (index, effect) in def.effects.iter().enumerate() {
        compile_effect(effect, uri, index, resolver, triples)?;
    }

    compile_invocation(&def.invocation, uri, resolver, document_dir, triples)?;

    if let Some(claim) = &def.implements_capability {
        let capability = resolver.resolve(&claim.capability)?;
        push(triples, uri, vocab::IMPLEMENTS_CAPABILITY, capability);
        for (index, (template_name, node_name)) in claim.mappings.iter().enumerate() {
            let mapping = derived_uri(uri, &format!("capmap/{index}"))?;
            push(triples, uri, vocab::MAPS_CAPABILITY_NAME, mapping.clone());
            push(
                triples,
                &mapping,
                vocab::CAPABILITY_NAME,
                Literal::from(template_name.as_str()),
            );
            push(
                triples,
                &mapping,
                vocab::PARAMETER_NAME,
                Literal::from(node_name.as_str()),
            );
        }
    }

    push(
        triples,
        uri,
        vocab::HAS_EXTERNAL_SIDE_EFFECT,
        Literal::from(def.has_external_side_effect),
    );
    Ok(())
}

fn compile_parameters(
    params: &[ParameterDef],
    node: &NamedNode,
    direction: &str,
    is_input: bool,
    resolver: &UriResolver,
    triples: &mut Vec<Triple>,
) -> DslResult<()> {
    let mut names = HashSet::new();
    for (index, param) in params.iter().enumerate() {
        if !names.insert(param.name.as_str()) {
            return Err(DslError::Definition(format!(
                "parameter name '{}' is not unique within node {}",
                param.name,
                node.as_str()
            )));
        }
        let param_uri = derived_uri(node, &format!("{direction}/{}", param.name))?;
        let (link, class) = if is_input {
            (vocab::HAS_INPUT_PARAMETER, vocab::INPUT_PARAMETER)
        } else {
            (vocab::HAS_OUTPUT_PARAMETER, vocab::OUTPUT_PARAMETER)
        };
        push(triples, node, link, param_uri.clone());
        push(triples, &param_uri, vocab::RDF_TYPE, class.into_owned());
        push(
            triples,
            &param_uri,
            vocab::PARAMETER_NAME,
            Literal::from(param.name.as_str()),
        );
        push(
            triples,
            &param_uri,
            vocab::PARAMETER_ORDER,
            Literal::from(index as i64),
        );
        push(
            triples,
            &param_uri,
            vocab::MAPS_TO_RDF_PROPERTY,
            resolver.resolve(&param.maps_to_rdf_property)?,
        );
        if let Some(data_type) = &param.data_type {
            push(
                triples,
                &param_uri,
                vocab::DATA_TYPE,
                resolve_datatype(data_type, resolver)?,
            );
        }
        // Inputs are required unless opted out; outputs are optional unless
        // opted in.
        let required = param.is_required.unwrap_or(is_input);
        push(triples, &param_uri, vocab::IS_REQUIRED, Literal::from(required));
    }
    Ok(())
}

fn compile_effect(
    effect: &EffectDef,
    node: &NamedNode,
    index: usize,
    resolver: &UriResolver,
    triples: &mut Vec<Triple>,
) -> DslResult<()> {
    let effect_uri = derived_uri(node, &format!("effect/{index}"))?;
    push(triples, node, vocab::HAS_EFFECT, effect_uri.clone());

    let resolve_entity = |entity: &Option<String>| -> DslResult<NamedNode> {
        match entity.as_deref() {
            None | Some("ctx") => Ok(vocab::CONTEXT_ENTITY.into_owned()),
            Some(other) => resolver.resolve(other),
        }
    };

    match effect {
        EffectDef::AssertProperty {
            on_entity,
            property,
            value_from_output,
        } => {
            push(
                triples,
                &effect_uri,
                vocab::EFFECT_KIND,
                vocab::EFFECT_ASSERT_PROPERTY.into_owned(),
            );
            push(triples, &effect_uri, vocab::ON_ENTITY, resolve_entity(on_entity)?);
            push(
                triples,
                &effect_uri,
                vocab::EFFECT_PROPERTY,
                resolver.resolve(property)?,
            );
            if let Some(output) = value_from_output {
                push(
                    triples,
                    &effect_uri,
                    vocab::VALUE_FROM_OUTPUT,
                    Literal::from(output.as_str()),
                );
            }
        }
        EffectDef::CreateEntity {
            entity_type,
            on_entity,
        } => {
            push(
                triples,
                &effect_uri,
                vocab::EFFECT_KIND,
                vocab::EFFECT_CREATE_ENTITY.into_owned(),
            );
            push(triples, &effect_uri, vocab::ON_ENTITY, resolve_entity(on_entity)?);
            push(
                triples,
                &effect_uri,
                vocab::ENTITY_TYPE,
                resolver.resolve(entity_type)?,
            );
        }
        EffectDef::AddLink { property, on_entity } => {
            push(
                triples,
                &effect_uri,
                vocab::EFFECT_KIND,
                vocab::EFFECT_ADD_LINK.into_owned(),
            );
            push(triples, &effect_uri, vocab::ON_ENTITY, resolve_entity(on_entity)?);
            push(
                triples,
                &effect_uri,
                vocab::EFFECT_PROPERTY,
                resolver.resolve(property)?,
            );
        }
    }
    Ok(())
}

fn compile_invocation(
    invocation: &InvocationDef,
    node: &NamedNode,
    resolver: &UriResolver,
    document_dir: &Path,
    triples: &mut Vec<Triple>,
) -> DslResult<()> {
    let spec_uri = derived_uri(node, "invocation")?;
    push(triples, node, vocab::HAS_INVOCATION_SPEC, spec_uri.clone());

    match invocation {
        InvocationDef::SubprocessScript {
            script_path,
            argument_passing_style,
            output_parsing_style,
            timeout_seconds,
        } => {
            push(
                triples,
                &spec_uri,
                vocab::RDF_TYPE,
                vocab::SUBPROCESS_SCRIPT_INVOCATION.into_owned(),
            );
            let resolved = resolve_script_path(document_dir, script_path)?;
            push(
                triples,
                &spec_uri,
                vocab::SCRIPT_PATH,
                Literal::from(resolved.to_string_lossy().as_ref()),
            );
            let style = match argument_passing_style {
                ArgumentStyle::NamedCli => vocab::NAMED_CLI,
                ArgumentStyle::PositionalCli => vocab::POSITIONAL_CLI,
            };
            push(triples, &spec_uri, vocab::ARGUMENT_PASSING_STYLE, style.into_owned());
            let OutputStyle::JsonStdout = *output_parsing_style;
            push(
                triples,
                &spec_uri,
                vocab::OUTPUT_PARSING_STYLE,
                vocab::JSON_STDOUT.into_owned(),
            );
            if let Some(seconds) = timeout_seconds {
                push(
                    triples,
                    &spec_uri,
                    vocab::TIMEOUT_SECONDS,
                    Literal::from(*seconds as i64),
                );
            }
        }
        InvocationDef::SparqlUpdate { update } => {
            push(
                triples,
                &spec_uri,
                vocab::RDF_TYPE,
                vocab::SPARQL_UPDATE_INVOCATION.into_owned(),
            );
            let normalized = format!("{}{}", resolver.prologue(), update.trim());
            validate_update_template(&normalized).map_err(|message| DslError::Sparql {
                context: format!("update command of {}", node.as_str()),
                message,
            })?;
            push(
                triples,
                &spec_uri,
                vocab::HAS_SPARQL_UPDATE_COMMAND,
                Literal::from(normalized.as_str()),
            );
        }
    }
    Ok(())
}

fn compile_rule(
    def: &RuleDef,
    uri: &NamedNode,
    resolver: &UriResolver,
    triples: &mut Vec<Triple>,
) -> DslResult<()> {
    push(triples, uri, vocab::RDF_TYPE, vocab::RULE.into_owned());
    if let Some(label) = &def.label {
        push(triples, uri, vocab::RDFS_LABEL, Literal::from(label.as_str()));
    }
    if let Some(description) = &def.description {
        push(
            triples,
            uri,
            vocab::DCTERMS_DESCRIPTION,
            Literal::from(description.as_str()),
        );
    }

    let antecedent = normalize_antecedent(&def.antecedent, resolver);
    Query::parse(&antecedent, None).map_err(|e| DslError::Sparql {
        context: format!("antecedent of {}", uri.as_str()),
        message: e.to_string(),
    })?;
    push(triples, uri, vocab::HAS_ANTECEDENT, Literal::from(antecedent.as_str()));

    let consequent = format!("{}{}", resolver.prologue(), def.consequent.trim());
    validate_update_template(&consequent).map_err(|message| DslError::Sparql {
        context: format!("consequent of {}", uri.as_str()),
        message,
    })?;
    push(triples, uri, vocab::HAS_CONSEQUENT, Literal::from(consequent.as_str()));

    push(triples, uri, vocab::PRIORITY, Literal::from(def.priority));
    push(triples, uri, vocab::IS_CRITICAL, Literal::from(def.critical));
    Ok(())
}

fn compile_capability(def: &CapabilityTemplateDef, uri: &NamedNode, triples: &mut Vec<Triple>) {
    push(
        triples,
        uri,
        vocab::RDF_TYPE,
        vocab::CAPABILITY_TEMPLATE.into_owned(),
    );
    if let Some(label) = &def.label {
        push(triples, uri, vocab::RDFS_LABEL, Literal::from(label.as_str()));
    }
    for input in &def.inputs {
        push(triples, uri, vocab::CAPABILITY_INPUT, Literal::from(input.as_str()));
    }
    for output in &def.outputs {
        push(
            triples,
            uri,
            vocab::CAPABILITY_OUTPUT,
            Literal::from(output.as_str()),
        );
    }
}

fn compile_workflow(
    def: &WorkflowDef,
    uri: &NamedNode,
    resolver: &UriResolver,
    triples: &mut Vec<Triple>,
) -> DslResult<()> {
    push(triples, uri, vocab::RDF_TYPE, vocab::WORKFLOW.into_owned());
    if let Some(label) = &def.label {
        push(triples, uri, vocab::RDFS_LABEL, Literal::from(label.as_str()));
    }
    if def.steps.is_empty() {
        return Err(DslError::Definition(format!(
            "workflow {} has no steps",
            uri.as_str()
        )));
    }
    for (index, step) in def.steps.iter().enumerate() {
        let step_uri = derived_uri(uri, &format!("step/{index}"))?;
        push(triples, uri, vocab::HAS_STEP, step_uri.clone());
        push(
            triples,
            &step_uri,
            vocab::RDF_TYPE,
            vocab::WORKFLOW_STEP.into_owned(),
        );
        push(
            triples,
            &step_uri,
            vocab::EXECUTES_NODE,
            resolver.resolve(&step.node)?,
        );
        let order = step.order.unwrap_or(index as i64 + 1);
        push(triples, &step_uri, vocab::STEP_ORDER, Literal::from(order));
    }
    Ok(())
}

/// Validate an UPDATE template. Templates that are already valid SPARQL
/// (variables in INSERT/WHERE position) parse directly; ground-data
/// templates like `INSERT DATA { ?c ... }` only parse once the `?var`
/// placeholders are probed with a dummy IRI.
fn validate_update_template(template: &str) -> Result<(), String> {
    if Update::parse(template, None).is_ok() {
        return Ok(());
    }
    let probed = substitute_variables(template, |_| Some(PROBE_IRI.to_string()));
    Update::parse(&probed, None)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Deterministic sub-resource URI derived from a parent URI.
fn derived_uri(parent: &NamedNode, suffix: &str) -> DslResult<NamedNode> {
    NamedNode::new(format!("{}/{suffix}", parent.as_str()))
        .map_err(|e| DslError::InvalidUri(e.to_string()))
}

/// Resolve a script path against the defining document's directory and
/// require it to exist.
fn resolve_script_path(document_dir: &Path, script_path: &str) -> DslResult<PathBuf> {
    let raw = Path::new(script_path);
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        document_dir.join(raw)
    };
    let resolved = joined
        .canonicalize()
        .map_err(|_| DslError::ScriptNotFound(joined.to_string_lossy().into_owned()))?;
    if !resolved.is_file() {
        return Err(DslError::ScriptNotFound(
            resolved.to_string_lossy().into_owned(),
        ));
    }
    Ok(resolved)
}

fn normalize_antecedent(antecedent: &str, resolver: &UriResolver) -> String {
    let trimmed = antecedent.trim();
    let upper = trimmed.to_ascii_uppercase();
    let body = if upper.starts_with("ASK") || upper.starts_with("SELECT") {
        trimmed.to_string()
    } else {
        format!("SELECT * WHERE {{ {trimmed} }}")
    };
    format!("{}{}", resolver.prologue(), body)
}

fn resolve_datatype(data_type: &str, resolver: &UriResolver) -> DslResult<NamedNode> {
    let xsd = |local: &str| {
        NamedNode::new(format!("http://www.w3.org/2001/XMLSchema#{local}")).expect("valid xsd iri")
    };
    match data_type.to_ascii_lowercase().as_str() {
        "string" => Ok(xsd("string")),
        "integer" | "int" => Ok(xsd("integer")),
        "boolean" | "bool" => Ok(xsd("boolean")),
        "float" => Ok(xsd("float")),
        "double" => Ok(xsd("double")),
        "decimal" => Ok(xsd("decimal")),
        "datetime" => Ok(xsd("dateTime")),
        "date" => Ok(xsd("date")),
        "time" => Ok(xsd("time")),
        "anyuri" => Ok(xsd("anyURI")),
        _ => resolver.resolve(data_type),
    }
}
