//! Namespace and term constants shared by every KCE crate.
//!
//! All engine-owned terms live under the `kce:` namespace; provenance links
//! reuse `prov:`. Constants are `NamedNodeRef` so they can be used in quad
//! patterns without allocation.

use oxigraph::model::NamedNodeRef;

/// Base IRI of the KCE core ontology
pub const KCE_NS: &str = "http://kce.dev/ontology/core#";

/// Base IRI for runtime execution resources
pub const KCE_RUN_NS: &str = "http://kce.dev/runs/";

/// W3C PROV namespace
pub const PROV_NS: &str = "http://www.w3.org/ns/prov#";

/// Standard SPARQL prologue bound to the namespaces above, prepended to
/// engine-generated queries.
pub const SPARQL_PROLOGUE: &str = "\
PREFIX kce: <http://kce.dev/ontology/core#>\n\
PREFIX prov: <http://www.w3.org/ns/prov#>\n\
PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>\n\
PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>\n\
PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>\n";

macro_rules! named {
    ($(#[$doc:meta])* $name:ident, $iri:expr) => {
        $(#[$doc])*
        pub const $name: NamedNodeRef<'static> = NamedNodeRef::new_unchecked($iri);
    };
}

// rdf / rdfs / owl terms not re-exported by oxigraph's vocab module
named!(RDF_TYPE, "http://www.w3.org/1999/02/22-rdf-syntax-ns#type");
named!(RDF_STATEMENT, "http://www.w3.org/1999/02/22-rdf-syntax-ns#Statement");
named!(RDF_SUBJECT, "http://www.w3.org/1999/02/22-rdf-syntax-ns#subject");
named!(RDF_PREDICATE, "http://www.w3.org/1999/02/22-rdf-syntax-ns#predicate");
named!(RDF_OBJECT, "http://www.w3.org/1999/02/22-rdf-syntax-ns#object");
named!(RDFS_LABEL, "http://www.w3.org/2000/01/rdf-schema#label");
named!(RDFS_COMMENT, "http://www.w3.org/2000/01/rdf-schema#comment");
named!(RDFS_SUB_CLASS_OF, "http://www.w3.org/2000/01/rdf-schema#subClassOf");
named!(RDFS_SUB_PROPERTY_OF, "http://www.w3.org/2000/01/rdf-schema#subPropertyOf");
named!(RDFS_DOMAIN, "http://www.w3.org/2000/01/rdf-schema#domain");
named!(RDFS_RANGE, "http://www.w3.org/2000/01/rdf-schema#range");
named!(OWL_INVERSE_OF, "http://www.w3.org/2002/07/owl#inverseOf");
named!(OWL_SYMMETRIC_PROPERTY, "http://www.w3.org/2002/07/owl#SymmetricProperty");
named!(OWL_TRANSITIVE_PROPERTY, "http://www.w3.org/2002/07/owl#TransitiveProperty");
named!(DCTERMS_DESCRIPTION, "http://purl.org/dc/terms/description");

// prov terms
named!(PROV_WAS_GENERATED_BY, "http://www.w3.org/ns/prov#wasGeneratedBy");
named!(PROV_USED, "http://www.w3.org/ns/prov#used");

// Catalogue classes
named!(ATOMIC_NODE, "http://kce.dev/ontology/core#AtomicNode");
named!(INPUT_PARAMETER, "http://kce.dev/ontology/core#InputParameter");
named!(OUTPUT_PARAMETER, "http://kce.dev/ontology/core#OutputParameter");
named!(RULE, "http://kce.dev/ontology/core#Rule");
named!(CAPABILITY_TEMPLATE, "http://kce.dev/ontology/core#CapabilityTemplate");
named!(WORKFLOW, "http://kce.dev/ontology/core#Workflow");
named!(WORKFLOW_STEP, "http://kce.dev/ontology/core#WorkflowStep");

// Catalogue properties: nodes and parameters
named!(HAS_INPUT_PARAMETER, "http://kce.dev/ontology/core#hasInputParameter");
named!(HAS_OUTPUT_PARAMETER, "http://kce.dev/ontology/core#hasOutputParameter");
named!(PARAMETER_NAME, "http://kce.dev/ontology/core#parameterName");
named!(PARAMETER_ORDER, "http://kce.dev/ontology/core#parameterOrder");
named!(MAPS_TO_RDF_PROPERTY, "http://kce.dev/ontology/core#mapsToRdfProperty");
named!(DATA_TYPE, "http://kce.dev/ontology/core#dataType");
named!(IS_REQUIRED, "http://kce.dev/ontology/core#isRequired");
named!(HAS_PRECONDITION, "http://kce.dev/ontology/core#hasPrecondition");
named!(HAS_EXTERNAL_SIDE_EFFECT, "http://kce.dev/ontology/core#hasExternalSideEffect");

// Catalogue properties: declarative effects
named!(HAS_EFFECT, "http://kce.dev/ontology/core#hasEffect");
named!(EFFECT_KIND, "http://kce.dev/ontology/core#effectKind");
named!(EFFECT_ASSERT_PROPERTY, "http://kce.dev/ontology/core#AssertProperty");
named!(EFFECT_CREATE_ENTITY, "http://kce.dev/ontology/core#CreateEntity");
named!(EFFECT_ADD_LINK, "http://kce.dev/ontology/core#AddLink");
named!(ON_ENTITY, "http://kce.dev/ontology/core#onEntity");
named!(EFFECT_PROPERTY, "http://kce.dev/ontology/core#effectProperty");
named!(VALUE_FROM_OUTPUT, "http://kce.dev/ontology/core#valueFromOutput");
named!(ENTITY_TYPE, "http://kce.dev/ontology/core#entityType");
named!(
    /// Placeholder IRI an effect uses to say "the operating context"
    CONTEXT_ENTITY,
    "http://kce.dev/ontology/core#ContextEntity"
);

// Catalogue properties: invocation specs
named!(HAS_INVOCATION_SPEC, "http://kce.dev/ontology/core#hasInvocationSpec");
named!(SUBPROCESS_SCRIPT_INVOCATION, "http://kce.dev/ontology/core#SubprocessScriptInvocation");
named!(SPARQL_UPDATE_INVOCATION, "http://kce.dev/ontology/core#SparqlUpdateInvocation");
named!(SCRIPT_PATH, "http://kce.dev/ontology/core#scriptPath");
named!(ARGUMENT_PASSING_STYLE, "http://kce.dev/ontology/core#argumentPassingStyle");
named!(NAMED_CLI, "http://kce.dev/ontology/core#NamedCli");
named!(POSITIONAL_CLI, "http://kce.dev/ontology/core#PositionalCli");
named!(OUTPUT_PARSING_STYLE, "http://kce.dev/ontology/core#outputParsingStyle");
named!(JSON_STDOUT, "http://kce.dev/ontology/core#JsonStdout");
named!(TIMEOUT_SECONDS, "http://kce.dev/ontology/core#timeoutSeconds");
named!(HAS_SPARQL_UPDATE_COMMAND, "http://kce.dev/ontology/core#hasSparqlUpdateCommand");

// Catalogue properties: rules
named!(HAS_ANTECEDENT, "http://kce.dev/ontology/core#hasAntecedent");
named!(HAS_CONSEQUENT, "http://kce.dev/ontology/core#hasConsequent");
named!(PRIORITY, "http://kce.dev/ontology/core#priority");
named!(IS_CRITICAL, "http://kce.dev/ontology/core#isCritical");

// Catalogue properties: capabilities and workflows
named!(IMPLEMENTS_CAPABILITY, "http://kce.dev/ontology/core#implementsCapability");
named!(CAPABILITY_NAME, "http://kce.dev/ontology/core#capabilityName");
named!(CAPABILITY_INPUT, "http://kce.dev/ontology/core#capabilityInput");
named!(CAPABILITY_OUTPUT, "http://kce.dev/ontology/core#capabilityOutput");
named!(MAPS_CAPABILITY_NAME, "http://kce.dev/ontology/core#mapsCapabilityName");
named!(HAS_STEP, "http://kce.dev/ontology/core#hasStep");
named!(EXECUTES_NODE, "http://kce.dev/ontology/core#executesNode");
named!(STEP_ORDER, "http://kce.dev/ontology/core#stepOrder");

// Runtime classes and properties
named!(EXECUTION_RUN, "http://kce.dev/ontology/core#ExecutionRun");
named!(EXECUTION_STATE_NODE, "http://kce.dev/ontology/core#ExecutionStateNode");
named!(RUN_ID, "http://kce.dev/ontology/core#runId");
named!(STARTED_AT, "http://kce.dev/ontology/core#startedAt");
named!(ENDED_AT, "http://kce.dev/ontology/core#endedAt");
named!(STATUS, "http://kce.dev/ontology/core#status");
named!(STATUS_RUNNING, "http://kce.dev/ontology/core#Running");
named!(STATUS_SUCCEEDED, "http://kce.dev/ontology/core#Succeeded");
named!(STATUS_FAILED, "http://kce.dev/ontology/core#Failed");
named!(GOAL, "http://kce.dev/ontology/core#goal");
named!(WORKFLOW_CONTEXT, "http://kce.dev/ontology/core#workflowContext");
named!(FAILURE_REASON, "http://kce.dev/ontology/core#failureReason");
named!(TIMESTAMP, "http://kce.dev/ontology/core#timestamp");
named!(EVENT_KIND, "http://kce.dev/ontology/core#eventKind");
named!(EVENT_NODE_STARTED, "http://kce.dev/ontology/core#NodeStarted");
named!(EVENT_NODE_SUCCEEDED, "http://kce.dev/ontology/core#NodeSucceeded");
named!(EVENT_NODE_FAILED, "http://kce.dev/ontology/core#NodeFailed");
named!(EVENT_RULE_FIRED, "http://kce.dev/ontology/core#RuleFired");
named!(EVENT_PLANNER_DECISION, "http://kce.dev/ontology/core#PlannerDecision");
named!(EVENT_GOAL_REACHED, "http://kce.dev/ontology/core#GoalReached");
named!(OPERATION, "http://kce.dev/ontology/core#operation");
named!(PREVIOUS_STATE, "http://kce.dev/ontology/core#previousState");
named!(BELONGS_TO_RUN, "http://kce.dev/ontology/core#belongsToRun");
named!(INPUT_SNAPSHOT, "http://kce.dev/ontology/core#inputSnapshot");
named!(OUTPUT_SNAPSHOT, "http://kce.dev/ontology/core#outputSnapshot");
named!(HUMAN_READABLE_LOG, "http://kce.dev/ontology/core#humanReadableLog");
named!(DETAIL, "http://kce.dev/ontology/core#detail");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_within_the_kce_namespace() {
        for term in [ATOMIC_NODE, RULE, WORKFLOW, EXECUTION_RUN, EVENT_GOAL_REACHED] {
            assert!(term.as_str().starts_with(KCE_NS), "{term} outside kce ns");
        }
        assert!(PROV_WAS_GENERATED_BY.as_str().starts_with(PROV_NS));
    }
}
