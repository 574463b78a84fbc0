//! Planner-level behaviors beyond the seed scenarios: workflow preference,
//! opaque nodes, expert-mode oracles, stored-update invocations and re-run
//! reproducibility.

use std::sync::Arc;

use kce_core::{
    CandidateOracle, Engine, EngineConfig, ExecutionMode, OracleChoice, RunOutcome,
};
use kce_dsl::{InitialStateDocument, TargetDescription};
use kce_knowledge::vocab;
use kce_test_utils::{write_defs, ScriptDir};

const EX: &str = "http://example.com/ns#";

fn engine() -> Engine {
    Engine::new(EngineConfig::ephemeral()).unwrap()
}

fn assembly_initial() -> InitialStateDocument {
    InitialStateDocument::from_json_str(&format!(
        r#"{{"entities": [{{"uri": "c1", "types": ["{EX}Assembly"]}}]}}"#
    ))
    .unwrap()
}

/// Two nodes can both satisfy the goal; the workflow's step order must win
/// over URI order.
#[tokio::test]
async fn workflow_order_beats_uri_order() {
    let scripts = ScriptDir::new();
    scripts.add_json("by_alpha.sh", &serde_json::json!({"result": 1}));
    scripts.add_json("by_workflow.sh", &serde_json::json!({"result": 2}));
    let defs = format!(
        r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:AAlpha"
    outputs:
      - name: result
        maps_to_rdf_property: "ex:out"
        data_type: integer
    effects:
      - kind: AssertProperty
        property: "ex:out"
    invocation:
      type: SubprocessScript
      script_path: by_alpha.sh
  - kind: AtomicNode
    uri: "ex:ZOmega"
    outputs:
      - name: result
        maps_to_rdf_property: "ex:out"
        data_type: integer
    effects:
      - kind: AssertProperty
        property: "ex:out"
    invocation:
      type: SubprocessScript
      script_path: by_workflow.sh
  - kind: Workflow
    uri: "ex:Preferred"
    steps:
      - node: "ex:ZOmega"
        order: 1
"#
    );
    write_defs(scripts.path(), "defs.yaml", &defs);

    let engine = engine();
    engine.load_definitions(scripts.path()).unwrap();

    // Either node's output satisfies the goal; the workflow prefers ZOmega.
    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> ?v }}"));
    let report = engine
        .solve_problem(
            &target,
            &assembly_initial(),
            Some("wf-pref".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();

    assert!(report.outcome.is_success());
    assert_eq!(report.plan.len(), 1);
    assert_eq!(
        report.plan[0].uri().as_str(),
        format!("{EX}ZOmega"),
        "workflow-ordered node should run first"
    );
}

/// A node without declared effects is opaque: never selected on its own,
/// selected when a workflow names it.
#[tokio::test]
async fn opaque_nodes_require_a_workflow() {
    let make_defs = |with_workflow: bool| {
        let mut defs = format!(
            r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:Opaque"
    invocation:
      type: SparqlUpdate
      update: "INSERT DATA {{ ?ctx ex:out 7 }}"
"#
        );
        if with_workflow {
            defs.push_str(
                r#"  - kind: Workflow
    uri: "ex:Skeleton"
    steps:
      - node: "ex:Opaque"
        order: 1
"#,
            );
        }
        defs
    };

    // Without a workflow: no progress, the opaque node is never considered.
    let scripts = ScriptDir::new();
    write_defs(scripts.path(), "defs.yaml", &make_defs(false));
    let engine_without = engine();
    engine_without.load_definitions(scripts.path()).unwrap();
    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> 7 }}"));
    let report = engine_without
        .solve_problem(
            &target,
            &assembly_initial(),
            Some("opaque-no-wf".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();
    assert!(!report.outcome.is_success());
    assert!(report.plan.is_empty());

    // With a workflow naming it, the stored update runs against the context.
    let scripts = ScriptDir::new();
    write_defs(scripts.path(), "defs.yaml", &make_defs(true));
    let engine_with = engine();
    engine_with.load_definitions(scripts.path()).unwrap();
    let report = engine_with
        .solve_problem(
            &target,
            &assembly_initial(),
            Some("opaque-wf".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();
    assert!(report.outcome.is_success(), "outcome: {:?}", report.outcome);
    assert!(engine_with
        .store()
        .ask(&format!(
            "ASK {{ <{}opaque-wf/instance/c1> <{EX}out> 7 }}",
            vocab::KCE_RUN_NS
        ))
        .unwrap());
}

struct PickSecond;

#[async_trait::async_trait]
impl CandidateOracle for PickSecond {
    async fn choose(
        &self,
        candidates: &[oxigraph::model::NamedNode],
        _snapshot: &serde_json::Value,
    ) -> OracleChoice {
        OracleChoice::Pick(candidates.get(1).unwrap_or(&candidates[0]).clone())
    }
}

/// In expert mode a tie between equal-priority candidates goes to the
/// caller-provided oracle.
#[tokio::test]
async fn expert_mode_consults_the_oracle() {
    let scripts = ScriptDir::new();
    scripts.add_json("first.sh", &serde_json::json!({"result": 1}));
    scripts.add_json("second.sh", &serde_json::json!({"result": 2}));
    let defs = format!(
        r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:First"
    outputs:
      - name: result
        maps_to_rdf_property: "ex:out"
        data_type: integer
    effects:
      - kind: AssertProperty
        property: "ex:out"
    invocation:
      type: SubprocessScript
      script_path: first.sh
  - kind: AtomicNode
    uri: "ex:Second"
    outputs:
      - name: result
        maps_to_rdf_property: "ex:out"
        data_type: integer
    effects:
      - kind: AssertProperty
        property: "ex:out"
    invocation:
      type: SubprocessScript
      script_path: second.sh
"#
    );
    write_defs(scripts.path(), "defs.yaml", &defs);

    let engine = engine().with_oracle(Arc::new(PickSecond));
    engine.load_definitions(scripts.path()).unwrap();

    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> ?v }}"));
    let report = engine
        .solve_problem(
            &target,
            &assembly_initial(),
            Some("expert".to_string()),
            ExecutionMode::Expert,
        )
        .await
        .unwrap();

    assert!(report.outcome.is_success());
    assert_eq!(report.plan[0].uri().as_str(), format!("{EX}Second"));
}

/// Re-running a succeeded problem with the same catalogue and initial state
/// produces a goal-satisfying final graph again.
#[tokio::test]
async fn rerun_reproduces_a_goal_satisfying_graph() {
    let scripts = ScriptDir::new();
    scripts.add_increment("add_one.sh", "result");
    let defs = format!(
        r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:AddOne"
    inputs:
      - name: x
        maps_to_rdf_property: "ex:in"
        data_type: integer
    outputs:
      - name: result
        maps_to_rdf_property: "ex:out"
        data_type: integer
    preconditions:
      - "ASK {{ ?ctx ex:in ?v }}"
    effects:
      - kind: AssertProperty
        property: "ex:out"
    invocation:
      type: SubprocessScript
      script_path: add_one.sh
"#
    );
    write_defs(scripts.path(), "defs.yaml", &defs);

    let initial = InitialStateDocument::from_json_str(&format!(
        r#"{{
            "entities": [{{
                "uri": "c1",
                "properties": {{
                    "{EX}in": {{"value": 1, "type": "http://www.w3.org/2001/XMLSchema#integer"}}
                }}
            }}]
        }}"#
    ))
    .unwrap();
    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> 2 }}"));

    // A clean re-run: fresh store, same catalogue and initial state. The
    // plan may differ; the final graph must satisfy the goal both times.
    for run_id in ["rerun-a", "rerun-b"] {
        let engine = engine();
        engine.load_definitions(scripts.path()).unwrap();
        let report = engine
            .solve_problem(
                &target,
                &initial,
                Some(run_id.to_string()),
                ExecutionMode::User,
            )
            .await
            .unwrap();
        assert!(
            matches!(report.outcome, RunOutcome::Succeeded),
            "{run_id}: {:?}",
            report.outcome
        );
        assert!(engine
            .store()
            .ask(&format!(
                "ASK {{ <{}{run_id}/instance/c1> <{EX}out> 2 }}",
                vocab::KCE_RUN_NS
            ))
            .unwrap());
    }
}

/// Human-readable payloads land in the blob sink keyed by run and event.
#[tokio::test]
async fn human_readable_log_is_stored_and_linked() {
    let scripts = ScriptDir::new();
    scripts.add_increment("add_one.sh", "result");
    let defs = format!(
        r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:AddOne"
    inputs:
      - name: x
        maps_to_rdf_property: "ex:in"
        data_type: integer
    outputs:
      - name: result
        maps_to_rdf_property: "ex:out"
        data_type: integer
    effects:
      - kind: AssertProperty
        property: "ex:out"
    invocation:
      type: SubprocessScript
      script_path: add_one.sh
"#
    );
    write_defs(scripts.path(), "defs.yaml", &defs);

    let blob_root = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::ephemeral();
    config.blob_root = Some(blob_root.path().to_path_buf());
    let engine = Engine::new(config).unwrap();
    engine.load_definitions(scripts.path()).unwrap();

    let initial = InitialStateDocument::from_json_str(&format!(
        r#"{{
            "entities": [{{
                "uri": "c1",
                "properties": {{
                    "{EX}in": {{"value": 1, "type": "http://www.w3.org/2001/XMLSchema#integer"}}
                }}
            }}]
        }}"#
    ))
    .unwrap();
    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> 2 }}"));
    engine
        .solve_problem(
            &target,
            &initial,
            Some("blobbed".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();

    let refs = engine.sink().list_run("blobbed").await.unwrap();
    assert!(
        refs.len() >= 3,
        "expected planner + node events, got {}",
        refs.len()
    );
    let payload = engine.sink().load(&refs[0]).await.unwrap().unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(parsed["run_id"], "blobbed");

    // Every state node links its payload.
    let unlinked = engine
        .store()
        .query(&format!(
            "SELECT ?s WHERE {{\n\
             ?s a <{}ExecutionStateNode> .\n\
             FILTER NOT EXISTS {{ ?s <{}humanReadableLog> ?log }} }}",
            vocab::KCE_NS,
            vocab::KCE_NS
        ))
        .unwrap()
        .into_rows();
    assert!(unlinked.is_empty());
}
