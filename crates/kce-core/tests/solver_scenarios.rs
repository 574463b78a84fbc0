//! End-to-end solver scenarios: catalogue + initial state + goal driven
//! through the full engine against real subprocess scripts.

use std::time::Duration;

use kce_core::{Engine, EngineConfig, ExecutionMode, FailureReason, RunOutcome};
use kce_dsl::{InitialStateDocument, TargetDescription};
use kce_knowledge::vocab;
use kce_test_utils::{write_defs, ScriptDir};

const EX: &str = "http://example.com/ns#";

fn engine() -> Engine {
    Engine::new(EngineConfig::ephemeral()).unwrap()
}

fn initial_state_with_in(value: i64) -> InitialStateDocument {
    InitialStateDocument::from_json_str(&format!(
        r#"{{
            "entities": [{{
                "uri": "c1",
                "properties": {{
                    "{EX}in": {{"value": {value}, "type": "http://www.w3.org/2001/XMLSchema#integer"}}
                }}
            }}]
        }}"#
    ))
    .unwrap()
}

fn context_iri(run_id: &str) -> String {
    format!("{}{run_id}/instance/c1", vocab::KCE_RUN_NS)
}

fn add_one_defs(script_name: &str) -> String {
    format!(
        r#"
prefixes:
  ex: "{EX}"
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
    preconditions:
      - "ASK {{ ?ctx ex:in ?v }}"
    effects:
      - kind: AssertProperty
        property: "ex:out"
        value_from_output: result
    invocation:
      type: SubprocessScript
      script_path: {script_name}
"#
    )
}

#[tokio::test]
async fn scenario_simple_chain() {
    let scripts = ScriptDir::new();
    scripts.add_increment("add_one.sh", "result");
    write_defs(scripts.path(), "defs.yaml", &add_one_defs("add_one.sh"));

    let engine = engine();
    engine.load_definitions(scripts.path()).unwrap();

    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> 2 }}"));
    let report = engine
        .solve_problem(
            &target,
            &initial_state_with_in(1),
            Some("scenario-1".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();

    assert!(report.outcome.is_success(), "outcome: {:?}", report.outcome);
    assert_eq!(report.plan.len(), 1, "expected exactly one node execution");
    assert!(engine
        .store()
        .ask(&format!(
            "ASK {{ <{}> <{EX}out> 2 }}",
            context_iri("scenario-1")
        ))
        .unwrap());
    // The run resource records success.
    assert!(engine
        .store()
        .ask(&format!(
            "ASK {{ <{}scenario-1> <{}status> <{}Succeeded> }}",
            vocab::KCE_RUN_NS,
            vocab::KCE_NS,
            vocab::KCE_NS
        ))
        .unwrap());
}

#[tokio::test]
async fn scenario_rule_driven_replanning() {
    let scripts = ScriptDir::new();
    scripts.add_increment("add_one.sh", "result");
    let defs = add_one_defs("add_one.sh")
        + r#"  - kind: Rule
    uri: "ex:FlagLarge"
    antecedent: "?c ex:out ?v . FILTER(?v > 1)"
    consequent: "INSERT DATA { ?c ex:flag true }"
    priority: 5
"#;
    write_defs(scripts.path(), "defs.yaml", &defs);

    let engine = engine();
    engine.load_definitions(scripts.path()).unwrap();

    let target =
        TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> 2 . ?c <{EX}flag> true }}"));
    let report = engine
        .solve_problem(
            &target,
            &initial_state_with_in(1),
            Some("scenario-2".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();

    assert!(report.outcome.is_success(), "outcome: {:?}", report.outcome);
    assert_eq!(report.plan.len(), 1);
    assert!(engine
        .store()
        .ask(&format!(
            "ASK {{ <{}> <{EX}flag> true }}",
            context_iri("scenario-2")
        ))
        .unwrap());

    // Invariant: the rule fired exactly once for its unique binding set.
    let fired = engine
        .store()
        .query(&format!(
            "SELECT ?s WHERE {{ ?s <{}eventKind> <{}RuleFired> }}",
            vocab::KCE_NS,
            vocab::KCE_NS
        ))
        .unwrap()
        .into_rows();
    assert_eq!(fired.len(), 1);
}

#[tokio::test]
async fn scenario_rich_output_via_rdf_instructions() {
    let run_id = "scenario-3";
    let ctx = context_iri(run_id);
    let panel = "http://example.com/panel#P1";

    let scripts = ScriptDir::new();
    let payload: serde_json::Value = serde_json::from_str(&format!(
        r#"{{
            "_rdf_instructions": {{
                "create_entities": [{{
                    "uri": "{panel}",
                    "type": "{EX}Panel",
                    "properties": {{
                        "{EX}width": 400,
                        "{EX}height": 2200,
                        "{EX}material": "steel"
                    }}
                }}],
                "add_links": [{{
                    "subject": "{ctx}",
                    "predicate": "{EX}hasPanel",
                    "object": "{panel}"
                }}]
            }}
        }}"#
    ))
    .unwrap();
    scripts.add_json("make_panel.sh", &payload);
    let defs = format!(
        r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:MakePanel"
    label: "Create a rear-wall panel"
    effects:
      - kind: CreateEntity
        entity_type: "ex:Panel"
      - kind: AddLink
        property: "ex:hasPanel"
    invocation:
      type: SubprocessScript
      script_path: make_panel.sh
"#
    );
    write_defs(scripts.path(), "defs.yaml", &defs);

    let engine = engine();
    engine.load_definitions(scripts.path()).unwrap();

    let initial = InitialStateDocument::from_json_str(&format!(
        r#"{{"entities": [{{"uri": "c1", "types": ["{EX}Assembly"]}}]}}"#
    ))
    .unwrap();
    let target = TargetDescription::from_json_str(&format!(
        r#"{{
            "prefixes": {{"ex": "{EX}"}},
            "pattern": [
                {{"subject": "?c", "predicate": "ex:hasPanel", "object": "?p"}},
                {{"subject": "?p", "predicate": "ex:width", "object": "400"}}
            ]
        }}"#
    ))
    .unwrap();

    let report = engine
        .solve_problem(&target, &initial, Some(run_id.to_string()), ExecutionMode::User)
        .await
        .unwrap();
    assert!(report.outcome.is_success(), "outcome: {:?}", report.outcome);

    // All three created properties are present.
    for (property, value) in [("width", "400"), ("height", "2200")] {
        assert!(
            engine
                .store()
                .ask(&format!("ASK {{ <{panel}> <{EX}{property}> {value} }}"))
                .unwrap(),
            "missing {property}"
        );
    }
    assert!(engine
        .store()
        .ask(&format!("ASK {{ <{panel}> <{EX}material> \"steel\" }}"))
        .unwrap());

    // wasGeneratedBy points at the NodeSucceeded state node, via the reified
    // statement and via the created subject.
    assert!(engine
        .store()
        .ask(&format!(
            "PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>\n\
             PREFIX prov: <http://www.w3.org/ns/prov#>\n\
             PREFIX kce: <{}>\n\
             ASK {{\n\
               ?stmt rdf:subject <{panel}> ;\n\
                     rdf:predicate <{EX}width> ;\n\
                     prov:wasGeneratedBy ?state .\n\
               ?state kce:eventKind kce:NodeSucceeded .\n\
             }}",
            vocab::KCE_NS
        ))
        .unwrap());
    assert!(engine
        .store()
        .ask(&format!(
            "PREFIX prov: <http://www.w3.org/ns/prov#>\n\
             PREFIX kce: <{}>\n\
             ASK {{ <{panel}> prov:wasGeneratedBy ?state .\n\
                    ?state kce:eventKind kce:NodeSucceeded }}",
            vocab::KCE_NS
        ))
        .unwrap());
}

#[tokio::test]
async fn scenario_script_failure() {
    let scripts = ScriptDir::new();
    scripts.add_failing("boom.sh", 2, "boom: invalid geometry");
    let defs = format!(
        r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:Exploder"
    effects:
      - kind: AssertProperty
        property: "ex:out"
    invocation:
      type: SubprocessScript
      script_path: boom.sh
"#
    );
    write_defs(scripts.path(), "defs.yaml", &defs);

    let engine = engine();
    engine.load_definitions(scripts.path()).unwrap();

    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> 99 }}"));
    let initial = InitialStateDocument::from_json_str(&format!(
        r#"{{"entities": [{{"uri": "c1", "types": ["{EX}Assembly"]}}]}}"#
    ))
    .unwrap();
    let report = engine
        .solve_problem(
            &target,
            &initial,
            Some("scenario-4".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();

    match &report.outcome {
        RunOutcome::Failed {
            reason: FailureReason::Execution(message),
            last_state,
        } => {
            assert!(message.contains("exited with 2"), "message: {message}");
            assert!(last_state.is_some());
        }
        other => panic!("expected script-failure outcome, got {other:?}"),
    }

    // A NodeFailed state node captured stderr.
    let failed = engine
        .store()
        .query(&format!(
            "SELECT ?state ?detail WHERE {{\n\
             ?state <{}eventKind> <{}NodeFailed> ;\n\
                    <{}detail> ?detail }}",
            vocab::KCE_NS,
            vocab::KCE_NS,
            vocab::KCE_NS
        ))
        .unwrap()
        .into_rows();
    assert_eq!(failed.len(), 1);
    let detail = failed[0]["detail"].to_string();
    assert!(detail.contains("boom: invalid geometry"), "detail: {detail}");

    // No output triple is attributed to the failed execution.
    assert!(!engine
        .store()
        .ask(&format!(
            "PREFIX prov: <http://www.w3.org/ns/prov#>\n\
             PREFIX kce: <{}>\n\
             ASK {{ ?anything prov:wasGeneratedBy ?state .\n\
                    ?state kce:eventKind kce:NodeFailed }}",
            vocab::KCE_NS
        ))
        .unwrap());
}

#[tokio::test]
async fn scenario_no_progress() {
    let scripts = ScriptDir::new();
    scripts.add_json("noop.sh", &serde_json::json!({}));
    let defs = format!(
        r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:Unrelated"
    effects:
      - kind: AssertProperty
        property: "ex:unrelated"
    invocation:
      type: SubprocessScript
      script_path: noop.sh
"#
    );
    write_defs(scripts.path(), "defs.yaml", &defs);

    let engine = engine();
    engine.load_definitions(scripts.path()).unwrap();

    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}never> true }}"));
    let initial = InitialStateDocument::from_json_str(&format!(
        r#"{{"entities": [{{"uri": "c1", "types": ["{EX}Assembly"]}}]}}"#
    ))
    .unwrap();
    let report = engine
        .solve_problem(
            &target,
            &initial,
            Some("scenario-5".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            reason: FailureReason::NoProgress,
            ..
        }
    ));
    assert!(report.plan.is_empty());

    // No node was ever started; only planner decisions were recorded.
    assert!(!engine
        .store()
        .ask(&format!(
            "ASK {{ ?s <{}eventKind> <{}NodeStarted> }}",
            vocab::KCE_NS,
            vocab::KCE_NS
        ))
        .unwrap());
    assert!(engine
        .store()
        .ask(&format!(
            "ASK {{ ?s <{}eventKind> <{}PlannerDecision> }}",
            vocab::KCE_NS,
            vocab::KCE_NS
        ))
        .unwrap());
}

#[tokio::test]
async fn scenario_cancellation_mid_subprocess() {
    let scripts = ScriptDir::new();
    scripts.add_sleeper("slow.sh", 30);
    let defs = format!(
        r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:Sleeper"
    effects:
      - kind: AssertProperty
        property: "ex:out"
    invocation:
      type: SubprocessScript
      script_path: slow.sh
"#
    );
    write_defs(scripts.path(), "defs.yaml", &defs);

    let mut config = EngineConfig::ephemeral();
    config.kill_grace = Duration::from_millis(300);
    let engine = Engine::new(config).unwrap();
    engine.load_definitions(scripts.path()).unwrap();

    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> 1 }}"));
    let initial = InitialStateDocument::from_json_str(&format!(
        r#"{{"entities": [{{"uri": "c1", "types": ["{EX}Assembly"]}}]}}"#
    ))
    .unwrap();

    let (run_id, cancel) = engine.prepare_run(Some("scenario-6".to_string()));
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let report = engine
        .solve(&target, &initial, &run_id, ExecutionMode::User, cancel)
        .await
        .unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "cancellation took too long: {:?}",
        started.elapsed()
    );

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            reason: FailureReason::Cancelled,
            ..
        }
    ));
    // The interrupted step left a NodeFailed state node behind.
    assert!(engine
        .store()
        .ask(&format!(
            "ASK {{ ?s <{}eventKind> <{}NodeFailed> }}",
            vocab::KCE_NS,
            vocab::KCE_NS
        ))
        .unwrap());
    assert!(engine
        .store()
        .ask(&format!(
            "ASK {{ <{}scenario-6> <{}failureReason> \"Cancelled\" }}",
            vocab::KCE_RUN_NS,
            vocab::KCE_NS
        ))
        .unwrap());
}

#[tokio::test]
async fn missing_required_input_fails_without_spawning() {
    let scripts = ScriptDir::new();
    // The script would create a marker file if it ever ran.
    let marker = scripts.path().join("spawned.marker");
    scripts.add(
        "touchy.sh",
        &format!("touch {}\necho '{{}}'", marker.display()),
    );
    let defs = format!(
        r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:Needy"
    inputs:
      - name: x
        maps_to_rdf_property: "ex:absent"
        data_type: integer
        is_required: true
    effects:
      - kind: AssertProperty
        property: "ex:out"
    invocation:
      type: SubprocessScript
      script_path: touchy.sh
"#
    );
    write_defs(scripts.path(), "defs.yaml", &defs);

    let engine = engine();
    engine.load_definitions(scripts.path()).unwrap();

    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> 1 }}"));
    let initial = InitialStateDocument::from_json_str(&format!(
        r#"{{"entities": [{{"uri": "c1", "types": ["{EX}Assembly"]}}]}}"#
    ))
    .unwrap();
    let report = engine
        .solve_problem(
            &target,
            &initial,
            Some("missing-input".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();

    assert!(!report.outcome.is_success());
    assert!(!marker.exists(), "subprocess must not be spawned");
    let failed = engine
        .store()
        .query(&format!(
            "SELECT ?detail WHERE {{\n\
             ?s <{}eventKind> <{}NodeFailed> ; <{}detail> ?detail }}",
            vocab::KCE_NS,
            vocab::KCE_NS,
            vocab::KCE_NS
        ))
        .unwrap()
        .into_rows();
    assert_eq!(failed.len(), 1);
    assert!(failed[0]["detail"].to_string().contains("Missing required input"));
}

#[tokio::test]
async fn depth_budget_boundary() {
    // Two-step chain: ZStepOne (in -> mid), AStepTwo (mid -> out).
    let chain_defs = |dir: &ScriptDir| {
        dir.add_increment("step_one.sh", "mid");
        dir.add_increment("step_two.sh", "result");
        format!(
            r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:ZStepOne"
    inputs:
      - name: x
        maps_to_rdf_property: "ex:in"
        data_type: integer
    outputs:
      - name: mid
        maps_to_rdf_property: "ex:mid"
        data_type: integer
    preconditions:
      - "ASK {{ ?ctx ex:in ?v }}"
    effects:
      - kind: AssertProperty
        property: "ex:mid"
    invocation:
      type: SubprocessScript
      script_path: step_one.sh
  - kind: AtomicNode
    uri: "ex:AStepTwo"
    inputs:
      - name: x
        maps_to_rdf_property: "ex:mid"
        data_type: integer
    outputs:
      - name: result
        maps_to_rdf_property: "ex:out"
        data_type: integer
    preconditions:
      - "ASK {{ ?ctx ex:mid ?v }}"
    effects:
      - kind: AssertProperty
        property: "ex:out"
    invocation:
      type: SubprocessScript
      script_path: step_two.sh
"#
        )
    };

    // Budget 2: the chain fits exactly, so the run succeeds at the limit.
    let scripts = ScriptDir::new();
    let defs = chain_defs(&scripts);
    write_defs(scripts.path(), "defs.yaml", &defs);
    let mut config = EngineConfig::ephemeral();
    config.depth_budget = 2;
    let engine = Engine::new(config).unwrap();
    engine.load_definitions(scripts.path()).unwrap();
    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> 3 }}"));
    let report = engine
        .solve_problem(
            &target,
            &initial_state_with_in(1),
            Some("budget-ok".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();
    assert!(report.outcome.is_success(), "outcome: {:?}", report.outcome);
    assert_eq!(report.plan.len(), 2);

    // Budget 1: the second selection is refused.
    let scripts = ScriptDir::new();
    let defs = chain_defs(&scripts);
    write_defs(scripts.path(), "defs.yaml", &defs);
    let mut config = EngineConfig::ephemeral();
    config.depth_budget = 1;
    let engine = Engine::new(config).unwrap();
    engine.load_definitions(scripts.path()).unwrap();
    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> 3 }}"));
    let report = engine
        .solve_problem(
            &target,
            &initial_state_with_in(1),
            Some("budget-short".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();
    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            reason: FailureReason::DepthExhausted,
            ..
        }
    ));
}

#[tokio::test]
async fn empty_json_output_succeeds_with_zero_writes() {
    let scripts = ScriptDir::new();
    scripts.add_json("quiet.sh", &serde_json::json!({}));
    let defs = format!(
        r#"
prefixes:
  ex: "{EX}"
items:
  - kind: AtomicNode
    uri: "ex:Quiet"
    effects:
      - kind: AssertProperty
        property: "ex:out"
    invocation:
      type: SubprocessScript
      script_path: quiet.sh
"#
    );
    write_defs(scripts.path(), "defs.yaml", &defs);

    let engine = engine();
    engine.load_definitions(scripts.path()).unwrap();

    // The node runs, writes nothing, and the planner gives up on the goal.
    let target = TargetDescription::from_ask(format!("ASK {{ ?c <{EX}out> 1 }}"));
    let initial = InitialStateDocument::from_json_str(&format!(
        r#"{{"entities": [{{"uri": "c1", "types": ["{EX}Assembly"]}}]}}"#
    ))
    .unwrap();
    let report = engine
        .solve_problem(
            &target,
            &initial,
            Some("quiet-run".to_string()),
            ExecutionMode::User,
        )
        .await
        .unwrap();

    assert!(!report.outcome.is_success());
    // The node itself succeeded with zero writes.
    let succeeded = engine
        .store()
        .query(&format!(
            "SELECT ?out WHERE {{\n\
             ?s <{}eventKind> <{}NodeSucceeded> ; <{}outputSnapshot> ?out }}",
            vocab::KCE_NS,
            vocab::KCE_NS,
            vocab::KCE_NS
        ))
        .unwrap()
        .into_rows();
    assert_eq!(succeeded.len(), 1);
    assert!(succeeded[0]["out"].to_string().contains("\\\"triples_written\\\":0"));
}
