//! `kce` - command-line front-end for the Knowledge-CAD-Engine.
//!
//! Exit codes: 0 success, 1 definition error, 2 planning failure,
//! 3 execution failure, 4 cancelled.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use kce_core::{
    CancelHandle, Engine, EngineConfig, ExecutionMode, FailureReason, RunOutcome,
};
use kce_dsl::{InitialStateDocument, TargetDescription};
use kce_knowledge::{vocab, QueryOutcome, StoreConfig};

const EXIT_DEFINITION: u8 = 1;
const EXIT_PLANNING: u8 = 2;
const EXIT_EXECUTION: u8 = 3;
const EXIT_CANCELLED: u8 = 4;

#[derive(Parser)]
#[command(name = "kce", version, about = "Knowledge-CAD-Engine: goal-directed solving over a semantic knowledge graph")]
struct Cli {
    /// Path to the durable knowledge store
    #[arg(long, global = true, default_value = "kce_store")]
    db: PathBuf,

    /// Use a volatile in-memory store instead of --db
    #[arg(long, global = true)]
    in_memory: bool,

    /// Root directory for human-readable run logs
    #[arg(long, global = true)]
    log_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize (or wipe and recreate) the knowledge store
    InitDb {
        /// Wipe an existing store without asking
        #[arg(long)]
        force: bool,
    },
    /// Load every definition document under a directory
    LoadDefs {
        /// Directory of *.yaml definition documents
        dir: PathBuf,
    },
    /// Solve a problem: search for and execute a plan until the goal holds
    SolveProblem {
        /// Target description document (JSON or YAML)
        #[arg(long)]
        target: PathBuf,
        /// Initial state document (JSON or YAML)
        #[arg(long)]
        initial_state: PathBuf,
        /// Run identifier; generated when omitted
        #[arg(long)]
        run_id: Option<String>,
        /// Execution mode
        #[arg(long, value_enum, default_value_t = ModeArg::User)]
        mode: ModeArg,
        /// Override the planner depth budget
        #[arg(long)]
        depth_budget: Option<usize>,
        /// Wall-clock limit for the whole run, seconds
        #[arg(long)]
        run_timeout: Option<u64>,
    },
    /// Run a SPARQL query against the store
    Query {
        /// The query text
        sparql: String,
    },
    /// Export the default graph as Turtle
    Export,
    /// Print the human-readable log of a run
    ShowLog {
        /// The run identifier
        run_id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    User,
    Expert,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::User => ExecutionMode::User,
            ModeArg::Expert => ExecutionMode::Expert,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(classify(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::InitDb { force } => init_db(&cli.db, cli.in_memory, force),
        Command::LoadDefs { dir } => {
            let engine = build_engine(&cli, None, None)?;
            let triples = engine
                .load_definitions(&dir)
                .with_context(|| format!("loading definitions from {}", dir.display()))?;
            println!("Loaded {triples} catalogue triples from {}", dir.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::SolveProblem {
            target,
            initial_state,
            run_id,
            mode,
            depth_budget,
            run_timeout,
        } => {
            let engine = build_engine(&cli, depth_budget, run_timeout)?;
            solve(engine, &target, &initial_state, run_id, mode.into()).await
        }
        Command::Query { sparql } => {
            let engine = build_engine(&cli, None, None)?;
            print_query(&engine, &sparql)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Export => {
            let engine = build_engine(&cli, None, None)?;
            let mut out = Vec::new();
            engine.store().dump_turtle(&mut out)?;
            print!("{}", String::from_utf8_lossy(&out));
            Ok(ExitCode::SUCCESS)
        }
        Command::ShowLog { run_id } => {
            let engine = build_engine(&cli, None, None)?;
            show_log(&engine, &run_id).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_engine(
    cli: &Cli,
    depth_budget: Option<usize>,
    run_timeout: Option<u64>,
) -> Result<Engine> {
    let mut config = EngineConfig {
        store: if cli.in_memory {
            StoreConfig::Memory
        } else {
            StoreConfig::Disk(cli.db.clone())
        },
        ..EngineConfig::default()
    };
    config.blob_root = cli.log_root.clone().or_else(|| {
        (!cli.in_memory).then(|| cli.db.with_file_name(default_log_dir_name(&cli.db)))
    });
    if let Some(budget) = depth_budget {
        config.depth_budget = budget;
    }
    if let Some(seconds) = run_timeout {
        config.run_timeout = Some(Duration::from_secs(seconds));
    }
    Engine::new(config).context("assembling engine")
}

fn default_log_dir_name(db: &Path) -> String {
    let stem = db
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "kce_store".to_string());
    format!("{stem}_logs")
}

fn init_db(db: &Path, in_memory: bool, force: bool) -> Result<ExitCode> {
    if in_memory {
        println!("In-memory store requested; nothing to initialize.");
        return Ok(ExitCode::SUCCESS);
    }
    if db.exists() {
        if !force {
            anyhow::bail!(
                "store at {} already exists; pass --force to wipe it",
                db.display()
            );
        }
        std::fs::remove_dir_all(db)
            .with_context(|| format!("wiping store at {}", db.display()))?;
    }
    let _ = kce_knowledge::KnowledgeStore::on_disk(db)?;
    println!("Initialized knowledge store at {}", db.display());
    Ok(ExitCode::SUCCESS)
}

async fn solve(
    engine: Engine,
    target_path: &Path,
    initial_path: &Path,
    run_id: Option<String>,
    mode: ExecutionMode,
) -> Result<ExitCode> {
    let target = read_target(target_path)?;
    let initial = read_initial_state(initial_path)?;

    let (run_id, cancel) = engine.prepare_run(run_id);
    spawn_ctrl_c_handler(cancel.clone());

    let report = engine
        .solve(&target, &initial, &run_id, mode, cancel)
        .await
        .context("solving problem")?;

    match &report.outcome {
        RunOutcome::Succeeded => {
            println!(
                "Run {} succeeded after {} step(s).",
                report.run_id,
                report.plan.len()
            );
            for (index, op) in report.plan.iter().enumerate() {
                println!("  {}. [{}] {}", index + 1, op.kind(), op.uri().as_str());
            }
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Failed { reason, .. } => {
            println!("Run {} failed: {reason:?}", report.run_id);
            let code = match reason {
                FailureReason::Cancelled => EXIT_CANCELLED,
                FailureReason::Execution(_) => EXIT_EXECUTION,
                FailureReason::NoProgress
                | FailureReason::DepthExhausted
                | FailureReason::RevisitedFailedState => EXIT_PLANNING,
            };
            Ok(ExitCode::from(code))
        }
    }
}

fn spawn_ctrl_c_handler(cancel: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });
}

fn read_target(path: &Path) -> Result<TargetDescription> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading target {}", path.display()))?;
    let target = if is_json(path) {
        TargetDescription::from_json_str(&text)
    } else {
        TargetDescription::from_yaml_str(&text)
    }?;
    Ok(target)
}

fn read_initial_state(path: &Path) -> Result<InitialStateDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading initial state {}", path.display()))?;
    let doc = if is_json(path) {
        InitialStateDocument::from_json_str(&text)
    } else {
        InitialStateDocument::from_yaml_str(&text)
    }?;
    Ok(doc)
}

fn is_json(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("jsonld")
    )
}

fn print_query(engine: &Engine, sparql: &str) -> Result<()> {
    match engine.store().query(sparql)? {
        QueryOutcome::Boolean(value) => println!("{value}"),
        QueryOutcome::Solutions(rows) => {
            if rows.is_empty() {
                println!("(no results)");
                return Ok(());
            }
            let mut vars: Vec<&String> = rows[0].keys().collect();
            vars.sort();
            println!("{}", vars.iter().map(|v| v.as_str()).collect::<Vec<_>>().join("\t"));
            for row in &rows {
                let line: Vec<String> = vars
                    .iter()
                    .map(|v| row.get(*v).map_or(String::new(), |t| t.to_string()))
                    .collect();
                println!("{}", line.join("\t"));
            }
        }
        QueryOutcome::Graph(triples) => {
            for triple in triples {
                println!("{triple} .");
            }
        }
    }
    Ok(())
}

async fn show_log(engine: &Engine, run_id: &str) -> Result<()> {
    let run_uri = format!("{}{run_id}", vocab::KCE_RUN_NS);
    let rows = engine
        .store()
        .query(&format!(
            "{}SELECT ?status ?started ?ended ?reason WHERE {{\n\
             <{run_uri}> kce:status ?status ; kce:startedAt ?started .\n\
             OPTIONAL {{ <{run_uri}> kce:endedAt ?ended }}\n\
             OPTIONAL {{ <{run_uri}> kce:failureReason ?reason }}\n\
             }}",
            vocab::SPARQL_PROLOGUE
        ))?
        .into_rows();
    match rows.first() {
        Some(row) => {
            println!("Run {run_id}");
            for key in ["status", "started", "ended", "reason"] {
                if let Some(term) = row.get(key) {
                    println!("  {key}: {term}");
                }
            }
        }
        None => {
            println!("Run {run_id} is not recorded in this store.");
            return Ok(());
        }
    }

    let refs = engine.sink().list_run(run_id).await?;
    if refs.is_empty() {
        println!("No human-readable payloads found (is --log-root correct?).");
    }
    for reference in refs {
        println!("--- {reference}");
        if let Some(payload) = engine.sink().load(&reference).await? {
            println!("{}", String::from_utf8_lossy(&payload));
        }
    }
    Ok(())
}

fn classify(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if let Some(core) = cause.downcast_ref::<kce_core::CoreError>() {
            return match core {
                kce_core::CoreError::Dsl(_) | kce_core::CoreError::Definition(_) => {
                    EXIT_DEFINITION
                }
                kce_core::CoreError::Planning(_) => EXIT_PLANNING,
                kce_core::CoreError::Cancelled => EXIT_CANCELLED,
                _ => EXIT_EXECUTION,
            };
        }
        if cause.downcast_ref::<kce_dsl::DslError>().is_some() {
            return EXIT_DEFINITION;
        }
    }
    EXIT_EXECUTION
}
