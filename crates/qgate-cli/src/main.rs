//! qgate - quality-gate pipeline orchestrator CLI
//!
//! ## Commands
//!
//! - `run`: Run a policy profile across the toolchain matrix
//! - `plan`: Print the materialized plan without spawning anything
//! - `profiles`: List the available policy profiles
//!
//! Exit codes: 0 when the gate passes, 1 when it fails (or a tool is
//! missing), 2 on configuration errors.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, Level};

use qgate_ci::reporting::{render_markdown, render_text};
use qgate_ci::{
    init_tracing, CiGate, Orchestrator, OrchestratorConfig, PipelinePlan, PolicyProfile,
    ProcessExecutor, QgateError, QgateResult, StageSpec, TokioExecutor,
};

#[derive(Parser)]
#[command(name = "qgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Quality-gate pipeline orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a policy profile across the toolchain matrix
    Run(RunArgs),

    /// Show the stages and commands a run would execute
    Plan(PlanArgs),

    /// List available policy profiles
    Profiles,
}

/// Selection shared by `run` and `plan`.
#[derive(Args, Debug, Clone)]
struct SelectArgs {
    /// Policy profile (ci-strict, local-fix)
    #[arg(short, long)]
    profile: String,

    /// Toolchain to include in the matrix (repeatable; default: profile's set)
    #[arg(long = "toolchain", value_name = "ID")]
    toolchains: Vec<String>,

    /// Project root (default: QGATE_WORKSPACE or current directory)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Test runner (nextest, verbose)
    #[arg(long)]
    test_tool: Option<String>,

    /// Disable a stage by name (repeatable)
    #[arg(long = "skip", value_name = "STAGE")]
    skip: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Maximum configurations running at once (0 = all)
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Timeout override applied to every stage, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Keep running a configuration's stages after one fails
    #[arg(long)]
    no_fail_fast: bool,

    /// Stop sibling configurations once one fails
    #[arg(long)]
    cancel_on_failure: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,
}

#[derive(Args, Debug, Clone)]
struct PlanArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Plan format
    #[arg(long, value_enum, default_value_t = PlanFormat::Text)]
    format: PlanFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    Text,
    Json,
    Markdown,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum PlanFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run(args) => cmd_run(Arc::new(TokioExecutor::new()), &args).await,
        Commands::Plan(args) => cmd_plan(&args).map(|()| true),
        Commands::Profiles => cmd_profiles(cli.json).map(|()| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Configuration errors exit with 2; everything else fatal exits with 1.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<QgateError>() {
        Some(e) if e.is_configuration() => 2,
        _ => 1,
    }
}

/// Environment configuration with command-line overrides applied.
fn load_config(select: &SelectArgs) -> QgateResult<OrchestratorConfig> {
    let mut config = OrchestratorConfig::from_env()?;
    if let Some(workspace) = &select.workspace {
        config.workspace = workspace.clone();
    }
    if !select.toolchains.is_empty() {
        config.toolchains = select.toolchains.clone();
    }
    if let Some(tool) = &select.test_tool {
        config.test_tool = tool.parse()?;
    }
    Ok(config)
}

/// The profile's stages with every `--skip` stage disabled.
fn resolve_stages(
    profile: PolicyProfile,
    config: &OrchestratorConfig,
    skip: &[String],
) -> QgateResult<Vec<StageSpec>> {
    let mut stages = profile.stages(&config.profile_options());
    for name in skip {
        let stage = stages
            .iter_mut()
            .find(|s| &s.name == name)
            .ok_or_else(|| {
                QgateError::config(format!("unknown stage '{}' in profile '{}'", name, profile))
            })?;
        stage.enabled = false;
    }
    Ok(stages)
}

/// Run the selected profile and print the aggregate report. Returns whether the gate passed.
async fn cmd_run(executor: Arc<dyn ProcessExecutor>, args: &RunArgs) -> Result<bool> {
    let profile: PolicyProfile = args.select.profile.parse()?;

    let mut config = load_config(&args.select)?;
    if let Some(n) = args.max_parallel {
        config.max_parallel = n;
    }
    if let Some(secs) = args.timeout_secs {
        config.stage_timeout_secs = Some(secs);
    }
    if args.no_fail_fast {
        config.fail_fast = false;
    }
    if args.cancel_on_failure {
        config.cancel_on_failure = true;
    }
    debug!(?config, "Loaded configuration");

    let stages = resolve_stages(profile, &config, &args.select.skip)?;
    let orchestrator = Orchestrator::new(executor, config);
    let axes = orchestrator.default_axes(profile);

    let report = orchestrator.execute_stages(profile, &axes, stages).await?;
    let verdict = CiGate::evaluate(&report);

    match args.format {
        ReportFormat::Text => print!("{}", render_text(&report, &verdict)),
        ReportFormat::Markdown => print!("{}", render_markdown(&report, &verdict)),
        ReportFormat::Json => {
            println!("{}", report.to_json().context("Failed to serialize report")?)
        }
    }

    Ok(report.passed() && verdict.passed)
}

/// Materialize the plan and print it without spawning anything
fn cmd_plan(args: &PlanArgs) -> Result<()> {
    let plan = build_plan(&args.select)?;

    match args.format {
        PlanFormat::Json => {
            let json = serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?;
            println!("{}", json);
        }
        PlanFormat::Text => print!("{}", format_plan(&plan)),
    }
    Ok(())
}

fn build_plan(select: &SelectArgs) -> QgateResult<PipelinePlan> {
    let profile: PolicyProfile = select.profile.parse()?;
    let config = load_config(select)?;
    let stages = resolve_stages(profile, &config, &select.skip)?;
    let axes =
        Orchestrator::new(Arc::new(TokioExecutor::new()), config.clone()).default_axes(profile);
    PipelinePlan::build(profile, &axes, &stages, &config.pipeline_options())
}

fn format_plan(plan: &PipelinePlan) -> String {
    let mut out = String::new();
    out.push_str(&format!("Profile: {}\n", plan.profile));
    out.push_str(&format!("Plan: {}\n", plan.digest));
    out.push_str(&format!("Stages: {}\n", plan.stages.join(", ")));
    for configuration in &plan.configurations {
        out.push_str(&format!("\n[{}]\n", configuration));
        for entry in plan.entries_for(configuration) {
            out.push_str(&format!("  {:<14} {}\n", entry.stage, entry.invocation.command_line()));
        }
    }
    out
}

#[derive(Serialize)]
struct ProfileSummary {
    name: &'static str,
    description: &'static str,
    default_toolchains: Vec<String>,
    stages: Vec<String>,
}

/// List profiles with their stages and default toolchains
fn cmd_profiles(json: bool) -> Result<()> {
    let options = OrchestratorConfig::default().profile_options();
    let summaries: Vec<ProfileSummary> = PolicyProfile::ALL
        .iter()
        .map(|profile| ProfileSummary {
            name: profile.name(),
            description: profile.description(),
            default_toolchains: profile.default_toolchains(),
            stages: profile.stages(&options).into_iter().map(|s| s.name).collect(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    for summary in &summaries {
        println!("{}", summary.name);
        println!("  {}", summary.description);
        println!("  stages: {}", summary.stages.join(", "));
        if summary.default_toolchains.is_empty() {
            println!("  toolchains: (none, runs once)");
        } else {
            println!("  toolchains: {}", summary.default_toolchains.join(", "));
        }
    }
    Ok(())
}
