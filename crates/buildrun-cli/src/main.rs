//! buildrun - run a project's build and report located diagnostics
//!
//! ## Commands
//!
//! - `run`: trigger one build and print the diagnostics it produced
//! - `check`: validate the project's build config and its matchers
//! - `match`: apply the project's matchers to a saved build log

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, Level};

use buildrun_core::{
    compile, match_output, spawn_coordinator, BuildRun, BuildRunCoordinator, BuildStatus,
    CompiledMatchers, ConfigProvider, Diagnostic, FileConfigProvider, MatchContext, MemorySink,
    ProjectConfig, TokioProcessRunner,
};

#[derive(Parser)]
#[command(name = "buildrun")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a project build and extract file-located diagnostics", long_about = None)]
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
    /// Run the build once and print its diagnostics
    Run {
        /// Project root containing .buildrun.json or .buildrun.toml
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Validate the build config and compile its matchers
    Check {
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },

    /// Apply the project's matchers to a saved build log
    Match {
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Build output to scan
        #[arg(short, long)]
        log: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    buildrun_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run { project, format } => cmd_run(&project, format).await,
        Commands::Check { project } => cmd_check(&project).await,
        Commands::Match {
            project,
            log,
            format,
        } => cmd_match(&project, &log, format).await,
    }
}

/// Summary of one build, as printed by `run --format json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport<'a> {
    run_id: u64,
    status: BuildStatus,
    exit_code: Option<i32>,
    duration_ms: Option<u64>,
    notice: Option<String>,
    diagnostics: &'a [Diagnostic],
}

impl<'a> RunReport<'a> {
    fn new(run: &BuildRun, diagnostics: &'a [Diagnostic]) -> Self {
        Self {
            run_id: run.run_id.0,
            status: run.status.into(),
            exit_code: run.exit_code,
            duration_ms: run.duration_ms(),
            notice: run.notice.as_ref().map(ToString::to_string),
            diagnostics,
        }
    }
}

/// Trigger one build and wait for it. Ctrl-C cancels the run.
async fn cmd_run(project: &Path, format: OutputFormat) -> Result<()> {
    let sink = Arc::new(MemorySink::new());
    let coordinator = BuildRunCoordinator::new(
        Arc::new(FileConfigProvider::new(project)),
        Arc::new(TokioProcessRunner::new()),
        sink.clone(),
    );
    let handle = spawn_coordinator(coordinator);

    let run_id = handle
        .trigger()
        .await
        .with_context(|| format!("Failed to start build in {:?}", project))?;
    debug!(%run_id, "Build started");

    let status = tokio::select! {
        status = handle.settled() => status,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, cancelling build");
            handle.cancel().await.context("Failed to cancel build")?;
            handle.settled().await
        }
    };
    debug!(%status, "Build settled");

    let run = handle
        .snapshot()
        .await?
        .context("Coordinator has no record of the build")?;
    let diagnostics = sink.messages();

    match format {
        OutputFormat::Text => println!("{}", render_run_text(&run, &diagnostics)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&RunReport::new(&run, &diagnostics))?
        ),
    }

    match run.error() {
        None => Ok(()),
        Some(err) => Err(err).context(format!("Build {} did not succeed", run.run_id)),
    }
}

/// Load, validate and compile without running anything.
async fn cmd_check(project: &Path) -> Result<()> {
    let config = load_project(project).await?;
    let build = config.validate().context("Invalid build config")?;
    let matchers = compile_project(&config);

    if let Some(origin) = &config.origin {
        println!("Config:   {}", origin.display());
    }
    println!("Command:  {}", build.command);
    if !build.args.is_empty() {
        println!("Args:     {}", build.args.join(" "));
    }
    println!("Cwd:      {}", build.cwd.display());
    println!("Shell:    {}", if build.shell { "yes" } else { "no" });
    if let Some(timeout) = build.timeout {
        println!("Timeout:  {}s", timeout.as_secs());
    }
    println!(
        "Matchers: {} compiled, {} rejected",
        matchers.len(),
        matchers.rejected.len()
    );
    for rejected in &matchers.rejected {
        println!("  - {}", rejected);
    }

    Ok(())
}

/// Scan a saved log with the project's matchers.
async fn cmd_match(project: &Path, log: &Path, format: OutputFormat) -> Result<()> {
    let config = load_project(project).await?;
    let build = config.validate().context("Invalid build config")?;
    let matchers = compile_project(&config);

    let bytes = tokio::fs::read(log)
        .await
        .with_context(|| format!("Failed to read build log: {:?}", log))?;
    let output = String::from_utf8_lossy(&bytes);

    let ctx = MatchContext::new(&build.cwd, build.default_file());
    let diagnostics = match_output(&output, &matchers.patterns, &ctx);

    match format {
        OutputFormat::Text => {
            if diagnostics.is_empty() {
                println!("No diagnostics found");
            }
            for diag in &diagnostics {
                println!("{}", diag);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&diagnostics)?),
    }
    Ok(())
}

async fn load_project(project: &Path) -> Result<ProjectConfig> {
    FileConfigProvider::new(project)
        .load()
        .await
        .with_context(|| format!("Failed to load build config from {:?}", project))
}

fn compile_project(config: &ProjectConfig) -> CompiledMatchers {
    let matchers = compile(
        config.raw.error_match.as_slice(),
        config.raw.warning_match.as_slice(),
    );
    for rejected in &matchers.rejected {
        buildrun_core::obs::emit_pattern_rejected(rejected);
    }
    matchers
}

fn render_run_text(run: &BuildRun, diagnostics: &[Diagnostic]) -> String {
    let mut lines: Vec<String> = diagnostics.iter().map(ToString::to_string).collect();
    if let Some(notice) = &run.notice {
        lines.push(format!("notice: {}", notice));
    }

    let verdict = match BuildStatus::from(run.status) {
        BuildStatus::Success => "✓ PASSED",
        BuildStatus::Error => "✗ FAILED",
        BuildStatus::None | BuildStatus::Running => "- CANCELLED",
    };
    lines.push(format!(
        "{} {} ({} diagnostics, {}ms)",
        run.run_id,
        verdict,
        diagnostics.len(),
        run.duration_ms().unwrap_or(0)
    ));
    lines.join("\n")
}
