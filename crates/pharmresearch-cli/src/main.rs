use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pharmresearch_core::{
    AgentRegistry, Config, ConfigLoader, ExtractiveModel, ModuleId, NodeStatus, ProgressEmitter,
    ReportFormat, ResearchOptions, ResearchRequest, SourceSet, SpecialistTimeouts, run_research,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pharmresearch-cli",
    version,
    about = "Multi-agent pharmaceutical research runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a research request and print the report.
    Run(RunArgs),
    /// List the selectable research modules and their specialists.
    Modules,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Molecule under investigation.
    #[arg(long)]
    molecule: String,

    /// Therapy area to assess the molecule in.
    #[arg(long)]
    therapy_area: String,

    /// Research goal handed to every specialist.
    #[arg(long, default_value = "Identify repurposing opportunities")]
    goal: String,

    /// Comma-separated module slugs (defaults to every module).
    #[arg(long, value_delimiter = ',')]
    modules: Vec<String>,

    /// Path to a TOML config file (falls back to PHARMRESEARCH_CONFIG, then pharmresearch.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured worker pool size.
    #[arg(long)]
    max_concurrency: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
    format: OutputFormat,

    /// Write the report here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Persist the execution trace as `<dir>/<run_id>.json`.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Skip appending to the run log.
    #[arg(long, default_value_t = false)]
    no_run_log: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Markdown,
    Json,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Markdown => ReportFormat::Markdown,
            OutputFormat::Json => ReportFormat::Json,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let config = ConfigLoader::load(args.config.clone())?;
            init_tracing(&config.logging.level);

            let rt = Runtime::new()?;
            rt.block_on(run_command(args, config))?;
        }
        Command::Modules => modules_command()?,
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},pharmresearch_core={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn modules_command() -> Result<()> {
    let registry = AgentRegistry::new(
        &SourceSet::mock(),
        Arc::new(ExtractiveModel::default()),
        SpecialistTimeouts::default(),
    )?;

    for specialist in registry.specialists() {
        let module = specialist.module();
        if !module.is_analysis() {
            continue;
        }
        println!(
            "{:<10} {:<20} {:<48} {}",
            module.as_str(),
            module.title(),
            specialist.role(),
            specialist.source_name().unwrap_or("-")
        );
    }
    Ok(())
}

async fn run_command(args: RunArgs, mut config: Config) -> Result<()> {
    let request = if args.modules.is_empty() {
        ResearchRequest::new(
            args.molecule,
            args.therapy_area,
            args.goal,
            ModuleId::ANALYSIS,
        )
    } else {
        ResearchRequest::from_slugs(args.molecule, args.therapy_area, args.goal, &args.modules)?
    };

    if let Some(max_concurrency) = args.max_concurrency {
        if max_concurrency == 0 {
            bail!("--max-concurrency must be at least 1");
        }
        config.orchestrator.max_concurrency = max_concurrency;
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling research run");
            ctrl_c.cancel();
        }
    });

    let progress = ProgressEmitter::new();
    let mut events = progress.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match event.status {
                    NodeStatus::Running => {
                        info!(task = %event.task_id, attempt = event.attempt, "running")
                    }
                    NodeStatus::Pending => {
                        info!(task = %event.task_id, detail = ?event.detail, "retry scheduled")
                    }
                    NodeStatus::Failed => {
                        warn!(task = %event.task_id, detail = ?event.detail, "unavailable")
                    }
                    status => info!(task = %event.task_id, %status, "finished"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress output lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let trace_dir = args.trace_dir.or_else(|| config.logging.trace_dir.clone());
    let run_log = (!args.no_run_log).then(|| config.run_log_settings().with_env_overrides());

    let mut options = ResearchOptions::new()
        .with_cancellation(cancel)
        .with_progress(progress);
    if let Some(dir) = trace_dir {
        options = options.with_trace_dir(dir);
    }
    if let Some(settings) = run_log {
        options = options.with_run_log(settings);
    }
    let options = options.with_config(config);

    let outcome = run_research(request, options).await?;
    info!(run_id = %outcome.run_id, duration_ms = outcome.duration_ms, "research run finished");
    if let Some(path) = &outcome.trace_path {
        info!(path = %path.display(), "trace persisted");
    }

    let Some(rendered) = outcome.render(args.format.into()) else {
        bail!("research run {} was cancelled; no report produced", outcome.run_id);
    };
    let rendered = rendered?;

    match args.output {
        Some(path) => {
            fs::write(&path, rendered)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{rendered}"),
    }

    Ok(())
}
