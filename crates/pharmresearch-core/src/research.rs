use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::aggregator::ResultAggregator;
use crate::config::Config;
use crate::context::ResearchContext;
use crate::error::ResearchError;
use crate::events::ProgressEmitter;
use crate::llm::LanguageModel;
use crate::logging::{RunLogInput, RunLogSettings, log_run_completion};
use crate::orchestrator::{Orchestrator, RunOutcome};
use crate::planner::{NodeStatus, TaskNode, TaskPlanner};
use crate::registry::AgentRegistry;
use crate::report::ReportFormat;
use crate::request::ResearchRequest;
use crate::sources::SourceSet;
use crate::trace::{TraceCollector, persist_trace};

fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4())
}

/// Options for a research run.
#[derive(Default)]
pub struct ResearchOptions {
    pub run_id: Option<String>,
    pub config: Config,
    /// Falls back to the bundled sample sources.
    pub sources: Option<SourceSet>,
    /// Overrides the model named in `config`.
    pub model: Option<Arc<dyn LanguageModel>>,
    pub cancel: CancellationToken,
    pub trace_dir: Option<PathBuf>,
    pub run_log: Option<RunLogSettings>,
    pub progress: Option<ProgressEmitter>,
}

impl ResearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_sources(mut self, sources: SourceSet) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = Some(dir.into());
        self
    }

    pub fn with_run_log(mut self, settings: RunLogSettings) -> Self {
        self.run_log = Some(settings);
        self
    }

    /// Publish node transitions on `progress`; subscribe before starting the run.
    pub fn with_progress(mut self, progress: ProgressEmitter) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Result of [`run_research`].
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub run_id: String,
    /// Final state of every node, report included
    pub nodes: Vec<TaskNode>,
    /// `None` when the run was cancelled.
    pub context: Option<ResearchContext>,
    pub trace_path: Option<PathBuf>,
    pub run_log_path: Option<PathBuf>,
    pub duration_ms: u64,
}

impl ResearchOutcome {
    pub fn is_cancelled(&self) -> bool {
        self.context.is_none()
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Render the report, or `None` for a cancelled run.
    pub fn render(&self, format: ReportFormat) -> Option<Result<String, ResearchError>> {
        self.context.as_ref().map(|context| format.render(context))
    }
}

/// Plan, execute and report a research request end to end.
pub async fn run_research(
    request: ResearchRequest,
    options: ResearchOptions,
) -> Result<ResearchOutcome, ResearchError> {
    let run_id = options.run_id.clone().unwrap_or_else(new_run_id);
    let span = info_span!("research.run", run_id = %run_id, molecule = %request.molecule());
    execute_run(run_id, request, options).instrument(span).await
}

async fn execute_run(
    run_id: String,
    request: ResearchRequest,
    options: ResearchOptions,
) -> Result<ResearchOutcome, ResearchError> {
    let ResearchOptions {
        config,
        sources,
        model,
        cancel,
        trace_dir,
        run_log,
        progress,
        ..
    } = options;

    let graph = TaskPlanner::new().plan(&request)?;
    let model = match model {
        Some(model) => model,
        None => config.language_model()?,
    };
    let sources = sources.unwrap_or_else(SourceSet::mock);
    let registry = Arc::new(AgentRegistry::new(
        &sources,
        model,
        config.specialist_timeouts(),
    )?);

    let progress = progress.unwrap_or_default();
    let mut trace_receiver = trace_dir.as_ref().map(|_| progress.subscribe());
    let orchestrator =
        Orchestrator::new(config.orchestrator_config(), registry).with_progress(progress);
    let aggregator = ResultAggregator::new(&request);
    let request = Arc::new(request);

    info!(modules = graph.len() - 1, "research run started");
    let report = orchestrator
        .execute(Arc::clone(&request), graph, &aggregator, cancel)
        .await?;

    let trace_path = match (trace_dir, trace_receiver.as_mut()) {
        (Some(dir), Some(receiver)) => {
            let mut collector = TraceCollector::new();
            collector.drain(receiver);
            Some(persist_trace(&dir, &run_id, collector.events())?)
        }
        _ => None,
    };

    let outcome_label = if report.is_cancelled() {
        "cancelled"
    } else {
        "completed"
    };
    let context = match report.outcome {
        RunOutcome::Completed(context) => Some(context),
        RunOutcome::Cancelled => None,
    };

    let run_log_path = run_log.and_then(|settings| {
        let input = RunLogInput {
            run_id: run_id.clone(),
            molecule: request.molecule().to_string(),
            therapy_area: request.therapy_area().to_string(),
            goal: request.goal().to_string(),
            outcome: outcome_label.to_string(),
            summary: context
                .as_ref()
                .and_then(ResearchContext::report)
                .map(|report| report.summary.clone()),
            unavailable_modules: report
                .nodes
                .iter()
                .filter(|node| node.status == NodeStatus::Failed)
                .map(|node| node.id.clone())
                .collect(),
            sources: context
                .as_ref()
                .and_then(ResearchContext::report)
                .map(|report| report.source_attribution.clone())
                .unwrap_or_default(),
            trace_path: trace_path.as_ref().map(|p| p.display().to_string()),
        };
        match log_run_completion(&settings, input) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(error = %err, "failed to append run log");
                None
            }
        }
    });

    info!(
        outcome = outcome_label,
        duration_ms = report.duration_ms,
        "research run finished"
    );
    Ok(ResearchOutcome {
        run_id,
        nodes: report.nodes,
        context,
        trace_path,
        run_log_path,
        duration_ms: report.duration_ms,
    })
}
