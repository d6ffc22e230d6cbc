//! PharmResearch core: multi-agent research orchestration for drug repurposing.
//!
//! A research request is planned into a task graph (one node per selected
//! module plus a report node), executed by specialist agents on a bounded
//! worker pool, and aggregated into a context that renders as a report.

pub mod agents;
mod aggregator;
mod config;
mod context;
mod error;
mod events;
mod llm;
mod logging;
mod metrics;
mod orchestrator;
mod planner;
mod record;
mod registry;
mod report;
mod request;
mod research;
pub mod sources;
mod trace;

pub use agents::{Specialist, SpecialistTimeouts};
pub use aggregator::ResultAggregator;
pub use config::{
    Config, ConfigLoader, LlmConfig, LoggingConfig, OrchestratorSection, SpecialistsSection,
};
pub use context::{ModuleEntry, ResearchContext};
pub use error::{ErrorCause, ErrorInfo, ResearchError};
pub use events::{EventId, ProgressEmitter, ProgressEvent};
pub use llm::{ExtractiveModel, LanguageModel, ModelError};
pub use logging::{RunLogInput, RunLogSettings, log_run_completion};
pub use orchestrator::{ExecutionReport, Orchestrator, OrchestratorConfig, RunOutcome};
pub use planner::{NodeStatus, TaskGraph, TaskId, TaskNode, TaskPlanner};
pub use record::{Findings, ResultRecord};
pub use registry::AgentRegistry;
pub use report::{JsonRenderer, MarkdownRenderer, ReportFormat, ReportRenderer};
pub use request::{ModuleId, ResearchRequest};
pub use research::{ResearchOptions, ResearchOutcome, run_research};
pub use sources::{DataSource, RawData, SourceError, SourceSet};
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary, persist_trace};
