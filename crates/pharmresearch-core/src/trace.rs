use std::fmt::Write as _;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::events::ProgressEvent;
use crate::planner::NodeStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub task_id: String,
    pub status: NodeStatus,
    pub attempt: u32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&ProgressEvent> for TraceEvent {
    fn from(event: &ProgressEvent) -> Self {
        let message = match &event.detail {
            Some(detail) => format!("{} (attempt {}): {detail}", event.status, event.attempt),
            None => format!("{} (attempt {})", event.status, event.attempt),
        };
        Self {
            task_id: event.task_id.clone(),
            status: event.status,
            attempt: event.attempt,
            message,
            timestamp: event.timestamp,
        }
    }
}

/// Ordered record of node transitions for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
    /// Events lost because the collector fell behind the stream.
    #[serde(default)]
    dropped: u64,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &ProgressEvent) {
        self.events.push(TraceEvent::from(event));
    }

    /// Take every event already queued on `receiver` without waiting.
    pub fn drain(&mut self, receiver: &mut broadcast::Receiver<ProgressEvent>) -> usize {
        let before = self.events.len();
        loop {
            match receiver.try_recv() {
                Ok(event) => self.record(&event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "trace collector lagged behind progress stream");
                    self.dropped += skipped;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        self.events.len() - before
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub task_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let steps = events
            .iter()
            .enumerate()
            .map(|(idx, event)| TraceStep {
                index: idx + 1,
                task_id: event.task_id.clone(),
                message: event.message.clone(),
            })
            .collect();
        Self { steps }
    }

    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Execution Trace\n");
        for step in &self.steps {
            let _ = writeln!(output, "{}. {} -> {}", step.index, step.task_id, step.message);
        }
        output
    }

    /// One lane per task, steps in arrival order.
    pub fn render_mermaid(&self) -> String {
        if self.steps.is_empty() {
            return "flowchart TD\n  %% no trace events captured".to_string();
        }

        let mut output = String::from("flowchart TD\n  %% auto-generated trace\n");
        for step in &self.steps {
            let label = sanitize_mermaid(&format!("{}: {}", step.task_id, step.message));
            let _ = writeln!(output, "  step{}[\"{label}\"]", step.index);
        }

        let mut last_by_task: Vec<(&str, usize)> = Vec::new();
        for step in &self.steps {
            match last_by_task.iter_mut().find(|(task, _)| *task == step.task_id) {
                Some((_, last)) => {
                    let _ = writeln!(output, "  step{} --> step{}", last, step.index);
                    *last = step.index;
                }
                None => last_by_task.push((&step.task_id, step.index)),
            }
        }
        output
    }
}

fn sanitize_mermaid(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('[', "(")
        .replace(']', ")")
        .replace('\n', "<br/>")
}

/// Write `<dir>/<run_id>.json` and return its path.
pub fn persist_trace<P: AsRef<Path>>(
    dir: P,
    run_id: &str,
    events: &[TraceEvent],
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{run_id}.json"));
    let payload = serde_json::to_vec_pretty(events)?;
    let mut file = File::create(&path)
        .with_context(|| format!("failed to create trace file {}", path.display()))?;
    file.write_all(&payload)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProgressEmitter;
    use crate::planner::TaskNode;
    use crate::request::ModuleId;

    fn collected() -> TraceCollector {
        let emitter = ProgressEmitter::new();
        let mut receiver = emitter.subscribe();
        let mut market = TaskNode::new(ModuleId::Market, "market".into());
        let mut trade = TaskNode::new(ModuleId::Trade, "trade".into());
        market.start();
        emitter.emit(&market);
        trade.start();
        emitter.emit(&trade);
        market.skip();
        emitter.emit(&market);

        let mut collector = TraceCollector::new();
        assert_eq!(collector.drain(&mut receiver), 3);
        collector
    }

    #[test]
    fn markdown_renders_steps() {
        let markdown = collected().summary().render_markdown();

        assert!(markdown.contains("1. market -> running (attempt 1)"));
        assert!(markdown.contains("3. market -> skipped"));
    }

    #[test]
    fn mermaid_links_steps_of_the_same_task() {
        let mermaid = collected().summary().render_mermaid();

        assert!(mermaid.contains("flowchart TD"));
        assert!(mermaid.contains("step1 --> step3"));
        assert!(!mermaid.contains("step1 --> step2"));
    }

    #[test]
    fn persisted_trace_is_named_after_run() {
        let temp = tempfile::tempdir().unwrap();
        let collector = collected();

        let path = persist_trace(temp.path(), "run-42", collector.events()).unwrap();

        assert!(path.ends_with("run-42.json"));
        let stored: Vec<TraceEvent> =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(stored.len(), 3);
    }
}
