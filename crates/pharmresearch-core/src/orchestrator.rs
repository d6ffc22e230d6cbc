//! DAG execution with bounded concurrency, retries and cancellation.
//!
//! Ready nodes are dispatched onto a worker pool as permits allow. Retryable
//! failures are rescheduled with exponential backoff; terminal outcomes are
//! folded into the aggregator as they arrive. Node failures never abort the
//! run; only cancellation or an aggregator invariant violation end it early.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::aggregator::ResultAggregator;
use crate::context::ResearchContext;
use crate::error::{ErrorInfo, ResearchError};
use crate::events::{ProgressEmitter, ProgressEvent};
use crate::metrics;
use crate::planner::{NodeStatus, TaskGraph, TaskId, TaskNode};
use crate::record::ResultRecord;
use crate::registry::AgentRegistry;
use crate::request::ResearchRequest;

/// Configuration for orchestrator behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Maximum nodes running at once
    pub max_concurrency: usize,
    /// Extra attempts granted to a node after a retryable failure
    pub max_retries: u32,
    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,
    /// Deadline for one attempt of one node
    pub node_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_retries: 2,
            initial_backoff_ms: 250,
            max_backoff_ms: 5000,
            node_timeout_ms: 30_000,
        }
    }
}

impl OrchestratorConfig {
    /// Delay before the next dispatch of a node that has run `attempts` times.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(ResearchContext),
    /// Cancelled before completion; partial results were discarded.
    Cancelled,
}

/// Summary report of graph execution
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Final state of every node
    pub nodes: Vec<TaskNode>,
    pub outcome: RunOutcome,
    pub duration_ms: u64,
}

impl ExecutionReport {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, RunOutcome::Cancelled)
    }

    pub fn context(&self) -> Option<&ResearchContext> {
        match &self.outcome {
            RunOutcome::Completed(context) => Some(context),
            RunOutcome::Cancelled => None,
        }
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|node| node.status == status).count()
    }
}

/// Output of one worker; the permit is released only once the main loop has
/// processed the completion.
struct Completion {
    task_id: TaskId,
    outcome: Result<ResultRecord, ErrorInfo>,
    elapsed: Duration,
    _permit: OwnedSemaphorePermit,
}

/// Mutable bookkeeping of a single run.
struct RunState {
    graph: TaskGraph,
    workers: JoinSet<Completion>,
    in_flight: HashMap<tokio::task::Id, TaskId>,
    retry_at: HashMap<TaskId, Instant>,
    /// Context handed to nodes without dependencies.
    empty_context: Arc<ResearchContext>,
}

/// Orchestrator that executes task graphs
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<AgentRegistry>,
    progress: ProgressEmitter,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, registry: Arc<AgentRegistry>) -> Self {
        Self {
            config,
            registry,
            progress: ProgressEmitter::new(),
        }
    }

    /// Publish progress on an existing emitter instead of a private one.
    pub fn with_progress(mut self, progress: ProgressEmitter) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Progress events of every run executed by this orchestrator.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Execute a task graph to completion or cancellation.
    pub async fn execute(
        &self,
        request: Arc<ResearchRequest>,
        graph: TaskGraph,
        aggregator: &ResultAggregator,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport, ResearchError> {
        graph.validate()?;
        let span = info_span!(
            "orchestrator.execute",
            tasks = graph.len(),
            max_concurrency = self.config.max_concurrency
        );
        self.run(request, graph, aggregator, cancel)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        request: Arc<ResearchRequest>,
        graph: TaskGraph,
        aggregator: &ResultAggregator,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport, ResearchError> {
        info!(task_count = graph.len(), "starting graph execution");
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut state = RunState {
            empty_context: Arc::new(ResearchContext::for_request(&request)),
            graph,
            workers: JoinSet::new(),
            in_flight: HashMap::new(),
            retry_at: HashMap::new(),
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(state, aggregator, started).await);
            }

            self.dispatch_ready(&mut state, &request, &semaphore, aggregator)
                .await;

            if state.workers.is_empty() && state.retry_at.is_empty() {
                break;
            }

            // a due retry with no free slot waits for a worker to finish
            let next_retry = state
                .retry_at
                .values()
                .min()
                .copied()
                .filter(|_| semaphore.available_permits() > 0);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(self.cancelled(state, aggregator, started).await);
                }
                Some(joined) = state.workers.join_next_with_id(), if !state.workers.is_empty() => {
                    match joined {
                        Ok((id, completion)) => {
                            state.in_flight.remove(&id);
                            self.complete(&mut state, completion, aggregator).await?;
                        }
                        Err(join_error) => {
                            let Some(task_id) = state.in_flight.remove(&join_error.id()) else {
                                continue;
                            };
                            error!(%task_id, error = %join_error, "specialist task aborted unexpectedly");
                            let module = match state.graph.get_node(&task_id) {
                                Some(node) => node.module,
                                None => continue,
                            };
                            let error = ErrorInfo::transient(
                                module,
                                format!("specialist task panicked: {join_error}"),
                            );
                            self.settle(&mut state, task_id, Err(error), Duration::ZERO, aggregator)
                                .await?;
                        }
                    }
                }
                _ = sleep_until(next_retry.unwrap_or_else(Instant::now)), if next_retry.is_some() => {}
            }
        }

        for node in state.graph.nodes_mut().filter(|n| !n.status.is_terminal()) {
            warn!(task_id = %node.id, status = %node.status, "node never became ready; skipping");
            node.skip();
            self.progress.emit(node);
            aggregator.record(node).await?;
        }

        let context = aggregator.snapshot().await;
        let nodes = state.graph.into_nodes();
        let duration_ms = started.elapsed().as_millis() as u64;
        let report = ExecutionReport {
            nodes,
            outcome: RunOutcome::Completed(context),
            duration_ms,
        };
        let failed = report.count(NodeStatus::Failed);
        metrics::record_run("completed", failed);
        info!(
            duration_ms,
            succeeded = report.count(NodeStatus::Succeeded),
            failed,
            skipped = report.count(NodeStatus::Skipped),
            "graph execution complete"
        );

        Ok(report)
    }

    /// Start every ready node the pool has room for.
    async fn dispatch_ready(
        &self,
        state: &mut RunState,
        request: &Arc<ResearchRequest>,
        semaphore: &Arc<Semaphore>,
        aggregator: &ResultAggregator,
    ) {
        let now = Instant::now();
        let due: Vec<TaskId> = state
            .graph
            .ready_nodes()
            .into_iter()
            .filter(|node| state.retry_at.get(&node.id).is_none_or(|at| *at <= now))
            .map(|node| node.id.clone())
            .collect();

        for task_id in due {
            let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() else {
                debug!("worker pool saturated");
                break;
            };
            state.retry_at.remove(&task_id);

            let Some(node) = state.graph.get_node(&task_id) else {
                continue;
            };
            let context = if node.depends_on.is_empty() {
                Arc::clone(&state.empty_context)
            } else {
                Arc::new(aggregator.snapshot().await)
            };

            let Some(node) = state.graph.node_mut(&task_id) else {
                continue;
            };
            node.start();
            self.progress.emit(node);
            debug!(task_id = %node.id, attempt = node.attempts, "dispatching node");

            let specialist = self.registry.resolve(node.module).clone();
            let request = Arc::clone(request);
            let node_timeout = self.config.node_timeout();
            let module = node.module;
            let span = info_span!("node", task_id = %node.id, attempt = node.attempts);
            let id = task_id.clone();

            let handle = state.workers.spawn(
                async move {
                    let started = Instant::now();
                    let outcome =
                        match timeout(node_timeout, specialist.run(&request, &context)).await {
                            Ok(outcome) => outcome,
                            Err(_) => Err(ErrorInfo::timeout(
                                module,
                                format!("node deadline of {}ms exceeded", node_timeout.as_millis()),
                            )),
                        };
                    Completion {
                        task_id: id,
                        outcome,
                        elapsed: started.elapsed(),
                        _permit: permit,
                    }
                }
                .instrument(span),
            );
            state.in_flight.insert(handle.id(), task_id);
        }
    }

    async fn complete(
        &self,
        state: &mut RunState,
        completion: Completion,
        aggregator: &ResultAggregator,
    ) -> Result<(), ResearchError> {
        let Completion {
            task_id,
            outcome,
            elapsed,
            _permit,
        } = completion;
        self.settle(state, task_id, outcome, elapsed, aggregator)
            .await
    }

    /// Apply one attempt's outcome to its node.
    async fn settle(
        &self,
        state: &mut RunState,
        task_id: TaskId,
        outcome: Result<ResultRecord, ErrorInfo>,
        elapsed: Duration,
        aggregator: &ResultAggregator,
    ) -> Result<(), ResearchError> {
        let Some(node) = state.graph.node_mut(&task_id) else {
            return Ok(());
        };
        let elapsed_ms = elapsed.as_millis() as u64;

        match outcome {
            Ok(record) => {
                node.succeed(record);
                info!(task_id = %node.id, attempt = node.attempts, elapsed_ms, "node succeeded");
            }
            Err(error) if error.is_retryable() && node.attempts <= self.config.max_retries => {
                let delay = self.config.backoff_for(node.attempts);
                warn!(
                    task_id = %node.id,
                    attempt = node.attempts,
                    backoff_ms = delay.as_millis() as u64,
                    %error,
                    "node failed, retrying"
                );
                metrics::record_attempt(node.module, NodeStatus::Failed, elapsed_ms);
                metrics::record_retry(node.module);
                node.fail(error.clone());
                node.requeue();
                self.progress.publish(
                    ProgressEvent::for_node(node)
                        .with_detail(format!("retry in {}ms after {error}", delay.as_millis())),
                );
                state.retry_at.insert(task_id, Instant::now() + delay);
                return Ok(());
            }
            Err(error) => {
                warn!(task_id = %node.id, attempt = node.attempts, %error, "node failed permanently");
                node.fail(error);
            }
        }

        metrics::record_attempt(node.module, node.status, elapsed_ms);
        self.progress.emit(node);
        aggregator.record(node).await
    }

    async fn cancelled(
        &self,
        mut state: RunState,
        aggregator: &ResultAggregator,
        started: Instant,
    ) -> ExecutionReport {
        warn!(running = state.workers.len(), "research run cancelled");
        state.workers.abort_all();
        while state.workers.join_next().await.is_some() {}

        for node in state.graph.nodes_mut().filter(|n| !n.status.is_terminal()) {
            node.skip();
            self.progress
                .publish(ProgressEvent::for_node(node).with_detail("run cancelled"));
        }
        aggregator.discard().await;

        let nodes = state.graph.into_nodes();
        metrics::record_run(
            "cancelled",
            nodes
                .iter()
                .filter(|n| n.status == NodeStatus::Failed)
                .count(),
        );
        ExecutionReport {
            nodes,
            outcome: RunOutcome::Cancelled,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Findings;
    use crate::request::ModuleId;

    #[test]
    fn backoff_doubles_until_capped() {
        let config = OrchestratorConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(350));
        assert_eq!(config.backoff_for(40), Duration::from_millis(350));
    }

    #[test]
    fn report_counts_skipped_apart_from_succeeded() {
        let mut market = TaskNode::new(ModuleId::Market, "market".into());
        market.start();
        market.succeed(ResultRecord::new(ModuleId::Market, "ok", Findings::new(), vec![]));
        let mut patent = TaskNode::new(ModuleId::Patent, "patent".into());
        patent.skip();
        let report = ExecutionReport {
            nodes: vec![market, patent],
            outcome: RunOutcome::Cancelled,
            duration_ms: 0,
        };

        assert_eq!(report.count(NodeStatus::Succeeded), 1);
        assert_eq!(report.count(NodeStatus::Skipped), 1);
        assert_eq!(report.count(NodeStatus::Failed), 0);
    }
}
