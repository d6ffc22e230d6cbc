//! Orchestrator behaviour under failures, retries, cancellation and load.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pharmresearch_core::{
    AgentRegistry, DataSource, ErrorCause, ExecutionReport, ExtractiveModel, LanguageModel,
    MarkdownRenderer, ModelError, ModuleId, NodeStatus, Orchestrator, OrchestratorConfig,
    ProgressEvent, RawData, ReportRenderer, ResearchError, ResearchRequest, ResultAggregator,
    SourceError, SourceSet, SpecialistTimeouts, TaskPlanner,
};
use pharmresearch_core::sources::{MockClinicalTrials, MockMarketData, MockPatentSearch};
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

/// Never answers.
struct HangingSource;

#[async_trait]
impl DataSource for HangingSource {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn fetch(&self, _molecule: &str, _area: &str) -> Result<RawData, SourceError> {
        std::future::pending().await
    }
}

/// Fails transiently a fixed number of times, then delegates.
struct FlakySource {
    failures_left: AtomicU32,
    inner: Arc<dyn DataSource>,
}

#[async_trait]
impl DataSource for FlakySource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(&self, molecule: &str, area: &str) -> Result<RawData, SourceError> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(SourceError::Transient("503 service unavailable".into()));
        }
        self.inner.fetch(molecule, area).await
    }
}

/// Tracks how many fetches run at once.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

struct CountingSource {
    gauge: Arc<Gauge>,
    delay: Duration,
    inner: Arc<dyn DataSource>,
}

#[async_trait]
impl DataSource for CountingSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(&self, molecule: &str, area: &str) -> Result<RawData, SourceError> {
        let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
        self.inner.fetch(molecule, area).await
    }
}

struct SlowSource(Duration);

#[async_trait]
impl DataSource for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }

    async fn fetch(&self, molecule: &str, area: &str) -> Result<RawData, SourceError> {
        tokio::time::sleep(self.0).await;
        MockMarketData.fetch(molecule, area).await
    }
}

struct PanickingSource;

#[async_trait]
impl DataSource for PanickingSource {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn fetch(&self, _molecule: &str, _area: &str) -> Result<RawData, SourceError> {
        panic!("parser bug");
    }
}

struct RefusingModel;

#[async_trait]
impl LanguageModel for RefusingModel {
    fn name(&self) -> &str {
        "refusing"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
        Err(ModelError("content filter triggered".into()))
    }
}

fn timeouts() -> SpecialistTimeouts {
    SpecialistTimeouts {
        retrieval: Duration::from_secs(1),
        model: Duration::from_secs(1),
    }
}

fn orchestrator_with(
    sources: SourceSet,
    model: Arc<dyn LanguageModel>,
    config: OrchestratorConfig,
) -> Orchestrator {
    let registry = AgentRegistry::new(&sources, model, timeouts()).expect("registry");
    Orchestrator::new(config, Arc::new(registry))
}

fn orchestrator(sources: SourceSet, config: OrchestratorConfig) -> Orchestrator {
    orchestrator_with(sources, Arc::new(ExtractiveModel::default()), config)
}

fn request(molecule: &str, area: &str, modules: &[ModuleId]) -> ResearchRequest {
    ResearchRequest::new(
        molecule,
        area,
        "Identify repurposing opportunities",
        modules.iter().copied(),
    )
}

async fn execute(
    orchestrator: &Orchestrator,
    request: ResearchRequest,
    cancel: CancellationToken,
) -> (ExecutionReport, ResultAggregator) {
    let graph = TaskPlanner::new().plan(&request).expect("plan");
    let aggregator = ResultAggregator::new(&request);
    let report = orchestrator
        .execute(Arc::new(request), graph, &aggregator, cancel)
        .await
        .expect("execution");
    (report, aggregator)
}

fn drain(receiver: &mut tokio::sync::broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    events
}

#[tokio::test(start_paused = true)]
async fn timed_out_module_is_reported_unavailable() {
    let sources = SourceSet::mock().with(ModuleId::Patent, Arc::new(HangingSource));
    let orchestrator = orchestrator(sources, OrchestratorConfig::default());
    let request = request(
        "metformin",
        "oncology",
        &[ModuleId::Market, ModuleId::Patent, ModuleId::Clinical],
    );

    let (report, _) = execute(&orchestrator, request, CancellationToken::new()).await;

    let patent = report.node("patent").unwrap();
    assert_eq!(patent.status, NodeStatus::Failed);
    assert_eq!(patent.attempts, 3);
    assert_eq!(patent.error.as_ref().unwrap().cause, ErrorCause::Timeout);
    assert!(report.nodes.iter().all(|node| node.is_consistent()));

    let synthesis = report.node("report").unwrap();
    assert_eq!(synthesis.status, NodeStatus::Succeeded);

    let context = report.context().unwrap();
    assert_eq!(context.available().count(), 2);
    assert_eq!(context.unavailable().count(), 1);
    let summary = &context.report().unwrap().summary;
    assert!(
        summary.contains("Patent Landscape: unavailable (timeout)"),
        "report should name the missing module: {summary}"
    );

    let markdown = MarkdownRenderer.render(context).unwrap();
    assert!(markdown.contains("**Unavailable** (timeout)"));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_recover_within_retry_budget() {
    let flaky = FlakySource {
        failures_left: AtomicU32::new(2),
        inner: Arc::new(MockClinicalTrials),
    };
    let sources = SourceSet::mock().with(ModuleId::Clinical, Arc::new(flaky));
    let orchestrator = orchestrator(sources, OrchestratorConfig::default());
    let mut receiver = orchestrator.subscribe();

    let (report, _) = execute(
        &orchestrator,
        request("metformin", "oncology", &[ModuleId::Clinical]),
        CancellationToken::new(),
    )
    .await;

    let clinical = report.node("clinical").unwrap();
    assert_eq!(clinical.status, NodeStatus::Succeeded);
    assert_eq!(clinical.attempts, 3);
    assert!(!clinical.result.as_ref().unwrap().degraded);

    let retries: Vec<_> = drain(&mut receiver)
        .into_iter()
        .filter(|event| event.task_id == "clinical" && event.status == NodeStatus::Pending)
        .collect();
    assert_eq!(retries.len(), 2);
    assert!(retries[0].detail.as_deref().unwrap().contains("retry in 250ms"));
    assert!(retries[1].detail.as_deref().unwrap().contains("retry in 500ms"));
}

#[tokio::test(start_paused = true)]
async fn missing_data_succeeds_without_retry() {
    let orchestrator = orchestrator(SourceSet::mock(), OrchestratorConfig::default());

    let (report, _) = execute(
        &orchestrator,
        request("metformin", "dermatology", &[ModuleId::Market]),
        CancellationToken::new(),
    )
    .await;

    let market = report.node("market").unwrap();
    assert_eq!(market.status, NodeStatus::Succeeded);
    assert_eq!(market.attempts, 1);
    assert!(market.result.as_ref().unwrap().no_data);

    let context = report.context().unwrap();
    let coverage = context.report().unwrap();
    assert_eq!(
        coverage.finding("modules_without_data"),
        Some(&serde_json::json!(["market"]))
    );
}

#[tokio::test(start_paused = true)]
async fn model_failure_degrades_instead_of_failing() {
    let orchestrator = orchestrator_with(
        SourceSet::mock(),
        Arc::new(RefusingModel),
        OrchestratorConfig::default(),
    );

    let (report, _) = execute(
        &orchestrator,
        request("ivermectin", "respiratory", &[ModuleId::Market, ModuleId::Trade]),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(report.count(NodeStatus::Succeeded), 3);
    for node in &report.nodes {
        let record = node.result.as_ref().unwrap();
        assert!(record.degraded, "{} should be degraded", node.id);
        assert_eq!(node.attempts, 1);
    }
    let market = report.node("market").unwrap().result.as_ref().unwrap();
    assert_eq!(
        market.finding("market_size"),
        Some(&serde_json::json!("2.1B"))
    );
}

#[tokio::test(start_paused = true)]
async fn node_deadline_applies_per_attempt() {
    let sources = SourceSet::mock().with(
        ModuleId::Market,
        Arc::new(SlowSource(Duration::from_secs(5))),
    );
    let registry = AgentRegistry::new(
        &sources,
        Arc::new(ExtractiveModel::default()),
        SpecialistTimeouts {
            retrieval: Duration::from_secs(60),
            model: Duration::from_secs(60),
        },
    )
    .unwrap();
    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            max_retries: 0,
            node_timeout_ms: 500,
            ..OrchestratorConfig::default()
        },
        Arc::new(registry),
    );

    let (report, _) = execute(
        &orchestrator,
        request("metformin", "oncology", &[ModuleId::Market]),
        CancellationToken::new(),
    )
    .await;

    let market = report.node("market").unwrap();
    assert_eq!(market.status, NodeStatus::Failed);
    assert_eq!(market.attempts, 1);
    let error = market.error.as_ref().unwrap();
    assert_eq!(error.cause, ErrorCause::Timeout);
    assert!(error.message.contains("node deadline of 500ms"));
    assert_eq!(
        report.node("report").unwrap().status,
        NodeStatus::Succeeded
    );
}

#[tokio::test(start_paused = true)]
async fn panicking_specialist_fails_its_node_only() {
    let sources = SourceSet::mock().with(ModuleId::Patent, Arc::new(PanickingSource));
    let orchestrator = orchestrator(
        sources,
        OrchestratorConfig {
            max_retries: 1,
            ..OrchestratorConfig::default()
        },
    );

    let (report, _) = execute(
        &orchestrator,
        request("metformin", "oncology", &[ModuleId::Patent, ModuleId::Market]),
        CancellationToken::new(),
    )
    .await;

    let patent = report.node("patent").unwrap();
    assert_eq!(patent.status, NodeStatus::Failed);
    assert_eq!(patent.attempts, 2);
    assert!(patent.error.as_ref().unwrap().message.contains("panicked"));
    assert_eq!(report.node("market").unwrap().status, NodeStatus::Succeeded);
    assert_eq!(report.node("report").unwrap().status, NodeStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_configured_limit() {
    let gauge = Arc::new(Gauge::default());
    let modules = [
        ModuleId::Market,
        ModuleId::Trade,
        ModuleId::Patent,
        ModuleId::Clinical,
        ModuleId::Web,
    ];
    let base = SourceSet::mock();
    let sources = modules.iter().fold(SourceSet::mock(), |set, module| {
        set.with(
            *module,
            Arc::new(CountingSource {
                gauge: Arc::clone(&gauge),
                delay: Duration::from_millis(100),
                inner: base.get(*module).unwrap(),
            }),
        )
    });
    let orchestrator = orchestrator(
        sources,
        OrchestratorConfig {
            max_concurrency: 2,
            ..OrchestratorConfig::default()
        },
    );
    let mut receiver = orchestrator.subscribe();

    let (report, _) = execute(
        &orchestrator,
        request("metformin", "oncology", &modules),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    assert_eq!(report.count(NodeStatus::Succeeded), 6);
    assert_eq!(report.context().unwrap().analysis_entries().count(), 5);

    let mut running = 0usize;
    let mut peak = 0usize;
    for event in drain(&mut receiver) {
        match event.status {
            NodeStatus::Running => {
                running += 1;
                peak = peak.max(running);
            }
            NodeStatus::Pending => {}
            _ => running -= 1,
        }
    }
    assert_eq!(running, 0);
    assert!(peak <= 2, "observed {peak} running nodes");
}

#[tokio::test(start_paused = true)]
async fn retry_due_on_a_full_pool_waits_for_a_free_worker() {
    let flaky = FlakySource {
        failures_left: AtomicU32::new(1),
        inner: Arc::new(MockMarketData),
    };
    let sources = SourceSet::mock()
        .with(ModuleId::Market, Arc::new(flaky))
        .with(
            ModuleId::Patent,
            Arc::new(SlowSource(Duration::from_millis(500))),
        );
    let orchestrator = orchestrator(
        sources,
        OrchestratorConfig {
            max_concurrency: 1,
            initial_backoff_ms: 10,
            ..OrchestratorConfig::default()
        },
    );
    let mut receiver = orchestrator.subscribe();
    let started = tokio::time::Instant::now();

    let (report, _) = execute(
        &orchestrator,
        request("metformin", "oncology", &[ModuleId::Market, ModuleId::Patent]),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(report.count(NodeStatus::Succeeded), 3);
    assert_eq!(report.node("market").unwrap().attempts, 2);
    assert!(started.elapsed() >= Duration::from_millis(500));

    // the due retry only starts once the slow node has released the worker
    let order: Vec<(String, NodeStatus)> = drain(&mut receiver)
        .into_iter()
        .filter(|event| event.status != NodeStatus::Pending)
        .map(|event| (event.task_id, event.status))
        .collect();
    let patent_done = order
        .iter()
        .position(|entry| *entry == ("patent".to_string(), NodeStatus::Succeeded))
        .unwrap();
    let market_retry = order
        .iter()
        .rposition(|entry| *entry == ("market".to_string(), NodeStatus::Running))
        .unwrap();
    assert!(patent_done < market_retry, "unexpected order: {order:?}");
}

#[tokio::test(start_paused = true)]
async fn recording_a_node_twice_aborts_the_run() {
    let orchestrator = orchestrator(SourceSet::mock(), OrchestratorConfig::default());
    let request = request("metformin", "oncology", &[ModuleId::Market]);
    let aggregator = ResultAggregator::new(&request);
    let request = Arc::new(request);

    let first = orchestrator
        .execute(
            Arc::clone(&request),
            TaskPlanner::new().plan(&request).unwrap(),
            &aggregator,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(first.count(NodeStatus::Succeeded), 2);

    // same aggregator, fresh graph: the first completion collides
    let err = orchestrator
        .execute(
            Arc::clone(&request),
            TaskPlanner::new().plan(&request).unwrap(),
            &aggregator,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(&err, ResearchError::DuplicateRecord { task_id } if task_id == "market"));
    assert!(err.is_invariant_violation());
    assert_eq!(aggregator.len().await, 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_skips_everything_and_discards_results() {
    let slow: Arc<dyn DataSource> = Arc::new(SlowSource(Duration::from_secs(10)));
    let sources = SourceSet::mock()
        .with(ModuleId::Market, Arc::clone(&slow))
        .with(ModuleId::Patent, Arc::clone(&slow));
    let orchestrator = orchestrator(sources, OrchestratorConfig::default());
    let mut receiver = orchestrator.subscribe();
    let cancel = CancellationToken::new();

    let request = request("metformin", "oncology", &[ModuleId::Market, ModuleId::Patent]);
    let graph = TaskPlanner::new().plan(&request).unwrap();
    let aggregator = ResultAggregator::new(&request);

    let run = orchestrator.execute(Arc::new(request), graph, &aggregator, cancel.clone());
    let cancel_after_two_running = async {
        let mut running = 0;
        while running < 2 {
            let event = receiver.recv().await.unwrap();
            if event.status == NodeStatus::Running {
                running += 1;
            }
        }
        cancel.cancel();
    };
    let (report, ()) = tokio::join!(run, cancel_after_two_running);
    let report = report.unwrap();

    assert!(report.is_cancelled());
    assert!(report.context().is_none());
    assert_eq!(report.count(NodeStatus::Skipped), 3);
    assert!(aggregator.is_empty().await);

    let later = drain(&mut receiver);
    assert!(
        later
            .iter()
            .all(|event| !(event.module == ModuleId::Report && event.status == NodeStatus::Running))
    );
    assert_eq!(
        later
            .iter()
            .filter(|event| event.status == NodeStatus::Skipped)
            .count(),
        3
    );
}

#[tokio::test]
async fn mock_sources_cover_every_module() {
    let orchestrator = orchestrator(SourceSet::mock(), OrchestratorConfig::default());
    let (report, aggregator) = execute(
        &orchestrator,
        request("Ivermectin", "respiratory", &ModuleId::ANALYSIS),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(report.count(NodeStatus::Succeeded), 7);
    let context = aggregator.snapshot().await;
    assert_eq!(context.len(), 7);
    let patent = context.get(ModuleId::Patent).unwrap().record().unwrap();
    assert_eq!(
        patent.finding("freedom_to_operate"),
        Some(&serde_json::json!("Moderate"))
    );
    assert_eq!(
        patent.source_attribution,
        vec![MockPatentSearch.name().to_string()]
    );
}
