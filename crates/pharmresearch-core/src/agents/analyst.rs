use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::{SpecialistTimeouts, findings};
use crate::error::ErrorInfo;
use crate::llm::LanguageModel;
use crate::record::{Findings, ResultRecord};
use crate::request::{ModuleId, ResearchRequest};
use crate::sources::{DataSource, RawData, SourceError};

/// Retrieval followed by summarisation for one analysis module.
#[derive(Clone)]
pub struct Analyst {
    module: ModuleId,
    role: &'static str,
    source: Arc<dyn DataSource>,
    model: Arc<dyn LanguageModel>,
    timeouts: SpecialistTimeouts,
}

impl Analyst {
    pub(crate) fn new(
        module: ModuleId,
        role: &'static str,
        source: Arc<dyn DataSource>,
        model: Arc<dyn LanguageModel>,
        timeouts: SpecialistTimeouts,
    ) -> Self {
        Self {
            module,
            role,
            source,
            model,
            timeouts,
        }
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    #[instrument(name = "specialist.analysis", skip(self, request), fields(module = %self.module))]
    pub async fn run(&self, request: &ResearchRequest) -> Result<ResultRecord, ErrorInfo> {
        let raw = match self.retrieve(request).await? {
            Ok(raw) => raw,
            Err(SourceError::NotFound(message)) => {
                info!(%message, "source holds no data for request");
                return Ok(ResultRecord::no_data(&ErrorInfo::not_found(
                    self.module,
                    message,
                )));
            }
            Err(SourceError::Transient(message)) => {
                return Err(ErrorInfo::transient(self.module, message));
            }
        };

        let findings = findings::extract(self.module, &raw.payload);
        debug!(
            findings = findings.len(),
            sources = raw.sources.len(),
            "findings extracted from raw data"
        );

        let prompt = self.prompt(request, &findings);
        let record = match timeout(self.timeouts.model, self.model.complete(&prompt)).await {
            Ok(Ok(summary)) => ResultRecord::new(self.module, summary, findings, raw.sources),
            Ok(Err(err)) => {
                warn!(error = %err, "model call failed; returning raw findings");
                ResultRecord::degraded(self.module, &err.to_string(), findings, raw.sources)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeouts.model.as_millis() as u64,
                    "model call timed out; returning raw findings"
                );
                ResultRecord::degraded(
                    self.module,
                    &format!("model call exceeded {}", millis(self.timeouts.model)),
                    findings,
                    raw.sources,
                )
            }
        };

        info!(degraded = record.degraded, "analysis completed");
        Ok(record)
    }

    /// Outer error: the source missed its deadline.
    async fn retrieve(
        &self,
        request: &ResearchRequest,
    ) -> Result<Result<RawData, SourceError>, ErrorInfo> {
        let fetch = self
            .source
            .fetch(request.molecule(), request.therapy_area());
        timeout(self.timeouts.retrieval, fetch).await.map_err(|_| {
            ErrorInfo::timeout(
                self.module,
                format!(
                    "{} did not answer within {}",
                    self.source.name(),
                    millis(self.timeouts.retrieval)
                ),
            )
        })
    }

    fn prompt(&self, request: &ResearchRequest, findings: &Findings) -> String {
        let mut prompt = format!(
            "Role: {}\nSubject: {} for {} in {}\nGoal: {}\nEvidence:\n",
            self.role,
            self.module.title(),
            request.molecule(),
            request.therapy_area(),
            request.goal()
        );
        for (key, value) in findings {
            prompt.push_str(&format!("- {key}: {}\n", render_value(value)));
        }
        prompt.push_str("Summarise the evidence in two sentences for a portfolio strategist.\n");
        prompt
    }
}

pub(super) fn millis(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

pub(super) fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
