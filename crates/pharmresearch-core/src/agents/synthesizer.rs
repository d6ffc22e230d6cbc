use std::sync::Arc;

use serde_json::json;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use super::SpecialistTimeouts;
use super::strategy;
use super::analyst::millis;
use crate::context::{ModuleEntry, ResearchContext};
use crate::error::ErrorInfo;
use crate::llm::LanguageModel;
use crate::record::{Findings, ResultRecord};
use crate::request::{ModuleId, ResearchRequest};

/// Relative weight of each module in the overall confidence score.
fn confidence_weight(module: ModuleId) -> f64 {
    match module {
        ModuleId::Market => 20.0,
        ModuleId::Clinical => 25.0,
        ModuleId::Patent => 25.0,
        ModuleId::Trade => 15.0,
        ModuleId::Internal => 10.0,
        ModuleId::Web => 5.0,
        ModuleId::Report => 0.0,
    }
}

fn one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Builds the final report from whatever the analysis modules produced.
#[derive(Clone)]
pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
    timeouts: SpecialistTimeouts,
}

impl Synthesizer {
    pub(crate) fn new(model: Arc<dyn LanguageModel>, timeouts: SpecialistTimeouts) -> Self {
        Self { model, timeouts }
    }

    #[instrument(name = "specialist.report", skip_all, fields(modules = context.len()))]
    pub async fn run(
        &self,
        request: &ResearchRequest,
        context: &ResearchContext,
    ) -> Result<ResultRecord, ErrorInfo> {
        let mut findings = coverage(context);
        findings.extend(strategy::assess(context));
        let sources = attribution(context);
        let prompt = prompt(request, context);

        let record = match timeout(self.timeouts.model, self.model.complete(&prompt)).await {
            Ok(Ok(summary)) => ResultRecord::new(ModuleId::Report, summary, findings, sources),
            Ok(Err(err)) => {
                warn!(error = %err, "report summary failed; emitting coverage only");
                ResultRecord::degraded(ModuleId::Report, &err.to_string(), findings, sources)
            }
            Err(_) => {
                warn!("report summary timed out; emitting coverage only");
                ResultRecord::degraded(
                    ModuleId::Report,
                    &format!("model call exceeded {}", millis(self.timeouts.model)),
                    findings,
                    sources,
                )
            }
        };

        info!(
            available = context.available().count(),
            unavailable = context.unavailable().count(),
            degraded = record.degraded,
            "report synthesised"
        );
        Ok(record)
    }
}

/// Which modules contributed, which did not, and how much to trust the result.
pub(crate) fn coverage(context: &ResearchContext) -> Findings {
    let mut analysed = Vec::new();
    let mut available = Vec::new();
    let mut without_data = Vec::new();
    let mut degraded = Vec::new();
    let mut unavailable = Vec::new();
    let mut total_weight = 0.0;
    let mut covered_weight = 0.0;

    for (module, entry) in context.analysis_entries() {
        analysed.push(module.as_str());
        total_weight += confidence_weight(module);
        match entry {
            ModuleEntry::Available(record) if record.no_data => {
                without_data.push(module.as_str());
            }
            ModuleEntry::Available(record) => {
                available.push(module.as_str());
                covered_weight += confidence_weight(module);
                if record.degraded {
                    degraded.push(module.as_str());
                }
            }
            ModuleEntry::Unavailable(info) => {
                unavailable.push(json!({
                    "module": module.as_str(),
                    "cause": info.cause,
                    "message": info.message,
                }));
            }
        }
    }

    let completeness = if analysed.is_empty() {
        0.0
    } else {
        available.len() as f64 / analysed.len() as f64 * 100.0
    };
    let confidence = if total_weight > 0.0 {
        covered_weight / total_weight * 100.0
    } else {
        0.0
    };

    let mut findings = Findings::new();
    findings.insert("modules_analyzed".into(), json!(analysed));
    findings.insert("modules_available".into(), json!(available));
    findings.insert("modules_without_data".into(), json!(without_data));
    findings.insert("modules_degraded".into(), json!(degraded));
    findings.insert("modules_unavailable".into(), json!(unavailable));
    findings.insert(
        "research_completeness".into(),
        json!(one_decimal(completeness)),
    );
    findings.insert("confidence_score".into(), json!(one_decimal(confidence)));
    findings
}

fn attribution(context: &ResearchContext) -> Vec<String> {
    context
        .available()
        .flat_map(|record| {
            record
                .source_attribution
                .iter()
                .map(move |source| format!("{}: {source}", record.module))
        })
        .collect()
}

fn prompt(request: &ResearchRequest, context: &ResearchContext) -> String {
    let mut prompt = format!(
        "Role: Pharmaceutical Research Report Specialist\nSubject: Research report for {} in {}\nGoal: {}\nEvidence:\n",
        request.molecule(),
        request.therapy_area(),
        request.goal()
    );
    for (module, entry) in context.analysis_entries() {
        let line = match entry {
            ModuleEntry::Available(record) => record.summary.clone(),
            ModuleEntry::Unavailable(info) => format!("unavailable ({})", info.cause),
        };
        prompt.push_str(&format!("- {}: {line}\n", module.title()));
    }
    prompt.push_str(
        "Write an executive summary that names every unavailable module explicitly.\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ExtractiveModel;
    use std::collections::BTreeMap;

    fn context() -> ResearchContext {
        let request = ResearchRequest::new(
            "Metformin",
            "oncology",
            "repurposing",
            [ModuleId::Market, ModuleId::Patent, ModuleId::Trade],
        );
        let mut context = ResearchContext::for_request(&request);
        context.insert(
            ModuleId::Market,
            ModuleEntry::Available(ResultRecord::new(
                ModuleId::Market,
                "Market is growing",
                BTreeMap::new(),
                vec!["IQVIA".into()],
            )),
        );
        context.insert(
            ModuleId::Patent,
            ModuleEntry::Unavailable(ErrorInfo::timeout(ModuleId::Patent, "deadline exceeded")),
        );
        context.insert(
            ModuleId::Trade,
            ModuleEntry::Available(ResultRecord::no_data(&ErrorInfo::not_found(
                ModuleId::Trade,
                "no flows",
            ))),
        );
        context
    }

    #[test]
    fn coverage_weights_available_modules() {
        let findings = coverage(&context());

        assert_eq!(findings["modules_available"], json!(["market"]));
        assert_eq!(findings["modules_without_data"], json!(["trade"]));
        assert_eq!(findings["modules_unavailable"][0]["module"], "patent");
        assert_eq!(findings["research_completeness"], json!(33.3));
        // market 20 of market 20 + patent 25 + trade 15
        assert_eq!(findings["confidence_score"], json!(33.3));
    }

    #[tokio::test]
    async fn report_mentions_unavailable_modules() {
        let context = context();
        let request = ResearchRequest::new("Metformin", "oncology", "repurposing", [ModuleId::Market]);
        let synthesizer = Synthesizer::new(
            Arc::new(ExtractiveModel::default()),
            SpecialistTimeouts::default(),
        );

        let record = synthesizer.run(&request, &context).await.unwrap();

        assert_eq!(record.module, ModuleId::Report);
        assert!(record.summary.contains("Patent Landscape: unavailable (timeout)"));
        assert_eq!(record.source_attribution, vec!["market: IQVIA"]);
        let steps = record.finding("recommended_next_steps").unwrap();
        assert_eq!(
            steps[0],
            "Source trade trends data from an alternative provider"
        );
        assert_eq!(
            steps[1],
            "Complete Patent Landscape analysis (failed: timeout)"
        );
        assert!(record.finding("risk_assessment").is_some());
    }
}
