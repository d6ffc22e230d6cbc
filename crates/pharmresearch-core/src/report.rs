//! Rendering of a completed research context.
//!
//! Unavailable modules are always listed with the reason they failed; a report
//! never silently omits a module that was requested.

use std::fmt::Write as _;
use std::str::FromStr;

use serde_json::Value;

use crate::context::{ModuleEntry, ResearchContext};
use crate::error::ResearchError;
use crate::record::ResultRecord;

pub trait ReportRenderer {
    fn render(&self, context: &ResearchContext) -> Result<String, ResearchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
}

impl ReportFormat {
    pub fn render(self, context: &ResearchContext) -> Result<String, ResearchError> {
        match self {
            ReportFormat::Markdown => MarkdownRenderer.render(context),
            ReportFormat::Json => JsonRenderer.render(context),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = ResearchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            other => Err(ResearchError::invalid_request(format!(
                "unsupported report format '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

fn plain(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn strings(value: Option<&Value>) -> Vec<&str> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

impl MarkdownRenderer {
    fn write_findings(output: &mut String, record: &ResultRecord) {
        for (key, value) in &record.structured_findings {
            let label = key.replace('_', " ");
            match value {
                Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                    let _ = writeln!(output, "- **{label}**:");
                    for item in items.iter().filter_map(Value::as_object) {
                        let fields: Vec<String> = item
                            .iter()
                            .map(|(name, field)| format!("{name}: {}", plain(field)))
                            .collect();
                        let _ = writeln!(output, "  - {}", fields.join(", "));
                    }
                }
                Value::Array(items) if items.iter().all(Value::is_string) => {
                    let _ = writeln!(output, "- **{label}**: {}", strings(Some(value)).join(", "));
                }
                other => {
                    let _ = writeln!(output, "- **{label}**: {}", plain(other));
                }
            }
        }
    }

    /// Recommendations, risks, next steps and roadmap of the synthesis record.
    fn write_strategy(output: &mut String, report: &ResultRecord) {
        let recommendations = report
            .finding("strategic_recommendations")
            .and_then(Value::as_array)
            .filter(|items| !items.is_empty());
        if let Some(items) = recommendations {
            output.push_str("## Strategic Recommendations\n\n");
            for item in items {
                let _ = writeln!(
                    output,
                    "- **{}** ({} priority): {}. _{}_",
                    plain(&item["category"]),
                    plain(&item["priority"]),
                    plain(&item["recommendation"]),
                    plain(&item["rationale"])
                );
            }
            output.push('\n');
        }

        if let Some(level) = report.finding("overall_risk_level") {
            let _ = writeln!(
                output,
                "## Risk Assessment\n\nOverall risk: **{}**\n",
                plain(level)
            );
            let risks = report
                .finding("risk_assessment")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            for risk in risks {
                let _ = writeln!(
                    output,
                    "- [{}] {} ({}). Mitigation: {}",
                    plain(&risk["level"]),
                    plain(&risk["risk"]),
                    plain(&risk["category"]),
                    plain(&risk["mitigation"])
                );
            }
            if !risks.is_empty() {
                output.push('\n');
            }
        }

        let steps = strings(report.finding("recommended_next_steps"));
        if !steps.is_empty() {
            output.push_str("## Recommended Next Steps\n\n");
            for (index, step) in steps.iter().enumerate() {
                let _ = writeln!(output, "{}. {step}", index + 1);
            }
            output.push('\n');
        }

        if let Some(roadmap) = report
            .finding("implementation_roadmap")
            .and_then(Value::as_object)
        {
            output.push_str("## Implementation Roadmap\n\n");
            for (phase, plan) in roadmap {
                let activities = strings(plan.get("activities"));
                if activities.is_empty() {
                    continue;
                }
                let _ = writeln!(
                    output,
                    "- **{}** ({}): {}",
                    phase.replace('_', " "),
                    plain(&plan["timeline"]),
                    activities.join("; ")
                );
            }
            output.push('\n');
        }
    }
}

impl ReportRenderer for MarkdownRenderer {
    fn render(&self, context: &ResearchContext) -> Result<String, ResearchError> {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "# Research Report: {} ({})\n",
            context.molecule, context.therapy_area
        );
        let _ = writeln!(output, "**Goal:** {}\n", context.goal);

        output.push_str("## Executive Summary\n\n");
        match context.report() {
            Some(report) => {
                let _ = writeln!(output, "{}\n", report.summary);
                if let (Some(completeness), Some(confidence)) = (
                    report.finding("research_completeness"),
                    report.finding("confidence_score"),
                ) {
                    let _ = writeln!(
                        output,
                        "Completeness: {completeness}% | Confidence: {confidence}%\n"
                    );
                }
            }
            None => output.push_str("_Report synthesis did not complete._\n\n"),
        }

        for (module, entry) in context.analysis_entries() {
            let _ = writeln!(output, "## {}\n", module.title());
            match entry {
                ModuleEntry::Unavailable(info) => {
                    let _ = writeln!(
                        output,
                        "**Unavailable** ({}): {}\n",
                        info.cause, info.message
                    );
                }
                ModuleEntry::Available(record) if record.no_data => {
                    let _ = writeln!(output, "_{}_\n", record.summary);
                }
                ModuleEntry::Available(record) => {
                    if record.degraded {
                        output.push_str("**Degraded:** summary could not be generated.\n\n");
                    }
                    let _ = writeln!(output, "{}\n", record.summary);
                    Self::write_findings(&mut output, record);
                    output.push('\n');
                }
            }
        }

        if let Some(report) = context.report() {
            Self::write_strategy(&mut output, report);
        }

        let sources: Vec<&String> = context
            .report()
            .map(|report| report.source_attribution.iter().collect())
            .unwrap_or_default();
        if !sources.is_empty() {
            output.push_str("## Sources\n\n");
            for source in sources {
                let _ = writeln!(output, "- {source}");
            }
        }

        Ok(output)
    }
}

/// The full context as pretty-printed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl ReportRenderer for JsonRenderer {
    fn render(&self, context: &ResearchContext) -> Result<String, ResearchError> {
        serde_json::to_string_pretty(context).map_err(|err| ResearchError::Other(err.into()))
    }
}
