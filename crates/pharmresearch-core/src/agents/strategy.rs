//! Rule-based strategic guidance derived from the gathered module findings.
//!
//! Every entry traces back to a finding or a coverage gap in the context, so
//! the guidance shrinks when modules are missing instead of inventing advice.

use serde::Serialize;
use serde_json::{Value, json};

use crate::context::{ModuleEntry, ResearchContext};
use crate::record::{Findings, ResultRecord};
use crate::request::ModuleId;

const CROWDED_MARKET_COMPETITORS: u64 = 20;
const MAX_PRIORITY_STEPS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    fn parse(value: &str) -> Self {
        match value {
            "High" => Level::High,
            "Medium" => Level::Medium,
            _ => Level::Low,
        }
    }
}

#[derive(Debug, Serialize)]
struct Recommendation {
    category: &'static str,
    recommendation: String,
    rationale: String,
    priority: Level,
}

#[derive(Debug, Serialize)]
struct Risk {
    category: &'static str,
    risk: String,
    level: Level,
    mitigation: &'static str,
}

/// Record of `module` when it returned data.
fn analysed(context: &ResearchContext, module: ModuleId) -> Option<&ResultRecord> {
    context
        .get(module)
        .and_then(ModuleEntry::record)
        .filter(|record| !record.no_data)
}

fn strings(record: &ResultRecord, key: &str) -> Vec<String> {
    record
        .finding(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn text<'a>(record: &'a ResultRecord, key: &str) -> Option<&'a str> {
    record.finding(key).and_then(Value::as_str)
}

fn recommendations(context: &ResearchContext) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if let Some(clinical) = analysed(context, ModuleId::Clinical) {
        let opportunities = strings(clinical, "repurposing_opportunities");
        if !opportunities.is_empty() {
            out.push(Recommendation {
                category: "Development Strategy",
                recommendation: format!(
                    "Pursue 505(b)(2) regulatory pathway for {}",
                    opportunities.join(", ")
                ),
                rationale: "Existing safety data shortens development for indications already in trials"
                    .into(),
                priority: Level::High,
            });
        }
    }

    match context.get(ModuleId::Patent) {
        Some(ModuleEntry::Available(patent)) if patent.no_data => out.push(Recommendation {
            category: "IP Strategy",
            recommendation: "File method-of-use patents for new indications".into(),
            rationale: "No existing patent protection identified".into(),
            priority: Level::High,
        }),
        Some(ModuleEntry::Available(patent)) => {
            let advice = patent
                .finding("ip_recommendations")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            for item in advice {
                let (Some(recommendation), Some(rationale)) = (
                    item.get("recommendation").and_then(Value::as_str),
                    item.get("rationale").and_then(Value::as_str),
                ) else {
                    continue;
                };
                out.push(Recommendation {
                    category: "IP Strategy",
                    recommendation: recommendation.into(),
                    rationale: rationale.into(),
                    priority: Level::parse(
                        item.get("priority").and_then(Value::as_str).unwrap_or(""),
                    ),
                });
            }
            let blocking = patent
                .finding("blocking_patents")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            if blocking > 0 {
                out.push(Recommendation {
                    category: "IP Strategy",
                    recommendation: "Conduct detailed FTO analysis with patent counsel".into(),
                    rationale: format!("{blocking} potentially blocking patent(s) identified"),
                    priority: Level::High,
                });
            }
        }
        _ => {}
    }

    if let Some(cagr) = analysed(context, ModuleId::Market).and_then(|m| text(m, "cagr")) {
        out.push(Recommendation {
            category: "Commercial Strategy",
            recommendation: format!(
                "Develop targeted market access strategy for {}",
                context.therapy_area
            ),
            rationale: format!("Market growing at {cagr} CAGR"),
            priority: Level::Medium,
        });
    }

    if let Some(trade) = analysed(context, ModuleId::Trade) {
        if let (Some("Negative"), Some(source)) = (
            text(trade, "trade_balance_status"),
            text(trade, "top_import_source"),
        ) {
            out.push(Recommendation {
                category: "Supply Chain",
                recommendation: format!("Qualify API suppliers beyond {source}"),
                rationale: "Imports exceed exports".into(),
                priority: Level::Medium,
            });
        }
    }

    let internal_potential = analysed(context, ModuleId::Internal)
        .and_then(|internal| internal.finding("molecule_profile"))
        .and_then(|profile| profile.get("repurposing_potential"))
        .and_then(Value::as_str);
    if let Some(potential @ ("High" | "Very High")) = internal_potential {
        out.push(Recommendation {
            category: "Partnership Strategy",
            recommendation: "Explore co-development partnerships for new indications".into(),
            rationale: format!("Internal assessment rates repurposing potential {potential}"),
            priority: Level::Medium,
        });
    }

    // stable, so rule order breaks ties
    out.sort_by(|a, b| b.priority.cmp(&a.priority));
    out
}

fn risks(context: &ResearchContext) -> Vec<Risk> {
    let mut out = Vec::new();

    if let Some(patent) = analysed(context, ModuleId::Patent) {
        let blocking: Vec<&str> = patent
            .finding("blocking_patents")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|p| p.get("patent_number").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        match text(patent, "fto_risk_level").map(Level::parse) {
            Some(Level::High) => out.push(Risk {
                category: "IP",
                risk: format!("High infringement risk from {}", blocking.join(", ")),
                level: Level::High,
                mitigation: "Design around or license the blocking patents",
            }),
            Some(Level::Medium) => out.push(Risk {
                category: "IP",
                risk: format!("Medium infringement risk from {}", blocking.join(", ")),
                level: Level::Medium,
                mitigation: "Confirm freedom to operate with patent counsel",
            }),
            _ => {}
        }
    }

    if let Some(competitors) = analysed(context, ModuleId::Market)
        .and_then(|market| market.finding("competitors"))
        .and_then(Value::as_u64)
        .filter(|count| *count >= CROWDED_MARKET_COMPETITORS)
    {
        out.push(Risk {
            category: "Commercial",
            risk: format!("Crowded market with {competitors} competitors"),
            level: Level::Medium,
            mitigation: "Differentiate positioning around the new indication",
        });
    }

    if let Some(clinical) = analysed(context, ModuleId::Clinical) {
        if strings(clinical, "repurposing_opportunities").is_empty() {
            out.push(Risk {
                category: "Development",
                risk: "No registered trial shows repurposing potential".into(),
                level: Level::Medium,
                mitigation: "Validate the new indication preclinically before trial investment",
            });
        }
    }

    for (module, entry) in context.analysis_entries() {
        match entry {
            ModuleEntry::Unavailable(info) => out.push(Risk {
                category: "Evidence",
                risk: format!("{} analysis unavailable ({})", module.title(), info.cause),
                level: Level::Medium,
                mitigation: "Re-run the module before relying on this report",
            }),
            ModuleEntry::Available(record) if record.degraded => out.push(Risk {
                category: "Evidence",
                risk: format!("{} summary reflects raw data only", module.title()),
                level: Level::Low,
                mitigation: "Review the structured findings directly",
            }),
            ModuleEntry::Available(_) => {}
        }
    }

    out
}

fn next_steps(context: &ResearchContext, recommendations: &[Recommendation]) -> Vec<String> {
    let mut steps = Vec::new();
    for (module, entry) in context.analysis_entries() {
        match entry {
            ModuleEntry::Unavailable(info) => steps.push(format!(
                "Complete {} analysis (failed: {})",
                module.title(),
                info.cause
            )),
            ModuleEntry::Available(record) if record.no_data => steps.push(format!(
                "Source {} data from an alternative provider",
                module.title().to_lowercase()
            )),
            ModuleEntry::Available(_) => {}
        }
    }
    steps.extend(
        recommendations
            .iter()
            .filter(|rec| rec.priority == Level::High)
            .take(MAX_PRIORITY_STEPS)
            .map(|rec| rec.recommendation.clone()),
    );
    if steps.is_empty() {
        steps.push("Develop commercial launch strategy".into());
    }
    steps
}

fn roadmap(steps: &[String], recommendations: &[Recommendation]) -> Value {
    let follow_up: Vec<&str> = recommendations
        .iter()
        .filter(|rec| rec.priority < Level::High)
        .map(|rec| rec.recommendation.as_str())
        .collect();
    json!({
        "phase_1": {"timeline": "Months 1-6", "activities": steps},
        "phase_2": {"timeline": "Months 7-18", "activities": follow_up},
        "phase_3": {
            "timeline": "Months 19-36",
            "activities": ["Prepare regulatory submissions", "Execute market access plans"],
        },
    })
}

/// Recommendations, risks, next steps and a phased roadmap for the report.
pub(crate) fn assess(context: &ResearchContext) -> Findings {
    let recommendations = recommendations(context);
    let risks = risks(context);
    let overall = risks
        .iter()
        .map(|risk| risk.level)
        .max()
        .unwrap_or(Level::Low);
    let steps = next_steps(context, &recommendations);

    let mut findings = Findings::new();
    findings.insert(
        "implementation_roadmap".into(),
        roadmap(&steps, &recommendations),
    );
    findings.insert("overall_risk_level".into(), json!(overall));
    findings.insert("recommended_next_steps".into(), json!(steps));
    findings.insert("risk_assessment".into(), json!(risks));
    findings.insert("strategic_recommendations".into(), json!(recommendations));
    findings
}
