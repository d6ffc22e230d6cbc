//! Structured findings derived from raw source payloads, one extractor per module.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};

use crate::record::Findings;
use crate::request::ModuleId;

const TRADE_GROWTH_THRESHOLD_USD: f64 = 1_000_000.0;
const CROWDED_PATENT_LANDSCAPE: usize = 5;

/// Extract findings for `module` from its raw payload.
///
/// Never returns an empty map for a non-null payload: a `data_points` count is
/// always present.
pub(crate) fn extract(module: ModuleId, payload: &Value) -> Findings {
    let mut findings = match module {
        ModuleId::Market => market(payload),
        ModuleId::Trade => trade(payload),
        ModuleId::Patent => patent(payload),
        ModuleId::Clinical => clinical(payload),
        ModuleId::Internal => internal(payload),
        ModuleId::Web => web(payload),
        ModuleId::Report => Findings::new(),
    };
    findings.insert("data_points".into(), json!(data_points(payload)));
    findings
}

fn data_points(payload: &Value) -> usize {
    match payload {
        Value::Null => 0,
        Value::Array(items) => items.len(),
        Value::Object(fields) => fields
            .values()
            .map(|value| match value {
                Value::Array(items) => items.len(),
                Value::Object(inner) => inner.len(),
                Value::Null => 0,
                _ => 1,
            })
            .sum(),
        _ => 1,
    }
}

fn copy_fields(payload: &Value, keys: &[&str], findings: &mut Findings) {
    for key in keys {
        if let Some(value) = payload.get(*key).filter(|v| !v.is_null()) {
            findings.insert((*key).to_string(), value.clone());
        }
    }
}

fn items<'a>(payload: &'a Value, key: &str) -> &'a [Value] {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn text<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key).and_then(Value::as_str)
}

fn distribution<'a>(values: impl Iterator<Item = &'a str>) -> Value {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    json!(counts)
}

fn market(payload: &Value) -> Findings {
    let mut findings = Findings::new();
    copy_fields(
        payload,
        &[
            "market_size",
            "cagr",
            "competitors",
            "key_players",
            "growth_drivers",
        ],
        &mut findings,
    );

    if let Some(breakdown) = payload.get("therapy_breakdown").and_then(Value::as_object) {
        let rows: Vec<Value> = breakdown
            .iter()
            .map(|(therapy, metrics)| {
                json!({
                    "therapy": therapy,
                    "market_share": metrics.get("market_share").cloned().unwrap_or(Value::Null),
                    "growth": metrics.get("growth").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        findings.insert("therapy_breakdown".into(), Value::Array(rows));
    }
    findings
}

fn flow_total(flows: &[Value]) -> f64 {
    flows
        .iter()
        .filter_map(|flow| flow.get("value_usd").and_then(Value::as_f64))
        .sum()
}

fn largest_flow(flows: &[Value]) -> Option<&str> {
    flows
        .iter()
        .filter_map(|flow| Some((text(flow, "country")?, flow.get("value_usd")?.as_f64()?)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(country, _)| country)
}

fn trade(payload: &Value) -> Findings {
    let exports = items(payload, "export_data");
    let imports = items(payload, "import_data");
    let total_export = flow_total(exports);
    let total_import = flow_total(imports);
    let balance = total_export - total_import;

    let mut findings = Findings::new();
    findings.insert("total_export_value_usd".into(), json!(total_export));
    findings.insert("total_import_value_usd".into(), json!(total_import));
    findings.insert("trade_balance_usd".into(), json!(balance));
    findings.insert(
        "trade_balance_status".into(),
        json!(if balance > 0.0 { "Positive" } else { "Negative" }),
    );
    if let Some(country) = largest_flow(exports) {
        findings.insert("top_export_market".into(), json!(country));
    }
    if let Some(country) = largest_flow(imports) {
        findings.insert("top_import_source".into(), json!(country));
    }
    findings.insert(
        "growth_trend".into(),
        json!(if total_export > TRADE_GROWTH_THRESHOLD_USD {
            "Increasing"
        } else {
            "Stable"
        }),
    );
    findings
}

fn freedom_to_operate(patents: &[Value]) -> &'static str {
    let risks: Vec<&str> = patents
        .iter()
        .filter_map(|patent| text(patent, "infringement_risk"))
        .collect();
    if risks.contains(&"High") {
        "Challenging"
    } else if risks.contains(&"Medium") || patents.len() >= CROWDED_PATENT_LANDSCAPE {
        "Moderate"
    } else {
        "Favorable"
    }
}

fn white_space(patents: &[Value]) -> Vec<&'static str> {
    let types: BTreeSet<&str> = patents
        .iter()
        .filter_map(|patent| text(patent, "patent_type"))
        .collect();

    let mut opportunities = vec![
        "Combination therapies with newer agents",
        "Pediatric formulations",
        "Novel delivery mechanisms",
    ];
    if !types.contains("Formulation") {
        opportunities.push("Advanced formulation technologies");
    }
    if !types.contains("Method-of-use") {
        opportunities.push("New therapeutic methods and uses");
    }
    opportunities
}

/// Overall infringement exposure and the patents behind it.
fn fto_risk(patents: &[Value]) -> (&'static str, Vec<Value>) {
    let blocking: Vec<Value> = patents
        .iter()
        .filter_map(|patent| {
            let risk = text(patent, "infringement_risk")?;
            matches!(risk, "High" | "Medium").then(|| {
                json!({
                    "patent_number": text(patent, "id").unwrap_or("unknown"),
                    "risk_level": risk,
                })
            })
        })
        .collect();
    let level = if blocking.iter().any(|p| p["risk_level"] == "High") {
        "High"
    } else if blocking.is_empty() {
        "Low"
    } else {
        "Medium"
    };
    (level, blocking)
}

fn fto_recommendations(blocking: &[Value]) -> Vec<&'static str> {
    if blocking.is_empty() {
        return vec!["FTO appears favorable for development"];
    }
    vec![
        "Conduct detailed FTO analysis with patent counsel",
        "Consider design-around strategies for key patents",
        "Explore licensing opportunities for blocking IP",
        "Evaluate patent invalidation possibilities",
    ]
}

/// Filing gaps in the existing portfolio.
fn ip_recommendations(patents: &[Value]) -> Vec<Value> {
    if patents.is_empty() {
        return vec![json!({
            "type": "IP Protection",
            "priority": "High",
            "recommendation": "File method-of-use patents for new indications",
            "rationale": "No existing patent protection identified",
        })];
    }

    let types: BTreeSet<&str> = patents
        .iter()
        .filter_map(|patent| text(patent, "patent_type"))
        .collect();
    let mut recommendations = Vec::new();
    if !types.contains("Method-of-use") {
        recommendations.push(json!({
            "type": "Method-of-use",
            "priority": "High",
            "recommendation": "File patents for new therapeutic uses",
            "rationale": "Core opportunity for drug repurposing",
        }));
    }
    if !types.contains("Formulation") {
        recommendations.push(json!({
            "type": "Formulation IP",
            "priority": "Medium",
            "recommendation": "Develop and patent novel formulations",
            "rationale": "Gap in formulation patent coverage",
        }));
    }
    recommendations
}

fn patent(payload: &Value) -> Findings {
    let patents = items(payload, "patents");
    let with_status =
        |status: &str| patents.iter().filter(|p| text(p, "status") == Some(status)).count();
    let assignees: BTreeSet<&str> = patents.iter().filter_map(|p| text(p, "assignee")).collect();

    let mut findings = Findings::new();
    findings.insert("total_patents".into(), json!(patents.len()));
    findings.insert("active_patents".into(), json!(with_status("Active")));
    findings.insert("pending_patents".into(), json!(with_status("Pending")));
    findings.insert("assignees".into(), json!(assignees));
    if let Some(latest) = patents.iter().filter_map(|p| text(p, "expiry")).max() {
        findings.insert("latest_expiry".into(), json!(latest));
    }
    findings.insert(
        "freedom_to_operate".into(),
        json!(freedom_to_operate(patents)),
    );
    findings.insert(
        "white_space_opportunities".into(),
        json!(white_space(patents)),
    );

    let (risk_level, blocking) = fto_risk(patents);
    findings.insert(
        "fto_recommendations".into(),
        json!(fto_recommendations(&blocking)),
    );
    findings.insert("fto_risk_level".into(), json!(risk_level));
    findings.insert("blocking_patents".into(), Value::Array(blocking));
    findings.insert(
        "ip_recommendations".into(),
        Value::Array(ip_recommendations(patents)),
    );
    findings
}

fn clinical(payload: &Value) -> Findings {
    let trials = items(payload, "trials");
    let participants: Vec<f64> = trials
        .iter()
        .filter_map(|trial| trial.get("participants").and_then(Value::as_f64))
        .collect();
    let average = if participants.is_empty() {
        0.0
    } else {
        participants.iter().sum::<f64>() / participants.len() as f64
    };

    let opportunities: Vec<String> = trials
        .iter()
        .filter(|trial| {
            matches!(
                text(trial, "repurposing_potential"),
                Some("High") | Some("Medium")
            )
        })
        .map(|trial| {
            format!(
                "{} ({})",
                text(trial, "indication").unwrap_or("unknown indication"),
                text(trial, "phase").unwrap_or("unknown phase")
            )
        })
        .collect();

    let mut findings = Findings::new();
    findings.insert("total_trials".into(), json!(trials.len()));
    findings.insert(
        "phases".into(),
        distribution(trials.iter().filter_map(|t| text(t, "phase"))),
    );
    findings.insert(
        "status_distribution".into(),
        distribution(trials.iter().filter_map(|t| text(t, "status"))),
    );
    findings.insert(
        "avg_participants".into(),
        json!((average * 10.0).round() / 10.0),
    );
    findings.insert("repurposing_opportunities".into(), json!(opportunities));
    findings
}

fn internal(payload: &Value) -> Findings {
    let documents = items(payload, "documents");
    let titles: Vec<&str> = documents.iter().filter_map(|d| text(d, "title")).collect();

    let mut findings = Findings::new();
    findings.insert("document_count".into(), json!(documents.len()));
    findings.insert("document_titles".into(), json!(titles));
    copy_fields(payload, &["strategic_notes"], &mut findings);
    if let Some(molecule) = payload.get("molecule").and_then(Value::as_object) {
        let profile: Map<String, Value> = molecule
            .iter()
            .filter(|(key, _)| {
                matches!(
                    key.as_str(),
                    "therapeutic_class" | "mechanism" | "repurposing_potential"
                )
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        findings.insert("molecule_profile".into(), Value::Object(profile));
    }
    findings
}

fn web(payload: &Value) -> Findings {
    let articles = items(payload, "articles");
    let headlines: Vec<&str> = articles.iter().filter_map(|a| text(a, "headline")).collect();
    let publishers: BTreeSet<&str> = articles.iter().filter_map(|a| text(a, "publisher")).collect();

    let mut findings = Findings::new();
    findings.insert("article_count".into(), json!(articles.len()));
    findings.insert("headlines".into(), json!(headlines));
    findings.insert("publishers".into(), json!(publishers));
    findings
}
