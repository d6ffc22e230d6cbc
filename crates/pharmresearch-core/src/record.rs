use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorInfo;
use crate::request::ModuleId;

/// Findings keyed by finding name.
pub type Findings = BTreeMap<String, Value>;

/// Output of one specialist invocation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub module: ModuleId,
    pub summary: String,
    pub structured_findings: Findings,
    pub source_attribution: Vec<String>,
    /// Retrieval succeeded but summarisation did not.
    #[serde(default)]
    pub degraded: bool,
    /// The source holds no data for this request.
    #[serde(default)]
    pub no_data: bool,
}

impl ResultRecord {
    pub fn new(
        module: ModuleId,
        summary: impl Into<String>,
        structured_findings: Findings,
        source_attribution: Vec<String>,
    ) -> Self {
        Self {
            module,
            summary: summary.into(),
            structured_findings,
            source_attribution,
            degraded: false,
            no_data: false,
        }
    }

    /// Record for a module whose summarisation failed after retrieval succeeded.
    pub fn degraded(
        module: ModuleId,
        reason: &str,
        structured_findings: Findings,
        source_attribution: Vec<String>,
    ) -> Self {
        let summary = format!(
            "Summary unavailable ({reason}); findings below reflect raw {} data only.",
            module.title().to_lowercase()
        );
        Self {
            degraded: true,
            ..Self::new(module, summary, structured_findings, source_attribution)
        }
    }

    /// Legitimate empty result built from a data-not-found failure.
    pub fn no_data(missing: &ErrorInfo) -> Self {
        let module = missing.module;
        Self {
            no_data: true,
            ..Self::new(
                module,
                format!(
                    "No {} data found: {}",
                    module.title().to_lowercase(),
                    missing.message
                ),
                Findings::new(),
                Vec::new(),
            )
        }
    }

    pub fn finding(&self, key: &str) -> Option<&Value> {
        self.structured_findings.get(key)
    }
}
