//! Specialist agents, one per research module.
//!
//! The set of specialists is closed: six analysts that retrieve and summarise
//! one research dimension each, and the synthesizer that turns their results
//! into the final report.

mod analyst;
mod findings;
mod strategy;
mod synthesizer;

use std::time::Duration;

use crate::context::ResearchContext;
use crate::error::ErrorInfo;
use crate::record::ResultRecord;
use crate::request::{ModuleId, ResearchRequest};

pub use analyst::Analyst;
pub use synthesizer::Synthesizer;

/// Deadlines applied inside a single specialist invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialistTimeouts {
    pub retrieval: Duration,
    pub model: Duration,
}

impl Default for SpecialistTimeouts {
    fn default() -> Self {
        Self {
            retrieval: Duration::from_secs(10),
            model: Duration::from_secs(20),
        }
    }
}

#[derive(Clone)]
pub enum Specialist {
    MarketIntelligence(Analyst),
    TradeTrends(Analyst),
    PatentLandscape(Analyst),
    ClinicalTrials(Analyst),
    InternalKnowledge(Analyst),
    WebIntelligence(Analyst),
    ReportSynthesis(Synthesizer),
}

impl Specialist {
    /// Role label used in prompts and logs.
    pub(crate) fn role_for(module: ModuleId) -> &'static str {
        match module {
            ModuleId::Market => "Market Intelligence Analyst",
            ModuleId::Trade => "EXIM Trade Analyst",
            ModuleId::Patent => "Pharmaceutical Intellectual Property Strategist",
            ModuleId::Clinical => "Clinical Development Analyst",
            ModuleId::Internal => "Internal Knowledge Curator",
            ModuleId::Web => "Web Intelligence Analyst",
            ModuleId::Report => "Pharmaceutical Research Report Specialist",
        }
    }

    pub fn module(&self) -> ModuleId {
        match self {
            Specialist::MarketIntelligence(a)
            | Specialist::TradeTrends(a)
            | Specialist::PatentLandscape(a)
            | Specialist::ClinicalTrials(a)
            | Specialist::InternalKnowledge(a)
            | Specialist::WebIntelligence(a) => a.module(),
            Specialist::ReportSynthesis(_) => ModuleId::Report,
        }
    }

    pub fn role(&self) -> &'static str {
        Self::role_for(self.module())
    }

    /// Data source queried by an analyst; the synthesizer has none.
    pub fn source_name(&self) -> Option<&str> {
        match self {
            Specialist::MarketIntelligence(a)
            | Specialist::TradeTrends(a)
            | Specialist::PatentLandscape(a)
            | Specialist::ClinicalTrials(a)
            | Specialist::InternalKnowledge(a)
            | Specialist::WebIntelligence(a) => Some(a.source_name()),
            Specialist::ReportSynthesis(_) => None,
        }
    }

    /// Run the specialist once. `context` is only consulted by the report.
    pub async fn run(
        &self,
        request: &ResearchRequest,
        context: &ResearchContext,
    ) -> Result<ResultRecord, ErrorInfo> {
        match self {
            Specialist::MarketIntelligence(a)
            | Specialist::TradeTrends(a)
            | Specialist::PatentLandscape(a)
            | Specialist::ClinicalTrials(a)
            | Specialist::InternalKnowledge(a)
            | Specialist::WebIntelligence(a) => a.run(request).await,
            Specialist::ReportSynthesis(synthesizer) => synthesizer.run(request, context).await,
        }
    }
}

impl std::fmt::Debug for Specialist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Specialist")
            .field("module", &self.module())
            .field("role", &self.role())
            .finish()
    }
}
