//! Fixed mapping from research module to the specialist that serves it.

use std::sync::Arc;

use crate::agents::{Analyst, Specialist, SpecialistTimeouts, Synthesizer};
use crate::error::ResearchError;
use crate::llm::LanguageModel;
use crate::request::ModuleId;
use crate::sources::SourceSet;

/// Every module resolves to exactly one specialist; built once per run.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    /// Indexed by [`ModuleId::index`].
    specialists: [Specialist; 7],
}

impl AgentRegistry {
    /// Wire every analysis module to its data source and the shared model.
    ///
    /// Fails when `sources` lacks a source for any analysis module.
    pub fn new(
        sources: &SourceSet,
        model: Arc<dyn LanguageModel>,
        timeouts: SpecialistTimeouts,
    ) -> Result<Self, ResearchError> {
        let analyst = |module: ModuleId| -> Result<Analyst, ResearchError> {
            let source = sources.get(module).ok_or_else(|| {
                ResearchError::InvalidConfiguration(format!(
                    "no data source registered for module '{module}'"
                ))
            })?;
            Ok(Analyst::new(
                module,
                Specialist::role_for(module),
                source,
                Arc::clone(&model),
                timeouts,
            ))
        };

        let specialists = [
            Specialist::MarketIntelligence(analyst(ModuleId::Market)?),
            Specialist::TradeTrends(analyst(ModuleId::Trade)?),
            Specialist::PatentLandscape(analyst(ModuleId::Patent)?),
            Specialist::ClinicalTrials(analyst(ModuleId::Clinical)?),
            Specialist::InternalKnowledge(analyst(ModuleId::Internal)?),
            Specialist::WebIntelligence(analyst(ModuleId::Web)?),
            Specialist::ReportSynthesis(Synthesizer::new(Arc::clone(&model), timeouts)),
        ];

        tracing::debug!(model = model.name(), ?sources, "agent registry ready");
        Ok(Self { specialists })
    }

    pub fn resolve(&self, module: ModuleId) -> &Specialist {
        &self.specialists[module.index()]
    }

    pub fn specialists(&self) -> impl Iterator<Item = &Specialist> {
        self.specialists.iter()
    }
}
