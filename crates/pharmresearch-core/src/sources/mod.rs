//! Outbound retrieval boundary: one data source per analysis module.

mod mock;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::request::ModuleId;

pub use mock::{
    MockClinicalTrials, MockInternalKnowledge, MockMarketData, MockPatentSearch, MockTradeData,
    MockWebSearch,
};

/// Raw payload returned by a data source.
#[derive(Debug, Clone)]
pub struct RawData {
    pub payload: Value,
    /// Identifiers of the sources the payload came from, for citation.
    pub sources: Vec<String>,
}

impl RawData {
    pub fn new(payload: Value, sources: Vec<String>) -> Self {
        Self { payload, sources }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The source answered but holds nothing for the request.
    #[error("data not found: {0}")]
    NotFound(String),
    /// The call failed in a way another attempt may fix.
    #[error("transient source failure: {0}")]
    Transient(String),
}

/// External retrieval function for one module.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Identifier used in logs and attribution.
    fn name(&self) -> &str;

    async fn fetch(&self, molecule: &str, therapy_area: &str) -> Result<RawData, SourceError>;
}

/// Data sources keyed by analysis module.
#[derive(Clone, Default)]
pub struct SourceSet {
    sources: HashMap<ModuleId, Arc<dyn DataSource>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The in-process sample data set, covering every analysis module.
    pub fn mock() -> Self {
        Self::new()
            .with(ModuleId::Market, Arc::new(MockMarketData))
            .with(ModuleId::Trade, Arc::new(MockTradeData))
            .with(ModuleId::Patent, Arc::new(MockPatentSearch))
            .with(ModuleId::Clinical, Arc::new(MockClinicalTrials))
            .with(ModuleId::Internal, Arc::new(MockInternalKnowledge))
            .with(ModuleId::Web, Arc::new(MockWebSearch))
    }

    pub fn with(mut self, module: ModuleId, source: Arc<dyn DataSource>) -> Self {
        self.sources.insert(module, source);
        self
    }

    pub fn get(&self, module: ModuleId) -> Option<Arc<dyn DataSource>> {
        self.sources.get(&module).cloned()
    }
}

impl std::fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self
            .sources
            .iter()
            .map(|(module, source)| format!("{module}={}", source.name()))
            .collect();
        names.sort();
        f.debug_struct("SourceSet").field("sources", &names).finish()
    }
}
