//! Aggregated per-module results handed to report synthesis and rendering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorInfo;
use crate::record::ResultRecord;
use crate::request::{ModuleId, ResearchRequest};

/// Outcome of one module as seen by the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModuleEntry {
    Available(ResultRecord),
    /// The module could not be completed; the report must say so.
    Unavailable(ErrorInfo),
}

impl ModuleEntry {
    pub fn record(&self) -> Option<&ResultRecord> {
        match self {
            ModuleEntry::Available(record) => Some(record),
            ModuleEntry::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ModuleEntry::Available(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchContext {
    pub molecule: String,
    pub therapy_area: String,
    pub goal: String,
    entries: BTreeMap<ModuleId, ModuleEntry>,
}

impl ResearchContext {
    pub fn for_request(request: &ResearchRequest) -> Self {
        Self {
            molecule: request.molecule().to_string(),
            therapy_area: request.therapy_area().to_string(),
            goal: request.goal().to_string(),
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, module: ModuleId, entry: ModuleEntry) {
        self.entries.insert(module, entry);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, module: ModuleId) -> Option<&ModuleEntry> {
        self.entries.get(&module)
    }

    pub fn entries(&self) -> impl Iterator<Item = (ModuleId, &ModuleEntry)> {
        self.entries.iter().map(|(module, entry)| (*module, entry))
    }

    /// Entries of analysis modules, excluding the synthesised report.
    pub fn analysis_entries(&self) -> impl Iterator<Item = (ModuleId, &ModuleEntry)> {
        self.entries().filter(|(module, _)| module.is_analysis())
    }

    pub fn available(&self) -> impl Iterator<Item = &ResultRecord> {
        self.analysis_entries().filter_map(|(_, entry)| entry.record())
    }

    pub fn unavailable(&self) -> impl Iterator<Item = &ErrorInfo> {
        self.analysis_entries().filter_map(|(_, entry)| match entry {
            ModuleEntry::Unavailable(info) => Some(info),
            ModuleEntry::Available(_) => None,
        })
    }

    pub fn report(&self) -> Option<&ResultRecord> {
        self.entries
            .get(&ModuleId::Report)
            .and_then(ModuleEntry::record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
