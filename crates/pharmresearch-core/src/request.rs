//! Research request and the closed set of research modules.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ResearchError;

/// One research dimension served by exactly one specialist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleId {
    Market,
    Trade,
    Patent,
    Clinical,
    Internal,
    Web,
    /// Cross-module synthesis; never selectable on its own.
    Report,
}

impl ModuleId {
    pub const ALL: [ModuleId; 7] = [
        ModuleId::Market,
        ModuleId::Trade,
        ModuleId::Patent,
        ModuleId::Clinical,
        ModuleId::Internal,
        ModuleId::Web,
        ModuleId::Report,
    ];

    /// Modules a caller may select.
    pub const ANALYSIS: [ModuleId; 6] = [
        ModuleId::Market,
        ModuleId::Trade,
        ModuleId::Patent,
        ModuleId::Clinical,
        ModuleId::Internal,
        ModuleId::Web,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleId::Market => "market",
            ModuleId::Trade => "trade",
            ModuleId::Patent => "patent",
            ModuleId::Clinical => "clinical",
            ModuleId::Internal => "internal",
            ModuleId::Web => "web",
            ModuleId::Report => "report",
        }
    }

    /// Human-readable title used in reports and progress output.
    pub fn title(self) -> &'static str {
        match self {
            ModuleId::Market => "Market Intelligence",
            ModuleId::Trade => "Trade Trends",
            ModuleId::Patent => "Patent Landscape",
            ModuleId::Clinical => "Clinical Trials",
            ModuleId::Internal => "Internal Knowledge",
            ModuleId::Web => "Web Intelligence",
            ModuleId::Report => "Report Synthesis",
        }
    }

    pub fn is_analysis(self) -> bool {
        self != ModuleId::Report
    }

    /// Position in [`ModuleId::ALL`].
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleId {
    type Err = ResearchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "market" | "iqvia" => Ok(ModuleId::Market),
            "trade" | "exim" => Ok(ModuleId::Trade),
            "patent" | "patents" => Ok(ModuleId::Patent),
            "clinical" | "trials" => Ok(ModuleId::Clinical),
            "internal" => Ok(ModuleId::Internal),
            "web" => Ok(ModuleId::Web),
            "report" => Ok(ModuleId::Report),
            other => Err(ResearchError::invalid_request(format!(
                "unrecognized research module '{other}'"
            ))),
        }
    }
}

/// A research request as submitted by the caller. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    molecule: String,
    therapy_area: String,
    goal: String,
    selected_modules: BTreeSet<ModuleId>,
}

impl ResearchRequest {
    pub fn new(
        molecule: impl Into<String>,
        therapy_area: impl Into<String>,
        goal: impl Into<String>,
        modules: impl IntoIterator<Item = ModuleId>,
    ) -> Self {
        Self {
            molecule: molecule.into(),
            therapy_area: therapy_area.into(),
            goal: goal.into(),
            selected_modules: modules.into_iter().collect(),
        }
    }

    /// Build a request from module slugs, rejecting anything outside the module set.
    pub fn from_slugs<I, S>(
        molecule: impl Into<String>,
        therapy_area: impl Into<String>,
        goal: impl Into<String>,
        slugs: I,
    ) -> Result<Self, ResearchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let modules = slugs
            .into_iter()
            .map(|slug| slug.as_ref().parse::<ModuleId>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self::new(molecule, therapy_area, goal, modules))
    }

    pub fn molecule(&self) -> &str {
        &self.molecule
    }

    pub fn therapy_area(&self) -> &str {
        &self.therapy_area
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn selected_modules(&self) -> &BTreeSet<ModuleId> {
        &self.selected_modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_and_aliases_parse() {
        assert_eq!("market".parse::<ModuleId>().unwrap(), ModuleId::Market);
        assert_eq!(" EXIM ".parse::<ModuleId>().unwrap(), ModuleId::Trade);
        assert_eq!("trials".parse::<ModuleId>().unwrap(), ModuleId::Clinical);
    }

    #[test]
    fn unknown_slug_is_invalid_request() {
        let err = ResearchRequest::from_slugs("metformin", "oncology", "goal", ["market", "pricing"])
            .unwrap_err();
        assert!(matches!(err, ResearchError::InvalidRequest(msg) if msg.contains("pricing")));
    }

    #[test]
    fn index_matches_all_order() {
        for (idx, module) in ModuleId::ALL.iter().enumerate() {
            assert_eq!(module.index(), idx);
        }
        assert!(ModuleId::ANALYSIS.iter().all(|m| m.is_analysis()));
        assert!(!ModuleId::Report.is_analysis());
    }
}
