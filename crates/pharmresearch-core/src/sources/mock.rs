//! Deterministic in-process sources carrying the sample pharmaceutical data set.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{DataSource, RawData, SourceError};

fn key(value: &str) -> String {
    value.trim().to_lowercase()
}

fn found(payload: Value, source: &str) -> Result<RawData, SourceError> {
    Ok(RawData::new(payload, vec![source.to_string()]))
}

fn molecule_profile(molecule: &str) -> Option<Value> {
    let profile = match key(molecule).as_str() {
        "ivermectin" => json!({
            "generic_name": "Ivermectin",
            "brand_names": ["Stromectol", "Soolantra", "Ivomec"],
            "therapeutic_class": "Antiparasitic",
            "original_indication": "Parasitic infections",
            "mechanism": "GABA agonist",
            "repurposing_potential": "High"
        }),
        "metformin" => json!({
            "generic_name": "Metformin",
            "brand_names": ["Glucophage", "Fortamet", "Glumetza"],
            "therapeutic_class": "Antidiabetic",
            "original_indication": "Type 2 diabetes",
            "mechanism": "AMPK activation",
            "repurposing_potential": "Very High"
        }),
        "remdesivir" => json!({
            "generic_name": "Remdesivir",
            "brand_names": ["Veklury"],
            "therapeutic_class": "Antiviral",
            "original_indication": "COVID-19",
            "mechanism": "RNA polymerase inhibitor",
            "repurposing_potential": "Medium"
        }),
        _ => return None,
    };
    Some(profile)
}

/// Therapy-area market sizing.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockMarketData;

#[async_trait]
impl DataSource for MockMarketData {
    fn name(&self) -> &str {
        "IQVIA market data (sample)"
    }

    async fn fetch(&self, _molecule: &str, therapy_area: &str) -> Result<RawData, SourceError> {
        let payload = match key(therapy_area).as_str() {
            "respiratory" => json!({
                "market_size": "2.1B",
                "cagr": "8.2%",
                "competitors": 12,
                "growth_drivers": ["Aging population", "Pollution", "Lifestyle factors"],
                "key_players": ["GSK", "AstraZeneca", "Novartis"],
                "therapy_breakdown": {
                    "Asthma": {"market_share": "35%", "growth": "6.5%"},
                    "COPD": {"market_share": "28%", "growth": "9.1%"},
                    "COVID-19": {"market_share": "15%", "growth": "12.3%"}
                }
            }),
            "oncology" => json!({
                "market_size": "15.3B",
                "cagr": "12.7%",
                "competitors": 45,
                "growth_drivers": ["Innovative therapies", "Early diagnosis", "Personalized medicine"],
                "key_players": ["Roche", "Merck", "Bristol-Myers Squibb"],
                "therapy_breakdown": {
                    "Immunotherapy": {"market_share": "42%", "growth": "18.5%"},
                    "Targeted Therapy": {"market_share": "35%", "growth": "14.2%"},
                    "Chemotherapy": {"market_share": "23%", "growth": "2.1%"}
                }
            }),
            "cardiology" => json!({
                "market_size": "8.7B",
                "cagr": "6.8%",
                "competitors": 28,
                "growth_drivers": ["Sedentary lifestyle", "Dietary habits", "Hypertension prevalence"],
                "key_players": ["Pfizer", "Novartis", "Bayer"],
                "therapy_breakdown": {
                    "Anticoagulants": {"market_share": "32%", "growth": "7.8%"},
                    "Beta-blockers": {"market_share": "25%", "growth": "3.2%"},
                    "ACE Inhibitors": {"market_share": "18%", "growth": "4.5%"}
                }
            }),
            other => {
                return Err(SourceError::NotFound(format!(
                    "no market data for therapy area '{other}'"
                )));
            }
        };
        found(payload, self.name())
    }
}

/// Export/import flows for active ingredients.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockTradeData;

#[async_trait]
impl DataSource for MockTradeData {
    fn name(&self) -> &str {
        "EXIM trade data (sample)"
    }

    async fn fetch(&self, molecule: &str, _therapy_area: &str) -> Result<RawData, SourceError> {
        let payload = match key(molecule).as_str() {
            "ivermectin" => json!({
                "export_data": [
                    {"country": "USA", "volume_kg": 15000, "value_usd": 4500000, "year": 2023},
                    {"country": "Germany", "volume_kg": 8000, "value_usd": 2400000, "year": 2023}
                ],
                "import_data": [
                    {"country": "China", "volume_kg": 12000, "value_usd": 3000000, "year": 2023},
                    {"country": "India", "volume_kg": 9000, "value_usd": 2250000, "year": 2023}
                ]
            }),
            "metformin" => json!({
                "export_data": [
                    {"country": "USA", "volume_kg": 50000, "value_usd": 7500000, "year": 2023},
                    {"country": "UK", "volume_kg": 25000, "value_usd": 3750000, "year": 2023}
                ],
                "import_data": [
                    {"country": "India", "volume_kg": 40000, "value_usd": 5000000, "year": 2023},
                    {"country": "China", "volume_kg": 35000, "value_usd": 4375000, "year": 2023}
                ]
            }),
            other => {
                return Err(SourceError::NotFound(format!(
                    "no trade flows recorded for '{other}'"
                )));
            }
        };
        found(payload, self.name())
    }
}

/// Patent filings per molecule.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockPatentSearch;

#[async_trait]
impl DataSource for MockPatentSearch {
    fn name(&self) -> &str {
        "USPTO patent search (sample)"
    }

    async fn fetch(&self, molecule: &str, _therapy_area: &str) -> Result<RawData, SourceError> {
        let patents = match key(molecule).as_str() {
            "ivermectin" => json!([{
                "id": "US20210000000A1",
                "title": "Use of Ivermectin in Treatment of Respiratory Diseases",
                "patent_type": "Method-of-use",
                "expiry": "2035-12-31",
                "status": "Active",
                "assignee": "Pharma Innovations Inc.",
                "filing_date": "2021-01-15",
                "jurisdiction": "USA",
                "claims": 25,
                "citation_count": 45,
                "infringement_risk": "Medium"
            }]),
            "metformin" => json!([{
                "id": "US20220000000A1",
                "title": "Metformin for Cancer Treatment and Prevention",
                "patent_type": "Method-of-use",
                "expiry": "2040-05-15",
                "status": "Pending",
                "assignee": "OncoResearch Foundation",
                "filing_date": "2022-02-28",
                "jurisdiction": "USA",
                "claims": 42,
                "citation_count": 67,
                "infringement_risk": "Low"
            }]),
            other => {
                return Err(SourceError::NotFound(format!(
                    "no patents on file for '{other}'"
                )));
            }
        };
        found(json!({ "patents": patents }), self.name())
    }
}

/// Registered clinical trials per molecule.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockClinicalTrials;

#[async_trait]
impl DataSource for MockClinicalTrials {
    fn name(&self) -> &str {
        "ClinicalTrials.gov (sample)"
    }

    async fn fetch(&self, molecule: &str, _therapy_area: &str) -> Result<RawData, SourceError> {
        let trials = match key(molecule).as_str() {
            "ivermectin" => json!([{
                "nct_id": "NCT04834115",
                "phase": "Phase 3",
                "indication": "COVID-19",
                "status": "Completed",
                "sponsor": "University of Oxford",
                "participants": 1500,
                "results": "No significant benefit observed",
                "repurposing_potential": "Low"
            }]),
            "metformin" => json!([{
                "nct_id": "NCT04129957",
                "phase": "Phase 3",
                "indication": "Breast Cancer",
                "status": "Active, not recruiting",
                "sponsor": "Dana-Farber Cancer Institute",
                "participants": 3270,
                "results": "Preliminary: 15% improvement in DFS",
                "repurposing_potential": "High"
            }]),
            "remdesivir" => json!([{
                "nct_id": "NCT04280705",
                "phase": "Phase 3",
                "indication": "COVID-19",
                "status": "Completed",
                "sponsor": "Gilead Sciences",
                "participants": 1062,
                "results": "5-day faster recovery vs placebo",
                "repurposing_potential": "Medium"
            }]),
            other => {
                return Err(SourceError::NotFound(format!(
                    "no registered trials for '{other}'"
                )));
            }
        };
        found(json!({ "trials": trials }), self.name())
    }
}

/// Internal research notes built on the molecule database.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockInternalKnowledge;

#[async_trait]
impl DataSource for MockInternalKnowledge {
    fn name(&self) -> &str {
        "Internal knowledge base (sample)"
    }

    async fn fetch(&self, molecule: &str, therapy_area: &str) -> Result<RawData, SourceError> {
        let Some(profile) = molecule_profile(molecule) else {
            return Err(SourceError::NotFound(format!(
                "no internal documents mention '{molecule}'"
            )));
        };
        let name = profile["generic_name"].as_str().unwrap_or(molecule).to_string();
        let payload = json!({
            "molecule": profile,
            "documents": [
                {
                    "title": format!("{name} portfolio review"),
                    "summary": format!("Prior internal assessment of {name} lifecycle options."),
                },
                {
                    "title": format!("{therapy_area} strategy memo"),
                    "summary": format!("Therapy-area priorities relevant to {name} repurposing."),
                }
            ],
            "strategic_notes": [
                "Established safety profile",
                "Known pharmacokinetics",
                "Existing manufacturing capability"
            ]
        });
        found(payload, self.name())
    }
}

/// News and publication search.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockWebSearch;

#[async_trait]
impl DataSource for MockWebSearch {
    fn name(&self) -> &str {
        "Web search (sample)"
    }

    async fn fetch(&self, molecule: &str, therapy_area: &str) -> Result<RawData, SourceError> {
        let Some(profile) = molecule_profile(molecule) else {
            return Err(SourceError::NotFound(format!(
                "no web coverage found for '{molecule}'"
            )));
        };
        let name = profile["generic_name"].as_str().unwrap_or(molecule).to_string();
        let payload = json!({
            "articles": [
                {
                    "headline": format!("Researchers revisit {name} for {therapy_area} indications"),
                    "publisher": "PharmaTimes",
                },
                {
                    "headline": format!("{name} repurposing potential rated {}", profile["repurposing_potential"].as_str().unwrap_or("unknown")),
                    "publisher": "FiercePharma",
                }
            ]
        });
        found(payload, self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn market_lookup_is_case_insensitive() {
        let raw = MockMarketData.fetch("metformin", "Oncology").await.unwrap();
        assert_eq!(raw.payload["market_size"], "15.3B");
        assert_eq!(raw.sources, vec!["IQVIA market data (sample)".to_string()]);
    }

    #[tokio::test]
    async fn unknown_molecule_is_not_found() {
        let err = MockPatentSearch.fetch("aspirin", "cardiology").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }
}
