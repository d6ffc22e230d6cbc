//! Outbound language-model boundary.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("model invocation failed: {0}")]
pub struct ModelError(pub String);

/// A single prompt-in, text-out completion call.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Offline summariser that condenses the bullet points of a prompt.
///
/// Prompts built by the specialists list their evidence as `- ` bullets; the
/// model keeps the first `max_points` of them.
#[derive(Debug, Clone)]
pub struct ExtractiveModel {
    max_points: usize,
}

impl ExtractiveModel {
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points: max_points.max(1),
        }
    }
}

impl Default for ExtractiveModel {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl LanguageModel for ExtractiveModel {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let subject = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Subject: "))
            .unwrap_or("the request")
            .trim();

        let points: Vec<&str> = prompt
            .lines()
            .filter_map(|line| line.trim_start().strip_prefix("- "))
            .map(str::trim)
            .filter(|point| !point.is_empty())
            .take(self.max_points)
            .collect();

        if points.is_empty() {
            return Err(ModelError(format!("no evidence to summarise for {subject}")));
        }

        Ok(format!("{subject}: {}.", points.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_leading_bullets() {
        let model = ExtractiveModel::new(2);
        let prompt = "Subject: Market Intelligence for metformin\n\
                      Evidence:\n- market_size: 15.3B\n- cagr: 12.7%\n- competitors: 45\n";
        let text = model.complete(prompt).await.unwrap();
        assert_eq!(
            text,
            "Market Intelligence for metformin: market_size: 15.3B; cagr: 12.7%."
        );
    }

    #[tokio::test]
    async fn prompt_without_evidence_fails() {
        let err = ExtractiveModel::default()
            .complete("Subject: nothing")
            .await
            .unwrap_err();
        assert!(err.0.contains("nothing"));
    }
}
