//! Wire types shared between the backend client and the CLI commands.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// One paper recommended to one user, as accepted by
/// `POST /api/papers/recommend`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationRecord {
    pub paper_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<String>,
    #[serde(
        rename = "abstract",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

impl RecommendationRecord {
    pub fn validate(&self) -> Result<()> {
        if self.paper_id.trim().is_empty() {
            bail!("paper_id must not be empty");
        }
        if let Some(score) = self.relevance_score {
            if !score.is_finite() {
                bail!("relevance_score must be a finite number (paper {})", self.paper_id);
            }
        }
        Ok(())
    }
}

/// A row from `GET /api/users/all`. Extra fields are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserSummary {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}
