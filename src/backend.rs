//! HTTP client for the PaperIgnition backend REST API.
//!
//! Only the two endpoints the ops tooling needs are wrapped:
//!
//! | Method | Path | Use |
//! |--------|------|-----|
//! | `GET`  | `/api/users/all` | list users for batch loading |
//! | `POST` | `/api/papers/recommend?username=<u>` | insert one recommendation |

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::config::BackendConfig;
use crate::models::{RecommendationRecord, UserSummary};

pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let token = match &config.token_env {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("{} environment variable not set", var))?,
            ),
            None => None,
        };

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// `GET /api/users/all`
    pub async fn list_users(&self) -> Result<Vec<UserSummary>> {
        let url = format!("{}/api/users/all", self.base_url);
        let resp = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let resp = check_status(resp, "list users").await?;
        let users: Vec<UserSummary> = resp
            .json()
            .await
            .context("Invalid response from /api/users/all")?;
        Ok(users)
    }

    /// `POST /api/papers/recommend?username=<u>`
    pub async fn add_recommendation(
        &self,
        username: &str,
        record: &RecommendationRecord,
    ) -> Result<()> {
        record.validate()?;
        let url = format!("{}/api/papers/recommend", self.base_url);
        let resp = self
            .authorize(self.client.post(&url))
            .query(&[("username", username)])
            .json(record)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_status(
            resp,
            &format!("recommend {} to {}", record.paper_id, username),
        )
        .await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    bail!(
        "{} failed (HTTP {}): {}",
        what,
        status,
        body.chars().take(300).collect::<String>()
    );
}
