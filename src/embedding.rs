//! Embedding provider abstraction.
//!
//! Defines the [`EmbeddingProvider`] trait and its implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `/embeddings` endpoint
//!   with batching, retry, and backoff.
//!
//! Vectors are written to PostgreSQL through pgvector's text form; see
//! [`to_pgvector_literal`].
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Trait for embedding providers.
///
/// The embedding call itself is [`embed_texts`], which dispatches on the
/// configured provider name.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
}

/// Embed a batch of texts, returning one vector per input in input order.
///
/// # Errors
///
/// - `"disabled"` provider: always returns an error.
/// - `"openai"` provider: API key missing, non-retryable API error,
///   retries exhausted, or a vector of the wrong dimensionality.
pub async fn embed_texts(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let vectors = match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await?,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    };

    if vectors.len() != texts.len() {
        bail!(
            "Embedding API returned {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        );
    }
    for v in &vectors {
        if v.len() != provider.dims() {
            bail!(
                "Embedding has {} dimensions, expected {}",
                v.len(),
                provider.dims()
            );
        }
    }
    Ok(vectors)
}

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ OpenAI Provider ============

/// Embedding provider for any OpenAI-compatible API.
///
/// Requires the env var named by `embedding.api_key_env`
/// (`OPENAI_API_KEY` by default).
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        if std::env::var(&config.api_key_env).is_err() {
            bail!("{} environment variable not set", config.api_key_env);
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var(&config.api_key_env)
        .with_context(|| format!("{} not set", config.api_key_env))?;

    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let url = format!("{}/embeddings", config.base_url.trim_end_matches('/'));
    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(&url)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_openai_response(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Embedding API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("Embedding API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

/// Extract `data[].embedding`, ordered by each item's `index`.
///
/// Every index in `0..data.len()` must appear exactly once.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; data.len()];

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);

        let vec = embedding
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: non-numeric value"))
            })
            .collect::<Result<Vec<f32>>>()?;

        match slots.get_mut(index) {
            Some(slot @ None) => *slot = Some(vec),
            Some(Some(_)) => bail!("Invalid embedding response: duplicate index {}", index),
            None => bail!(
                "Invalid embedding response: index {} out of range for {} items",
                index,
                data.len()
            ),
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Create the provider named by `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// pgvector text form: `[0.1,-2,3.5]`. Bind as text and cast with `::vector`.
pub fn to_pgvector_literal(vec: &[f32]) -> String {
    let parts: Vec<String> = vec.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn pgvector_literal_format() {
        assert_eq!(to_pgvector_literal(&[1.0, -2.5, 0.125]), "[1,-2.5,0.125]");
        assert_eq!(to_pgvector_literal(&[]), "[]");
    }

    #[test]
    fn response_is_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn response_without_data_is_an_error() {
        assert!(parse_openai_response(&serde_json::json!({"error": "nope"})).is_err());
    }

    #[test]
    fn duplicate_or_out_of_range_index_is_an_error() {
        let dup = serde_json::json!({"data": [
            {"index": 0, "embedding": [1.0]},
            {"index": 0, "embedding": [2.0]}
        ]});
        let err = parse_openai_response(&dup).unwrap_err().to_string();
        assert!(err.contains("duplicate index 0"), "{}", err);

        let gap = serde_json::json!({"data": [
            {"index": 0, "embedding": [1.0]},
            {"index": 2, "embedding": [2.0]}
        ]});
        let err = parse_openai_response(&gap).unwrap_err().to_string();
        assert!(err.contains("out of range"), "{}", err);
    }

    #[test]
    fn non_numeric_value_is_an_error() {
        let json = serde_json::json!({"data": [{"index": 0, "embedding": [1.0, "x"]}]});
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn disabled_provider_by_default() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert_eq!(provider.dims(), 0);
    }

    struct Fixed(usize);

    impl EmbeddingProvider for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.0
        }
    }

    async fn spawn_api(fail_first: usize, status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/v1/embeddings",
            post(move |Json(body): Json<serde_json::Value>| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < fail_first {
                        return (status, Json(serde_json::json!({"error": "busy"})));
                    }
                    let inputs = body["input"].as_array().map(|a| a.len()).unwrap_or(0);
                    let data: Vec<_> = (0..inputs)
                        .map(|i| serde_json::json!({"index": i, "embedding": [i as f32, 1.0, 0.0]}))
                        .collect();
                    (StatusCode::OK, Json(serde_json::json!({ "data": data })))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/v1", addr), calls)
    }

    fn api_config(base_url: String, key_env: &str) -> EmbeddingConfig {
        std::env::set_var(key_env, "sk-test");
        EmbeddingConfig {
            provider: "openai".into(),
            model: Some("test-embed".into()),
            dims: Some(3),
            base_url,
            api_key_env: key_env.into(),
            max_retries: 2,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn retries_rate_limit_then_succeeds() {
        let (base, calls) = spawn_api(1, StatusCode::TOO_MANY_REQUESTS).await;
        let cfg = api_config(base, "PIO_TEST_EMBED_KEY_RETRY");
        let texts = vec!["a".to_string(), "b".to_string()];

        let vecs = embed_texts(&Fixed(3), &cfg, &texts).await.unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[1][0], 1.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let (base, calls) = spawn_api(5, StatusCode::BAD_REQUEST).await;
        let cfg = api_config(base, "PIO_TEST_EMBED_KEY_400");

        let err = embed_texts(&Fixed(3), &cfg, &["a".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_dimensions_rejected() {
        let (base, _) = spawn_api(0, StatusCode::OK).await;
        let cfg = api_config(base, "PIO_TEST_EMBED_KEY_DIMS");

        let err = embed_texts(&Fixed(8), &cfg, &["a".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 8"));
    }
}
