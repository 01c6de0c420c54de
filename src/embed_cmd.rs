//! Paper embedding migration: `pio embed pending` and `pio embed rebuild`.
//!
//! Vectors live in `papers.embedding` (pgvector) next to the model name and
//! a SHA-256 of the embedded text, so a changed abstract or a model switch
//! marks the row stale.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};

use crate::config::Config;
use crate::db;
use crate::embedding;

/// A paper row as seen by the embedding pass.
#[derive(Debug, Clone)]
pub struct PaperText {
    pub id: i32,
    pub text: String,
    pub text_hash: String,
    pub has_embedding: bool,
    pub embedding_model: Option<String>,
    pub embedding_hash: Option<String>,
}

/// Text that gets embedded for a paper.
pub fn paper_text(title: &str, abstract_text: &str) -> String {
    if abstract_text.trim().is_empty() {
        title.to_string()
    } else {
        format!("{}\n\n{}", title, abstract_text)
    }
}

pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Missing, produced by another model, or produced from different text.
pub fn is_stale(paper: &PaperText, model: &str) -> bool {
    !paper.has_embedding
        || paper.embedding_model.as_deref() != Some(model)
        || paper.embedding_hash.as_deref() != Some(paper.text_hash.as_str())
}

async fn load_papers(pool: &PgPool) -> Result<Vec<PaperText>> {
    let rows = sqlx::query(
        r#"
        SELECT id, title, COALESCE(abstract, '') AS abstract,
               embedding IS NOT NULL AS has_embedding,
               embedding_model, embedding_hash
        FROM papers
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut papers = Vec::with_capacity(rows.len());
    for row in rows {
        let title: String = row.try_get("title")?;
        let abstract_text: String = row.try_get("abstract")?;
        let text = paper_text(&title, &abstract_text);
        papers.push(PaperText {
            id: row.try_get("id")?,
            text_hash: text_hash(&text),
            text,
            has_embedding: row.try_get("has_embedding")?,
            embedding_model: row.try_get("embedding_model")?,
            embedding_hash: row.try_get("embedding_hash")?,
        });
    }
    Ok(papers)
}

async fn store_embedding(
    pool: &PgPool,
    paper: &PaperText,
    model: &str,
    vector: &[f32],
) -> Result<()> {
    sqlx::query(
        "UPDATE papers SET embedding = $1::vector, embedding_model = $2, embedding_hash = $3 WHERE id = $4",
    )
    .bind(embedding::to_pgvector_literal(vector))
    .bind(model)
    .bind(&paper.text_hash)
    .bind(paper.id)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Default)]
struct EmbedTotals {
    embedded: u64,
    failed: u64,
}

async fn embed_batches(
    config: &Config,
    pool: &PgPool,
    provider: &dyn embedding::EmbeddingProvider,
    papers: &[PaperText],
    batch_size: usize,
) -> Result<EmbedTotals> {
    let model = provider.model_name().to_string();
    let mut totals = EmbedTotals::default();

    for batch in papers.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match embedding::embed_texts(provider, &config.embedding, &texts).await {
            Ok(vectors) => {
                for (paper, vec) in batch.iter().zip(vectors.iter()) {
                    store_embedding(pool, paper, &model, vec).await?;
                    totals.embedded += 1;
                }
            }
            Err(e) => {
                tracing::warn!(batch = batch.len(), "embedding batch failed: {:#}", e);
                totals.failed += batch.len() as u64;
            }
        }
    }

    Ok(totals)
}

/// Embed papers whose vectors are missing or stale.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let model = provider.model_name().to_string();
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let mut pending: Vec<PaperText> = load_papers(&pool)
        .await?
        .into_iter()
        .filter(|p| is_stale(p, &model))
        .collect();
    if let Some(limit) = limit {
        pending.truncate(limit);
    }

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  papers needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all papers up to date");
        pool.close().await;
        return Ok(());
    }

    let totals = embed_batches(config, &pool, provider.as_ref(), &pending, batch_size).await?;

    println!("embed pending");
    println!("  total pending: {}", pending.len());
    println!("  embedded: {}", totals.embedded);
    println!("  failed: {}", totals.failed);

    pool.close().await;
    if totals.failed > 0 {
        bail!("{} papers could not be embedded", totals.failed);
    }
    Ok(())
}

/// Clear every paper embedding and regenerate all of them.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    sqlx::query("UPDATE papers SET embedding = NULL, embedding_model = NULL, embedding_hash = NULL")
        .execute(&pool)
        .await?;
    println!("embed rebuild: cleared existing embeddings");

    let papers = load_papers(&pool).await?;
    if papers.is_empty() {
        println!("  no papers to embed");
        pool.close().await;
        return Ok(());
    }

    let totals = embed_batches(config, &pool, provider.as_ref(), &papers, batch_size).await?;

    println!("  total: {}", papers.len());
    println!("  embedded: {}", totals.embedded);
    println!("  failed: {}", totals.failed);

    pool.close().await;
    if totals.failed > 0 {
        bail!("{} papers could not be embedded", totals.failed);
    }
    Ok(())
}
