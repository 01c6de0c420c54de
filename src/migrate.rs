//! Versioned schema migrations for the PaperIgnition database.
//!
//! The catalog in [`MIGRATIONS`] is applied in version order. Each migration
//! runs inside its own transaction together with the row recording it in
//! `schema_migrations`, so a failed statement leaves no half-applied step.
//! Statements are written with `IF [NOT] EXISTS` so they are safe to run
//! against databases that were altered by hand before tracking existed.

use anyhow::{bail, Context, Result};
use sqlx::PgPool;

use crate::config::Config;
use crate::db;

/// One schema revision with its forward and reverse statements.
#[derive(Debug)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static [&'static str],
    pub down: &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_core_tables",
        up: &[
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id SERIAL PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT UNIQUE,
                hashed_password TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS papers (
                id SERIAL PRIMARY KEY,
                doi TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                authors TEXT,
                abstract TEXT,
                url TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS paper_recommendations (
                id SERIAL PRIMARY KEY,
                username TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                paper_id TEXT NOT NULL,
                title TEXT,
                authors TEXT,
                abstract TEXT,
                url TEXT,
                content TEXT,
                recommendation_reason TEXT,
                relevance_score REAL,
                recommendation_date TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (username, paper_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_recommendations_username ON paper_recommendations(username)",
        ],
        down: &[
            "DROP TABLE IF EXISTS paper_recommendations",
            "DROP TABLE IF EXISTS papers",
            "DROP TABLE IF EXISTS users",
        ],
    },
    Migration {
        version: 2,
        name: "add_user_interest_fields",
        up: &[
            "ALTER TABLE users ADD COLUMN IF NOT EXISTS interests_description TEXT[] NOT NULL DEFAULT '{}'",
            "ALTER TABLE users ADD COLUMN IF NOT EXISTS research_interests_text TEXT",
            "ALTER TABLE users ADD COLUMN IF NOT EXISTS rewrite_interest TEXT",
        ],
        down: &[
            "ALTER TABLE users DROP COLUMN IF EXISTS rewrite_interest",
            "ALTER TABLE users DROP COLUMN IF EXISTS research_interests_text",
            "ALTER TABLE users DROP COLUMN IF EXISTS interests_description",
        ],
    },
    Migration {
        version: 3,
        name: "add_recommendation_blog_fields",
        up: &[
            "ALTER TABLE paper_recommendations ADD COLUMN IF NOT EXISTS blog TEXT",
            "ALTER TABLE paper_recommendations ADD COLUMN IF NOT EXISTS blog_title TEXT",
            "ALTER TABLE paper_recommendations ADD COLUMN IF NOT EXISTS blog_abs TEXT",
        ],
        down: &[
            "ALTER TABLE paper_recommendations DROP COLUMN IF EXISTS blog_abs",
            "ALTER TABLE paper_recommendations DROP COLUMN IF EXISTS blog_title",
            "ALTER TABLE paper_recommendations DROP COLUMN IF EXISTS blog",
        ],
    },
    Migration {
        version: 4,
        name: "add_recommendation_feedback",
        up: &[
            "ALTER TABLE paper_recommendations ADD COLUMN IF NOT EXISTS viewed BOOLEAN NOT NULL DEFAULT FALSE",
            "ALTER TABLE paper_recommendations ADD COLUMN IF NOT EXISTS blog_liked BOOLEAN",
            "ALTER TABLE paper_recommendations ADD COLUMN IF NOT EXISTS blog_feedback_date TIMESTAMPTZ",
        ],
        down: &[
            "ALTER TABLE paper_recommendations DROP COLUMN IF EXISTS blog_feedback_date",
            "ALTER TABLE paper_recommendations DROP COLUMN IF EXISTS blog_liked",
            "ALTER TABLE paper_recommendations DROP COLUMN IF EXISTS viewed",
        ],
    },
    Migration {
        version: 5,
        name: "add_recommendation_submission_info",
        up: &[
            "ALTER TABLE paper_recommendations ADD COLUMN IF NOT EXISTS submitted TEXT",
            "ALTER TABLE paper_recommendations ADD COLUMN IF NOT EXISTS comment TEXT",
        ],
        down: &[
            "ALTER TABLE paper_recommendations DROP COLUMN IF EXISTS comment",
            "ALTER TABLE paper_recommendations DROP COLUMN IF EXISTS submitted",
        ],
    },
    Migration {
        version: 6,
        name: "add_paper_embeddings",
        up: &[
            "CREATE EXTENSION IF NOT EXISTS vector",
            "ALTER TABLE papers ADD COLUMN IF NOT EXISTS embedding vector",
            "ALTER TABLE papers ADD COLUMN IF NOT EXISTS embedding_model TEXT",
            "ALTER TABLE papers ADD COLUMN IF NOT EXISTS embedding_hash TEXT",
        ],
        down: &[
            "ALTER TABLE papers DROP COLUMN IF EXISTS embedding_hash",
            "ALTER TABLE papers DROP COLUMN IF EXISTS embedding_model",
            "ALTER TABLE papers DROP COLUMN IF EXISTS embedding",
        ],
    },
];

fn find(version: i64) -> Option<&'static Migration> {
    MIGRATIONS.iter().find(|m| m.version == version)
}

/// Select the migrations to apply, in ascending order.
///
/// `applied` is the set of versions already recorded in the database. When
/// `target` is given, nothing beyond it is selected.
pub fn plan_up(applied: &[i64], target: Option<i64>) -> Result<Vec<&'static Migration>> {
    for v in applied {
        if find(*v).is_none() {
            bail!(
                "database has migration {} applied which this build does not know about",
                v
            );
        }
    }
    if let Some(t) = target {
        if find(t).is_none() {
            bail!("no migration with version {}", t);
        }
    }

    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .filter(|m| target.map_or(true, |t| m.version <= t))
        .collect())
}

/// Select the most recently applied migrations to revert, newest first.
pub fn plan_down(applied: &[i64], steps: usize) -> Result<Vec<&'static Migration>> {
    let mut versions = applied.to_vec();
    versions.sort_unstable();
    versions.dedup();

    versions
        .iter()
        .rev()
        .take(steps)
        .map(|v| find(*v).with_context(|| format!("unknown applied migration {}", v)))
        .collect()
}

async fn ensure_tracking_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version BIGINT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Versions recorded in `schema_migrations`, ascending.
pub async fn applied_versions(pool: &PgPool) -> Result<Vec<i64>> {
    ensure_tracking_table(pool).await?;
    let versions: Vec<i64> =
        sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
            .fetch_all(pool)
            .await?;
    Ok(versions)
}

async fn apply(pool: &PgPool, m: &Migration) -> Result<()> {
    let mut tx = pool.begin().await?;
    for stmt in m.up {
        sqlx::query(stmt)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("migration {:04}_{} failed", m.version, m.name))?;
    }
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(m.version)
        .bind(m.name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn revert(pool: &PgPool, m: &Migration) -> Result<()> {
    let mut tx = pool.begin().await?;
    for stmt in m.down {
        sqlx::query(stmt)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("reverting {:04}_{} failed", m.version, m.name))?;
    }
    sqlx::query("DELETE FROM schema_migrations WHERE version = $1")
        .bind(m.version)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn run_up(config: &Config, target: Option<i64>) -> Result<()> {
    let pool = db::connect(config).await?;
    let applied = applied_versions(&pool).await?;
    let plan = plan_up(&applied, target)?;

    if plan.is_empty() {
        println!("Schema is up to date.");
        pool.close().await;
        return Ok(());
    }

    for m in &plan {
        tracing::info!(version = m.version, name = m.name, "applying migration");
        apply(&pool, m).await?;
        println!("  applied {:04}_{}", m.version, m.name);
    }

    println!("Applied {} migration(s).", plan.len());
    pool.close().await;
    Ok(())
}

pub async fn run_down(config: &Config, steps: usize) -> Result<()> {
    let pool = db::connect(config).await?;
    let applied = applied_versions(&pool).await?;
    let plan = plan_down(&applied, steps)?;

    if plan.is_empty() {
        println!("Nothing to revert.");
        pool.close().await;
        return Ok(());
    }

    for m in &plan {
        tracing::info!(version = m.version, name = m.name, "reverting migration");
        revert(&pool, m).await?;
        println!("  reverted {:04}_{}", m.version, m.name);
    }

    println!("Reverted {} migration(s).", plan.len());
    pool.close().await;
    Ok(())
}

pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let applied = applied_versions(&pool).await?;

    println!("{:<8} {:<40} STATUS", "VERSION", "NAME");
    for m in MIGRATIONS {
        let status = if applied.contains(&m.version) {
            "applied"
        } else {
            "pending"
        };
        println!("{:<8} {:<40} {}", m.version, m.name, status);
    }

    pool.close().await;
    Ok(())
}

pub fn list_migrations() {
    println!("{:<8} {:<40} STATEMENTS", "VERSION", "NAME");
    for m in MIGRATIONS {
        println!("{:<8} {:<40} {}", m.version, m.name, m.up.len());
    }
}
