//! Named smoke checks run by `pio doctor`.
//!
//! Each [`Check`] probes one external dependency (database, backend, LLM,
//! object storage) and returns a short detail line on success. Checks are
//! looked up by name from a [`CheckRegistry`], so `pio doctor database llm`
//! runs just those two.
//!
//! ```rust
//! use paperignition_ops::checks::CheckRegistry;
//!
//! let registry = CheckRegistry::with_builtins();
//! assert!(registry.find("database").is_some());
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::backend::BackendClient;
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::storage::AwsCredentials;

#[async_trait]
pub trait Check: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Probe the dependency. `Ok` carries a one-line detail for the report.
    async fn run(&self, config: &Config) -> Result<String>;
}

/// Outcome of one check in a doctor run.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

pub struct CheckRegistry {
    checks: Vec<Box<dyn Check>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ConfigCheck));
        registry.register(Box::new(DatabaseCheck));
        registry.register(Box::new(BackendCheck));
        registry.register(Box::new(LlmCheck));
        registry.register(Box::new(StorageCheck));
        registry
    }

    pub fn register(&mut self, check: Box<dyn Check>) {
        self.checks.push(check);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Check> {
        self.checks
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run the named checks in order, or every check when `names` is empty.
    pub async fn run(&self, config: &Config, names: &[String]) -> Result<Vec<CheckReport>> {
        let selected: Vec<&dyn Check> = if names.is_empty() {
            self.checks.iter().map(|c| c.as_ref()).collect()
        } else {
            names
                .iter()
                .map(|n| {
                    self.find(n).with_context(|| {
                        format!("unknown check '{}' (available: {})", n, self.names().join(", "))
                    })
                })
                .collect::<Result<_>>()?
        };

        let mut reports = Vec::with_capacity(selected.len());
        for check in selected {
            tracing::debug!(check = check.name(), "running check");
            let report = match check.run(config).await {
                Ok(detail) => CheckReport {
                    name: check.name().to_string(),
                    passed: true,
                    detail,
                },
                Err(e) => CheckReport {
                    name: check.name().to_string(),
                    passed: false,
                    detail: format!("{:#}", e),
                },
            };
            reports.push(report);
        }
        Ok(reports)
    }
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `pio doctor --list`
pub fn list_checks() {
    let registry = CheckRegistry::with_builtins();
    println!("{:<10} DESCRIPTION", "CHECK");
    for check in &registry.checks {
        println!("{:<10} {}", check.name(), check.description());
    }
}

/// `pio doctor [NAME ...]`
pub async fn run_doctor(config: &Config, names: &[String]) -> Result<()> {
    let registry = CheckRegistry::with_builtins();
    let reports = registry.run(config, names).await?;

    println!("{:<10} {:<6} DETAIL", "CHECK", "STATUS");
    for r in &reports {
        let status = if r.passed { "ok" } else { "FAIL" };
        println!("{:<10} {:<6} {}", r.name, status, r.detail);
    }

    let failed = reports.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        bail!("{} of {} checks failed", failed, reports.len());
    }
    Ok(())
}

// ============ Built-in checks ============

struct ConfigCheck;

#[async_trait]
impl Check for ConfigCheck {
    fn name(&self) -> &str {
        "config"
    }
    fn description(&self) -> &str {
        "Configuration loads and validates"
    }
    async fn run(&self, config: &Config) -> Result<String> {
        config.validate()?;
        Ok(format!(
            "db={} backend={} embedding={} llm={}",
            if config.db.url.is_some() { "set" } else { "unset" },
            config.backend.base_url,
            config.embedding.provider,
            config.llm.model
        ))
    }
}

struct DatabaseCheck;

#[async_trait]
impl Check for DatabaseCheck {
    fn name(&self) -> &str {
        "database"
    }
    fn description(&self) -> &str {
        "PostgreSQL is reachable and migrations are tracked"
    }
    async fn run(&self, config: &Config) -> Result<String> {
        let pool = db::connect(config).await?;
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await?;
        if one != 1 {
            bail!("SELECT 1 returned {}", one);
        }
        let applied = migrate::applied_versions(&pool).await?;
        pool.close().await;
        Ok(format!(
            "connected, {}/{} migrations applied",
            applied.len(),
            migrate::MIGRATIONS.len()
        ))
    }
}

struct BackendCheck;

#[async_trait]
impl Check for BackendCheck {
    fn name(&self) -> &str {
        "backend"
    }
    fn description(&self) -> &str {
        "Backend REST API answers /api/users/all"
    }
    async fn run(&self, config: &Config) -> Result<String> {
        let client = BackendClient::new(&config.backend)?;
        let users = client.list_users().await?;
        Ok(format!("{} users at {}", users.len(), client.base_url()))
    }
}

struct LlmCheck;

#[async_trait]
impl Check for LlmCheck {
    fn name(&self) -> &str {
        "llm"
    }
    fn description(&self) -> &str {
        "LLM endpoint and API key are configured"
    }
    async fn run(&self, config: &Config) -> Result<String> {
        if config.llm.base_url.trim().is_empty() {
            bail!("llm.base_url is empty");
        }
        let client = crate::llm::LlmClient::from_config(&config.llm)?;
        Ok(format!("{} via {}", client.model(), config.llm.base_url))
    }
}

struct StorageCheck;

#[async_trait]
impl Check for StorageCheck {
    fn name(&self) -> &str {
        "storage"
    }
    fn description(&self) -> &str {
        "Object storage bucket and credentials are configured"
    }
    async fn run(&self, config: &Config) -> Result<String> {
        if config.storage.bucket.is_empty() {
            bail!("storage.bucket is not set");
        }
        AwsCredentials::from_env()?;
        Ok(format!(
            "bucket {} ({})",
            config.storage.bucket,
            config
                .storage
                .endpoint_url
                .as_deref()
                .unwrap_or(config.storage.region.as_str())
        ))
    }
}
