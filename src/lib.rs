//! # PaperIgnition Ops
//!
//! Operational tooling for the PaperIgnition paper-recommendation service,
//! collected behind one CLI (`pio`) with shared configuration and logging.
//!
//! ```text
//!            ┌──────────────┐
//!  pio ─────▶│  config.toml │
//!            └──────┬───────┘
//!   ┌───────────┬───┴───────┬─────────────┬──────────────┐
//!   ▼           ▼           ▼             ▼              ▼
//! migrate    recommend    log-clean     upload        embed / ask / serve
//! (Postgres) (REST API)   (local files) (S3 PUT)      (embedding + LLM APIs)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pio migrate up                         # apply schema migrations
//! pio recommend batch recs.jsonl --all-users
//! pio log-clean --retention-days 14
//! pio upload ./figures --prefix papers/
//! pio embed pending
//! pio serve                              # LLM question proxy
//! pio doctor                             # smoke-check every dependency
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | PostgreSQL connection |
//! | [`migrate`] | Versioned schema migrations |
//! | [`models`] | Recommendation and user wire types |
//! | [`backend`] | Backend REST client |
//! | [`recommend_cmd`] | Add / batch-add recommendations |
//! | [`log_clean`] | Log filtering and retention |
//! | [`storage`] | S3-compatible object storage |
//! | [`upload_cmd`] | Image upload |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embed_cmd`] | Paper embedding migration |
//! | [`llm`] | Chat-completion client |
//! | [`server`] | LLM proxy HTTP server |
//! | [`checks`] | Smoke checks for `pio doctor` |

pub mod backend;
pub mod checks;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod llm;
pub mod log_clean;
pub mod migrate;
pub mod models;
pub mod recommend_cmd;
pub mod server;
pub mod storage;
pub mod upload_cmd;
