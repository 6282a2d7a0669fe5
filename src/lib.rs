//! # trendscope
//!
//! Collects trending items from heterogeneous sources, stores them as
//! date-partitioned Markdown files and serves them over a JSON API.
//!
//! ## Architecture
//!
//! 1. **Configuration** ([`config`]): `config.yaml`, per-profile source
//!    descriptors and profiles, loaded from a config directory.
//! 2. **Collection** ([`collectors`], [`orchestrator`]): each source is run
//!    through the collector registered for its type (JSON API, RSS feed or
//!    rendered page) and the results are saved as one batch.
//! 3. **Storage** ([`store`]): one Markdown file per day with a YAML header
//!    and a fenced JSON array of trends.
//! 4. **Query and agent** ([`service`], [`llm`]): listing, search, starring,
//!    summaries and topic suggestions from an OpenAI-compatible model.
//! 5. **Transport** ([`server`]): axum routes under `/api/v1`.

pub mod collectors;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod service;
pub mod store;
pub mod utils;

pub use error::{Error, Result};
