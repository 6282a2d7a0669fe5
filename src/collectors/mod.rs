//! Collectors turn one [`Source`] descriptor into canonical [`Trend`] records.
//!
//! Every collector kind implements the same [`Collector`] contract and is
//! looked up by the descriptor's `type` through a [`CollectorRegistry`], so
//! the orchestrator never branches on source kinds.
//!
//! # Supported kinds
//!
//! | Type | Module | Method | Identity |
//! |------|--------|--------|----------|
//! | `http` | [`http`] | JSON index + per-item detail fetch | `source-itemid`, stable |
//! | `rss` | [`rss`] | RSS 2.0 feed | `source-guid`, stable |
//! | `chrome` | [`browser`] | Rendered page + CSS selectors | `source-unixts-index`, per run |
//!
//! # Common patterns
//!
//! - `validate()` runs before any network call and only checks the descriptor.
//! - Field names are resolved through the descriptor's field mapping
//!   ([`mapping::FieldMap`]) and the declared transforms are applied last.
//! - Failures on a single item are logged and skipped; only failures that
//!   make the whole source unusable are returned as errors.

pub mod browser;
#[cfg(feature = "browser")]
pub mod chrome;
pub mod http;
pub mod mapping;
pub mod rss;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::models::{CollectorKind, Source, Trend};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Capability shared by all collector kinds.
#[async_trait]
pub trait Collector: Send + Sync {
    /// The type string this collector is registered under by default.
    fn kind(&self) -> CollectorKind;

    /// Check the descriptor without touching the network.
    fn validate(&self, source: &Source) -> Result<()>;

    /// Fetch and map every item the source currently exposes.
    ///
    /// # Arguments
    ///
    /// * `source` - An enabled descriptor whose `type` this collector handles.
    ///
    /// # Returns
    ///
    /// The mapped trends in source order, with the descriptor's transforms
    /// already applied. Items that fail to fetch or map are logged and left
    /// out, so a partial list is a normal result.
    ///
    /// # Errors
    ///
    /// Only failures that make the whole source unusable: a missing required
    /// config key, an unreachable index or feed, an unparsable document or a
    /// timed-out render.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let source = Source::new("hn", "Hacker News", "http")
    ///     .with_config("url", "https://hacker-news.firebaseio.com/v0/topstories.json")
    ///     .with_config("item_url", "https://hacker-news.firebaseio.com/v0/item/{id}.json");
    /// let trends = HttpCollector::new().collect(&source).await?;
    /// ```
    async fn collect(&self, source: &Source) -> Result<Vec<Trend>>;

    /// Connectivity check against the source's primary URL. A 4xx or 5xx
    /// answer is an [`Error::Status`].
    async fn test(&self, source: &Source) -> Result<()>;
}

/// The descriptor's `config.url`, or a validation error.
pub fn require_url(source: &Source) -> Result<&str> {
    source
        .config_str("url")
        .ok_or_else(|| Error::Validation(format!("source {}: url is required", source.id)))
}

/// Collectors keyed by the source `type` they handle.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: HashMap<String, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    /// Empty registry; see [`CollectorRegistry::with_defaults`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every collector kind this build supports. `chrome` is
    /// only present with the `browser` feature.
    pub fn with_defaults(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        registry.register(http::HttpCollector::new());
        registry.register(rss::RssCollector::new());
        #[cfg(feature = "browser")]
        registry.register(browser::BrowserCollector::new(chrome::ChromeRenderer::new(
            &config.chrome,
        )));
        #[cfg(not(feature = "browser"))]
        let _ = config;
        registry
    }

    /// Register under the collector's own kind, replacing any previous entry.
    pub fn register<C: Collector + 'static>(&mut self, collector: C) -> &mut Self {
        let kind = collector.kind().as_str().to_string();
        self.register_as(kind, Arc::new(collector))
    }

    /// Register under an explicit type name (aliases, test doubles).
    pub fn register_as(
        &mut self,
        kind: impl Into<String>,
        collector: Arc<dyn Collector>,
    ) -> &mut Self {
        let kind = kind.into();
        debug!(%kind, "Registered collector");
        self.collectors.insert(kind, collector);
        self
    }

    /// Collector for a source `type`, if one is registered.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn Collector>> {
        self.collectors.get(kind).cloned()
    }

    /// Registered type names, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.collectors.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
