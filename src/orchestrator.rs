//! Collection orchestrator.
//!
//! Runs the requested sources one after another through the collector
//! registered for their type, aggregates records and per-source failures
//! into one [`CollectionResult`] and saves the records as a single batch.
//! A failing source never stops the run.

use crate::collectors::CollectorRegistry;
use crate::models::{CollectionResult, Source};
use crate::store::TrendRepository;
use chrono::{Local, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Runs collections for one store through a shared collector registry.
#[derive(Clone)]
pub struct CollectionService {
    repo: Arc<dyn TrendRepository>,
    registry: CollectorRegistry,
}

impl CollectionService {
    /// Service saving into `repo`, with collectors looked up in `registry`.
    pub fn new(repo: Arc<dyn TrendRepository>, registry: CollectorRegistry) -> Self {
        Self { repo, registry }
    }

    /// The registry, for connectivity tests outside a collection run.
    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    /// Collect `source_ids`, saving into today's partition.
    pub async fn collect(
        &self,
        profile: &str,
        source_ids: &[String],
        sources: &[Source],
    ) -> CollectionResult {
        self.collect_as_of(profile, source_ids, sources, Local::now().date_naive())
            .await
    }

    /// Collect every enabled source, in descriptor order, into today's
    /// partition. Disabled descriptors are passed along and skipped by
    /// [`CollectionService::collect_as_of`].
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let sources = config_dir.load_sources("tech").await?;
    /// let result = service.collect_all("tech", &sources).await;
    /// info!(count = result.trends.len(), errors = result.errors.len(), "Done");
    /// ```
    pub async fn collect_all(&self, profile: &str, sources: &[Source]) -> CollectionResult {
        let ids: Vec<String> = sources.iter().map(|s| s.id.clone()).collect();
        self.collect(profile, &ids, sources).await
    }

    /// Collect `source_ids` in order and save into the `as_of` partition.
    ///
    /// # Arguments
    ///
    /// * `profile` - Profile name, recorded on the tracing span.
    /// * `source_ids` - Ids to run, in the order given.
    /// * `sources` - Descriptors the ids are resolved against.
    /// * `as_of` - Day whose partition receives the batch.
    ///
    /// # Returns
    ///
    /// A [`CollectionResult`] holding every collected record, one message per
    /// failure and the run's duration. The run itself never fails: unknown
    /// ids, unregistered types, invalid descriptors and failed collections
    /// each add an error and the loop moves on. Disabled sources are skipped
    /// silently. A failed save is reported without discarding the records
    /// from the result. Nothing is saved when no records were collected.
    #[instrument(
        level = "info",
        skip_all,
        fields(%profile, requested = source_ids.len(), %as_of)
    )]
    pub async fn collect_as_of(
        &self,
        profile: &str,
        source_ids: &[String],
        sources: &[Source],
        as_of: NaiveDate,
    ) -> CollectionResult {
        let start = Instant::now();
        let by_id: HashMap<&str, &Source> = sources.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut result = CollectionResult::default();

        for source_id in source_ids {
            let Some(source) = by_id.get(source_id.as_str()) else {
                result.errors.push(format!("source not found: {source_id}"));
                continue;
            };
            if !source.enabled {
                debug!(source = %source_id, "Source disabled; skipping");
                continue;
            }
            let Some(collector) = self.registry.get(&source.kind) else {
                result
                    .errors
                    .push(format!("collector not found for type: {}", source.kind));
                continue;
            };

            let source_start = Instant::now();
            let outcome = match collector.validate(source) {
                Ok(()) => collector.collect(source).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(trends) => {
                    info!(
                        source = %source_id,
                        count = trends.len(),
                        elapsed_ms = source_start.elapsed().as_millis() as u64,
                        "Source collected"
                    );
                    result.trends.extend(trends);
                }
                Err(e) => {
                    warn!(source = %source_id, error = %e, "Source failed");
                    result
                        .errors
                        .push(format!("failed to collect from {source_id}: {e}"));
                }
            }
        }

        if !result.trends.is_empty() {
            if let Err(e) = self.repo.save_batch(&result.trends, as_of).await {
                error!(error = %e, "Saving collected trends failed");
                result.errors.push(format!("failed to save trends: {e}"));
            }
        }

        let elapsed = start.elapsed();
        result.duration = Some(elapsed);
        info!(
            trends = result.trends.len(),
            errors = result.errors.len(),
            ?elapsed,
            "Collection run complete"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::Collector;
    use crate::error::{Error, Result};
    use crate::models::{CollectorKind, Trend};
    use crate::store::{ListOptions, Page, SearchOptions, TrendStore};
    use async_trait::async_trait;

    /// Returns one record per call, or fails for sources named `broken`.
    struct StubCollector;

    #[async_trait]
    impl Collector for StubCollector {
        fn kind(&self) -> CollectorKind {
            CollectorKind::Http
        }

        fn validate(&self, source: &Source) -> Result<()> {
            crate::collectors::require_url(source).map(|_| ())
        }

        async fn collect(&self, source: &Source) -> Result<Vec<Trend>> {
            if source.id == "broken" {
                return Err(Error::Decode("unexpected payload".into()));
            }
            let mut trend = Trend::new(format!("{}-1", source.id), "Item", "");
            trend.source_id = source.id.clone();
            Ok(vec![trend])
        }

        async fn test(&self, _source: &Source) -> Result<()> {
            Ok(())
        }
    }

    /// Accepts reads, refuses every write.
    struct ReadOnlyRepo;

    #[async_trait]
    impl TrendRepository for ReadOnlyRepo {
        async fn save_batch(&self, _: &[Trend], _: NaiveDate) -> Result<()> {
            Err(Error::Io(std::io::Error::other("read-only filesystem")))
        }
        async fn list(&self, _: &ListOptions) -> Result<Page> {
            Ok(Page::default())
        }
        async fn find_by_id(&self, id: &str) -> Result<Trend> {
            Err(Error::not_found("trend", id))
        }
        async fn find_by_date(&self, _: NaiveDate, _: &ListOptions) -> Result<Page> {
            Ok(Page::default())
        }
        async fn search(&self, _: &str, _: &SearchOptions) -> Result<Page> {
            Ok(Page::default())
        }
        async fn update(&self, trend: &Trend) -> Result<()> {
            Err(Error::not_found("trend", &trend.id))
        }
        async fn delete(&self, id: &str) -> Result<()> {
            Err(Error::not_found("trend", id))
        }
    }

    fn registry() -> CollectorRegistry {
        let mut registry = CollectorRegistry::new();
        registry.register(StubCollector);
        registry
    }

    fn source(id: &str) -> Source {
        Source::new(id, id.to_uppercase(), "http").with_config("url", "https://example.com")
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 6).unwrap()
    }

    #[tokio::test]
    async fn test_missing_and_disabled_sources() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TrendStore::new(dir.path(), "tech"));
        let service = CollectionService::new(store.clone(), registry());

        let mut b = source("b");
        b.enabled = false;
        let sources = vec![source("a"), b];

        let result = service
            .collect_as_of("tech", &ids(&["a", "missing", "b"]), &sources, as_of())
            .await;

        assert_eq!(result.errors, vec!["source not found: missing".to_string()]);
        assert_eq!(result.trends.len(), 1);
        assert_eq!(result.trends[0].source_id, "a");
        assert!(result.duration.is_some());

        let stored = store.find_by_date(as_of(), &ListOptions::default()).await.unwrap();
        assert_eq!(stored.total, 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TrendStore::new(dir.path(), "tech"));
        let service = CollectionService::new(store, registry());

        let mut ftp = source("ftp");
        ftp.kind = "ftp".into();
        let no_url = Source::new("nourl", "No URL", "http");
        let sources = vec![source("broken"), ftp, no_url, source("c")];

        let result = service.collect_all("tech", &sources).await;

        assert_eq!(result.errors.len(), 3);
        assert_eq!(
            result.errors[0],
            "failed to collect from broken: decode failed: unexpected payload"
        );
        assert_eq!(result.errors[1], "collector not found for type: ftp");
        assert!(result.errors[2].starts_with("failed to collect from nourl: "));
        assert_eq!(result.trends.len(), 1);
        assert_eq!(result.trends[0].id, "c-1");
    }

    #[tokio::test]
    async fn test_save_failure_keeps_collected_records() {
        let service = CollectionService::new(Arc::new(ReadOnlyRepo), registry());
        let result = service
            .collect_as_of("tech", &ids(&["a"]), &[source("a")], as_of())
            .await;

        assert_eq!(result.trends.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("failed to save trends: "));
    }

    #[tokio::test]
    async fn test_nothing_collected_skips_save() {
        let service = CollectionService::new(Arc::new(ReadOnlyRepo), registry());
        let result = service.collect_as_of("tech", &[], &[], as_of()).await;
        assert!(result.errors.is_empty());
        assert!(result.trends.is_empty());
    }
}
