//! JSON API collector.
//!
//! Handles sources that expose an index endpoint returning an ordered list of
//! item identifiers plus a per-item detail endpoint (the Hacker News shape).
//!
//! # Descriptor keys
//!
//! | Key | Required | Meaning |
//! |-----|----------|---------|
//! | `url` | yes | Index endpoint returning a JSON array of ids |
//! | `item_url` | yes | Detail URL template containing `{id}` |
//! | `limit` | no | Maximum ids fetched (default 30) |
//! | `concurrency` | no | Maximum in-flight detail requests (default 8) |
//!
//! Detail fetches run concurrently but results keep index order. A failed
//! detail fetch is logged and the item skipped; partial results are normal.

use super::mapping::{FieldMap, apply_transforms};
use super::{Collector, require_url};
use crate::error::{Error, Result};
use crate::models::{CollectorKind, MetaValue, Source, Trend};
use crate::utils::slugify_key;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const DEFAULT_LIMIT: usize = 30;
const DEFAULT_CONCURRENCY: usize = 8;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Collector for `type: http` sources.
#[derive(Debug, Clone)]
pub struct HttpCollector {
    client: reqwest::Client,
}

impl HttpCollector {
    /// Collector with its own client and a 30 second request timeout.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::with_client(client)
    }

    /// Collector sharing an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_index(&self, url: &str) -> Result<Vec<String>> {
        let ids: Vec<Value> = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(ids.iter().filter_map(value_to_id).collect())
    }

    async fn fetch_item(&self, url: &str) -> Result<Map<String, Value>> {
        let item = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(item)
    }
}

impl Default for HttpCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for HttpCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Http
    }

    fn validate(&self, source: &Source) -> Result<()> {
        require_url(source).map(|_| ())
    }

    #[instrument(level = "info", skip_all, fields(source = %source.id))]
    async fn collect(&self, source: &Source) -> Result<Vec<Trend>> {
        let index_url = require_url(source)?;
        let item_url = source.config_str("item_url").ok_or_else(|| {
            Error::Validation(format!("source {}: item_url is required", source.id))
        })?;
        let limit = source.config_usize("limit").unwrap_or(DEFAULT_LIMIT);
        let concurrency = source
            .config_usize("concurrency")
            .unwrap_or(DEFAULT_CONCURRENCY);

        let mut ids = self.fetch_index(index_url).await?;
        let indexed = ids.len();
        ids.truncate(limit);
        debug!(indexed, kept = ids.len(), "Fetched item index");

        let trends: Vec<Trend> = stream::iter(ids)
            .map(|id| {
                let url = item_url.replace("{id}", &urlencoding::encode(&id));
                async move {
                    match self.fetch_item(&url).await {
                        Ok(item) => map_item(item, source, &id),
                        Err(e) => {
                            warn!(%url, error = %e, "Item fetch failed; skipping");
                            None
                        }
                    }
                }
            })
            .buffered(concurrency)
            .filter_map(std::future::ready)
            .map(|mut trend| {
                apply_transforms(&mut trend, &source.transforms);
                trend
            })
            .collect()
            .await;

        info!(count = trends.len(), "Collected items");
        Ok(trends)
    }

    async fn test(&self, source: &Source) -> Result<()> {
        let url = require_url(source)?;
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(())
    }
}

/// Map one item payload to a trend.
///
/// Canonical fields are read through the source's field mapping. Payload keys
/// consumed as canonical fields are not repeated in metadata; every other
/// non-null key is copied verbatim. Transforms are not applied here.
///
/// # Arguments
///
/// * `item` - The detail payload as a JSON object.
/// * `source` - The descriptor, for its id, name and field mapping.
/// * `fallback_id` - Identifier taken from the index, used when the payload
///   carries no id of its own.
///
/// # Returns
///
/// `Some(trend)` with id `<source id>-<item id>`, the item id made path-safe
/// by [`slugify_key`], or `None` when the title is missing or empty.
///
/// # Examples
///
/// ```ignore
/// let item = json!({"id": 7, "title": "Seven", "by": "pg"});
/// let trend = map_item(item.as_object().unwrap().clone(), &source, "7").unwrap();
/// assert_eq!(trend.id, "hn-7");
/// assert_eq!(trend.author.as_deref(), Some("pg"));
/// ```
pub fn map_item(mut item: Map<String, Value>, source: &Source, fallback_id: &str) -> Option<Trend> {
    let fields = FieldMap::new(source);

    let title = item
        .get(fields.native("title"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())?
        .to_string();

    let item_id = item
        .get(fields.native("id"))
        .and_then(value_to_id)
        .map(|id| slugify_key(&id))
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| slugify_key(fallback_id));
    let url = item
        .get(fields.native("url"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut trend = Trend::new(format!("{}-{}", source.id, item_id), title, url);
    trend.source = source.name.clone();
    trend.source_id = source.id.clone();

    if let Some(score) = item.get(fields.native("score")).and_then(number_as_i64) {
        trend.score = score;
    }
    trend.author = item
        .get(fields.native("author"))
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .map(str::to_string);
    trend.timestamp = item
        .get(fields.native("timestamp"))
        .and_then(number_as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    for canonical in ["id", "title", "url", "score", "author", "timestamp"] {
        item.remove(fields.native(canonical));
    }
    for (key, value) in item {
        if let Some(meta) = MetaValue::from_json(value) {
            trend.metadata.insert(key, meta);
        }
    }

    Some(trend)
}

/// Numeric or string identifiers, coerced to a string.
fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.to_string(),
        }),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn number_as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}
