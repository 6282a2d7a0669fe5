//! RSS 2.0 feed collector.
//!
//! Each `<item>` becomes a flat text record keyed by its element names
//! (`title`, `link`, `description`, `pubDate`, `guid`, `author`, `category`)
//! and is mapped exactly like a rendered-page block. Unlike rendered pages,
//! feeds carry stable identifiers, so record identity is
//! `source-<guid or link>` and re-collecting a feed overwrites rather than
//! duplicates.

use super::mapping::{apply_transforms, text_record_to_trend};
use super::{Collector, require_url};
use crate::error::{Error, Result};
use crate::models::{CollectorKind, Source, Trend};
use crate::utils::slugify_key;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::Html;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

const DEFAULT_LIMIT: usize = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    guid: Option<Text>,
    author: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<Text>,
}

/// Element text, ignoring attributes such as `isPermaLink`.
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

/// Collector for `type: rss` sources.
///
/// Reads `url` (required) and `limit` (default 30) from the descriptor.
#[derive(Debug, Clone)]
pub struct RssCollector {
    client: reqwest::Client,
}

impl RssCollector {
    /// Collector with its own client and a 30 second request timeout.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for RssCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for RssCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Rss
    }

    fn validate(&self, source: &Source) -> Result<()> {
        require_url(source).map(|_| ())
    }

    #[instrument(level = "info", skip_all, fields(source = %source.id))]
    async fn collect(&self, source: &Source) -> Result<Vec<Trend>> {
        let url = require_url(source)?;
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let limit = source.config_usize("limit").unwrap_or(DEFAULT_LIMIT);

        let trends: Vec<Trend> = parse_feed(&body)?
            .into_iter()
            .take(limit)
            .enumerate()
            .filter_map(|(index, record)| item_to_trend(&record, source, index))
            .map(|mut trend| {
                apply_transforms(&mut trend, &source.transforms);
                trend
            })
            .collect();

        info!(count = trends.len(), "Collected feed items");
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

/// Parse a feed body into flat text records, one per item.
///
/// Empty elements are left out of the record, descriptions are reduced to
/// plain text and only the first `category` is kept.
///
/// # Errors
///
/// [`Error::Decode`] when the body is not an RSS 2.0 document.
///
/// # Examples
///
/// ```ignore
/// let records = parse_feed(&body)?;
/// assert_eq!(records[0]["title"], "This Week in Rust 600");
/// ```
pub fn parse_feed(xml: &str) -> Result<Vec<BTreeMap<String, String>>> {
    let cleaned = scrub_html_entities_for_xml(xml);
    let rss: Rss = quick_xml::de::from_str(&cleaned)
        .map_err(|e| Error::Decode(format!("rss: {e}")))?;
    debug!(items = rss.channel.items.len(), "Parsed feed");

    Ok(rss
        .channel
        .items
        .into_iter()
        .map(|item| {
            let mut record = BTreeMap::new();
            let mut put = |key: &str, value: Option<String>| {
                if let Some(v) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                    record.insert(key.to_string(), v);
                }
            };
            put("title", item.title);
            put("link", item.link);
            put("description", item.description.as_deref().map(strip_markup));
            put("pubDate", item.pub_date);
            put("guid", item.guid.map(|g| g.value));
            put("author", item.author);
            put("category", item.categories.into_iter().next().map(|c| c.value));
            record
        })
        .collect())
}

/// Map one feed record; the id is `source-<guid or link>` made path-safe,
/// or `source-<index>` when the item has neither.
fn item_to_trend(
    record: &BTreeMap<String, String>,
    source: &Source,
    index: usize,
) -> Option<Trend> {
    let key = ["guid", "link"]
        .iter()
        .filter_map(|k| record.get(*k))
        .map(|raw| slugify_key(raw))
        .find(|slug| !slug.is_empty())
        .unwrap_or_else(|| index.to_string());
    let mut trend = text_record_to_trend(record, source, format!("{}-{}", source.id, key))?;

    let date_key = source
        .field_mapping
        .get("timestamp")
        .map(String::as_str)
        .unwrap_or("pubDate");
    trend.timestamp = record
        .get(date_key)
        .and_then(|raw| DateTime::parse_from_rfc2822(raw.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc));
    Some(trend)
}

/// Flatten an HTML fragment (feed descriptions often embed markup) to text.
fn strip_markup(fragment: &str) -> String {
    let html = Html::parse_fragment(fragment);
    html.root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// quick-xml rejects HTML-only entities that feeds routinely contain.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>This Week in Rust</title>
    <link>https://this-week-in-rust.org/</link>
    <item>
      <title>This Week in Rust 600</title>
      <link>https://this-week-in-rust.org/blog/600/</link>
      <description><![CDATA[<p>Hello&nbsp;<b>Rustaceans</b></p>]]></description>
      <pubDate>Wed, 07 May 2025 00:00:00 +0000</pubDate>
      <guid isPermaLink="false">twir-600</guid>
      <category>newsletter</category>
      <category>rust</category>
    </item>
    <item>
      <title></title>
      <link>https://this-week-in-rust.org/blog/599/</link>
    </item>
    <item>
      <title>No guid &ndash; link identity</title>
      <link>https://example.com/post</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_records() {
        let records = parse_feed(FEED).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["guid"], "twir-600");
        assert_eq!(records[0]["description"], "Hello Rustaceans");
        assert_eq!(records[0]["category"], "newsletter");
        assert!(!records[1].contains_key("title"));
        assert_eq!(records[2]["title"], "No guid - link identity");
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        assert!(matches!(parse_feed("not xml at all"), Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn test_collect_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;
        let source = Source::new("twir", "TWiR", "rss")
            .with_config("url", format!("{}/feed.xml", server.uri()));

        let trends = RssCollector::new().collect(&source).await.unwrap();

        assert_eq!(trends.len(), 2);
        assert_eq!(trends[0].id, "twir-twir-600");
        assert_eq!(trends[0].summary.as_deref(), Some("Hello Rustaceans"));
        assert_eq!(trends[0].category.as_deref(), Some("newsletter"));
        assert_eq!(
            trends[0].timestamp.unwrap().to_rfc3339(),
            "2025-05-07T00:00:00+00:00"
        );
        assert_eq!(trends[1].id, "twir-https-example-com-post");
        assert!(trends[1].timestamp.is_none());
    }
}
