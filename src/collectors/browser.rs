//! Rendered-page collector.
//!
//! For sources whose listing only exists after client-side rendering. The
//! page is rendered by a [`PageRenderer`] (headless Chromium in production,
//! see `collectors::chrome`) and the resulting HTML is walked with CSS
//! selectors:
//!
//! | Key | Required | Meaning |
//! |-----|----------|---------|
//! | `url` | yes | Page to render |
//! | `container_selector` | yes | One match per item block |
//! | `title_selector` | no | Text of the first match inside the block |
//! | `link_selector` | no | `href` of the first match, resolved against `url` |
//! | `description_selector` | no | Text of the first match inside the block |
//! | `wait_selector` | no | Rendered before extraction; otherwise a short fixed delay |
//!
//! Pages rarely expose stable identifiers, so ids are
//! `source-<unix seconds>-<block index>`: re-collecting an unchanged page
//! yields new records rather than updating old ones.

use super::mapping::{apply_transforms, text_record_to_trend};
use super::{Collector, require_url};
use crate::error::{Error, Result};
use crate::models::{CollectorKind, Source, Trend};
use async_trait::async_trait;
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};
use url::Url;

/// Something that can turn a URL into post-render HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Load `url`, wait for `wait_selector` (or a short settle delay) and
    /// return the document's outer HTML. The rendering context must be torn
    /// down before this returns, on success and on failure alike.
    async fn render(&self, url: &str, wait_selector: Option<&str>) -> Result<String>;
}

/// Selectors for one source, parsed once per collection.
#[derive(Debug)]
pub struct Extraction {
    container: Selector,
    title: Option<Selector>,
    link: Option<Selector>,
    description: Option<Selector>,
}

impl Extraction {
    /// Parse the descriptor's selectors.
    ///
    /// # Arguments
    ///
    /// * `source` - A `chrome` descriptor. `container_selector` is required;
    ///   `title_selector`, `link_selector` and `description_selector` are
    ///   optional.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when the container selector is missing or any
    /// selector fails to parse.
    pub fn from_source(source: &Source) -> Result<Self> {
        let container = source.config_str("container_selector").ok_or_else(|| {
            Error::Validation(format!("source {}: container_selector is required", source.id))
        })?;
        Ok(Self {
            container: parse_selector(source, container)?,
            title: optional_selector(source, "title_selector")?,
            link: optional_selector(source, "link_selector")?,
            description: optional_selector(source, "description_selector")?,
        })
    }

    /// One text record per container element, in document order.
    ///
    /// # Arguments
    ///
    /// * `html` - The rendered document.
    /// * `base` - Page URL that relative links are resolved against.
    ///
    /// # Returns
    ///
    /// Records with `title`, `link` and `description` keys for the selectors
    /// that matched. Without a link selector the container's own `href` is
    /// used. Blocks without a title are kept; mapping drops them later.
    pub fn extract(&self, html: &str, base: Option<&Url>) -> Vec<BTreeMap<String, String>> {
        let document = Html::parse_document(html);
        document
            .select(&self.container)
            .map(|block| {
                let mut record = BTreeMap::new();
                if let Some(title) = self.title.as_ref().and_then(|s| first_text(block, s)) {
                    record.insert("title".to_string(), title);
                }
                let href = match &self.link {
                    Some(sel) => block.select(sel).next().and_then(|a| a.value().attr("href")),
                    None => block.value().attr("href"),
                };
                if let Some(link) = href.map(|h| resolve(base, h)).filter(|h| !h.is_empty()) {
                    record.insert("link".to_string(), link);
                }
                if let Some(desc) = self.description.as_ref().and_then(|s| first_text(block, s)) {
                    record.insert("description".to_string(), desc);
                }
                record
            })
            .collect()
    }
}

fn parse_selector(source: &Source, raw: &str) -> Result<Selector> {
    Selector::parse(raw)
        .map_err(|e| Error::Validation(format!("source {}: bad selector {raw:?}: {e}", source.id)))
}

fn optional_selector(source: &Source, key: &str) -> Result<Option<Selector>> {
    source
        .config_str(key)
        .map(|raw| parse_selector(source, raw))
        .transpose()
}

/// Whitespace-normalized text content of the first match.
fn first_text(block: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let el = block.select(selector).next()?;
    let text = el.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn resolve(base: Option<&Url>, href: &str) -> String {
    match base.and_then(|b| b.join(href).ok()) {
        Some(url) => url.to_string(),
        None => href.trim().to_string(),
    }
}

/// Collector for `type: chrome` sources.
#[derive(Debug)]
pub struct BrowserCollector<R> {
    renderer: R,
}

impl<R: PageRenderer> BrowserCollector<R> {
    /// Collector that renders pages through `renderer`.
    pub fn new(renderer: R) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl<R: PageRenderer + 'static> Collector for BrowserCollector<R> {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Chrome
    }

    fn validate(&self, source: &Source) -> Result<()> {
        require_url(source)?;
        Extraction::from_source(source).map(|_| ())
    }

    #[instrument(level = "info", skip_all, fields(source = %source.id))]
    async fn collect(&self, source: &Source) -> Result<Vec<Trend>> {
        let url = require_url(source)?;
        let extraction = Extraction::from_source(source)?;
        let base = Url::parse(url).ok();

        let html = self
            .renderer
            .render(url, source.config_str("wait_selector"))
            .await?;
        let records = extraction.extract(&html, base.as_ref());
        debug!(blocks = records.len(), "Extracted page blocks");

        let stamp = Utc::now().timestamp();
        let trends: Vec<Trend> = records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                text_record_to_trend(record, source, format!("{}-{}-{}", source.id, stamp, index))
            })
            .map(|mut trend| {
                apply_transforms(&mut trend, &source.transforms);
                trend
            })
            .collect();

        info!(count = trends.len(), "Collected rendered items");
        Ok(trends)
    }

    async fn test(&self, source: &Source) -> Result<()> {
        let url = require_url(source)?;
        self.renderer.render(url, None).await.map(|_| ())
    }
}
