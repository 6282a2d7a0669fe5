//! Field-mapping and transform helpers shared by every collector.
//!
//! A source's `field_mapping` translates canonical field names (`title`,
//! `url`, `score`, ...) into the names the source uses natively. The same
//! lookup is applied by all collector kinds: canonical field `X` is read from
//! `payload[field_mapping[X]]` when an entry exists, else from `payload[X]`.

use crate::models::{MetaValue, Source, Transform, Trend};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

/// Canonical-name → native-name lookup for one source.
#[derive(Debug, Clone, Copy)]
pub struct FieldMap<'a> {
    mapping: &'a BTreeMap<String, String>,
}

impl<'a> FieldMap<'a> {
    pub fn new(source: &'a Source) -> Self {
        Self {
            mapping: &source.field_mapping,
        }
    }

    /// The native key to read for `canonical`.
    pub fn native<'k>(&self, canonical: &'k str) -> &'k str
    where
        'a: 'k,
    {
        self.mapping
            .get(canonical)
            .map(String::as_str)
            .unwrap_or(canonical)
    }

    /// Read a canonical field from a flat text record, treating empty as absent.
    pub fn text<'r>(
        &self,
        record: &'r BTreeMap<String, String>,
        canonical: &str,
    ) -> Option<&'r str> {
        record
            .get(self.native(canonical))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Map one flat text record (rendered page block, feed item) to a trend.
///
/// `title` is required; `url` falls back to the `link` field; `summary`
/// falls back to `description`. Every non-empty field is copied into the
/// record's metadata. Returns `None` when the title is empty.
pub fn text_record_to_trend(
    record: &BTreeMap<String, String>,
    source: &Source,
    id: String,
) -> Option<Trend> {
    let fields = FieldMap::new(source);
    let title = fields.text(record, "title")?;

    let url = fields
        .text(record, "url")
        .or_else(|| fields.text(record, "link"))
        .unwrap_or_default();

    let mut trend = Trend::new(id, title, url);
    trend.source = source.name.clone();
    trend.source_id = source.id.clone();
    trend.summary = fields
        .text(record, "summary")
        .or_else(|| fields.text(record, "description"))
        .map(str::to_string);
    trend.author = fields.text(record, "author").map(str::to_string);
    trend.category = fields.text(record, "category").map(str::to_string);

    for (key, value) in record {
        if !value.is_empty() {
            trend.set_metadata(key.clone(), value.as_str());
        }
    }

    Some(trend)
}

/// Apply a source's declared transforms, in order.
///
/// Unknown transform types or target fields are skipped with a warning so a
/// typo in one descriptor never fails a whole collection.
pub fn apply_transforms(trend: &mut Trend, transforms: &[Transform]) {
    for transform in transforms {
        let value = transform.value.as_deref().unwrap_or_default();
        match transform.kind.as_str() {
            "trim" => {
                if let Some(slot) = text_slot(trend, &transform.field) {
                    *slot = slot.trim().to_string();
                }
            }
            "prefix" => {
                if let Some(slot) = text_slot(trend, &transform.field) {
                    if !slot.is_empty() && !slot.starts_with(value) {
                        *slot = format!("{value}{slot}");
                    }
                }
            }
            "default" => {
                if transform.field == "tag" {
                    if trend.tags.is_empty() && !value.is_empty() {
                        trend.tags.push(value.to_string());
                    }
                } else if let Some(slot) = text_slot(trend, &transform.field) {
                    if slot.is_empty() {
                        *slot = value.to_string();
                    }
                }
            }
            "set" => {
                if transform.field == "tag" {
                    if !value.is_empty() && !trend.tags.iter().any(|t| t == value) {
                        trend.tags.push(value.to_string());
                    }
                } else if let Some(slot) = text_slot(trend, &transform.field) {
                    *slot = value.to_string();
                }
            }
            "date" => {
                let raw = trend
                    .metadata
                    .get(&transform.field)
                    .and_then(MetaValue::as_str)
                    .map(str::to_string);
                match (raw, transform.format.as_deref()) {
                    (Some(raw), Some(format)) => match parse_with_format(&raw, format) {
                        Some(ts) => trend.timestamp = Some(ts),
                        None => warn!(
                            field = %transform.field,
                            %raw,
                            %format,
                            "Date transform did not match"
                        ),
                    },
                    _ => warn!(
                        field = %transform.field,
                        "Date transform needs a string field and a format"
                    ),
                }
            }
            other => {
                warn!(kind = %other, field = %transform.field, "Unknown transform; skipping")
            }
        }
        normalize_optionals(trend);
    }
}

/// Mutable access to a textual canonical field.
///
/// Optional fields are materialized as empty strings and folded back to
/// `None` by [`normalize_optionals`].
fn text_slot<'t>(trend: &'t mut Trend, field: &str) -> Option<&'t mut String> {
    let slot = match field {
        "title" => return Some(&mut trend.title),
        "url" => return Some(&mut trend.url),
        "summary" => &mut trend.summary,
        "author" => &mut trend.author,
        "category" => &mut trend.category,
        other => {
            warn!(field = %other, "Transform targets an unsupported field");
            return None;
        }
    };
    Some(slot.get_or_insert_with(String::new))
}

fn normalize_optionals(trend: &mut Trend) {
    for slot in [&mut trend.summary, &mut trend.author, &mut trend.category] {
        if slot.as_deref().is_some_and(str::is_empty) {
            *slot = None;
        }
    }
}

fn parse_with_format(raw: &str, format: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_str(raw, format) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, format)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn transform(kind: &str, field: &str, value: Option<&str>) -> Transform {
        Transform {
            kind: kind.into(),
            field: field.into(),
            value: value.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_native_uses_mapping_then_canonical() {
        let source = Source::new("s", "S", "http").with_mapping("author", "by");
        let fields = FieldMap::new(&source);
        assert_eq!(fields.native("author"), "by");
        assert_eq!(fields.native("title"), "title");
    }

    #[test]
    fn test_text_record_requires_title() {
        let source = Source::new("gh", "GitHub", "chrome");
        let no_title = record(&[("link", "https://x")]);
        assert!(text_record_to_trend(&no_title, &source, "gh-1".into()).is_none());
        let blank_title = record(&[("title", "   ")]);
        assert!(text_record_to_trend(&blank_title, &source, "gh-1".into()).is_none());
    }

    #[test]
    fn test_text_record_link_and_description_fallbacks() {
        let source = Source::new("gh", "GitHub", "chrome");
        let rec = record(&[
            ("title", "tokio-rs/tokio"),
            ("link", "https://github.com/tokio-rs/tokio"),
            ("description", "A runtime"),
            ("stars", ""),
        ]);
        let trend = text_record_to_trend(&rec, &source, "gh-1".into()).unwrap();
        assert_eq!(trend.url, "https://github.com/tokio-rs/tokio");
        assert_eq!(trend.summary.as_deref(), Some("A runtime"));
        assert_eq!(trend.source, "GitHub");
        assert_eq!(trend.source_id, "gh");
        assert_eq!(trend.metadata.len(), 3);
        assert!(!trend.metadata.contains_key("stars"));
    }

    #[test]
    fn test_text_record_respects_mapping() {
        let source = Source::new("gh", "GitHub", "chrome").with_mapping("title", "repo");
        let rec = record(&[("repo", "serde-rs/serde"), ("title", "ignored")]);
        let trend = text_record_to_trend(&rec, &source, "gh-1".into()).unwrap();
        assert_eq!(trend.title, "serde-rs/serde");
    }

    #[test]
    fn test_transforms_in_order() {
        let mut trend = Trend::new("s-1", "  Title  ", "/item/1");
        trend.set_metadata("published", "2025-05-06 08:30");
        let transforms = vec![
            transform("trim", "title", None),
            transform("prefix", "url", Some("https://example.com")),
            transform("default", "author", Some("staff")),
            transform("set", "category", Some("tech")),
            transform("set", "tag", Some("rust")),
            Transform {
                format: Some("%Y-%m-%d %H:%M".into()),
                ..transform("date", "published", None)
            },
            transform("explode", "title", None),
        ];
        apply_transforms(&mut trend, &transforms);

        assert_eq!(trend.title, "Title");
        assert_eq!(trend.url, "https://example.com/item/1");
        assert_eq!(trend.author.as_deref(), Some("staff"));
        assert_eq!(trend.category.as_deref(), Some("tech"));
        assert_eq!(trend.tags, vec!["rust".to_string()]);
        assert_eq!(
            trend.timestamp.unwrap().to_rfc3339(),
            "2025-05-06T08:30:00+00:00"
        );
    }

    #[test]
    fn test_trim_on_missing_optional_stays_none() {
        let mut trend = Trend::new("s-1", "T", "");
        let transforms = vec![transform("trim", "summary", None)];
        apply_transforms(&mut trend, &transforms);
        assert!(trend.summary.is_none());
    }

    #[test]
    fn test_parse_with_format_date_only() {
        let ts = parse_with_format("2025-01-02", "%Y-%m-%d").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-01-02T00:00:00+00:00");
        assert!(parse_with_format("nope", "%Y-%m-%d").is_none());
    }
}
