//! Data models shared by collectors, the store and the services.
//!
//! This module defines the canonical vocabulary of the pipeline:
//! - [`Trend`]: one collected item in canonical form
//! - [`Source`]: a declarative descriptor for one external source
//! - [`Profile`]: a named grouping of sources and prompt templates
//! - [`CollectionResult`]: the outcome of one collection run
//!
//! `Trend` serializes with the field names used both on disk and over the
//! HTTP API (`source_id`, `collected_at`, ...). Empty optional fields are
//! omitted instead of being written as `null`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A value in a trend's open-ended metadata bag.
///
/// The set of variants is closed so that serialization stays deterministic;
/// JSON `null` has no variant and is dropped on conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Convert an arbitrary JSON value, dropping nulls at every depth.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Bool(b)),
            Value::Number(n) => n.as_i64().map(Self::Int).or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::Str(s)),
            Value::Array(items) => Some(Self::List(
                items.into_iter().filter_map(Self::from_json).collect(),
            )),
            Value::Object(map) => Some(Self::Map(
                map.into_iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|v| (k, v)))
                    .collect(),
            )),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for MetaValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A trending item in canonical form.
///
/// `id` is the identity key used by the store to merge repeated collections
/// of the same external item. `collected_at` is stamped once by
/// [`Trend::new`] and has no setter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Display name of the source.
    #[serde(default)]
    pub source: String,
    /// Identity of the descriptor that produced this record.
    #[serde(default)]
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Origin time of the item, when the source exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    collected_at: DateTime<Utc>,
    #[serde(default)]
    pub starred: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, MetaValue>,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl Trend {
    /// Bare record stamped with the current time; everything else empty.
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            summary: None,
            score: 0,
            author: None,
            source: String::new(),
            source_id: String::new(),
            category: None,
            tags: Vec::new(),
            timestamp: None,
            collected_at: Utc::now(),
            starred: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn collected_at(&self) -> DateTime<Utc> {
        self.collected_at
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Case-insensitive substring match against title and summary.
    ///
    /// `needle` must already be lowercased.
    pub fn matches_query(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self
                .summary
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains(needle))
    }
}

/// A post-extraction transformation declared on a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// UI hints; never interpreted by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub priority: i32,
}

/// Declarative descriptor of one external source.
///
/// `config` is free-form and only interpreted by the collector registered
/// for `kind`. `field_mapping` maps canonical field names to the names the
/// source uses natively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub field_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub transforms: Vec<Transform>,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Source {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            kind: kind.into(),
            config: BTreeMap::new(),
            field_mapping: BTreeMap::new(),
            transforms: Vec::new(),
            display: DisplayConfig::default(),
            enabled: true,
        }
    }

    /// Builder-style helper used by loaders and tests.
    pub fn with_config(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    pub fn with_mapping(mut self, canonical: &str, native: &str) -> Self {
        self.field_mapping
            .insert(canonical.to_string(), native.to_string());
        self
    }

    /// A non-empty string config value.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// A positive integer config value; numeric strings are accepted.
    pub fn config_usize(&self, key: &str) -> Option<usize> {
        match self.config.get(key)? {
            serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|n| *n > 0)
    }
}

/// Prompt templates attached to a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default)]
    pub summarizer: String,
    #[serde(default)]
    pub suggester: String,
}

/// A named grouping of sources and prompts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub source_groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub default_sources: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

/// Collector implementations known to the default registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    Http,
    Rss,
    Chrome,
}

impl CollectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Rss => "rss",
            Self::Chrome => "chrome",
        }
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one collection run. Never persisted.
#[derive(Debug, Default)]
pub struct CollectionResult {
    /// Newly collected records, in source order.
    pub trends: Vec<Trend>,
    /// One message per failed source or failed save.
    pub errors: Vec<String>,
    pub duration: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trend_serialization_omits_empty_fields() {
        let trend = Trend::new("hn-1", "Rust 2024", "https://example.com");
        let json = serde_json::to_value(&trend).unwrap();

        assert_eq!(json["id"], "hn-1");
        assert_eq!(json["source_id"], "");
        assert_eq!(json["starred"], false);
        assert!(json.get("collected_at").is_some());
        for absent in ["summary", "score", "author", "category", "tags", "timestamp", "metadata"] {
            assert!(json.get(absent).is_none(), "{absent} should be omitted");
        }
    }

    #[test]
    fn test_trend_roundtrip_keeps_collected_at() {
        let mut trend = Trend::new("hn-1", "Title", "");
        trend.score = 42;
        trend.set_metadata("descendants", 7i64);
        let encoded = serde_json::to_string(&trend).unwrap();
        let decoded: Trend = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, trend);
        assert_eq!(decoded.collected_at(), trend.collected_at());
    }

    #[test]
    fn test_meta_value_from_json_drops_nulls() {
        let value = json!({"a": 1, "b": null, "c": [true, null, "x"], "d": 1.5});
        let meta = MetaValue::from_json(value).unwrap();
        let MetaValue::Map(map) = meta else {
            panic!("expected map");
        };
        assert_eq!(map.len(), 3);
        assert_eq!(map["a"], MetaValue::Int(1));
        assert_eq!(
            map["c"],
            MetaValue::List(vec![MetaValue::Bool(true), MetaValue::Str("x".into())])
        );
        assert_eq!(map["d"], MetaValue::Float(1.5));
        assert!(MetaValue::from_json(serde_json::Value::Null).is_none());
    }

    #[test]
    fn test_matches_query_checks_title_and_summary() {
        let mut trend = Trend::new("x-1", "Async Rust in Practice", "");
        assert!(trend.matches_query("rust"));
        assert!(!trend.matches_query("tokio"));
        trend.summary = Some("Deep dive into Tokio".into());
        assert!(trend.matches_query("tokio"));
    }

    #[test]
    fn test_source_from_yaml() {
        let yaml = r#"
id: hackernews
name: Hacker News
type: http
config:
  url: https://hacker-news.firebaseio.com/v0/topstories.json
  item_url: https://hacker-news.firebaseio.com/v0/item/{id}.json
  limit: 10
field_mapping:
  author: by
  timestamp: time
transforms:
  - type: set
    field: category
    value: tech
"#;
        let source: Source = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(source.kind, "http");
        assert!(source.enabled);
        assert_eq!(source.config_usize("limit"), Some(10));
        assert_eq!(source.field_mapping["author"], "by");
        assert_eq!(source.transforms[0].kind, "set");
        assert_eq!(source.config_str("missing"), None);
    }

    #[test]
    fn test_config_helpers_reject_empty_and_zero() {
        let source = Source::new("s", "S", "http")
            .with_config("url", "  ")
            .with_config("limit", 0)
            .with_config("concurrency", "4");
        assert_eq!(source.config_str("url"), None);
        assert_eq!(source.config_usize("limit"), None);
        assert_eq!(source.config_usize("concurrency"), Some(4));
    }
}
