//! Query and agent services.
//!
//! [`TrendService`] is a thin layer over the store that adds the star/unstar
//! mutations. [`AgentService`] feeds stored trends to a [`Summarizer`].

use crate::error::Result;
use crate::llm::{Summarizer, TopicSuggestion};
use crate::models::{Profile, Trend};
use crate::store::{ListOptions, Page, SearchOptions, TrendRepository};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Titles considered by [`AgentService::suggest_topics`].
pub const SUGGEST_WINDOW: usize = 50;

/// Read and curate stored trends for one profile.
#[derive(Clone)]
pub struct TrendService {
    repo: Arc<dyn TrendRepository>,
}

impl TrendService {
    pub fn new(repo: Arc<dyn TrendRepository>) -> Self {
        Self { repo }
    }

    /// All stored trends, oldest partition first.
    pub async fn list(&self, opts: &ListOptions) -> Result<Page> {
        self.repo.list(opts).await
    }

    /// One trend by id.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::error::Error::NotFound) when no partition
    /// holds `id`.
    pub async fn get(&self, id: &str) -> Result<Trend> {
        self.repo.find_by_id(id).await
    }

    /// Trends of a single day. A day with no partition is an empty page.
    pub async fn get_by_date(&self, date: NaiveDate, opts: &ListOptions) -> Result<Page> {
        self.repo.find_by_date(date, opts).await
    }

    /// Case-insensitive substring match on title and summary, narrowed by the
    /// filters in `opts`.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Page> {
        self.repo.search(query, opts).await
    }

    /// Mark a trend as starred. Starring twice is a no-op.
    pub async fn star(&self, id: &str) -> Result<()> {
        self.set_starred(id, true).await
    }

    /// Clear the star. Unstarring an unstarred trend is a no-op.
    pub async fn unstar(&self, id: &str) -> Result<()> {
        self.set_starred(id, false).await
    }

    /// Remove a trend from its partition. Missing ids are an error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.repo.delete(id).await
    }

    #[instrument(level = "info", skip(self))]
    async fn set_starred(&self, id: &str, starred: bool) -> Result<()> {
        let mut trend = self.repo.find_by_id(id).await?;
        if trend.starred == starred {
            debug!("Already in requested state");
            return Ok(());
        }
        trend.starred = starred;
        self.repo.update(&trend).await
    }
}

/// LLM operations over stored trends.
#[derive(Clone)]
pub struct AgentService {
    agent: Arc<dyn Summarizer>,
    trends: TrendService,
}

impl AgentService {
    pub fn new(agent: Arc<dyn Summarizer>, trends: TrendService) -> Self {
        Self { agent, trends }
    }

    /// Name reported by the underlying model client.
    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    /// Summarize a stored trend: its summary when present, else its title.
    #[instrument(level = "info", skip(self))]
    pub async fn summarize(&self, trend_id: &str) -> Result<String> {
        let trend = self.trends.get(trend_id).await?;
        let content = trend
            .summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(trend.title.as_str());
        self.agent.summarize(content).await
    }

    /// Summarize caller-supplied text without touching the store.
    pub async fn summarize_content(&self, content: &str) -> Result<String> {
        self.agent.summarize(content).await
    }

    /// Suggest topics from the most recent stored titles.
    ///
    /// The prompt is the profile's `suggester` template when it has one,
    /// otherwise a built-in prompt chosen by profile name.
    #[instrument(level = "info", skip_all, fields(profile = %profile.name))]
    pub async fn suggest_topics(&self, profile: &Profile) -> Result<Vec<TopicSuggestion>> {
        let all = self.trends.list(&ListOptions::default()).await?;
        let skip = all.items.len().saturating_sub(SUGGEST_WINDOW);
        let titles: Vec<String> = all.items.into_iter().skip(skip).map(|t| t.title).collect();
        debug!(titles = titles.len(), "Collected titles for suggestions");

        let template = if profile.prompts.suggester.trim().is_empty() {
            default_suggest_prompt(&profile.name)
        } else {
            profile.prompts.suggester.as_str()
        };
        self.agent.suggest(&titles, template).await
    }

    /// Keywords from a model summary of `content`, stop words removed.
    pub async fn extract_keywords(&self, content: &str) -> Result<Vec<String>> {
        let summary = self.agent.summarize(content).await?;
        Ok(keywords(&summary))
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "through",
    "during", "before", "after", "above", "below", "between", "under", "again", "further",
    "then", "once", "this", "that", "these", "those", "and", "but", "or", "if", "because",
    "while", "although", "though",
];

fn keywords(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.to_lowercase()
                .trim_matches(|c: char| ".,!?;:\"'()[]{}".contains(c))
                .to_string()
        })
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Built-in suggestion prompt for profiles without their own template.
pub fn default_suggest_prompt(profile: &str) -> &'static str {
    match profile {
        "tech" => {
            r#"Based on these trending tech topics, suggest 3 blog post ideas
that would fit a blog about cloud engineering, Go, Rust, and AI.

Topics:
{{topics}}

For each suggestion, provide a title and brief description in JSON format:
[
  {"title": "...", "description": "...", "score": 0.95}
]"#
        }
        "finance" => {
            r#"Based on these trending finance topics, suggest 3 blog post ideas
about investing and market analysis.

Topics:
{{topics}}

For each suggestion, provide a title and brief description in JSON format:
[
  {"title": "...", "description": "...", "score": 0.95}
]"#
        }
        _ => crate::llm::GENERIC_SUGGEST_PROMPT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::TrendStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Echoes its input and records every call.
    #[derive(Default)]
    struct EchoAgent {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Summarizer for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        async fn summarize(&self, content: &str) -> Result<String> {
            self.seen.lock().unwrap().push(content.to_string());
            Ok(format!("summary of {content}"))
        }

        async fn suggest(
            &self,
            topics: &[String],
            template: &str,
        ) -> Result<Vec<TopicSuggestion>> {
            self.seen.lock().unwrap().push(template.to_string());
            Ok(topics
                .iter()
                .map(|t| TopicSuggestion {
                    title: t.clone(),
                    description: String::new(),
                    score: 1.0,
                    topics: Vec::new(),
                })
                .collect())
        }
    }

    async fn seeded(n: usize) -> (TempDir, TrendService) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TrendStore::new(dir.path(), "tech"));
        let trends: Vec<Trend> = (0..n)
            .map(|i| Trend::new(format!("t-{i}"), format!("Title {i}"), ""))
            .collect();
        let day = NaiveDate::from_ymd_opt(2025, 5, 6).unwrap();
        store.save_batch(&trends, day).await.unwrap();
        (dir, TrendService::new(store))
    }

    #[tokio::test]
    async fn test_star_unstar_idempotent() {
        let (_dir, service) = seeded(2).await;
        service.star("t-1").await.unwrap();
        service.star("t-1").await.unwrap();
        assert!(service.get("t-1").await.unwrap().starred);
        assert!(!service.get("t-0").await.unwrap().starred);

        service.unstar("t-1").await.unwrap();
        service.unstar("t-1").await.unwrap();
        assert!(!service.get("t-1").await.unwrap().starred);

        let err = service.star("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_summarize_prefers_summary_over_title() {
        let (_dir, service) = seeded(1).await;
        let mut with_summary = service.get("t-0").await.unwrap();
        with_summary.summary = Some("Body text".into());
        // Update goes through the repository directly to set a summary.
        service.repo.update(&with_summary).await.unwrap();

        let echo = Arc::new(EchoAgent::default());
        let agents = AgentService::new(echo.clone(), service);
        assert_eq!(agents.summarize("t-0").await.unwrap(), "summary of Body text");
        assert!(agents.summarize("missing").await.unwrap_err().is_not_found());
        assert_eq!(agents.summarize_content("raw").await.unwrap(), "summary of raw");
        assert_eq!(*echo.seen.lock().unwrap(), vec!["Body text", "raw"]);
    }

    #[tokio::test]
    async fn test_suggest_uses_recent_titles_and_templates() {
        let (_dir, service) = seeded(60).await;
        let echo = Arc::new(EchoAgent::default());
        let agents = AgentService::new(echo.clone(), service);

        let tech = Profile {
            name: "tech".into(),
            ..Default::default()
        };
        let suggestions = agents.suggest_topics(&tech).await.unwrap();
        assert_eq!(suggestions.len(), SUGGEST_WINDOW);
        assert_eq!(suggestions[0].title, "Title 10");
        assert_eq!(suggestions.last().unwrap().title, "Title 59");

        let mut custom = tech.clone();
        custom.prompts.suggester = "Only {{topics}}".into();
        agents.suggest_topics(&custom).await.unwrap();

        let seen = echo.seen.lock().unwrap();
        assert!(seen[0].contains("cloud engineering, Go, Rust, and AI"));
        assert_eq!(seen[1], "Only {{topics}}");
    }

    #[tokio::test]
    async fn test_extract_keywords_drops_stop_words() {
        let (_dir, service) = seeded(0).await;
        let agents = AgentService::new(Arc::new(EchoAgent::default()), service);
        let words = agents.extract_keywords("The Rust compiler, and tokio!").await.unwrap();
        assert_eq!(words, vec!["summary", "rust", "compiler", "tokio"]);
    }

    #[test]
    fn test_default_prompts_by_profile() {
        assert!(default_suggest_prompt("finance").contains("investing"));
        assert!(default_suggest_prompt("gardening").starts_with("Based on these trending topics"));
        for profile in ["tech", "finance", "other"] {
            assert!(default_suggest_prompt(profile).contains("{{topics}}"));
        }
    }
}
