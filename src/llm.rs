//! LLM access with exponential backoff retry logic.
//!
//! This module talks to an OpenAI-compatible `/chat/completions` endpoint and
//! exposes the two capabilities the agent service needs: summarizing a piece
//! of text and turning a list of trending titles into topic suggestions.
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait for "send a prompt, get a reply"
//! - [`ChatClient`]: `reqwest` implementation of [`AskAsync`]
//! - [`RetryAsk`]: decorator adding retries to any [`AskAsync`]
//! - [`Summarizer`]: object-safe capability used by the services
//! - [`LlmAgent`]: [`Summarizer`] built on a retrying [`ChatClient`]
//!
//! # Retry Strategy
//!
//! - Maximum 3 retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(60);

/// Trait for async LLM interaction.
///
/// Implementors send text to an LLM and receive a response. Decorators such
/// as [`RetryAsk`] implement it too.
#[allow(async_fn_in_trait)]
pub trait AskAsync {
    /// The type of response returned by the LLM.
    type Response;

    /// Send text to the LLM and receive a response.
    async fn ask(&self, text: &str) -> Result<Self::Response>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => {
                    return Ok(resp);
                }
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Single-turn client for an OpenAI-compatible chat endpoint.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl AskAsync for ChatClient {
    type Response = String;

    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, text: &str) -> Result<Self::Response> {
        let t0 = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: text,
            }],
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!(
            %status,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            body = %truncate_for_log(&body, 300),
            "Chat completion returned"
        );

        let parsed = match serde_json::from_str::<ChatResponse>(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(Error::Status {
                    status: status.as_u16(),
                    url: self.endpoint.clone(),
                });
            }
            Err(e) => return Err(Error::Llm(format!("unreadable response: {e}"))),
        };
        if let Some(api_error) = parsed.error {
            return Err(Error::Llm(format!("API error: {}", api_error.message)));
        }
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::Llm("no response from API".to_string()))
    }
}

/// One suggested topic returned by [`Summarizer::suggest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSuggestion {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Language-model capabilities used by the agent service.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    /// A short natural-language summary of `content`.
    async fn summarize(&self, content: &str) -> Result<String>;

    /// Suggestions for `topics`. `prompt_template` may contain `{{topics}}`;
    /// an empty template selects a generic prompt.
    async fn suggest(
        &self,
        topics: &[String],
        prompt_template: &str,
    ) -> Result<Vec<TopicSuggestion>>;
}

/// Suggestion prompt used when neither the profile nor its name selects one.
pub const GENERIC_SUGGEST_PROMPT: &str =
    r#"Based on these trending topics, suggest 3 blog post ideas.

Topics:
{{topics}}

For each suggestion, provide a title and brief description in JSON format:
[
  {"title": "...", "description": "...", "score": 0.95}
]"#;

/// [`Summarizer`] backed by a retrying chat client.
#[derive(Debug)]
pub struct LlmAgent {
    name: String,
    api: RetryAsk<ChatClient>,
}

impl LlmAgent {
    /// Agent retrying each request up to three times, starting at one second.
    pub fn new(config: &LlmConfig) -> Self {
        Self::with_retries(config, 3, StdDuration::from_secs(1))
    }

    pub fn with_retries(config: &LlmConfig, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            name: config.provider.clone(),
            api: RetryAsk::new(ChatClient::new(config), max_retries, base_delay),
        }
    }

    #[instrument(level = "info", skip_all)]
    async fn ask_with_backoff(&self, prompt: &str) -> Result<String> {
        let t0 = Instant::now();
        let res = self.api.ask(prompt).await;
        let dt = t0.elapsed();

        match &res {
            Ok(_) => info!(
                elapsed_ms_total = dt.as_millis() as u64,
                "ask_with_backoff succeeded"
            ),
            Err(e) => error!(
                elapsed_ms_total = dt.as_millis() as u64,
                error = %e,
                "ask_with_backoff failed"
            ),
        }
        res
    }
}

#[async_trait]
impl Summarizer for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn summarize(&self, content: &str) -> Result<String> {
        let prompt = format!(
            "Summarize the following content in 2-3 sentences, \
             highlighting key technical insights:\n\n{content}\n\nProvide a concise summary:"
        );
        let reply = self.ask_with_backoff(&prompt).await?;
        Ok(reply.trim().to_string())
    }

    async fn suggest(
        &self,
        topics: &[String],
        prompt_template: &str,
    ) -> Result<Vec<TopicSuggestion>> {
        let template = if prompt_template.trim().is_empty() {
            GENERIC_SUGGEST_PROMPT
        } else {
            prompt_template
        };
        let prompt = template.replace("{{topics}}", &topics.join("\n"));
        let reply = self.ask_with_backoff(&prompt).await?;
        Ok(parse_suggestions(&reply))
    }
}

/// Interpret a suggestion reply.
///
/// Prefers a JSON array embedded anywhere in the reply, then Markdown
/// headings (each heading a title, following lines its description), and
/// finally wraps the whole reply as one generic suggestion.
pub fn parse_suggestions(response: &str) -> Vec<TopicSuggestion> {
    let response = response.trim();

    if let (Some(start), Some(end)) = (response.find('['), response.rfind(']')) {
        if start < end {
            let slice = &response[start..=end];
            if let Ok(parsed) = serde_json::from_str::<Vec<TopicSuggestion>>(slice) {
                return parsed;
            }
        }
    }

    let mut suggestions = Vec::new();
    let mut current: Option<TopicSuggestion> = None;
    for line in response.lines().map(str::trim) {
        if line.starts_with('#') {
            suggestions.extend(current.take());
            current = Some(TopicSuggestion {
                title: line.trim_start_matches(['#', ' ']).to_string(),
                description: String::new(),
                score: 0.0,
                topics: Vec::new(),
            });
        } else if let Some(cur) = current.as_mut().filter(|_| !line.is_empty()) {
            if !cur.description.is_empty() {
                cur.description.push(' ');
            }
            cur.description.push_str(line);
        }
    }
    suggestions.extend(current);

    if suggestions.is_empty() {
        suggestions.push(TopicSuggestion {
            title: "AI-Generated Suggestion".to_string(),
            description: response.to_string(),
            score: 0.8,
            topics: Vec::new(),
        });
    }
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> LlmConfig {
        LlmConfig {
            api_key: "sk-test".into(),
            base_url: format!("{}/v1/", server.uri()),
            ..LlmConfig::default()
        }
    }

    fn reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
    }

    #[tokio::test]
    async fn test_summarize_sends_bearer_and_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(reply("  Tokio is an async runtime.  "))
            .expect(1)
            .mount(&server)
            .await;

        let agent = LlmAgent::with_retries(&config_for(&server), 0, StdDuration::from_millis(1));
        let summary = agent.summarize("tokio-rs/tokio").await.unwrap();
        assert_eq!(summary, "Tokio is an async runtime.");
        assert_eq!(agent.name(), "glm5");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = requests[0].body_json().unwrap();
        assert_eq!(body["model"], "glm-5");
        assert!(body["messages"][0]["content"].as_str().unwrap().contains("tokio-rs/tokio"));
    }

    #[tokio::test]
    async fn test_api_error_surfaces_as_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "bad key"}})),
            )
            .mount(&server)
            .await;

        let client = ChatClient::new(&config_for(&server));
        let err = client.ask("hi").await.unwrap_err();
        assert!(matches!(err, Error::Llm(ref m) if m.contains("bad key")));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(reply("ok"))
            .mount(&server)
            .await;

        let client = ChatClient::new(&config_for(&server));
        let api = RetryAsk::new(client, 2, StdDuration::from_millis(1));
        assert_eq!(api.ask("hi").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;
        let err = ChatClient::new(&config_for(&server)).ask("hi").await.unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
    }

    #[tokio::test]
    async fn test_suggest_fills_template() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply(
                r#"Sure! [{"title": "Async Rust", "description": "Why", "score": 0.9}]"#,
            ))
            .mount(&server)
            .await;

        let agent = LlmAgent::with_retries(&config_for(&server), 0, StdDuration::from_millis(1));
        let topics = vec!["tokio 2.0".to_string(), "serde 2".to_string()];
        let suggestions = agent.suggest(&topics, "Ideas:\n{{topics}}").await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].title, "Async Rust");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = requests[0].body_json().unwrap();
        assert_eq!(body["messages"][0]["content"], "Ideas:\ntokio 2.0\nserde 2");
    }

    #[test]
    fn test_parse_suggestions_heading_fallback() {
        let reply = "# Rust at the edge\nDeploying Wasm.\nWith numbers.\n\n\
                     ## Zero-copy parsing\nnom vs winnow";
        let parsed = parse_suggestions(reply);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].title, "Rust at the edge");
        assert_eq!(parsed[0].description, "Deploying Wasm. With numbers.");
        assert_eq!(parsed[1].title, "Zero-copy parsing");
    }

    #[test]
    fn test_parse_suggestions_generic_fallback() {
        let parsed = parse_suggestions("Write about [unbalanced things");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title, "AI-Generated Suggestion");
        assert_eq!(parsed[0].score, 0.8);
    }
}
