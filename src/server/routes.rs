//! Endpoint handlers.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `/health` | `{status}` |
//! | GET | `/trends?date&source&limit&offset` | `{trends, total}` |
//! | GET | `/trends/search?q&source&tag&starred&limit&offset` | `{trends, total}` |
//! | GET | `/trends/{id}` | trend |
//! | POST | `/trends/{id}/star`, `/trends/{id}/unstar` | `{status}` |
//! | DELETE | `/trends/{id}` | `{status}` |
//! | POST | `/collect` (optional `{source_ids}`) | `{status, items_count, errors, duration_ms}` |
//! | GET | `/sources` | `{sources}` |
//! | GET | `/profiles` | `{profiles}` |
//! | POST | `/agent/summarize` (`{trend_id}` or `{content}`) | `{summary}` |
//! | POST | `/agent/suggest?profile` | `{suggestions}` |
//!
//! The collectors keep the item part of every trend id free of `/`, so ids
//! of sources with plain ids can be used in `{id}` paths verbatim. Anything
//! else must be percent-encoded.
//!
//! Errors are `{"error": "<message>"}` with the status chosen by
//! [`ApiError`]: unknown ids are 404, malformed input 400, a missing LLM 503.

use super::{ApiError, AppState};
use crate::models::{Profile, Trend};
use crate::service::AgentService;
use crate::store::{ListOptions, Page, SearchOptions};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

const DEFAULT_PAGE_SIZE: usize = 100;

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Routes relative to the API prefix; [`super::create_router`] nests them
/// under `/api/v1` and attaches the state.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/trends", get(list_trends))
        .route("/trends/search", get(search_trends))
        .route("/trends/{id}", get(get_trend).delete(delete_trend))
        .route("/trends/{id}/star", post(star_trend))
        .route("/trends/{id}/unstar", post(unstar_trend))
        .route("/collect", post(collect))
        .route("/sources", get(list_sources))
        .route("/profiles", get(list_profiles))
        .route("/agent/summarize", post(summarize))
        .route("/agent/suggest", post(suggest))
}

/// Body of every trend listing.
#[derive(Debug, Serialize)]
pub struct TrendPage {
    pub trends: Vec<Trend>,
    /// Matches before `limit`/`offset` were applied.
    pub total: usize,
}

impl From<Page> for TrendPage {
    fn from(page: Page) -> Self {
        Self {
            trends: page.items,
            total: page.total,
        }
    }
}

/// Query of `GET /trends`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// `YYYY-MM-DD`; restricts the listing to that day's partition.
    pub date: Option<String>,
    /// Source id filter.
    pub source: Option<String>,
    /// Page size, default 100; `0` returns everything.
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Query of `GET /trends/search`. `q` is required.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub source: Option<String>,
    pub tag: Option<String>,
    pub starred: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Optional body of `POST /collect`; no ids means every enabled source.
#[derive(Debug, Default, Deserialize)]
pub struct CollectRequest {
    #[serde(default)]
    pub source_ids: Vec<String>,
}

/// Outcome of a synchronous collection run.
#[derive(Debug, Serialize)]
pub struct CollectResponse {
    pub status: &'static str,
    pub items_count: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Body of `POST /agent/summarize`; `trend_id` wins when both are set.
#[derive(Debug, Default, Deserialize)]
pub struct SummarizeRequest {
    pub trend_id: Option<String>,
    pub content: Option<String>,
}

/// Query of `POST /agent/suggest`; defaults to the active profile.
#[derive(Debug, Default, Deserialize)]
pub struct SuggestParams {
    pub profile: Option<String>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::bad_request(format!("invalid date {raw:?}, expected YYYY-MM-DD"))
    })
}

async fn list_trends(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<TrendPage> {
    let opts = ListOptions {
        limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        offset: params.offset.unwrap_or(0),
        source: params.source.filter(|s| !s.is_empty()),
    };
    let page = match params.date.as_deref().filter(|d| !d.is_empty()) {
        Some(raw) => state.trends.get_by_date(parse_date(raw)?, &opts).await?,
        None => state.trends.list(&opts).await?,
    };
    Ok(Json(page.into()))
}

async fn search_trends(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<TrendPage> {
    if params.q.trim().is_empty() {
        return Err(ApiError::bad_request("query parameter q is required"));
    }
    let opts = SearchOptions {
        limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        offset: params.offset.unwrap_or(0),
        sources: params.source.into_iter().collect(),
        tags: params.tag.into_iter().collect(),
        starred: params.starred,
        ..Default::default()
    };
    Ok(Json(state.trends.search(&params.q, &opts).await?.into()))
}

async fn get_trend(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Trend> {
    Ok(Json(state.trends.get(&id).await?))
}

async fn star_trend(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    state.trends.star(&id).await?;
    Ok(Json(json!({ "status": "starred" })))
}

async fn unstar_trend(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    state.trends.unstar(&id).await?;
    Ok(Json(json!({ "status": "unstarred" })))
}

/// Removes the record from its partition for good.
async fn delete_trend(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    state.trends.delete(&id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

/// Runs synchronously; the response carries the whole result. Per-source
/// failures are listed in `errors` and never turn into an error status.
async fn collect(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<CollectResponse> {
    let request: CollectRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CollectRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid collect request: {e}")))?
    };

    let sources = state.config_dir.load_sources(&state.profile).await?;
    let result = if request.source_ids.is_empty() {
        state.collector.collect_all(&state.profile, &sources).await
    } else {
        state
            .collector
            .collect(&state.profile, &request.source_ids, &sources)
            .await
    };
    info!(
        items = result.trends.len(),
        errors = result.errors.len(),
        "Collect request served"
    );

    Ok(Json(CollectResponse {
        status: "completed",
        items_count: result.trends.len(),
        errors: result.errors,
        duration_ms: result.duration.map(|d| d.as_millis() as u64).unwrap_or_default(),
    }))
}

async fn list_sources(State(state): State<AppState>) -> ApiResult<Value> {
    let sources = state.config_dir.load_sources(&state.profile).await?;
    Ok(Json(json!({ "sources": sources })))
}

async fn list_profiles(State(state): State<AppState>) -> ApiResult<Value> {
    let profiles = state.config_dir.load_profiles().await?;
    Ok(Json(json!({ "profiles": profiles })))
}

fn agent(state: &AppState) -> Result<&AgentService, ApiError> {
    state
        .agent
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("LLM agent is not configured"))
}

async fn summarize(
    State(state): State<AppState>,
    Json(request): Json<SummarizeRequest>,
) -> ApiResult<Value> {
    let agent = agent(&state)?;
    let summary = match (request.trend_id, request.content) {
        (Some(id), _) if !id.is_empty() => agent.summarize(&id).await?,
        (_, Some(content)) if !content.trim().is_empty() => {
            agent.summarize_content(&content).await?
        }
        _ => return Err(ApiError::bad_request("trend_id or content is required")),
    };
    Ok(Json(json!({ "summary": summary })))
}

/// Profile names are validated before any file is read; a name that does not
/// exist falls back to an empty profile.
async fn suggest(
    State(state): State<AppState>,
    Query(params): Query<SuggestParams>,
) -> ApiResult<Value> {
    let agent = agent(&state)?;
    let name = params
        .profile
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| state.profile.clone());
    let profile = match state.config_dir.load_profile(&name).await {
        Ok(profile) => profile,
        Err(e) if e.is_not_found() => Profile {
            name,
            ..Default::default()
        },
        Err(e) => return Err(e.into()),
    };
    let suggestions = agent.suggest_topics(&profile).await?;
    Ok(Json(json!({ "suggestions": suggestions })))
}
