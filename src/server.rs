//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/health` | none | Health check (returns version) |
//! | `GET`  | `/api/cron/daily-digest` | cron bearer | Run one ingestion |
//! | `GET`  | `/api/cron/weekly-digest` | cron bearer | Summarize the week's engagement |
//! | `GET`  | `/api/search?q=` | none | Keyword search |
//! | `GET`  | `/api/search/semantic?q=&limit=` | optional user | Semantic search, personalized when identified |
//! | `POST` | `/api/interactions` | user | Record an interaction, refresh preferences |
//! | `GET`  | `/api/feed/personalized?limit=` | user | Standing recommendations |
//! | `GET`  | `/api/digest/latest` | none | Newest day's digest |
//! | `GET`  | `/api/digest/dates` | none | Days with a digest, newest first |
//! | `GET`  | `/api/digest/{date}` | none | One day's digest |
//! | `GET`/`POST` | `/api/sources` | none | List / create sources |
//! | `PATCH`/`DELETE` | `/api/sources/{id}` | none | Update / delete a source |
//! | `GET`  | `/api/favorites` | user | Caller's favorites |
//! | `POST` | `/api/favorites/{id}` | user | Toggle a favorite |
//! | `POST` | `/api/read/{id}` | user | Mark an item read |
//!
//! # Error Contract
//!
//! ```json
//! { "error": "query must not be empty" }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, FromRef, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::{bearer_token, check_cron, MaybeUser, SessionKey, UserSession};
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::models::{DigestItem, InteractionEvent, InteractionType, NewSource, SourceUpdate};
use crate::personalize::{blend, load_preference, personalized_feed, PreferenceRefresher};
use crate::pipeline::Pipeline;
use crate::search::{Retriever, SearchMode};
use crate::store::{DigestStore, SqliteStore};
use crate::weekly::{run_weekly, WeeklyDigest};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DigestStore>,
    pub retriever: Arc<Retriever>,
    pub pipeline: Arc<Pipeline>,
    pub refresher: PreferenceRefresher,
    pub session: SessionKey,
}

impl FromRef<AppState> for SessionKey {
    fn from_ref(state: &AppState) -> Self {
        state.session.clone()
    }
}

impl AppState {
    /// Wires every component around `store` and `embedder`.
    ///
    /// Spawns the preference refresh worker, so it must be called inside a
    /// Tokio runtime.
    pub fn new(
        config: Config,
        store: Arc<dyn DigestStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let pipeline = Pipeline::from_config(&config, store.clone(), embedder.clone())?;
        Self::with_pipeline(config, store, embedder, pipeline)
    }

    /// Like [`AppState::new`] with a pre-built pipeline.
    pub fn with_pipeline(
        config: Config,
        store: Arc<dyn DigestStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        pipeline: Pipeline,
    ) -> anyhow::Result<Self> {
        let retriever = Retriever::from_config(&config, store.clone(), embedder);
        let session = SessionKey::new(config.session_secret());
        Ok(Self {
            refresher: PreferenceRefresher::spawn(store.clone()),
            config: Arc::new(config),
            store,
            retriever: Arc::new(retriever),
            pipeline: Arc::new(pipeline),
            session,
        })
    }
}

/// Builds the router with all routes, CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/cron/daily-digest", get(handle_cron))
        .route("/api/cron/weekly-digest", get(handle_weekly_cron))
        .route("/api/search", get(handle_search))
        .route("/api/search/semantic", get(handle_semantic_search))
        .route("/api/interactions", post(handle_interaction))
        .route("/api/feed/personalized", get(handle_personalized_feed))
        .route("/api/digest/latest", get(handle_latest_digest))
        .route("/api/digest/dates", get(handle_digest_dates))
        .route("/api/digest/{date}", get(handle_digest_for_date))
        .route("/api/sources", get(handle_list_sources).post(handle_create_source))
        .route(
            "/api/sources/{id}",
            patch(handle_update_source).delete(handle_delete_source),
        )
        .route("/api/favorites", get(handle_list_favorites))
        .route("/api/favorites/{id}", post(handle_toggle_favorite))
        .route("/api/read/{id}", post(handle_mark_read))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Binds to the address configured in `[server].bind` and serves until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let store: Arc<dyn DigestStore> = Arc::new(SqliteStore::open(config).await?);
    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);

    if config.cron_secret().is_none() {
        tracing::warn!("CRON_SECRET is not set; the ingestion trigger will reject every call");
    }
    if config.session_secret().is_none() {
        tracing::warn!("SESSION_SECRET is not set; user endpoints will reject every call");
    }

    let state = AppState::new(config.clone(), store, embedder)?;
    let app = build_router(state);

    println!("Digest API listening on http://{}", bind_addr);
    info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        message: message.into(),
    }
}

/// Logs the full chain, answers with a generic 500.
fn internal(context: &'static str) -> impl FnOnce(anyhow::Error) -> AppError {
    move |err| {
        error!(error = %format!("{err:#}"), "{context}");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: context.to_string(),
        }
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(v)| v)
        .map_err(|e| bad_request(format!("invalid request body: {}", e.body_text())))
}

fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| bad_request(format!("invalid date '{raw}', expected YYYY-MM-DD")))
}

async fn existing_item(state: &AppState, id: &str) -> Result<DigestItem, AppError> {
    state
        .store
        .get_item(id)
        .await
        .map_err(internal("Failed to load item"))?
        .ok_or_else(|| not_found(format!("digest item not found: {id}")))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/cron/daily-digest ============

/// Runs one ingestion for today's date.
///
/// `{ "success": true, "itemsProcessed": n }` on success, 500 with
/// `{ "error": ... }` when the run failed.
async fn handle_cron(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    check_cron(bearer_token(&headers), state.config.cron_secret()).map_err(|e| AppError {
        status: StatusCode::UNAUTHORIZED,
        message: e.to_string(),
    })?;

    let today = chrono::Utc::now().date_naive();
    match state.pipeline.run(today).await {
        Ok(summary) => Ok(Json(json!({
            "success": true,
            "itemsProcessed": summary.items_stored,
        }))),
        Err(e) => Err(AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        }),
    }
}

async fn handle_weekly_cron(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WeeklyDigest>, AppError> {
    check_cron(bearer_token(&headers), state.config.cron_secret()).map_err(|e| AppError {
        status: StatusCode::UNAUTHORIZED,
        message: e.to_string(),
    })?;

    let today = chrono::Utc::now().date_naive();
    run_weekly(state.store.as_ref(), today)
        .await
        .map(Json)
        .map_err(|e| AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        })
}

// ============ Search ============

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<DigestItem>>, AppError> {
    let query = params.q.unwrap_or_default();
    let limit = params.limit.unwrap_or(state.config.retrieval.search_limit);
    let items = state
        .retriever
        .keyword(&query, limit)
        .await
        .map_err(internal("Search failed"))?;
    Ok(Json(items))
}

/// Semantic search; identified callers with a preference vector get
/// `combined_score` and a re-ranked list.
async fn handle_semantic_search(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    let query = params.q.unwrap_or_default();
    let limit = params.limit.unwrap_or(state.config.retrieval.search_limit);
    let outcome = state.retriever.semantic(&query, limit).await;

    let hits = match (&user, outcome.mode) {
        (Some(user), SearchMode::Semantic) => {
            let preference = load_preference(state.store.as_ref(), &user.user_id).await;
            blend(
                outcome.hits,
                preference.as_deref(),
                &state.config.personalization,
            )
        }
        _ => outcome.hits,
    };
    Json(hits)
}

// ============ POST /api/interactions ============

#[derive(Deserialize)]
struct InteractionRequest {
    digest_item_id: Option<String>,
    interaction_type: Option<String>,
    dwell_time_seconds: Option<i64>,
}

/// Records the interaction, then queues a preference refresh that the
/// response does not wait for.
async fn handle_interaction(
    State(state): State<AppState>,
    user: UserSession,
    body: Result<Json<InteractionRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let req = json_body(body)?;

    let (Some(item_id), Some(kind)) = (
        req.digest_item_id.filter(|s| !s.trim().is_empty()),
        req.interaction_type.filter(|s| !s.trim().is_empty()),
    ) else {
        return Err(bad_request(
            "digest_item_id and interaction_type are required",
        ));
    };
    let kind = InteractionType::parse(&kind)
        .ok_or_else(|| bad_request(format!("unknown interaction_type '{kind}'")))?;
    existing_item(&state, &item_id).await?;

    let event = InteractionEvent {
        user_id: user.user_id.clone(),
        item_id,
        kind,
        dwell_seconds: req.dwell_time_seconds,
    };
    state
        .store
        .record_interaction(&event)
        .await
        .map_err(internal("Failed to record interaction"))?;

    state.refresher.request(&user.user_id);
    Ok(Json(json!({ "success": true })))
}

// ============ GET /api/feed/personalized ============

#[derive(Deserialize)]
struct FeedParams {
    limit: Option<usize>,
}

async fn handle_personalized_feed(
    State(state): State<AppState>,
    user: UserSession,
    Query(params): Query<FeedParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(state.config.retrieval.feed_limit);
    Json(personalized_feed(state.store.as_ref(), &user.user_id, limit).await)
}

// ============ Digest read surfaces ============

async fn handle_latest_digest(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let dates = state
        .store
        .distinct_dates()
        .await
        .map_err(internal("Failed to fetch digest"))?;
    let Some(latest) = dates.first().copied() else {
        return Ok(Json(json!({ "date": null, "items": [] })));
    };
    let items = state
        .store
        .items_for_date(latest)
        .await
        .map_err(internal("Failed to fetch digest"))?;
    Ok(Json(json!({ "date": latest, "items": items })))
}

async fn handle_digest_dates(
    State(state): State<AppState>,
) -> Result<Json<Vec<NaiveDate>>, AppError> {
    let dates = state
        .store
        .distinct_dates()
        .await
        .map_err(internal("Failed to fetch dates"))?;
    Ok(Json(dates))
}

async fn handle_digest_for_date(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<Value>, AppError> {
    let date = parse_date(&date)?;
    let items = state
        .store
        .items_for_date(date)
        .await
        .map_err(internal("Failed to fetch digest"))?;
    Ok(Json(json!({ "date": date, "items": items })))
}

// ============ Sources ============

#[derive(Deserialize)]
struct CreateSourceRequest {
    url: Option<String>,
    name: Option<String>,
    category: Option<String>,
}

async fn handle_list_sources(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let sources = state
        .store
        .list_sources()
        .await
        .map_err(internal("Failed to fetch sources"))?;
    Ok(Json(json!({ "sources": sources })))
}

async fn handle_create_source(
    State(state): State<AppState>,
    body: Result<Json<CreateSourceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let req = json_body(body)?;
    let field = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let (Some(url), Some(name), Some(category)) =
        (field(req.url), field(req.name), field(req.category))
    else {
        return Err(bad_request("url, name and category are required"));
    };

    let existing = state
        .store
        .list_sources()
        .await
        .map_err(internal("Failed to create source"))?;
    if existing.iter().any(|s| s.url == url) {
        return Err(conflict(format!("source already exists: {url}")));
    }

    let source = state
        .store
        .create_source(&NewSource {
            url,
            name,
            category,
        })
        .await
        .map_err(internal("Failed to create source"))?;
    Ok((StatusCode::CREATED, Json(json!({ "source": source }))))
}

async fn handle_update_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SourceUpdate>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let update = json_body(body)?;
    let found = state
        .store
        .update_source(&id, &update)
        .await
        .map_err(internal("Failed to update source"))?;
    if !found {
        return Err(not_found(format!("source not found: {id}")));
    }
    Ok(Json(json!({ "success": true })))
}

async fn handle_delete_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let found = state
        .store
        .delete_source(&id)
        .await
        .map_err(internal("Failed to delete source"))?;
    if !found {
        return Err(not_found(format!("source not found: {id}")));
    }
    Ok(Json(json!({ "success": true })))
}

// ============ Favorites and read status ============

async fn handle_list_favorites(
    State(state): State<AppState>,
    user: UserSession,
) -> Result<Json<Value>, AppError> {
    let items = state
        .store
        .favorites(&user.user_id)
        .await
        .map_err(internal("Failed to fetch favorites"))?;
    Ok(Json(json!({ "items": items })))
}

async fn handle_toggle_favorite(
    State(state): State<AppState>,
    user: UserSession,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    existing_item(&state, &id).await?;
    let is_favorited = state
        .store
        .toggle_favorite(&user.user_id, &id)
        .await
        .map_err(internal("Failed to update favorite"))?;
    Ok(Json(json!({ "success": true, "is_favorited": is_favorited })))
}

async fn handle_mark_read(
    State(state): State<AppState>,
    user: UserSession,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    existing_item(&state, &id).await?;
    state
        .store
        .mark_read(&user.user_id, &id)
        .await
        .map_err(internal("Failed to mark as read"))?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert!(parse_date("2024-03-01").is_ok());
        assert_eq!(parse_date("03/01/2024").unwrap_err().status, StatusCode::BAD_REQUEST);
        assert!(parse_date("2024-02-30").is_err());
    }
}
