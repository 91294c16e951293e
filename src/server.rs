//! HTTP API served by `veille serve`.
//!
//! # Endpoints
//!
//! - `GET /cache?input_hash=..&result_key=..` - cached payload, 404 on a miss
//! - `POST /cache` - upsert a payload
//! - `GET|POST /sources`, `GET|POST /keywords` - JSON string list / full replace
//! - `GET|POST /filters` - the filter singleton
//! - `POST /feedback` - append a feedback record
//! - `GET /health` - liveness
//!
//! `data` is a JSON document encoded as a string, exactly as stored.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::error::{DbError, ParseError, StoreError};
use crate::feedback::{FeedbackRecord, FeedbackSink};
use crate::fingerprint::Fingerprint;
use crate::kind::ResultKind;
use crate::models::{Filters, MAX_TIME_VALUE};
use crate::store::{CacheData, CacheItem, CacheStore};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn CacheStore>,
    pub catalog: Catalog,
    pub feedback: Arc<dyn FeedbackSink>,
}

#[derive(Debug, Deserialize)]
pub struct CacheQuery {
    pub input_hash: String,
    pub result_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Saved {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl Saved {
    fn new(message: &str, count: Option<usize>) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
            count,
        })
    }
}

/// Errors returned to API clients as `{"error": ".."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl From<ParseError> for ApiError {
    fn from(e: ParseError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            StoreError::Unavailable(_) => ApiError::Unavailable(e.to_string()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => {
                error!(error = %m, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn cache_key(input_hash: &str, result_key: &str) -> Result<(Fingerprint, ResultKind), ApiError> {
    Ok((input_hash.parse()?, result_key.parse()?))
}

/// GET /cache
async fn get_cache(State(state): State<ApiState>, Query(q): Query<CacheQuery>) -> ApiResult<CacheData> {
    let (fingerprint, kind) = cache_key(&q.input_hash, &q.result_key)?;
    let data = state.store.get(fingerprint, kind).await?;
    Ok(Json(CacheData { data }))
}

/// POST /cache
async fn post_cache(State(state): State<ApiState>, Json(item): Json<CacheItem>) -> ApiResult<Saved> {
    let (fingerprint, kind) = cache_key(&item.input_hash, &item.result_key)?;
    state.store.put(fingerprint, kind, &item.data).await?;
    Ok(Saved::new("Cache saved", None))
}

async fn get_sources(State(state): State<ApiState>) -> ApiResult<Vec<String>> {
    Ok(Json(state.catalog.sources().await?))
}

async fn post_sources(State(state): State<ApiState>, Json(sources): Json<Vec<String>>) -> ApiResult<Saved> {
    let count = state.catalog.replace_sources(&sources).await?;
    info!(count, "Sources saved");
    Ok(Saved::new("Sources saved", Some(count)))
}

async fn get_keywords(State(state): State<ApiState>) -> ApiResult<Vec<String>> {
    Ok(Json(state.catalog.keywords().await?))
}

async fn post_keywords(State(state): State<ApiState>, Json(keywords): Json<Vec<String>>) -> ApiResult<Saved> {
    let count = state.catalog.replace_keywords(&keywords).await?;
    info!(count, "Keywords saved");
    Ok(Saved::new("Keywords saved", Some(count)))
}

async fn get_filters(State(state): State<ApiState>) -> ApiResult<Filters> {
    Ok(Json(state.catalog.filters().await?))
}

async fn post_filters(State(state): State<ApiState>, Json(filters): Json<Filters>) -> ApiResult<Saved> {
    if !(1..=MAX_TIME_VALUE).contains(&filters.time_value) {
        return Err(ApiError::BadRequest(format!(
            "time_value must be between 1 and {MAX_TIME_VALUE}"
        )));
    }
    state.catalog.replace_filters(&filters).await?;
    Ok(Saved::new("Filters saved", None))
}

async fn post_feedback(State(state): State<ApiState>, Json(record): Json<FeedbackRecord>) -> ApiResult<Saved> {
    state.feedback.record(&record).await?;
    info!(view = %record.view, vote = record.vote.as_str(), "Feedback recorded");
    Ok(Saved::new("Feedback saved", None))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/cache", get(get_cache).post(post_cache))
        .route("/sources", get(get_sources).post(post_sources))
        .route("/keywords", get(get_keywords).post(post_keywords))
        .route("/filters", get(get_filters).post(post_filters))
        .route("/feedback", post(post_feedback))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `addr` until Ctrl+C or SIGTERM.
pub async fn serve(addr: SocketAddr, state: ApiState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("API shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::feedback::SqliteFeedbackSink;
    use crate::fingerprint::fingerprint;
    use crate::retry::RetryPolicy;
    use crate::store::{HttpCacheStore, SqliteCacheStore};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> (ApiState, SqliteFeedbackSink) {
        let db = Database::open_in_memory().unwrap();
        let feedback = SqliteFeedbackSink::new(db.clone());
        let state = ApiState {
            store: Arc::new(SqliteCacheStore::new(db.clone())),
            catalog: Catalog::new(db),
            feedback: Arc::new(feedback.clone()),
        };
        (state, feedback)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(state().0);
        let (status, json) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_cache_roundtrip_and_errors() {
        let app = router(state().0);
        let hash = fingerprint("x").to_hex();

        let (status, _) = send(&app, get(&format!("/cache?input_hash={hash}&result_key=summaries"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = send(
            &app,
            post(
                "/cache",
                serde_json::json!({"input_hash": hash, "result_key": "summaries", "data": "[1,2]"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Cache saved");

        let (status, json) = send(&app, get(&format!("/cache?input_hash={hash}&result_key=summaries"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"], "[1,2]");

        // Same fingerprint, other kind.
        let (status, _) = send(&app, get(&format!("/cache?input_hash={hash}&result_key=synthesis"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, get(&format!("/cache?input_hash={hash}&result_key=digest"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, json) = send(&app, get("/cache?input_hash=zz&result_key=summaries")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_sources_full_replace() {
        let app = router(state().0);

        let (status, json) = send(
            &app,
            post("/sources", serde_json::json!([" https://a.fr ", "", "https://b.fr"])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 2);

        send(&app, post("/sources", serde_json::json!(["https://c.fr"]))).await;
        let (_, json) = send(&app, get("/sources")).await;
        assert_eq!(json, serde_json::json!(["https://c.fr"]));

        let (_, json) = send(&app, get("/keywords")).await;
        assert_eq!(json, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_filters_defaults_and_replace() {
        let app = router(state().0);

        let (status, json) = send(&app, get("/filters")).await;
        assert_eq!(status, StatusCode::OK);
        let mut filters: Filters = serde_json::from_value(json).unwrap();
        assert_eq!(filters, Filters::default());

        filters.time_value = 3;
        filters.exclude_jobs = true;
        let (status, _) = send(&app, post("/filters", serde_json::to_value(&filters).unwrap())).await;
        assert_eq!(status, StatusCode::OK);
        let (_, json) = send(&app, get("/filters")).await;
        assert_eq!(serde_json::from_value::<Filters>(json).unwrap(), filters);

        filters.time_value = 0;
        let (status, _) = send(&app, post("/filters", serde_json::to_value(&filters).unwrap())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        filters.time_value = 1_000_000;
        let (status, json) = send(&app, post("/filters", serde_json::to_value(&filters).unwrap())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("time_value"));

        // The stored filters are untouched by rejected writes.
        let (_, json) = send(&app, get("/filters")).await;
        assert_eq!(serde_json::from_value::<Filters>(json).unwrap().time_value, 3);
    }

    #[tokio::test]
    async fn test_feedback_is_appended() {
        let (state, sink) = state();
        let app = router(state);
        let body = serde_json::json!({
            "view": "keywords",
            "time_unit": "mois",
            "title": "Article",
            "content": "Résumé",
            "reference": "https://a.fr",
            "vote": "up"
        });

        let (status, _) = send(&app, post("/feedback", body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        send(&app, post("/feedback", body)).await;
        assert_eq!(sink.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_http_store_against_router() {
        let (state, _) = state();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        let client = HttpCacheStore::new(&format!("http://{addr}"), Duration::from_secs(5), RetryPolicy::none()).unwrap();
        let fp = fingerprint("remote");

        let err = client.get(fp, ResultKind::Synthesis).await.unwrap_err();
        assert!(err.is_not_found());

        client.put(fp, ResultKind::Synthesis, r#"{"synthesis":"s"}"#).await.unwrap();
        assert_eq!(
            client.get(fp, ResultKind::Synthesis).await.unwrap(),
            r#"{"synthesis":"s"}"#
        );
    }
}
