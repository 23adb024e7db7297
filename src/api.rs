// src/api.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

use crate::model::{JobListing, ResourceBundle, ResourceKind};
use crate::orchestrator::TaskReport;
use crate::pipeline::{Aggregator, CycleStatus};

pub const CACHE_HEADER: &str = "x-cache";

/// Absolute-TTL cache of the persisted bundle (no sliding refresh).
pub struct ResponseCache {
    ttl: Duration,
    slot: RwLock<Option<(Instant, Arc<ResourceBundle>)>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    async fn fresh(&self) -> Option<Arc<ResourceBundle>> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, b)| b.clone())
    }

    async fn put(&self, bundle: Arc<ResourceBundle>) {
        *self.slot.write().await = Some((Instant::now(), bundle));
    }

    pub async fn clear(&self) {
        *self.slot.write().await = None;
    }
}

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub cache: Arc<ResponseCache>,
}

impl AppState {
    pub fn new(aggregator: Arc<Aggregator>, cache_ttl: Duration) -> Self {
        Self {
            aggregator,
            cache: Arc::new(ResponseCache::new(cache_ttl)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/resources", get(get_resources))
        .route("/api/jobs", get(get_jobs))
        .route("/api/resources/update", post(update_resources))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn cache_headers(hit: bool) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(
        CACHE_HEADER,
        HeaderValue::from_static(if hit { "HIT" } else { "MISS" }),
    );
    h
}

fn store_error(e: anyhow::Error) -> Response {
    tracing::error!(target: "api", error = ?e, "store unavailable");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "resource store unavailable" })),
    )
        .into_response()
}

async fn cached_bundle(state: &AppState) -> anyhow::Result<(Arc<ResourceBundle>, bool)> {
    if let Some(b) = state.cache.fresh().await {
        return Ok((b, true));
    }
    let bundle = Arc::new(state.aggregator.current().await?);
    state.cache.put(bundle.clone()).await;
    Ok((bundle, false))
}

async fn get_resources(State(state): State<AppState>) -> Response {
    match cached_bundle(&state).await {
        Ok((bundle, hit)) => (cache_headers(hit), Json(bundle.as_ref().clone())).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Serialize)]
struct JobsOut {
    jobs: Vec<JobListing>,
}

async fn get_jobs(State(state): State<AppState>) -> Response {
    match cached_bundle(&state).await {
        Ok((bundle, hit)) => (
            cache_headers(hit),
            Json(JobsOut {
                jobs: bundle.job_listings.clone(),
            }),
        )
            .into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Serialize)]
struct Counts {
    github_programs: usize,
    blog_posts: usize,
    job_listings: usize,
}

#[derive(Serialize)]
struct UpdateOut {
    status: CycleStatus,
    counts: Counts,
    sources: Vec<TaskReport>,
}

async fn update_resources(State(state): State<AppState>) -> Json<UpdateOut> {
    let report = state.aggregator.run_cycle().await;
    state.cache.clear().await;
    tracing::info!(target: "api", status = ?report.status, "update requested");
    let b = &report.bundle;
    Json(UpdateOut {
        status: report.status,
        counts: Counts {
            github_programs: b.len_of(ResourceKind::GithubPrograms),
            blog_posts: b.len_of(ResourceKind::BlogPosts),
            job_listings: b.len_of(ResourceKind::JobListings),
        },
        sources: report.sources,
    })
}
