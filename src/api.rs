//! Control API: inspect and drive the refresh engine over HTTP.
//!
//! Refresh endpoints are asynchronous: they hand the cycle(s) to the task
//! registry and answer `202 Accepted` with handles that `/api/task/{id}`
//! polls to completion.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::adapter::directory::AdapterError;
use crate::engine::{Engine, TaskStatus};
use crate::store::Article;

/// Bumped on breaking changes to response shapes.
pub const API_VERSION: u32 = 1;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn create_router(engine: Arc<Engine>) -> Router {
    let state = AppState { engine };

    let origins: Vec<HeaderValue> = state
        .engine
        .config()
        .snapshot()
        .api
        .cors_allow_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = if origins.is_empty() {
        CorsLayer::very_permissive()
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    let api = Router::new()
        .route("/", get(version))
        .route("/pairs/update_getters", post(update_getters))
        .route("/adapter_classes/{name}/reload", post(reload_adapter_class))
        .route("/getters/", get(list_getters))
        .route("/getters/refresh", post(refresh_all))
        .route("/getters/{name}", get(getter_info))
        .route("/getters/{name}/refresh", post(refresh_one))
        .route("/articles/", get(list_articles))
        .route("/articles/{id}", get(article))
        .route("/task/{id}", get(task_status))
        .layer(middleware::from_fn_with_state(state.clone(), auth));

    Router::new()
        .route("/", get(version))
        .route("/health", get(|| async { "ok" }))
        // `nest` matches `/api` but not `/api/`; route the trailing-slash
        // form explicitly so the API root answers at both.
        .route("/api/", get(version))
        .nest("/api", api)
        .layer(cors)
        .with_state(state)
}

/// Bearer-token check against `api.token`; an empty list disables auth.
async fn auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let tokens = state.engine.config().snapshot().api.token.clone();
    if tokens.is_empty() {
        return next.run(req).await;
    }
    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(t) if tokens.iter().any(|x| x == t) => next.run(req).await,
        _ => StatusCode::FORBIDDEN.into_response(),
    }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "feedrelay",
        "version": env!("CARGO_PKG_VERSION"),
        "api_version": API_VERSION,
    }))
}

async fn update_getters(State(state): State<AppState>) -> StatusCode {
    state.engine.update_getters();
    StatusCode::NO_CONTENT
}

async fn reload_adapter_class(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    match state.engine.reload_adapter_class(&name) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(AdapterError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn list_getters(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.list_getters())
}

async fn getter_info(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state
        .engine
        .list_getters()
        .into_iter()
        .find(|g| g.name == name)
    {
        Some(info) => Json(info).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn refresh_all(State(state): State<AppState>) -> impl IntoResponse {
    let handles = state.engine.refresh_all();
    (StatusCode::ACCEPTED, Json(handles))
}

async fn refresh_one(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.engine.refresh_by_name(&name) {
        Some(handle) => (StatusCode::ACCEPTED, Json(handle)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page_size() -> usize {
    10
}

async fn list_articles(State(state): State<AppState>, Query(page): Query<Page>) -> Response {
    match state.engine.store().list(page.page, page.page_size) {
        Ok(articles) => Json(articles).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn article(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.store().get(&id) {
        Ok(Some(article)) => Json::<Article>(article).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn task_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.tasks().status(&id).await {
        TaskStatus::Done(report) => Json(report).into_response(),
        TaskStatus::Pending => StatusCode::ACCEPTED.into_response(),
        TaskStatus::NotFound => StatusCode::NOT_FOUND.into_response(),
    }
}
