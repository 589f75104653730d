//! Demo routes operating on the request's session.

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::WebSession;
use crate::state::AppState;

/// Snapshot of the session as seen by this request.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub is_new: bool,
    pub max_inactive_secs: i64,
    pub attributes: BTreeMap<String, Value>,
}

impl SessionView {
    fn of(session: &WebSession) -> Self {
        let attributes = session
            .attribute_names()
            .into_iter()
            .filter_map(|name| session.get_raw(&name).map(|value| (name, value)))
            .collect();

        Self {
            id: session.id(),
            is_new: session.is_new(),
            max_inactive_secs: session.max_inactive_secs(),
            attributes,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CounterResponse {
    pub counter: i64,
}

#[derive(Debug, Deserialize)]
pub struct TimeoutRequest {
    pub max_inactive_secs: i64,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn show_session(session: WebSession) -> Json<SessionView> {
    Json(SessionView::of(&session))
}

pub async fn set_attribute(
    session: WebSession,
    Path(name): Path<String>,
    Json(value): Json<Value>,
) -> StatusCode {
    // A JSON value always serializes
    match session.set(name, value) {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

pub async fn remove_attribute(session: WebSession, Path(name): Path<String>) -> StatusCode {
    session.remove(&name);
    StatusCode::NO_CONTENT
}

pub async fn increment_counter(
    session: WebSession,
) -> Result<Json<CounterResponse>, StatusCode> {
    let counter = session
        .get::<i64>("counter")
        .unwrap_or(0)
        .checked_add(1)
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    session
        .set("counter", counter)
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    Ok(Json(CounterResponse { counter }))
}

pub async fn set_timeout(
    session: WebSession,
    Json(request): Json<TimeoutRequest>,
) -> impl IntoResponse {
    session.set_max_inactive_secs(request.max_inactive_secs);
    Json(SessionView::of(&session))
}

/// Routes that need the session middleware.
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/session", get(show_session))
        .route(
            "/session/attributes/{name}",
            put(set_attribute).delete(remove_attribute),
        )
        .route("/session/counter", post(increment_counter))
        .route("/session/timeout", put(set_timeout))
}

/// Routes served without a session.
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
