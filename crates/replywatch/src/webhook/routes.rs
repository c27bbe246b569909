//! HTTP surface: validation handshake, notification intake, liveness.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::dispatch::NotificationDispatcher;
use super::payload::NotificationBatch;

const VALIDATION_TOKEN_PARAM: &str = "validationToken";

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<dyn NotificationDispatcher>,
    /// The only provider segment this deployment answers for.
    provider: Arc<str>,
}

impl AppState {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, provider: &str) -> Self {
        Self {
            dispatcher,
            provider: Arc::from(provider),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhooks/:provider", get(handle_get).post(handle_post))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Response {
    (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
}

async fn handle_get(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if provider != *state.provider {
        return unknown_provider(&provider);
    }
    match params.get(VALIDATION_TOKEN_PARAM) {
        Some(token) => validation_echo(token),
        None => error_response(StatusCode::BAD_REQUEST, "missing validationToken"),
    }
}

async fn handle_post(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    if provider != *state.provider {
        return unknown_provider(&provider);
    }
    if let Some(token) = params.get(VALIDATION_TOKEN_PARAM) {
        return validation_echo(token);
    }

    let batch: NotificationBatch = match parse_json_body(&body) {
        Ok(batch) => batch,
        Err(response) => return response,
    };

    if !batch.value.is_empty() {
        let items = batch.value.len();
        match state.dispatcher.dispatch(batch) {
            Ok(()) => tracing::debug!(items, "Notification batch queued"),
            Err(e) => {
                tracing::warn!(items, error = %e, "Could not queue notification batch");
                return error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
            }
        }
    }

    (StatusCode::ACCEPTED, Json(json!({ "message": "accepted" }))).into_response()
}

/// The provider expects the token back verbatim as a plain-text body.
fn validation_echo(token: &str) -> Response {
    tracing::info!("Answering webhook validation handshake");
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        token.to_string(),
    )
        .into_response()
}

fn unknown_provider(provider: &str) -> Response {
    tracing::debug!(provider, "Notification for unknown provider");
    error_response(StatusCode::NOT_FOUND, "unknown provider")
}

fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice::<T>(body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            &format!("invalid notification body: {}", e),
        )
    })
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
