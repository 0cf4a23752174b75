/**
 * HTTP SURFACE
 *
 * ROUTES:
 * - GET  /health                 liveness, open
 * - POST /slack/actions          Slack interactive messages, open (legacy verification token)
 * - GET  /hosts                  host snapshots            (x-api-key)
 * - GET  /hosts/{id}             one host snapshot         (x-api-key)
 * - GET  /hosts/{id}/preview     latest console PNG        (x-api-key)
 *
 * The API key comes from `http.api_key` or FLEETWATCH_API_KEY.
 *
 * Slack wants an answer within 3 seconds, so a click is acknowledged at once and
 * dispatched on its own task.
 */

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::dispatcher::ActionDispatcher;
use crate::host::Host;
use crate::models::HostSnapshot;
use crate::slack::{parse_interaction, InboundError};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub hosts: Arc<HashMap<String, Arc<Host>>>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub verification_token: Option<String>,
    /// Key the host views expect in `x-api-key`. Unset locks them.
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(
        hosts: &[Arc<Host>],
        dispatcher: Arc<ActionDispatcher>,
        verification_token: Option<String>,
        api_key: Option<String>,
    ) -> Self {
        let hosts = hosts.iter().map(|h| (h.id().to_string(), Arc::clone(h))).collect();
        Self {
            hosts: Arc::new(hosts),
            dispatcher,
            verification_token,
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActionForm {
    payload: String,
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        warn!("[http] no API key configured, host views are locked");
        return Err(StatusCode::UNAUTHORIZED);
    };
    let presented = req.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if presented != Some(expected) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    // Slack cannot send our header; its requests carry their own token
    let host_views = Router::new()
        .route("/hosts", get(get_hosts))
        .route("/hosts/{id}", get(get_host))
        .route("/hosts/{id}/preview", get(get_preview))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_api_key));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/slack/actions", post(slack_action))
        .merge(host_views)
        .with_state(app_state)
}

// POST /slack/actions
async fn slack_action(State(app): State<AppState>, Form(form): Form<ActionForm>) -> StatusCode {
    match parse_interaction(&form.payload, app.verification_token.as_deref()) {
        Ok(action) => {
            let dispatcher = Arc::clone(&app.dispatcher);
            tokio::spawn(async move {
                dispatcher.dispatch(&action).await;
            });
            StatusCode::OK
        }
        Err(InboundError::BadToken) => {
            warn!("[http] Slack action with a bad verification token");
            StatusCode::UNAUTHORIZED
        }
        Err(e) => {
            warn!("[http] unreadable Slack action: {}", e);
            StatusCode::BAD_REQUEST
        }
    }
}

// GET /hosts
async fn get_hosts(State(app): State<AppState>) -> Json<Vec<HostSnapshot>> {
    let mut list: Vec<HostSnapshot> = app.hosts.values().map(|h| h.snapshot()).collect();
    list.sort_by(|a, b| a.host_id.cmp(&b.host_id));
    Json(list)
}

// GET /hosts/{id}
async fn get_host(State(app): State<AppState>, Path(id): Path<String>) -> Result<Json<HostSnapshot>, StatusCode> {
    let Some(host) = app.hosts.get(&id) else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(Json(host.snapshot()))
}

// GET /hosts/{id}/preview
async fn get_preview(State(app): State<AppState>, Path(id): Path<String>) -> Result<Response, StatusCode> {
    let host = app.hosts.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    let preview = host.latest_preview().ok_or(StatusCode::NOT_FOUND)?;
    let stamp = preview
        .timestamp
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (HeaderName::from_static("x-captured-at"), stamp),
        ],
        preview.png,
    )
        .into_response())
}
