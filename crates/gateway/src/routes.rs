//! HTTP routes for the Pipedream boundary service.

use std::{collections::HashMap, sync::Arc};

use {
    axum::{
        Json, Router,
        extract::{Query, State},
        http::StatusCode,
        response::{Html, IntoResponse, Response},
        routing::{get, post},
    },
    serde_json::Value,
    tracing::warn,
};

use crate::{
    pages,
    services::{PipedreamService, ServiceError, ServiceResult},
};

pub type SharedService = Arc<dyn PipedreamService>;

pub const CALLBACK_PATH: &str = "/api/oauth/pipedream/callback";

pub fn pipedream_router(service: SharedService) -> Router {
    Router::new()
        .route("/pipedream-mcp/auth/start", post(auth_start))
        .route(CALLBACK_PATH, get(oauth_callback))
        .route("/pipedream-mcp/auth/status", post(auth_status))
        .route("/pipedream-mcp/tools/discover", post(tools_discover))
        .route("/pipedream-mcp/tools/execute", post(tools_execute))
        .route("/pipedream-mcp/auth/disconnect", post(auth_disconnect))
        .route("/pipedream-mcp/apps/list", post(apps_list))
        .route("/pipedream-mcp/health", get(health))
        .with_state(service)
}

fn respond(route: &str, result: ServiceResult) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            if e.status().is_server_error() {
                warn!(route, error = %e, "pipedream request failed");
            }
            (e.status(), Json(e.body())).into_response()
        },
    }
}

async fn auth_start(
    State(svc): State<SharedService>,
    Json(params): Json<Value>,
) -> Response {
    respond("auth/start", svc.auth_start(params).await)
}

async fn oauth_callback(
    State(svc): State<SharedService>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let params = match serde_json::to_value(query) {
        Ok(params) => params,
        Err(e) => return failure(ServiceError::from(e)),
    };
    match svc.oauth_callback(params).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => failure(e),
    }
}

fn failure(err: ServiceError) -> Response {
    warn!(error = %err, "pipedream authorization callback failed");
    let status = match err.status() {
        StatusCode::UNAUTHORIZED => StatusCode::BAD_REQUEST,
        status => status,
    };
    (status, Html(pages::failure_page(&err.to_string()))).into_response()
}

async fn auth_status(
    State(svc): State<SharedService>,
    Json(params): Json<Value>,
) -> Response {
    respond("auth/status", svc.auth_status(params).await)
}

async fn tools_discover(
    State(svc): State<SharedService>,
    Json(params): Json<Value>,
) -> Response {
    respond("tools/discover", svc.tools_discover(params).await)
}

async fn tools_execute(
    State(svc): State<SharedService>,
    Json(params): Json<Value>,
) -> Response {
    respond("tools/execute", svc.tools_execute(params).await)
}

async fn auth_disconnect(
    State(svc): State<SharedService>,
    Json(params): Json<Value>,
) -> Response {
    respond("auth/disconnect", svc.auth_disconnect(params).await)
}

async fn apps_list(
    State(svc): State<SharedService>,
    Json(params): Json<Value>,
) -> Response {
    respond("apps/list", svc.apps_list(params).await)
}

async fn health(State(svc): State<SharedService>) -> Response {
    respond("health", svc.health().await)
}
