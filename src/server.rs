//! HTTP server for the `configsample` binary.
//!
//! Exposes config lookups, project whitelist checks and the debug index of
//! one scope over axum.

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::client::Client;
use crate::error::ErrorCode;
use crate::model::FileStateManager;

/// Server state shared across handlers.
#[derive(Clone)]
pub struct SampleServer {
    client: Arc<Client>,
    /// Source of `/debug/vars`. Absent when the client is not file-backed.
    state_manager: Option<Arc<FileStateManager>>,
    scope: Arc<str>,
}

impl SampleServer {
    pub fn new(client: Arc<Client>, scope: &str) -> Self {
        Self {
            client,
            state_manager: None,
            scope: scope.into(),
        }
    }

    pub fn with_state_manager(mut self, sm: Arc<FileStateManager>) -> Self {
        self.state_manager = Some(sm);
        self
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct ConfigParams {
    #[serde(default)]
    key: String,
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    key: String,
    value: Option<Value>,
    error: Option<String>,
    code: Option<ErrorCode>,
}

#[derive(Debug, Deserialize)]
struct WhitelistParams {
    #[serde(default)]
    key: String,
    #[serde(default)]
    project_id: String,
}

#[derive(Debug, Serialize)]
struct WhitelistResponse {
    key: String,
    project_id: i64,
    whitelisted: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Raw value of a key, or the lookup error.
async fn config_handler(
    State(state): State<SampleServer>,
    Query(params): Query<ConfigParams>,
) -> Json<ConfigResponse> {
    let (value, error, code) = match state.client.get_raw(&params.key) {
        Ok(raw) => (serde_json::from_str(&raw).ok(), None, None),
        Err(e) => (None, Some(e.to_string()), Some(e.code())),
    };
    Json(ConfigResponse {
        key: params.key,
        value,
        error,
        code,
    })
}

async fn whitelist_handler(
    State(state): State<SampleServer>,
    Query(params): Query<WhitelistParams>,
) -> Result<Json<WhitelistResponse>, (StatusCode, Json<ErrorResponse>)> {
    let project_id: i64 = params.project_id.parse().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("could not parse project ID {:?}: {}", params.project_id, e),
            }),
        )
    })?;

    let whitelisted = state
        .client
        .is_project_whitelisted(&params.key, project_id, false);
    Ok(Json(WhitelistResponse {
        key: params.key,
        project_id,
        whitelisted,
    }))
}

/// `{"configmanager.<scope>": {key: raw value, ...}}`
async fn debug_vars_handler(State(state): State<SampleServer>) -> Json<Value> {
    let values = match state.state_manager {
        Some(ref sm) => serde_json::to_value(&sm.debug_vars().values).unwrap_or_default(),
        None => Value::Object(Map::new()),
    };
    let mut body = Map::new();
    body.insert(format!("configmanager.{}", state.scope), values);
    Json(Value::Object(body))
}

/// Build the router with all routes.
pub fn build_router(state: SampleServer) -> Router {
    Router::new()
        .route("/config", get(config_handler))
        .route("/whitelist", get(whitelist_handler))
        .route("/debug/vars", get(debug_vars_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `addr` until `shutdown` resolves.
pub async fn run_server<F>(state: SampleServer, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    info!("configsample listening on http://{}", bound_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("configsample shutting down");
        })
        .await?;
    Ok(())
}
