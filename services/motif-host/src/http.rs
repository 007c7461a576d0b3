//! JSON surface over the dispatcher.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::dispatch::QueryDispatcher;
use crate::error::HostError;
use crate::motif::Motif;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: QueryDispatcher,
}

pub fn router(dispatcher: QueryDispatcher) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/hosts", get(list_hosts))
        .route("/parse", post(parse))
        .route("/execute", post(execute))
        .route("/hosts/upload/:filename", post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)))
        .with_state(AppState { dispatcher })
        .merge(motif_core::health_router())
}

pub enum ApiError {
    BadRequest(String),
    Host(HostError),
}

impl From<HostError> for ApiError {
    fn from(e: HostError) -> Self { ApiError::Host(e) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Host(e) => {
                let status = match &e {
                    HostError::HostNotFound(_) => StatusCode::NOT_FOUND,
                    HostError::Motif(_) => StatusCode::BAD_REQUEST,
                    HostError::Backend { .. } => StatusCode::BAD_GATEWAY,
                    HostError::Storage(_) | HostError::Configuration(_) | HostError::Discovery(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn required_str<'a>(body: &'a Value, key: &str) -> Result<&'a str, ApiError> {
    body.get(key).and_then(Value::as_str).ok_or_else(|| ApiError::BadRequest(format!("missing field `{key}`")))
}

async fn root() -> Json<Value> { Json(json!({ "server_version": env!("CARGO_PKG_VERSION") })) }

async fn list_hosts(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let dispatcher = state.dispatcher.clone();
    let hosts = tokio::task::spawn_blocking(move || dispatcher.list_hosts())
        .await
        .map_err(|e| HostError::Storage(format!("listing task failed: {e}")))??;
    Ok(Json(json!({ "hosts": hosts })))
}

async fn parse(Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    let motif = Motif::parse(required_str(&body, "motif")?).map_err(HostError::from)?;
    Ok(Json(json!({ "motif": motif.to_node_link() })))
}

async fn execute(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    let motif = Motif::parse(required_str(&body, "motif")?).map_err(HostError::from)?;
    let host_id = required_str(&body, "hostID")?;
    let outcome = state.dispatcher.resolve_and_find(host_id, &motif).await?;
    Ok(Json(json!({
        "motif": motif.to_node_link(),
        "results": outcome.to_column_map(&motif),
        "host": outcome.host,
    })))
}

async fn upload(State(state): State<AppState>, Path(filename): Path<String>, body: Bytes) -> Result<Json<Value>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload".into()));
    }
    let receipt = state.dispatcher.provision_upload(&filename, body.to_vec()).await?;
    Ok(Json(json!({ "uri": receipt.uri, "record_id": receipt.record_id })))
}
