//! Docker volume plugin protocol over HTTP.
//!
//! Each `/VolumeDriver.*` endpoint decodes its request, calls the matching
//! [`VolumeController`] operation and encodes the result. Failures are
//! returned as HTTP 500 with `{"Err": "<message>"}`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tmpsync_core::{VolumeController, VolumeError, VolumeInfo};

const DRIVER_NAME: &str = "tmpsync";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    pub name: String,
    #[serde(default)]
    pub opts: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountRequest {
    pub name: String,
    #[serde(rename = "ID", default)]
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountpointResponse {
    pub mountpoint: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeEntry {
    pub name: String,
    pub mountpoint: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    pub volume: VolumeEntry,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    pub volumes: Vec<VolumeEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub capabilities: CapabilityEntry,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilityEntry {
    pub scope: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    pub err: String,
}

/// A failed volume operation, rendered in the plugin protocol's error shape.
#[derive(Debug)]
pub struct ApiError(pub VolumeError);

impl From<VolumeError> for ApiError {
    fn from(e: VolumeError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "request failed");
        let body = ErrorResponse {
            err: format!("{}: {}", DRIVER_NAME, self.0),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Clone)]
pub struct PluginApi {
    controller: Arc<VolumeController>,
}

impl PluginApi {
    pub fn new(controller: Arc<VolumeController>) -> Self {
        Self { controller }
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/Plugin.Activate", post(activate_handler))
            .route("/VolumeDriver.Create", post(create_handler))
            .route("/VolumeDriver.Remove", post(remove_handler))
            .route("/VolumeDriver.Mount", post(mount_handler))
            .route("/VolumeDriver.Path", post(path_handler))
            .route("/VolumeDriver.Unmount", post(unmount_handler))
            .route("/VolumeDriver.Get", post(get_handler))
            .route("/VolumeDriver.List", post(list_handler))
            .route("/VolumeDriver.Capabilities", post(capabilities_handler))
            .with_state(self)
    }

    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        let router = Arc::new(self).router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Volume plugin listening on {}", addr);

        axum::serve(listener, router.into_make_service()).await?;
        Ok(())
    }
}

fn entry(info: VolumeInfo, detailed: bool) -> VolumeEntry {
    let (created_at, status) = if detailed {
        let state = serde_json::to_value(info.state)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        (
            Some(info.created_at.to_rfc3339()),
            Some(HashMap::from([("State".to_string(), state)])),
        )
    } else {
        (None, None)
    };

    VolumeEntry {
        name: info.name,
        mountpoint: info.mountpoint.display().to_string(),
        created_at,
        status,
    }
}

async fn activate_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "Implements": ["VolumeDriver"]
    }))
}

async fn create_handler(
    State(state): State<Arc<PluginApi>>,
    Json(req): Json<CreateRequest>,
) -> ApiResult<serde_json::Value> {
    let opts = req.opts.unwrap_or_default();
    state.controller.create(&req.name, &opts).await?;
    Ok(Json(serde_json::json!({})))
}

async fn remove_handler(
    State(state): State<Arc<PluginApi>>,
    Json(req): Json<NameRequest>,
) -> ApiResult<serde_json::Value> {
    state.controller.remove(&req.name).await?;
    Ok(Json(serde_json::json!({})))
}

async fn mount_handler(
    State(state): State<Arc<PluginApi>>,
    Json(req): Json<MountRequest>,
) -> ApiResult<MountpointResponse> {
    tracing::debug!(volume = %req.name, id = %req.id, "mount request");
    let mountpoint = state.controller.mount(&req.name).await?;
    Ok(Json(MountpointResponse {
        mountpoint: mountpoint.display().to_string(),
    }))
}

async fn path_handler(
    State(state): State<Arc<PluginApi>>,
    Json(req): Json<NameRequest>,
) -> ApiResult<MountpointResponse> {
    let mountpoint = state.controller.path(&req.name).await?;
    Ok(Json(MountpointResponse {
        mountpoint: mountpoint.display().to_string(),
    }))
}

async fn unmount_handler(
    State(state): State<Arc<PluginApi>>,
    Json(req): Json<MountRequest>,
) -> ApiResult<serde_json::Value> {
    tracing::debug!(volume = %req.name, id = %req.id, "unmount request");
    state.controller.unmount(&req.name).await?;
    Ok(Json(serde_json::json!({})))
}

async fn get_handler(
    State(state): State<Arc<PluginApi>>,
    Json(req): Json<NameRequest>,
) -> ApiResult<GetResponse> {
    let info = state.controller.get(&req.name).await?;
    Ok(Json(GetResponse {
        volume: entry(info, true),
    }))
}

async fn list_handler(State(state): State<Arc<PluginApi>>) -> Json<ListResponse> {
    let volumes = state
        .controller
        .list()
        .await
        .into_iter()
        .map(|info| entry(info, false))
        .collect();
    Json(ListResponse { volumes })
}

async fn capabilities_handler(State(state): State<Arc<PluginApi>>) -> Json<CapabilitiesResponse> {
    let scope = state.controller.capabilities().scope;
    Json(CapabilitiesResponse {
        capabilities: CapabilityEntry {
            scope: scope.as_str().to_string(),
        },
    })
}
