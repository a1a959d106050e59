//! HTTP surface for monitoring and OTA control.
//!
//! Thin JSON layer over [`Controller`]; all protocol state stays behind
//! its locks. Errors come back as `{"error": msg}` with a 4xx/5xx.

use crate::controller::Controller;
use crate::ota::OtaError;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::packet::{DeviceClass, DeviceUuid};
use common::version::Version;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/devices", get(devices))
        .route("/api/devices/:uuid/data", get(device_data))
        .route("/api/ota/start", post(ota_start))
        .route("/api/ota/stop", post(ota_stop))
        .route("/api/ota/progress", get(ota_progress))
        .route("/api/ota/devices", get(ota_devices))
        .layer(CorsLayer::permissive())
        .with_state(controller)
}

pub async fn serve(controller: Arc<Controller>, listen: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("API listening on http://{}", listen);
    axum::serve(listener, router(controller)).await?;
    Ok(())
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn health(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    Json(controller.health())
}

#[derive(Debug, Serialize)]
struct DeviceEntry {
    uuid: String,
    device_type: String,
    first_seen: String,
    last_seen: String,
    firmware_version: String,
    battery_mv: u16,
    rssi: i16,
}

async fn devices(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    let entries: Vec<DeviceEntry> = controller
        .devices()
        .into_iter()
        .map(|d| DeviceEntry {
            uuid: d.uuid.to_string(),
            device_type: DeviceClass::label(d.device_type),
            first_seen: d.first_seen.to_rfc3339(),
            last_seen: d.last_seen.to_rfc3339(),
            firmware_version: d.firmware_version,
            battery_mv: d.battery_mv,
            rssi: d.rssi,
        })
        .collect();
    Json(entries)
}

#[derive(Debug, Deserialize)]
struct DataQuery {
    limit: Option<u32>,
}

async fn device_data(
    State(controller): State<Arc<Controller>>,
    Path(uuid): Path<String>,
    Query(query): Query<DataQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid: DeviceUuid = uuid
        .parse()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "invalid device UUID"))?;

    let rows = controller
        .sensor_data(&uuid, query.limit.unwrap_or(100))
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct OtaStartRequest {
    firmware_path: PathBuf,
    version: [u8; 3],
    device_type: Option<u8>,
}

async fn ota_start(
    State(controller): State<Arc<Controller>>,
    Json(request): Json<OtaStartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let version = Version::new(request.version[0], request.version[1], request.version[2]);
    let device_type = request.device_type.unwrap_or(0xFF);

    let announce_id = controller
        .start_ota(&request.firmware_path, version, device_type)
        .map_err(|e| match e {
            OtaError::AlreadyActive => ApiError::new(StatusCode::CONFLICT, e.to_string()),
            OtaError::FileNotFound(_) => ApiError::new(StatusCode::NOT_FOUND, e.to_string()),
            OtaError::EmptyFirmware | OtaError::TooLarge => {
                ApiError::new(StatusCode::BAD_REQUEST, e.to_string())
            }
            OtaError::Io(_) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })?;

    Ok(Json(json!({
        "status": "started",
        "announce_id": announce_id,
    })))
}

async fn ota_stop(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    controller.stop_ota();
    Json(json!({ "status": "stopped" }))
}

async fn ota_progress(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    Json(controller.ota_progress())
}

async fn ota_devices(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    Json(controller.ota_device_status())
}
