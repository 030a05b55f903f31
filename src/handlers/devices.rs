use crate::{
    entities::{device, DeviceStatus},
    handlers::body::JsonBody,
    services::devices::NewDevice,
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Default, ToSchema, IntoParams)]
pub struct DeviceListQuery {
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size
    pub limit: Option<u64>,
    /// Optional status filter
    pub status: Option<DeviceStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceSummary {
    pub id: Uuid,
    #[schema(example = "356938035643809")]
    pub imei: String,
    pub model: Option<String>,
    pub status: DeviceStatus,
    pub assigned_to: Option<String>,
    pub ticket: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<device::Model> for DeviceSummary {
    fn from(model: device::Model) -> Self {
        Self {
            id: model.id,
            imei: model.imei,
            model: model.model,
            status: model.status,
            assigned_to: model.assigned_to,
            ticket: model.ticket,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// List devices in the registry
#[utoipa::path(
    get,
    path = "/api/v1/devices",
    params(DeviceListQuery),
    responses(
        (status = 200, description = "Page of devices"),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Missing devices:read")
    ),
    security(("bearer_auth" = [])),
    tag = "devices"
)]
pub async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<DeviceListQuery>,
) -> ApiResult<PaginatedResponse<DeviceSummary>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = state.config.page_limit(query.limit);

    let (records, total) = state.devices.list(page, limit, query.status).await?;
    let items = records.into_iter().map(DeviceSummary::from).collect();

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, page, limit,
    ))))
}

/// Fetch a device by id
#[utoipa::path(
    get,
    path = "/api/v1/devices/{id}",
    params(("id" = Uuid, Path, description = "Device id")),
    responses(
        (status = 200, description = "Device", body = DeviceSummary),
        (status = 404, description = "Device not found")
    ),
    security(("bearer_auth" = [])),
    tag = "devices"
)]
pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<DeviceSummary> {
    let device = state.devices.get(id).await?;
    Ok(Json(ApiResponse::success(DeviceSummary::from(device))))
}

/// Fetch a device by IMEI
#[utoipa::path(
    get,
    path = "/api/v1/devices/by-imei/{imei}",
    params(("imei" = String, Path, description = "15 digit IMEI")),
    responses(
        (status = 200, description = "Device", body = DeviceSummary),
        (status = 404, description = "Device not found")
    ),
    security(("bearer_auth" = [])),
    tag = "devices"
)]
pub async fn get_device_by_imei(
    State(state): State<AppState>,
    Path(imei): Path<String>,
) -> ApiResult<DeviceSummary> {
    let device = state.devices.get_by_imei(&imei).await?;
    Ok(Json(ApiResponse::success(DeviceSummary::from(device))))
}

/// Register a handset in the registry
#[utoipa::path(
    post,
    path = "/api/v1/devices",
    request_body = NewDevice,
    responses(
        (status = 201, description = "Device registered", body = DeviceSummary),
        (status = 400, description = "Invalid IMEI or status"),
        (status = 409, description = "IMEI already registered")
    ),
    security(("bearer_auth" = [])),
    tag = "devices"
)]
pub async fn create_device(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<NewDevice>,
) -> Result<(StatusCode, Json<ApiResponse<DeviceSummary>>), crate::errors::ServiceError> {
    payload.validate()?;

    let device = state.devices.intake(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(DeviceSummary::from(device))),
    ))
}
