use crate::{
    commands::assignments::{ClosureOutcome, ReturnOutcome},
    entities::{
        assignment::{self, AssignmentStatus, AssignmentType, ReturnStatus, ShippingStatus},
        DeviceStatus,
    },
    errors::ServiceError,
    handlers::body::{JsonBody, OptionalJsonBody},
    lifecycle::{ClosureRecord, NewAssignment},
    services::assignments::AssignmentFilter,
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
pub struct AssignmentListQuery {
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size
    pub limit: Option<u64>,
    /// `active` or `completed`
    pub status: Option<AssignmentStatus>,
    pub device_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AssignmentSummary {
    pub id: Uuid,
    pub device_id: Uuid,
    pub assignment_type: AssignmentType,
    pub status: AssignmentStatus,
    pub assignee_name: String,
    pub assignee_phone: Option<String>,
    pub assignee_location: Option<String>,
    pub ticket: Option<String>,
    pub shipping_voucher_id: Option<String>,
    pub shipping_status: Option<ShippingStatus>,
    pub shipping_notes: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub expects_return: bool,
    pub return_status: Option<ReturnStatus>,
    pub return_device_imei: Option<String>,
    pub return_notes: Option<String>,
    pub return_received_at: Option<DateTime<Utc>>,
    pub closure_reason: Option<String>,
    /// Resulting device status recorded at closure
    pub closure_device_status: Option<DeviceStatus>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<assignment::Model> for AssignmentSummary {
    fn from(model: assignment::Model) -> Self {
        let closure_device_status = model
            .closure_metadata
            .as_ref()
            .and_then(|raw| ClosureRecord::from_json(raw).ok())
            .map(|record| record.resulting_status());

        Self {
            id: model.id,
            device_id: model.device_id,
            assignment_type: model.assignment_type,
            status: model.status,
            assignee_name: model.assignee_name,
            assignee_phone: model.assignee_phone,
            assignee_location: model.assignee_location,
            ticket: model.ticket,
            shipping_voucher_id: model.shipping_voucher_id,
            shipping_status: model.shipping_status,
            shipping_notes: model.shipping_notes,
            shipped_at: model.shipped_at,
            delivered_at: model.delivered_at,
            expects_return: model.expects_return,
            return_status: model.return_status,
            return_device_imei: model.return_device_imei,
            return_notes: model.return_notes,
            return_received_at: model.return_received_at,
            closure_reason: model.closure_reason,
            closure_device_status,
            closed_at: model.closed_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReturnRegistration {
    pub assignment: AssignmentSummary,
    pub returned_device_id: Option<Uuid>,
    pub warnings: Vec<String>,
}

impl From<ReturnOutcome> for ReturnRegistration {
    fn from(outcome: ReturnOutcome) -> Self {
        Self {
            assignment: AssignmentSummary::from(outcome.assignment),
            returned_device_id: outcome.returned_device_id,
            warnings: outcome.warnings,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateShippingRequest {
    pub shipping_status: ShippingStatus,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterReturnRequest {
    pub return_received: bool,
    #[validate(length(max = 2000))]
    pub return_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct CloseAssignmentRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    /// USED, REPAIRED, NOT_REPAIRED or LOST; defaults to USED
    pub resulting_device_status: Option<DeviceStatus>,
}

/// List assignments, newest first
#[utoipa::path(
    get,
    path = "/api/v1/assignments",
    params(AssignmentListQuery),
    responses(
        (status = 200, description = "Page of assignments"),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Missing assignments:read")
    ),
    security(("bearer_auth" = [])),
    tag = "assignments"
)]
pub async fn list_assignments(
    State(state): State<AppState>,
    Query(query): Query<AssignmentListQuery>,
) -> ApiResult<PaginatedResponse<AssignmentSummary>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = state.config.page_limit(query.limit);
    let filter = AssignmentFilter {
        status: query.status,
        device_id: query.device_id,
    };

    let (records, total) = state
        .assignments
        .list_assignments(page, limit, filter)
        .await?;
    let items = records.into_iter().map(AssignmentSummary::from).collect();

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, page, limit,
    ))))
}

/// Fetch one assignment
#[utoipa::path(
    get,
    path = "/api/v1/assignments/{id}",
    params(("id" = Uuid, Path, description = "Assignment id")),
    responses(
        (status = 200, description = "Assignment", body = AssignmentSummary),
        (status = 404, description = "Assignment not found")
    ),
    security(("bearer_auth" = [])),
    tag = "assignments"
)]
pub async fn get_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<AssignmentSummary> {
    let record = state.assignments.get_assignment(id).await?;
    Ok(Json(ApiResponse::success(AssignmentSummary::from(record))))
}

/// Hand a device out to an assignee
#[utoipa::path(
    post,
    path = "/api/v1/assignments",
    request_body = NewAssignment,
    responses(
        (status = 201, description = "Assignment created", body = AssignmentSummary),
        (status = 400, description = "Invalid input or device not assignable"),
        (status = 404, description = "Device not found"),
        (status = 409, description = "Device already has an active assignment")
    ),
    security(("bearer_auth" = [])),
    tag = "assignments"
)]
pub async fn create_assignment(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<NewAssignment>,
) -> Result<(StatusCode, Json<ApiResponse<AssignmentSummary>>), ServiceError> {
    payload.validate()?;

    let created = state.assignments.create_assignment(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(AssignmentSummary::from(created))),
    ))
}

/// Mark the shipment as handed to the courier
#[utoipa::path(
    post,
    path = "/api/v1/assignments/{id}/shipping/start",
    params(("id" = Uuid, Path, description = "Assignment id")),
    responses(
        (status = 200, description = "Shipping started", body = AssignmentSummary),
        (status = 404, description = "Assignment not found"),
        (status = 400, description = "Assignment closed, without voucher or already shipped")
    ),
    security(("bearer_auth" = [])),
    tag = "shipping"
)]
pub async fn start_shipping(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<AssignmentSummary> {
    let updated = state.assignments.start_shipping(id).await?;
    Ok(Json(ApiResponse::success(AssignmentSummary::from(updated))))
}

/// Set the shipping status directly
#[utoipa::path(
    patch,
    path = "/api/v1/assignments/{id}/shipping",
    params(("id" = Uuid, Path, description = "Assignment id")),
    request_body = UpdateShippingRequest,
    responses(
        (status = 200, description = "Shipping updated", body = AssignmentSummary),
        (status = 404, description = "Assignment not found"),
        (status = 400, description = "Assignment closed or without voucher")
    ),
    security(("bearer_auth" = [])),
    tag = "shipping"
)]
pub async fn update_shipping(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(payload): JsonBody<UpdateShippingRequest>,
) -> ApiResult<AssignmentSummary> {
    payload.validate()?;

    let updated = state
        .assignments
        .update_shipping(id, payload.shipping_status, payload.notes)
        .await?;
    Ok(Json(ApiResponse::success(AssignmentSummary::from(updated))))
}

/// Confirm delivery to the assignee
#[utoipa::path(
    post,
    path = "/api/v1/assignments/{id}/shipping/deliver",
    params(("id" = Uuid, Path, description = "Assignment id")),
    responses(
        (status = 200, description = "Delivered", body = AssignmentSummary),
        (status = 404, description = "Assignment not found"),
        (status = 400, description = "Assignment closed or already delivered")
    ),
    security(("bearer_auth" = [])),
    tag = "shipping"
)]
pub async fn mark_delivered(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<AssignmentSummary> {
    let updated = state.assignments.mark_delivered(id).await?;
    Ok(Json(ApiResponse::success(AssignmentSummary::from(updated))))
}

/// Record whether the old device came back
#[utoipa::path(
    patch,
    path = "/api/v1/assignments/{id}/return",
    params(("id" = Uuid, Path, description = "Assignment id")),
    request_body = RegisterReturnRequest,
    responses(
        (status = 200, description = "Return registered", body = ReturnRegistration),
        (status = 404, description = "Assignment not found"),
        (status = 400, description = "Assignment closed or no return expected")
    ),
    security(("bearer_auth" = [])),
    tag = "returns"
)]
pub async fn register_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    JsonBody(payload): JsonBody<RegisterReturnRequest>,
) -> ApiResult<ReturnRegistration> {
    payload.validate()?;

    let outcome = state
        .assignments
        .register_return(id, payload.return_received, payload.return_notes)
        .await?;
    Ok(Json(ApiResponse::success(ReturnRegistration::from(outcome))))
}

/// Close the assignment and settle the device status
#[utoipa::path(
    post,
    path = "/api/v1/assignments/{id}/close",
    params(("id" = Uuid, Path, description = "Assignment id")),
    request_body = CloseAssignmentRequest,
    responses(
        (status = 200, description = "Assignment closed", body = ClosureOutcome),
        (status = 400, description = "Assignment already closed or resulting status not allowed"),
        (status = 404, description = "Assignment or device not found")
    ),
    security(("bearer_auth" = [])),
    tag = "assignments"
)]
pub async fn close_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    OptionalJsonBody(payload): OptionalJsonBody<CloseAssignmentRequest>,
) -> ApiResult<ClosureOutcome> {
    let payload = payload.unwrap_or_default();
    payload.validate()?;

    let outcome = state
        .assignments
        .close(id, payload.reason, payload.resulting_device_status)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_row() -> assignment::Model {
        let now = Utc::now();
        assignment::Model {
            id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            assignment_type: AssignmentType::Assign,
            status: AssignmentStatus::Completed,
            assignee_name: "Maria Jensen".into(),
            assignee_phone: None,
            assignee_location: None,
            ticket: Some("HD-1".into()),
            shipping_voucher_id: None,
            shipping_status: None,
            shipping_notes: None,
            shipped_at: None,
            delivered_at: None,
            expects_return: false,
            return_status: None,
            return_device_imei: None,
            return_notes: None,
            return_received_at: None,
            closure_reason: Some("done".into()),
            closure_metadata: Some(
                ClosureRecord::new(Some("done".into()), DeviceStatus::Lost, now)
                    .to_json()
                    .unwrap(),
            ),
            closed_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn summary_surfaces_closure_device_status() {
        let summary = AssignmentSummary::from(closed_row());
        assert_eq!(summary.closure_device_status, Some(DeviceStatus::Lost));
        assert_eq!(summary.status, AssignmentStatus::Completed);
    }

    #[test]
    fn close_request_fields_are_optional() {
        let req: CloseAssignmentRequest = serde_json::from_str("{}").unwrap();
        assert!(req.reason.is_none());
        assert!(req.resulting_device_status.is_none());

        let req: CloseAssignmentRequest =
            serde_json::from_str(r#"{"resulting_device_status":"NOT_REPAIRED"}"#).unwrap();
        assert_eq!(req.resulting_device_status, Some(DeviceStatus::NotRepaired));
    }
}
