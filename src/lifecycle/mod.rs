//! Assignment lifecycle rules.
//!
//! Everything in here is pure: a planner takes the current row (and, for
//! creation, the device) and returns the row as it must look after the
//! transition, or the reason the transition is not allowed. Persisting the
//! result, guarding it against concurrent writers and touching the device
//! registry is the job of `commands::assignments`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{
    assignment::{self, AssignmentStatus, AssignmentType, ReturnStatus, ShippingStatus},
    device::{self, DeviceStatus},
};
use crate::errors::ServiceError;

/// Device status applied on close when the caller names none.
pub const DEFAULT_CLOSURE_STATUS: DeviceStatus = DeviceStatus::Used;

/// Named transitions, used for log fields, metric names and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Transition {
    Create,
    StartShipping,
    MarkDelivered,
    UpdateShipping,
    RegisterReturn,
    Close,
}

/// Input of a new assignment, before a device has been resolved.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct NewAssignment {
    #[validate(length(min = 1, max = 32))]
    pub device_imei: String,
    #[serde(default = "default_assignment_type")]
    pub assignment_type: AssignmentType,
    #[validate(length(min = 1, max = 255))]
    pub assignee_name: String,
    #[validate(length(max = 64))]
    pub assignee_phone: Option<String>,
    #[validate(length(max = 255))]
    pub assignee_location: Option<String>,
    #[validate(length(max = 64))]
    pub ticket: Option<String>,
    #[validate(length(max = 128))]
    pub shipping_voucher_id: Option<String>,
    #[serde(default)]
    pub expects_return: bool,
    #[validate(length(max = 32))]
    pub return_device_imei: Option<String>,
}

fn default_assignment_type() -> AssignmentType {
    AssignmentType::Assign
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl NewAssignment {
    /// Cross-field rules that the derive cannot express. Runs before any
    /// store access.
    pub fn check_rules(&self) -> Result<(), ServiceError> {
        if self.assignee_name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "assignee_name must not be blank".to_string(),
            ));
        }
        if self.device_imei.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "device_imei must not be blank".to_string(),
            ));
        }
        match non_blank(&self.return_device_imei) {
            None if self.expects_return => Err(ServiceError::ValidationError(
                "return_device_imei is required when expects_return is true".to_string(),
            )),
            Some(ref imei) if imei == self.device_imei.trim() => {
                Err(ServiceError::ValidationError(
                    "return_device_imei must differ from the assigned device".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Versioned closure metadata stored in `assignments.closure_metadata`.
///
/// New fields go into a new variant; producers that need to attach data
/// without a schema bump use `extensions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "schema")]
pub enum ClosureRecord {
    #[serde(rename = "v1")]
    V1 {
        reason: Option<String>,
        resulting_status: DeviceStatus,
        closed_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        #[schema(value_type = Object)]
        extensions: BTreeMap<String, serde_json::Value>,
    },
}

impl ClosureRecord {
    pub fn new(
        reason: Option<String>,
        resulting_status: DeviceStatus,
        closed_at: DateTime<Utc>,
    ) -> Self {
        ClosureRecord::V1 {
            reason,
            resulting_status,
            closed_at,
            extensions: BTreeMap::new(),
        }
    }

    pub fn resulting_status(&self) -> DeviceStatus {
        match self {
            ClosureRecord::V1 {
                resulting_status, ..
            } => *resulting_status,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ClosureRecord::V1 { reason, .. } => reason.as_deref(),
        }
    }

    pub fn closed_at(&self) -> DateTime<Utc> {
        match self {
            ClosureRecord::V1 { closed_at, .. } => *closed_at,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, ServiceError> {
        serde_json::to_value(self)
            .map_err(|e| ServiceError::InternalError(format!("closure metadata: {}", e)))
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, ServiceError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ServiceError::InternalError(format!("closure metadata: {}", e)))
    }
}

fn require_active(current: &assignment::Model) -> Result<(), ServiceError> {
    if current.is_active() {
        Ok(())
    } else {
        Err(ServiceError::not_active(current.id))
    }
}

fn require_voucher(current: &assignment::Model) -> Result<(), ServiceError> {
    match current.shipping_voucher_id.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ServiceError::MissingVoucher(current.id)),
    }
}

/// Builds the row for a new assignment against `device`.
pub fn plan_create(
    input: &NewAssignment,
    device: &device::Model,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<assignment::Model, ServiceError> {
    input.check_rules()?;

    if !device.status.is_assignable() {
        return Err(ServiceError::InvalidState(format!(
            "Device {} is {} and cannot be assigned",
            device.imei, device.status
        )));
    }

    let voucher = non_blank(&input.shipping_voucher_id);
    let shipping_status = voucher.as_ref().map(|_| ShippingStatus::Pending);
    let return_device_imei = if input.expects_return {
        non_blank(&input.return_device_imei)
    } else {
        None
    };

    Ok(assignment::Model {
        id,
        device_id: device.id,
        assignment_type: input.assignment_type,
        status: AssignmentStatus::Active,
        assignee_name: input.assignee_name.trim().to_string(),
        assignee_phone: non_blank(&input.assignee_phone),
        assignee_location: non_blank(&input.assignee_location),
        ticket: non_blank(&input.ticket),
        shipping_voucher_id: voucher,
        shipping_status,
        shipping_notes: None,
        shipped_at: None,
        delivered_at: None,
        expects_return: input.expects_return,
        return_status: None,
        return_device_imei,
        return_notes: None,
        return_received_at: None,
        closure_reason: None,
        closure_metadata: None,
        closed_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn plan_start_shipping(
    current: &assignment::Model,
    now: DateTime<Utc>,
) -> Result<assignment::Model, ServiceError> {
    require_active(current)?;
    require_voucher(current)?;

    match current.shipping_status {
        None | Some(ShippingStatus::Pending) => {}
        Some(other) => {
            return Err(ServiceError::InvalidState(format!(
                "Assignment {} shipping is already {}",
                current.id, other
            )))
        }
    }

    let mut next = current.clone();
    next.shipping_status = Some(ShippingStatus::Shipped);
    next.shipped_at = current.shipped_at.or(Some(now));
    next.updated_at = now;
    Ok(next)
}

pub fn plan_mark_delivered(
    current: &assignment::Model,
    now: DateTime<Utc>,
) -> Result<assignment::Model, ServiceError> {
    require_active(current)?;
    require_voucher(current)?;

    if current.shipping_status != Some(ShippingStatus::Shipped) {
        return Err(ServiceError::InvalidState(format!(
            "Assignment {} is not in transit (shipping status: {})",
            current.id,
            current
                .shipping_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )));
    }

    Ok(delivered(current, now))
}

fn delivered(current: &assignment::Model, now: DateTime<Utc>) -> assignment::Model {
    let mut next = current.clone();
    next.shipping_status = Some(ShippingStatus::Delivered);
    next.shipped_at = current.shipped_at.or(Some(now));
    next.delivered_at = current.delivered_at.or(Some(now));
    if current.expects_return && current.return_status.is_none() {
        next.return_status = Some(ReturnStatus::Pending);
    }
    next.updated_at = now;
    next
}

/// Sets any shipping sub-state. Existing timestamps are kept.
pub fn plan_update_shipping(
    current: &assignment::Model,
    status: ShippingStatus,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<assignment::Model, ServiceError> {
    require_active(current)?;
    require_voucher(current)?;

    let mut next = match status {
        ShippingStatus::Delivered => delivered(current, now),
        ShippingStatus::Shipped => {
            let mut next = current.clone();
            next.shipping_status = Some(ShippingStatus::Shipped);
            next.shipped_at = current.shipped_at.or(Some(now));
            next
        }
        ShippingStatus::Pending => {
            let mut next = current.clone();
            next.shipping_status = Some(ShippingStatus::Pending);
            next
        }
    };
    if let Some(notes) = notes {
        next.shipping_notes = Some(notes);
    }
    next.updated_at = now;
    Ok(next)
}

pub fn plan_register_return(
    current: &assignment::Model,
    received: bool,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<assignment::Model, ServiceError> {
    require_active(current)?;

    if !current.expects_return {
        return Err(ServiceError::InvalidState(format!(
            "Assignment {} does not expect a return",
            current.id
        )));
    }
    if current.return_status == Some(ReturnStatus::Received) {
        return Err(ServiceError::InvalidState(format!(
            "Return for assignment {} was already received",
            current.id
        )));
    }

    let mut next = current.clone();
    if received {
        next.return_status = Some(ReturnStatus::Received);
        next.return_received_at = Some(now);
    } else {
        next.return_status = Some(ReturnStatus::Pending);
    }
    if let Some(notes) = notes {
        next.return_notes = Some(notes);
    }
    next.updated_at = now;
    Ok(next)
}

/// Resolves and checks the device status a close leaves behind.
pub fn closure_status(requested: Option<DeviceStatus>) -> Result<DeviceStatus, ServiceError> {
    let status = requested.unwrap_or(DEFAULT_CLOSURE_STATUS);
    if status.is_closure_outcome() {
        Ok(status)
    } else {
        Err(ServiceError::ValidationError(format!(
            "resulting_device_status must be one of USED, REPAIRED, NOT_REPAIRED, LOST (got {})",
            status
        )))
    }
}

pub fn plan_close(
    current: &assignment::Model,
    reason: Option<String>,
    resulting_status: DeviceStatus,
    now: DateTime<Utc>,
) -> Result<assignment::Model, ServiceError> {
    closure_status(Some(resulting_status))?;
    require_active(current)?;

    let reason = non_blank(&reason);
    let record = ClosureRecord::new(reason.clone(), resulting_status, now);

    let mut next = current.clone();
    next.status = AssignmentStatus::Completed;
    next.closed_at = Some(now);
    next.closure_reason = reason;
    next.closure_metadata = Some(record.to_json()?);
    next.updated_at = now;
    Ok(next)
}

/// A data-model rule an assignment row breaks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("shipping_status set without a shipping voucher")]
    ShippingWithoutVoucher,
    #[error("return_status set on an assignment that expects no return")]
    ReturnNotExpected,
    #[error("closed_at must be set exactly when the assignment is completed")]
    ClosedAtMismatch,
    #[error("delivered shipment is missing shipped_at or delivered_at")]
    DeliveredWithoutTimestamps,
    #[error("received return is missing return_received_at")]
    ReceivedWithoutTimestamp,
    #[error("expected return has no return_device_imei")]
    ReturnWithoutImei,
}

pub fn check_invariants(row: &assignment::Model) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    if row.shipping_status.is_some() && row.shipping_voucher_id.is_none() {
        violations.push(InvariantViolation::ShippingWithoutVoucher);
    }
    if row.return_status.is_some() && !row.expects_return {
        violations.push(InvariantViolation::ReturnNotExpected);
    }
    if row.closed_at.is_some() != (row.status == AssignmentStatus::Completed) {
        violations.push(InvariantViolation::ClosedAtMismatch);
    }
    if row.shipping_status == Some(ShippingStatus::Delivered)
        && (row.shipped_at.is_none() || row.delivered_at.is_none())
    {
        violations.push(InvariantViolation::DeliveredWithoutTimestamps);
    }
    if row.return_status == Some(ReturnStatus::Received) && row.return_received_at.is_none() {
        violations.push(InvariantViolation::ReceivedWithoutTimestamp);
    }
    if row.expects_return && row.return_device_imei.is_none() {
        violations.push(InvariantViolation::ReturnWithoutImei);
    }

    violations
}
