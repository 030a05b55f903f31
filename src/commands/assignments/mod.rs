//! One command per assignment lifecycle operation.
//!
//! Each command reads the current row inside its transaction, asks
//! [`crate::lifecycle`] for the next state and writes it back with a guard on
//! the state it read. A guard that matches no row means a concurrent writer
//! moved the assignment first; the transaction is rolled back and the caller
//! gets `InvalidState`.

pub mod close_assignment_command;
pub mod create_assignment_command;
pub mod mark_delivered_command;
pub mod register_return_command;
pub mod start_shipping_command;
pub mod update_shipping_command;

pub use close_assignment_command::{CloseAssignmentCommand, ClosureOutcome};
pub use create_assignment_command::CreateAssignmentCommand;
pub use mark_delivered_command::MarkDeliveredCommand;
pub use register_return_command::{RegisterReturnCommand, ReturnOutcome};
pub use start_shipping_command::StartShippingCommand;
pub use update_shipping_command::UpdateShippingCommand;

use crate::{
    entities::assignment::{self, Entity as Assignment},
    errors::ServiceError,
    lifecycle::{self, Transition},
};
use metrics::counter;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::{error, warn};
use uuid::Uuid;

pub(crate) async fn load_assignment<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<assignment::Model, ServiceError> {
    Assignment::find_by_id(id)
        .one(conn)
        .await
        .map_err(|e| {
            error!(assignment_id = %id, error = %e, "Failed to fetch assignment");
            ServiceError::db_error(e)
        })?
        .ok_or_else(|| ServiceError::assignment_not_found(id))
}

/// Matches the row only while it still has the status and sub-states that
/// were read.
fn state_guard(prev: &assignment::Model) -> Condition {
    let shipping = match prev.shipping_status {
        Some(status) => assignment::Column::ShippingStatus.eq(status),
        None => assignment::Column::ShippingStatus.is_null(),
    };
    let returned = match prev.return_status {
        Some(status) => assignment::Column::ReturnStatus.eq(status),
        None => assignment::Column::ReturnStatus.is_null(),
    };

    Condition::all()
        .add(assignment::Column::Id.eq(prev.id))
        .add(assignment::Column::Status.eq(prev.status))
        .add(shipping)
        .add(returned)
}

/// Writes the lifecycle columns of `next` if the row still matches `prev`.
pub(crate) async fn apply_transition<C: ConnectionTrait>(
    conn: &C,
    prev: &assignment::Model,
    next: assignment::Model,
    transition: Transition,
) -> Result<assignment::Model, ServiceError> {
    let violations = lifecycle::check_invariants(&next);
    if !violations.is_empty() {
        error!(
            assignment_id = %next.id,
            %transition,
            ?violations,
            "Refusing to persist assignment that breaks data-model rules"
        );
        return Err(ServiceError::InternalError(format!(
            "{} would leave assignment {} inconsistent",
            transition, next.id
        )));
    }

    let patch = assignment::ActiveModel {
        status: Set(next.status),
        shipping_status: Set(next.shipping_status),
        shipping_notes: Set(next.shipping_notes.clone()),
        shipped_at: Set(next.shipped_at),
        delivered_at: Set(next.delivered_at),
        return_status: Set(next.return_status),
        return_notes: Set(next.return_notes.clone()),
        return_received_at: Set(next.return_received_at),
        closure_reason: Set(next.closure_reason.clone()),
        closure_metadata: Set(next.closure_metadata.clone()),
        closed_at: Set(next.closed_at),
        updated_at: Set(next.updated_at),
        ..Default::default()
    };

    let result = Assignment::update_many()
        .set(patch)
        .filter(state_guard(prev))
        .exec(conn)
        .await
        .map_err(|e| {
            error!(assignment_id = %prev.id, %transition, error = %e, "Failed to write assignment");
            ServiceError::db_error(e)
        })?;

    if result.rows_affected == 0 {
        warn!(assignment_id = %prev.id, %transition, "Assignment changed concurrently");
        counter!("devicedesk_lifecycle.conflicts", 1, "transition" => <&'static str>::from(transition));
        return Err(ServiceError::changed_concurrently(prev.id));
    }

    Ok(next)
}

pub(crate) fn record_transition(transition: Transition) {
    counter!("devicedesk_lifecycle.transitions", 1, "transition" => <&'static str>::from(transition));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        commands::Command,
        db::{establish_connection, run_migrations, DbConfig},
        entities::{
            assignment::{AssignmentStatus, AssignmentType, ShippingStatus},
            DeviceStatus,
        },
        events::EventSender,
        lifecycle::NewAssignment,
        services::devices::{DeviceRegistry, NewDevice},
    };
    use assert_matches::assert_matches;
    use chrono::Utc;
    use std::sync::Arc;

    async fn active_assignment() -> (Arc<crate::db::DbPool>, assignment::Model) {
        let db = establish_connection(&DbConfig::sqlite_memory()).await.unwrap();
        run_migrations(&db).await.unwrap();
        let db = Arc::new(db);

        DeviceRegistry::new(db.clone())
            .intake(NewDevice {
                imei: "356938035643809".to_string(),
                model: "Pixel 8".to_string(),
                status: Some(DeviceStatus::New),
            })
            .await
            .unwrap();

        let (events, _rx) = EventSender::channel(16);
        let created = CreateAssignmentCommand {
            assignment: NewAssignment {
                device_imei: "356938035643809".to_string(),
                assignment_type: AssignmentType::Assign,
                assignee_name: "Nikos Pappas".to_string(),
                assignee_phone: None,
                assignee_location: None,
                ticket: Some("HD-310".to_string()),
                shipping_voucher_id: Some("ELTA-4410".to_string()),
                expects_return: false,
                return_device_imei: None,
            },
        }
        .execute(db.clone(), Arc::new(events))
        .await
        .unwrap();

        (db, created)
    }

    #[tokio::test]
    async fn stale_read_is_rejected_and_row_is_kept() {
        let (db, read) = active_assignment().await;

        // First writer ships from the row it read.
        let shipped = lifecycle::plan_start_shipping(&read, Utc::now()).unwrap();
        apply_transition(&*db, &read, shipped, Transition::StartShipping)
            .await
            .unwrap();

        // Second writer still holds the pending row and tries to close it.
        let closed = lifecycle::plan_close(&read, None, DeviceStatus::Used, Utc::now()).unwrap();
        let err = apply_transition(&*db, &read, closed, Transition::Close)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidState(msg) if msg.contains("changed concurrently"));

        let current = load_assignment(&*db, read.id).await.unwrap();
        assert_eq!(current.status, AssignmentStatus::Active);
        assert_eq!(current.shipping_status, Some(ShippingStatus::Shipped));
        assert!(current.closed_at.is_none());
        assert!(current.closure_metadata.is_none());
    }

    #[tokio::test]
    async fn stale_completed_check_blocks_double_close() {
        let (db, read) = active_assignment().await;

        let first = lifecycle::plan_close(&read, Some("done".into()), DeviceStatus::Used, Utc::now())
            .unwrap();
        apply_transition(&*db, &read, first, Transition::Close).await.unwrap();

        let second =
            lifecycle::plan_close(&read, Some("again".into()), DeviceStatus::Lost, Utc::now()).unwrap();
        assert_matches!(
            apply_transition(&*db, &read, second, Transition::Close).await,
            Err(ServiceError::InvalidState(_))
        );

        let current = load_assignment(&*db, read.id).await.unwrap();
        assert_eq!(current.closure_reason.as_deref(), Some("done"));
        let record = lifecycle::ClosureRecord::from_json(current.closure_metadata.as_ref().unwrap())
            .unwrap();
        assert_eq!(record.resulting_status(), DeviceStatus::Used);
    }

    #[tokio::test]
    async fn write_that_breaks_row_rules_is_refused() {
        let (db, read) = active_assignment().await;

        let mut broken = read.clone();
        broken.shipping_voucher_id = None;
        broken.shipping_status = Some(ShippingStatus::Shipped);
        assert_matches!(
            apply_transition(&*db, &read, broken, Transition::UpdateShipping).await,
            Err(ServiceError::InternalError(_))
        );

        let current = load_assignment(&*db, read.id).await.unwrap();
        assert_eq!(current.shipping_status, Some(ShippingStatus::Pending));
    }
}
