use crate::{
    commands::{assignments::record_transition, Command},
    db::{is_unique_violation, with_transaction, DbPool},
    entities::{
        assignment::{self, AssignmentStatus, Entity as Assignment},
        device, DeviceStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    lifecycle::{self, NewAssignment, Transition},
    services::{devices::DeviceRegistry, soti_mirror},
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Marks `device` ASSIGNED, provided it still has the status it was read
/// with.
pub(crate) async fn hand_out_device<C: ConnectionTrait>(
    conn: &C,
    device: &device::Model,
    assignee: &str,
    ticket: Option<String>,
) -> Result<(), ServiceError> {
    let swapped = DeviceRegistry::swap_status(
        conn,
        device.id,
        device.status,
        DeviceStatus::Assigned,
        Some(assignee.to_string()),
        ticket,
    )
    .await?;
    if !swapped {
        warn!(device_id = %device.id, "Device status changed while assigning");
        return Err(ServiceError::InvalidState(format!(
            "Device {} changed concurrently; re-fetch and retry",
            device.imei
        )));
    }
    Ok(())
}

/// Hands a device in stock to an assignee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAssignmentCommand {
    pub assignment: NewAssignment,
}

fn insert_model(row: assignment::Model) -> assignment::ActiveModel {
    assignment::ActiveModel {
        id: Set(row.id),
        device_id: Set(row.device_id),
        assignment_type: Set(row.assignment_type),
        status: Set(row.status),
        assignee_name: Set(row.assignee_name),
        assignee_phone: Set(row.assignee_phone),
        assignee_location: Set(row.assignee_location),
        ticket: Set(row.ticket),
        shipping_voucher_id: Set(row.shipping_voucher_id),
        shipping_status: Set(row.shipping_status),
        shipping_notes: Set(row.shipping_notes),
        shipped_at: Set(row.shipped_at),
        delivered_at: Set(row.delivered_at),
        expects_return: Set(row.expects_return),
        return_status: Set(row.return_status),
        return_device_imei: Set(row.return_device_imei),
        return_notes: Set(row.return_notes),
        return_received_at: Set(row.return_received_at),
        closure_reason: Set(row.closure_reason),
        closure_metadata: Set(row.closure_metadata),
        closed_at: Set(row.closed_at),
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl Command for CreateAssignmentCommand {
    type Result = assignment::Model;

    #[instrument(skip(self, db_pool, event_sender), fields(device_imei = %self.assignment.device_imei))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.assignment.validate()?;
        self.assignment.check_rules()?;

        let input = self.assignment.clone();

        let (created, old_status) = with_transaction::<_, _, ServiceError>(&db_pool, move |txn| {
            Box::pin(async move {
                let imei = input.device_imei.trim().to_string();
                let device = DeviceRegistry::find_by_imei(txn, &imei)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Device with IMEI {} not found", imei))
                    })?;

                let row = lifecycle::plan_create(&input, &device, Uuid::new_v4(), Utc::now())?;

                let active = Assignment::find()
                    .filter(assignment::Column::DeviceId.eq(device.id))
                    .filter(assignment::Column::Status.eq(AssignmentStatus::Active))
                    .one(txn)
                    .await?;
                if let Some(active) = active {
                    return Err(ServiceError::Conflict(format!(
                        "Device {} already has active assignment {}",
                        device.imei, active.id
                    )));
                }

                let assignee = row.assignee_name.clone();
                let ticket = row.ticket.clone();

                let created = insert_model(row).insert(txn).await.map_err(|e| {
                    if is_unique_violation(&e) {
                        ServiceError::Conflict(format!(
                            "Device {} already has an active assignment",
                            device.imei
                        ))
                    } else {
                        ServiceError::db_error(e)
                    }
                })?;

                hand_out_device(txn, &device, &assignee, ticket).await?;
                soti_mirror::sync_assignee(txn, &device.imei, Some(&assignee)).await?;

                Ok((created, device.status))
            })
        })
        .await?;

        record_transition(Transition::Create);
        info!(
            assignment_id = %created.id,
            device_id = %created.device_id,
            "Assignment created"
        );

        event_sender.publish(Event::AssignmentCreated {
            assignment_id: created.id,
            device_id: created.device_id,
            assignee_name: created.assignee_name.clone(),
        });
        event_sender.publish(Event::DeviceStatusChanged {
            device_id: created.device_id,
            old_status,
            new_status: DeviceStatus::Assigned,
        });

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection, run_migrations, DbConfig};
    use crate::services::devices::NewDevice;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn hand_out_refuses_a_device_that_moved_since_it_was_read() {
        let db = establish_connection(&DbConfig::sqlite_memory()).await.unwrap();
        run_migrations(&db).await.unwrap();
        let db = Arc::new(db);
        let registry = DeviceRegistry::new(db.clone());

        let stale = registry
            .intake(NewDevice {
                imei: "356938035643809".to_string(),
                model: "Galaxy A54".to_string(),
                status: Some(DeviceStatus::Repaired),
            })
            .await
            .unwrap();

        // Someone else reports it lost in the meantime.
        DeviceRegistry::update_status(&*db, stale.id, DeviceStatus::Lost, None, None)
            .await
            .unwrap();

        let err = hand_out_device(&*db, &stale, "Eleni Markou", Some("HD-9".to_string()))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidState(msg) if msg.contains("changed concurrently"));

        let current = registry.get(stale.id).await.unwrap();
        assert_eq!(current.status, DeviceStatus::Lost);
        assert!(current.assigned_to.is_none());
        assert!(current.ticket.is_none());
    }

    #[tokio::test]
    async fn hand_out_assigns_an_unchanged_device() {
        let db = establish_connection(&DbConfig::sqlite_memory()).await.unwrap();
        run_migrations(&db).await.unwrap();
        let db = Arc::new(db);
        let registry = DeviceRegistry::new(db.clone());

        let device = registry
            .intake(NewDevice {
                imei: "356938035643809".to_string(),
                model: "Galaxy A54".to_string(),
                status: None,
            })
            .await
            .unwrap();

        hand_out_device(&*db, &device, "Eleni Markou", Some("HD-9".to_string()))
            .await
            .unwrap();

        let current = registry.get(device.id).await.unwrap();
        assert_eq!(current.status, DeviceStatus::Assigned);
        assert_eq!(current.assigned_to.as_deref(), Some("Eleni Markou"));
        assert_eq!(current.ticket.as_deref(), Some("HD-9"));
    }
}
