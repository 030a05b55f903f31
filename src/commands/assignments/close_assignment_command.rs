use crate::{
    commands::{
        assignments::{apply_transition, load_assignment, record_transition},
        Command,
    },
    db::{with_transaction, DbPool},
    entities::DeviceStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    lifecycle::{self, Transition},
    services::{devices::DeviceRegistry, soti_mirror},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Completes an assignment and releases its device.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CloseAssignmentCommand {
    pub assignment_id: Uuid,
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
    /// Defaults to USED
    pub resulting_device_status: Option<DeviceStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClosureOutcome {
    pub assignment_id: Uuid,
    pub device_id: Uuid,
    #[schema(example = "356938035643809")]
    pub imei: String,
    pub resulting_device_status: DeviceStatus,
    pub closed_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for CloseAssignmentCommand {
    type Result = ClosureOutcome;

    #[instrument(skip(self, db_pool, event_sender), fields(assignment_id = %self.assignment_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()?;
        let resulting = lifecycle::closure_status(self.resulting_device_status)?;

        let id = self.assignment_id;
        let reason = self.reason.clone();

        let (outcome, old_status) = with_transaction::<_, _, ServiceError>(&db_pool, move |txn| {
            Box::pin(async move {
                let current = load_assignment(txn, id).await?;
                let next = lifecycle::plan_close(&current, reason, resulting, Utc::now())?;
                let closed = apply_transition(txn, &current, next, Transition::Close).await?;

                let device = DeviceRegistry::find_by_id(txn, closed.device_id)
                    .await?
                    .ok_or_else(|| ServiceError::device_not_found(closed.device_id))?;
                DeviceRegistry::update_status(txn, device.id, resulting, None, None).await?;
                soti_mirror::sync_assignee(txn, &device.imei, None).await?;

                let closed_at = closed.closed_at.unwrap_or_else(Utc::now);
                Ok((
                    ClosureOutcome {
                        assignment_id: closed.id,
                        device_id: device.id,
                        imei: device.imei,
                        resulting_device_status: resulting,
                        closed_at,
                    },
                    device.status,
                ))
            })
        })
        .await?;

        record_transition(Transition::Close);
        info!(
            assignment_id = %id,
            device_id = %outcome.device_id,
            resulting_device_status = %resulting,
            "Assignment closed"
        );

        event_sender.publish(Event::AssignmentClosed {
            assignment_id: id,
            device_id: outcome.device_id,
            resulting_device_status: resulting,
            closed_at: outcome.closed_at,
        });
        event_sender.publish(Event::DeviceStatusChanged {
            device_id: outcome.device_id,
            old_status,
            new_status: resulting,
        });

        Ok(outcome)
    }
}
