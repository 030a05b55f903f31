use crate::{
    commands::{
        assignments::{apply_transition, load_assignment, record_transition},
        Command,
    },
    db::{with_transaction, DbPool},
    entities::{assignment, DeviceStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    lifecycle::{self, Transition},
    services::{devices::DeviceRegistry, soti_mirror},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Records the state of the device the assignee is sending back.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterReturnCommand {
    pub assignment_id: Uuid,
    pub received: bool,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReturnOutcome {
    #[schema(value_type = Object)]
    pub assignment: assignment::Model,
    /// Registry id of the returned handset, when it was found and released
    pub returned_device_id: Option<Uuid>,
    /// Soft failures that did not stop the registration
    pub warnings: Vec<String>,
}

#[async_trait::async_trait]
impl Command for RegisterReturnCommand {
    type Result = ReturnOutcome;

    #[instrument(skip(self, db_pool, event_sender), fields(assignment_id = %self.assignment_id, received = self.received))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()?;

        let id = self.assignment_id;
        let received = self.received;
        let notes = self.notes.clone();

        let (outcome, released) = with_transaction::<_, _, ServiceError>(&db_pool, move |txn| {
            Box::pin(async move {
                let current = load_assignment(txn, id).await?;
                let next = lifecycle::plan_register_return(&current, received, notes, Utc::now())?;
                let updated = apply_transition(txn, &current, next, Transition::RegisterReturn).await?;

                let mut warnings = Vec::new();
                let mut released = None;

                if received {
                    match updated.return_device_imei.as_deref() {
                        Some(imei) => match DeviceRegistry::find_by_imei(txn, imei).await? {
                            Some(returned) => {
                                DeviceRegistry::update_status(
                                    txn,
                                    returned.id,
                                    DeviceStatus::Used,
                                    None,
                                    None,
                                )
                                .await?;
                                soti_mirror::sync_assignee(txn, &returned.imei, None).await?;
                                released = Some((returned.id, returned.status));
                            }
                            None => {
                                warn!(
                                    assignment_id = %id,
                                    %imei,
                                    "Returned device not found in registry; return recorded without device update"
                                );
                                warnings.push(format!(
                                    "Returned device with IMEI {} not found; device registry not updated",
                                    imei
                                ));
                            }
                        },
                        None => {
                            warn!(assignment_id = %id, "Assignment has no return_device_imei");
                            warnings.push(
                                "No returned device IMEI recorded; device registry not updated"
                                    .to_string(),
                            );
                        }
                    }
                }

                Ok((
                    ReturnOutcome {
                        assignment: updated,
                        returned_device_id: released.map(|(device_id, _)| device_id),
                        warnings,
                    },
                    released,
                ))
            })
        })
        .await?;

        record_transition(Transition::RegisterReturn);
        info!(
            assignment_id = %id,
            return_status = ?outcome.assignment.return_status,
            warnings = outcome.warnings.len(),
            "Return registered"
        );

        event_sender.publish(Event::ReturnRegistered {
            assignment_id: id,
            received,
            returned_device_id: outcome.returned_device_id,
        });
        if let Some((device_id, old_status)) = released {
            event_sender.publish(Event::DeviceStatusChanged {
                device_id,
                old_status,
                new_status: DeviceStatus::Used,
            });
        }

        Ok(outcome)
    }
}
