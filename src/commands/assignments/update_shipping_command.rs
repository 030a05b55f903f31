use crate::{
    commands::{
        assignments::{apply_transition, load_assignment, record_transition},
        Command,
    },
    db::{with_transaction, DbPool},
    entities::assignment::{self, ShippingStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    lifecycle::{self, Transition},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Sets the shipping sub-state directly, e.g. from a courier status feed.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateShippingCommand {
    pub assignment_id: Uuid,
    pub shipping_status: ShippingStatus,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[async_trait::async_trait]
impl Command for UpdateShippingCommand {
    type Result = assignment::Model;

    #[instrument(skip(self, db_pool, event_sender), fields(assignment_id = %self.assignment_id, shipping_status = %self.shipping_status))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()?;

        let id = self.assignment_id;
        let status = self.shipping_status;
        let notes = self.notes.clone();

        let updated = with_transaction::<_, _, ServiceError>(&db_pool, move |txn| {
            Box::pin(async move {
                let current = load_assignment(txn, id).await?;
                let next = lifecycle::plan_update_shipping(&current, status, notes, Utc::now())?;
                apply_transition(txn, &current, next, Transition::UpdateShipping).await
            })
        })
        .await?;

        record_transition(Transition::UpdateShipping);
        info!(assignment_id = %id, %status, "Shipping status updated");
        event_sender.publish(Event::ShippingUpdated {
            assignment_id: id,
            shipping_status: status,
        });
        if status == ShippingStatus::Delivered {
            event_sender.publish(Event::ShipmentDelivered {
                assignment_id: id,
                delivered_at: updated.delivered_at,
            });
        }

        Ok(updated)
    }
}
