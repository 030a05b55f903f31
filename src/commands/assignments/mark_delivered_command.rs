use crate::{
    commands::{
        assignments::{apply_transition, load_assignment, record_transition},
        Command,
    },
    db::{with_transaction, DbPool},
    entities::assignment,
    errors::ServiceError,
    events::{Event, EventSender},
    lifecycle::{self, Transition},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkDeliveredCommand {
    pub assignment_id: Uuid,
}

#[async_trait::async_trait]
impl Command for MarkDeliveredCommand {
    type Result = assignment::Model;

    #[instrument(skip(self, db_pool, event_sender), fields(assignment_id = %self.assignment_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        let id = self.assignment_id;

        let updated = with_transaction::<_, _, ServiceError>(&db_pool, move |txn| {
            Box::pin(async move {
                let current = load_assignment(txn, id).await?;
                let next = lifecycle::plan_mark_delivered(&current, Utc::now())?;
                apply_transition(txn, &current, next, Transition::MarkDelivered).await
            })
        })
        .await?;

        record_transition(Transition::MarkDelivered);
        info!(
            assignment_id = %id,
            return_status = ?updated.return_status,
            "Shipment delivered"
        );
        event_sender.publish(Event::ShipmentDelivered {
            assignment_id: id,
            delivered_at: updated.delivered_at,
        });

        Ok(updated)
    }
}
