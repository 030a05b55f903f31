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

/// Hands a vouchered assignment to the courier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartShippingCommand {
    pub assignment_id: Uuid,
}

#[async_trait::async_trait]
impl Command for StartShippingCommand {
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
                let next = lifecycle::plan_start_shipping(&current, Utc::now())?;
                apply_transition(txn, &current, next, Transition::StartShipping).await
            })
        })
        .await?;

        record_transition(Transition::StartShipping);
        info!(assignment_id = %id, "Shipping started");
        event_sender.publish(Event::ShippingStarted {
            assignment_id: id,
            shipped_at: updated.shipped_at,
        });

        Ok(updated)
    }
}
