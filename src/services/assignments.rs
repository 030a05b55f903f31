use crate::{
    commands::{
        assignments::{
            CloseAssignmentCommand, ClosureOutcome, CreateAssignmentCommand,
            MarkDeliveredCommand, RegisterReturnCommand, ReturnOutcome, StartShippingCommand,
            UpdateShippingCommand,
        },
        Command,
    },
    db::DbPool,
    entities::{
        assignment::{self, AssignmentStatus, ShippingStatus},
        DeviceStatus,
    },
    errors::ServiceError,
    events::EventSender,
    lifecycle::NewAssignment,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Filters for listing assignments
#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub status: Option<AssignmentStatus>,
    pub device_id: Option<Uuid>,
}

/// Service for the assignment lifecycle
#[derive(Clone)]
pub struct AssignmentService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl AssignmentService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_assignment(
        &self,
        input: NewAssignment,
    ) -> Result<assignment::Model, ServiceError> {
        CreateAssignmentCommand { assignment: input }
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    #[instrument(skip(self))]
    pub async fn start_shipping(&self, assignment_id: Uuid) -> Result<assignment::Model, ServiceError> {
        StartShippingCommand { assignment_id }
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    #[instrument(skip(self))]
    pub async fn mark_delivered(&self, assignment_id: Uuid) -> Result<assignment::Model, ServiceError> {
        MarkDeliveredCommand { assignment_id }
            .execute(self.db_pool.clone(), self.event_sender.clone())
            .await
    }

    #[instrument(skip(self, notes))]
    pub async fn update_shipping(
        &self,
        assignment_id: Uuid,
        shipping_status: ShippingStatus,
        notes: Option<String>,
    ) -> Result<assignment::Model, ServiceError> {
        UpdateShippingCommand {
            assignment_id,
            shipping_status,
            notes,
        }
        .execute(self.db_pool.clone(), self.event_sender.clone())
        .await
    }

    #[instrument(skip(self, notes))]
    pub async fn register_return(
        &self,
        assignment_id: Uuid,
        received: bool,
        notes: Option<String>,
    ) -> Result<ReturnOutcome, ServiceError> {
        RegisterReturnCommand {
            assignment_id,
            received,
            notes,
        }
        .execute(self.db_pool.clone(), self.event_sender.clone())
        .await
    }

    #[instrument(skip(self, reason))]
    pub async fn close(
        &self,
        assignment_id: Uuid,
        reason: Option<String>,
        resulting_device_status: Option<DeviceStatus>,
    ) -> Result<ClosureOutcome, ServiceError> {
        CloseAssignmentCommand {
            assignment_id,
            reason,
            resulting_device_status,
        }
        .execute(self.db_pool.clone(), self.event_sender.clone())
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_assignment(&self, id: Uuid) -> Result<assignment::Model, ServiceError> {
        assignment::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::assignment_not_found(id))
    }

    /// Lists assignments newest first, returning the page and the total count.
    #[instrument(skip(self))]
    pub async fn list_assignments(
        &self,
        page: u64,
        limit: u64,
        filter: AssignmentFilter,
    ) -> Result<(Vec<assignment::Model>, u64), ServiceError> {
        let db = &*self.db_pool;
        let mut query = assignment::Entity::find().order_by_desc(assignment::Column::CreatedAt);
        if let Some(status) = filter.status {
            query = query.filter(assignment::Column::Status.eq(status));
        }
        if let Some(device_id) = filter.device_id {
            query = query.filter(assignment::Column::DeviceId.eq(device_id));
        }

        let paginator = query.paginate(db, limit);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((rows, total))
    }
}
