use crate::{
    db::{is_unique_violation, DbPool},
    entities::device::{self, DeviceStatus},
    errors::ServiceError,
};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_imei(imei: &str) -> Result<(), ValidationError> {
    if imei.len() == 15 && imei.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("imei_must_be_15_digits"))
    }
}

/// Device intake payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct NewDevice {
    #[validate(custom = "validate_imei")]
    #[schema(example = "356938035643809")]
    pub imei: String,
    #[validate(length(min = 1, max = 255))]
    pub model: String,
    /// NEW, USED or REPAIRED; defaults to NEW
    pub status: Option<DeviceStatus>,
}

/// Read and write access to the device registry.
///
/// The associated functions take any connection so lifecycle commands can
/// run them inside their own transaction.
#[derive(Clone)]
pub struct DeviceRegistry {
    db_pool: Arc<DbPool>,
}

impl DeviceRegistry {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    pub async fn find_by_imei<C: ConnectionTrait>(
        conn: &C,
        imei: &str,
    ) -> Result<Option<device::Model>, ServiceError> {
        device::Entity::find()
            .filter(device::Column::Imei.eq(imei.trim()))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<device::Model>, ServiceError> {
        device::Entity::find_by_id(id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Unconditionally sets status, assignee and ticket.
    pub async fn update_status<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        status: DeviceStatus,
        assigned_to: Option<String>,
        ticket: Option<String>,
    ) -> Result<(), ServiceError> {
        let result = device::Entity::update_many()
            .col_expr(device::Column::Status, Expr::value(status))
            .col_expr(device::Column::AssignedTo, Expr::value(assigned_to))
            .col_expr(device::Column::Ticket, Expr::value(ticket))
            .col_expr(device::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(device::Column::Id.eq(id))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::device_not_found(id));
        }
        Ok(())
    }

    /// Moves a device from `from` to `to` only if it is still in `from`.
    /// Returns false when another writer got there first.
    pub async fn swap_status<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        from: DeviceStatus,
        to: DeviceStatus,
        assigned_to: Option<String>,
        ticket: Option<String>,
    ) -> Result<bool, ServiceError> {
        let result = device::Entity::update_many()
            .col_expr(device::Column::Status, Expr::value(to))
            .col_expr(device::Column::AssignedTo, Expr::value(assigned_to))
            .col_expr(device::Column::Ticket, Expr::value(ticket))
            .col_expr(device::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(device::Column::Id.eq(id))
            .filter(device::Column::Status.eq(from))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(result.rows_affected == 1)
    }

    /// Registers a device in stock
    #[instrument(skip(self, input), fields(imei = %input.imei))]
    pub async fn intake(&self, input: NewDevice) -> Result<device::Model, ServiceError> {
        input.validate()?;
        let status = input.status.unwrap_or(DeviceStatus::New);
        if !status.is_assignable() {
            return Err(ServiceError::ValidationError(format!(
                "intake status must be NEW, USED or REPAIRED (got {})",
                status
            )));
        }

        let model = device::ActiveModel {
            id: Set(Uuid::new_v4()),
            imei: Set(input.imei.clone()),
            model: Set(Some(input.model.trim().to_string()).filter(|m| !m.is_empty())),
            status: Set(status),
            assigned_to: Set(None),
            ticket: Set(None),
            ..Default::default()
        };

        let created = model.insert(&*self.db_pool).await.map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict(format!("Device with IMEI {} already exists", input.imei))
            } else {
                ServiceError::db_error(e)
            }
        })?;

        info!(device_id = %created.id, status = %created.status, "Device registered");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<device::Model, ServiceError> {
        Self::find_by_id(&*self.db_pool, id)
            .await?
            .ok_or_else(|| ServiceError::device_not_found(id))
    }

    #[instrument(skip(self))]
    pub async fn get_by_imei(&self, imei: &str) -> Result<device::Model, ServiceError> {
        Self::find_by_imei(&*self.db_pool, imei)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Device with IMEI {} not found", imei)))
    }

    /// Lists devices newest first, returning the page and the total count.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: u64,
        limit: u64,
        status: Option<DeviceStatus>,
    ) -> Result<(Vec<device::Model>, u64), ServiceError> {
        let db = &*self.db_pool;
        let mut query = device::Entity::find().order_by_desc(device::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(device::Column::Status.eq(status));
        }

        let paginator = query.paginate(db, limit);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let devices = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((devices, total))
    }
}
