//! Keeps the SOTI MDM mirror's assignee column in step with the registry.
//!
//! Rows are created by the external sync job. A lifecycle write only ever
//! updates an existing row, and a missing row is not an error.

use crate::{entities::soti_device, errors::ServiceError};
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::debug;

/// Sets (or clears) the assigned user shown for `imei`. Returns whether a
/// mirror row was touched.
pub async fn sync_assignee<C: ConnectionTrait>(
    conn: &C,
    imei: &str,
    assigned_user: Option<&str>,
) -> Result<bool, ServiceError> {
    let result = soti_device::Entity::update_many()
        .col_expr(
            soti_device::Column::AssignedUser,
            Expr::value(assigned_user.map(str::to_string)),
        )
        .col_expr(
            soti_device::Column::UpdatedAt,
            Expr::value(chrono::Utc::now()),
        )
        .filter(soti_device::Column::Imei.eq(imei))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        debug!(%imei, "No SOTI mirror row for device; skipping sync");
        return Ok(false);
    }
    Ok(true)
}
