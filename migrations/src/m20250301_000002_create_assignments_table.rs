use sea_orm_migration::prelude::*;

use crate::m20250301_000001_create_devices_table::Devices;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000002_create_assignments_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Assignments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Assignments::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Assignments::DeviceId).uuid().not_null())
                    .col(
                        ColumnDef::new(Assignments::AssignmentType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Assignments::Status)
                            .string_len(16)
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Assignments::AssigneeName).string().not_null())
                    .col(ColumnDef::new(Assignments::AssigneePhone).string().null())
                    .col(ColumnDef::new(Assignments::AssigneeLocation).string().null())
                    .col(ColumnDef::new(Assignments::Ticket).string().null())
                    .col(
                        ColumnDef::new(Assignments::ShippingVoucherId)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Assignments::ShippingStatus)
                            .string_len(16)
                            .null(),
                    )
                    .col(ColumnDef::new(Assignments::ShippingNotes).text().null())
                    .col(
                        ColumnDef::new(Assignments::ShippedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Assignments::DeliveredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Assignments::ExpectsReturn)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Assignments::ReturnStatus)
                            .string_len(16)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Assignments::ReturnDeviceImei)
                            .string_len(32)
                            .null(),
                    )
                    .col(ColumnDef::new(Assignments::ReturnNotes).text().null())
                    .col(
                        ColumnDef::new(Assignments::ReturnReceivedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Assignments::ClosureReason).text().null())
                    .col(ColumnDef::new(Assignments::ClosureMetadata).json().null())
                    .col(
                        ColumnDef::new(Assignments::ClosedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Assignments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Assignments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_assignments_device_id")
                            .from(Assignments::Table, Assignments::DeviceId)
                            .to(Devices::Table, Devices::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_assignments_device_id")
                    .table(Assignments::Table)
                    .col(Assignments::DeviceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_assignments_status_created")
                    .table(Assignments::Table)
                    .col(Assignments::Status)
                    .col((Assignments::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        // At most one active assignment per device. Partial indexes are not
        // expressible through the index builder, and both SQLite and Postgres
        // accept this statement verbatim.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS ux_assignments_active_device \
                 ON assignments (device_id) WHERE status = 'active'",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Assignments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Assignments {
    Table,
    Id,
    DeviceId,
    AssignmentType,
    Status,
    AssigneeName,
    AssigneePhone,
    AssigneeLocation,
    Ticket,
    ShippingVoucherId,
    ShippingStatus,
    ShippingNotes,
    ShippedAt,
    DeliveredAt,
    ExpectsReturn,
    ReturnStatus,
    ReturnDeviceImei,
    ReturnNotes,
    ReturnReceivedAt,
    ClosureReason,
    ClosureMetadata,
    ClosedAt,
    CreatedAt,
    UpdatedAt,
}
