use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000003_create_soti_devices_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Display-only mirror of the MDM console, filled by external sync jobs.
        manager
            .create_table(
                Table::create()
                    .table(SotiDevices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SotiDevices::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SotiDevices::Imei).string_len(32).not_null())
                    .col(ColumnDef::new(SotiDevices::DeviceName).string().null())
                    .col(ColumnDef::new(SotiDevices::AssignedUser).string().null())
                    .col(
                        ColumnDef::new(SotiDevices::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SotiDevices::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("ux_soti_devices_imei")
                    .table(SotiDevices::Table)
                    .col(SotiDevices::Imei)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SotiDevices::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SotiDevices {
    Table,
    Id,
    Imei,
    DeviceName,
    AssignedUser,
    LastSyncedAt,
    UpdatedAt,
}
