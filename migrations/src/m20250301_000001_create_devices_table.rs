use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000001_create_devices_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Devices::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Devices::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Devices::Imei).string_len(32).not_null())
                    .col(ColumnDef::new(Devices::Model).string().null())
                    .col(
                        ColumnDef::new(Devices::Status)
                            .string_len(20)
                            .not_null()
                            .default("NEW"),
                    )
                    .col(ColumnDef::new(Devices::AssignedTo).string().null())
                    .col(ColumnDef::new(Devices::Ticket).string().null())
                    .col(
                        ColumnDef::new(Devices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Devices::UpdatedAt)
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
                    .name("ux_devices_imei")
                    .table(Devices::Table)
                    .col(Devices::Imei)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_devices_status")
                    .table(Devices::Table)
                    .col(Devices::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Devices::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Devices {
    Table,
    Id,
    Imei,
    Model,
    Status,
    AssignedTo,
    Ticket,
    CreatedAt,
    UpdatedAt,
}
