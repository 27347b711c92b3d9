use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Create passes table
        manager
            .create_table(
                Table::create()
                    .table(Passes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Passes::Serial)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Passes::PassType))
                    .col(string(Passes::AuthToken))
                    .col(big_integer(Passes::UpdatedAt))
                    .col(big_integer(Passes::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create registrations table, keyed by (device_id, pass_serial)
        manager
            .create_table(
                Table::create()
                    .table(Registrations::Table)
                    .if_not_exists()
                    .col(string(Registrations::DeviceId))
                    .col(string(Registrations::PassSerial))
                    .col(string(Registrations::PassType))
                    .col(string(Registrations::PushToken))
                    .col(big_integer(Registrations::CreatedAt))
                    .col(big_integer(Registrations::UpdatedAt))
                    .primary_key(
                        Index::create()
                            .col(Registrations::DeviceId)
                            .col(Registrations::PassSerial),
                    )
                    .to_owned(),
            )
            .await?;

        // Index on pass_serial for the wake-up fan-out
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_registrations_pass_serial")
                    .table(Registrations::Table)
                    .col(Registrations::PassSerial)
                    .to_owned(),
            )
            .await?;

        // Index on (device_id, pass_type) for the poll endpoint
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_registrations_device_pass_type")
                    .table(Registrations::Table)
                    .col(Registrations::DeviceId)
                    .col(Registrations::PassType)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Registrations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Passes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Passes {
    Table,
    Serial,
    PassType,
    AuthToken,
    UpdatedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Registrations {
    Table,
    DeviceId,
    PassSerial,
    PassType,
    PushToken,
    CreatedAt,
    UpdatedAt,
}
