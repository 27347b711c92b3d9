use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create job_executions table for background job bookkeeping
        manager
            .create_table(
                Table::create()
                    .table(JobExecutions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobExecutions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JobExecutions::JobName).string().not_null())
                    .col(
                        ColumnDef::new(JobExecutions::StartedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(JobExecutions::CompletedAt).big_integer())
                    .col(ColumnDef::new(JobExecutions::Success).big_integer())
                    .col(ColumnDef::new(JobExecutions::ErrorMessage).string())
                    .col(ColumnDef::new(JobExecutions::RecordsProcessed).big_integer())
                    .to_owned(),
            )
            .await?;

        // Index on started_at for the history pruning job
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_job_executions_started_at")
                    .table(JobExecutions::Table)
                    .col(JobExecutions::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobExecutions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JobExecutions {
    Table,
    Id,
    JobName,
    StartedAt,
    CompletedAt,
    Success,
    ErrorMessage,
    RecordsProcessed,
}
