pub use sea_orm_migration::prelude::*;

mod m20260512_000001_initial_schema;
mod m20260530_000001_add_job_executions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260512_000001_initial_schema::Migration),
            Box::new(m20260530_000001_add_job_executions::Migration),
        ]
    }
}
