use crate::entities;
use crate::errors::PassError;
use crate::storage;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Job-execution rows older than this are pruned.
const JOB_HISTORY_RETENTION_SECS: i64 = 30 * 24 * 3600;

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(db: DatabaseConnection) -> Result<JobScheduler, PassError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| PassError::Other(format!("Failed to create job scheduler: {}", e)))?;

    let db_clone = db.clone();

    // Prune registrations whose pass disappeared - runs every hour
    let prune_registrations_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let db = db_clone.clone();
        Box::pin(async move {
            info!("Running prune_orphaned_registrations job");
            let execution_id = start_job_execution(&db, "prune_orphaned_registrations")
                .await
                .ok();

            match storage::prune_orphaned_registrations(&db).await {
                Ok(count) => {
                    info!("Pruned {} orphaned registrations", count);
                    if let Some(id) = execution_id {
                        let _ =
                            complete_job_execution(&db, id, true, None, Some(count as i64)).await;
                    }
                }
                Err(e) => {
                    error!("Failed to prune orphaned registrations: {}", e);
                    if let Some(id) = execution_id {
                        let _ =
                            complete_job_execution(&db, id, false, Some(e.to_string()), None).await;
                    }
                }
            }
        })
    })
    .map_err(|e| PassError::Other(format!("Failed to create prune registrations job: {}", e)))?;

    sched
        .add(prune_registrations_job)
        .await
        .map_err(|e| PassError::Other(format!("Failed to add prune registrations job: {}", e)))?;

    let db_clone = db.clone();

    // Prune old job execution records - runs every hour at 30 minutes past
    let prune_history_job = Job::new_async("0 30 * * * *", move |_uuid, _l| {
        let db = db_clone.clone();
        Box::pin(async move {
            info!("Running prune_job_history job");
            let execution_id = start_job_execution(&db, "prune_job_history").await.ok();

            match storage::prune_job_history(&db, JOB_HISTORY_RETENTION_SECS).await {
                Ok(count) => {
                    info!("Pruned {} old job execution records", count);
                    if let Some(id) = execution_id {
                        let _ =
                            complete_job_execution(&db, id, true, None, Some(count as i64)).await;
                    }
                }
                Err(e) => {
                    error!("Failed to prune job history: {}", e);
                    if let Some(id) = execution_id {
                        let _ =
                            complete_job_execution(&db, id, false, Some(e.to_string()), None).await;
                    }
                }
            }
        })
    })
    .map_err(|e| PassError::Other(format!("Failed to create prune history job: {}", e)))?;

    sched
        .add(prune_history_job)
        .await
        .map_err(|e| PassError::Other(format!("Failed to add prune history job: {}", e)))?;

    // Start the scheduler
    sched
        .start()
        .await
        .map_err(|e| PassError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!("Job scheduler started with {} jobs", 2);

    Ok(sched)
}

/// Record the start of a job execution
pub async fn start_job_execution(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<i64, PassError> {
    use entities::job_execution;

    let now = Utc::now().timestamp();

    let execution = job_execution::ActiveModel {
        id: Set(0), // Will be auto-generated
        job_name: Set(job_name.to_string()),
        started_at: Set(now),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        records_processed: Set(None),
    };

    let result = execution.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job execution
pub async fn complete_job_execution(
    db: &DatabaseConnection,
    execution_id: i64,
    success: bool,
    error_message: Option<String>,
    records_processed: Option<i64>,
) -> Result<(), PassError> {
    use entities::job_execution::{Column, Entity};

    let now = Utc::now().timestamp();

    if let Some(execution) = Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
    {
        let mut active: entities::job_execution::ActiveModel = execution.into_active_model();
        active.completed_at = Set(Some(now));
        active.success = Set(Some(if success { 1 } else { 0 }));
        active.error_message = Set(error_message);
        active.records_processed = Set(records_processed);
        active.update(db).await?;
    }

    Ok(())
}

/// Manually trigger a job by name (used by the admin API)
pub async fn trigger_job_manually(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<(), PassError> {
    info!("Manually triggering job: {}", job_name);

    if !matches!(
        job_name,
        "prune_orphaned_registrations" | "prune_job_history"
    ) {
        return Err(PassError::NotFound(format!("Unknown job name: {}", job_name)));
    }

    let execution_id = start_job_execution(db, job_name).await?;

    let result = match job_name {
        "prune_orphaned_registrations" => storage::prune_orphaned_registrations(db).await,
        _ => storage::prune_job_history(db, JOB_HISTORY_RETENTION_SECS).await,
    };

    match result {
        Ok(count) => {
            info!(
                "Manually triggered job {} completed: {} records",
                job_name, count
            );
            complete_job_execution(db, execution_id, true, None, Some(count as i64)).await?;
        }
        Err(e) => {
            error!("Manually triggered job {} failed: {}", job_name, e);
            complete_job_execution(db, execution_id, false, Some(e.to_string()), None).await?;
        }
    }

    Ok(())
}
