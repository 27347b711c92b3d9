use crate::entities;
use crate::errors::PassError;
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::Utc;
use rand::RngCore;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pass {
    pub serial: String,
    pub pass_type: String,
    pub auth_token: String,
    /// Freshness marker: milliseconds since epoch, strictly increasing per pass.
    pub updated_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub device_id: String,
    pub pass_serial: String,
    pub pass_type: String,
    pub push_token: String,
    pub created_at: i64,
    pub updated_at: i64,
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, PassError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

/// Create a pass. Fails with Conflict when the serial is already taken.
/// The authentication token is generated when the caller does not supply one.
pub async fn create_pass(
    db: &DatabaseConnection,
    pass_type: &str,
    serial: &str,
    auth_token: Option<&str>,
) -> Result<Pass, PassError> {
    use entities::pass::{Column, Entity};

    if Entity::find()
        .filter(Column::Serial.eq(serial))
        .one(db)
        .await?
        .is_some()
    {
        return Err(PassError::Conflict(format!(
            "pass serial already exists: {}",
            serial
        )));
    }

    let auth_token = match auth_token {
        Some(t) => t.to_string(),
        None => random_id(),
    };
    let now = Utc::now().timestamp_millis();

    let pass = entities::pass::ActiveModel {
        serial: Set(serial.to_string()),
        pass_type: Set(pass_type.to_string()),
        auth_token: Set(auth_token.clone()),
        updated_at: Set(now),
        created_at: Set(now),
    };

    pass.insert(db).await?;

    Ok(Pass {
        serial: serial.to_string(),
        pass_type: pass_type.to_string(),
        auth_token,
        updated_at: now,
        created_at: now,
    })
}

pub async fn get_pass(
    db: &DatabaseConnection,
    serial: &str,
) -> Result<Option<Pass>, PassError> {
    use entities::pass::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::Serial.eq(serial))
        .one(db)
        .await?
    {
        Ok(Some(Pass {
            serial: model.serial,
            pass_type: model.pass_type,
            auth_token: model.auth_token,
            updated_at: model.updated_at,
            created_at: model.created_at,
        }))
    } else {
        Ok(None)
    }
}

/// Bump the freshness marker and return its new value.
///
/// The new marker is max(now, old + 1), inside a single-row transaction, so
/// repeated calls within the same millisecond still yield strictly
/// increasing values.
pub async fn touch_pass(db: &DatabaseConnection, serial: &str) -> Result<i64, PassError> {
    use entities::pass::{Column, Entity};

    let txn = db.begin().await?;

    let model = Entity::find()
        .filter(Column::Serial.eq(serial))
        .one(&txn)
        .await?
        .ok_or_else(|| PassError::NotFound(format!("unknown pass serial: {}", serial)))?;

    let now = Utc::now().timestamp_millis();
    let new_marker = std::cmp::max(now, model.updated_at + 1);

    let mut active: entities::pass::ActiveModel = model.into();
    active.updated_at = Set(new_marker);
    active.update(&txn).await?;

    txn.commit().await?;

    Ok(new_marker)
}

/// Check the shared secret presented by a device against the stored pass.
/// Returns false on an unknown serial or a pass-type mismatch; nothing is
/// leaked about which check failed.
pub async fn verify_pass_secret(
    db: &DatabaseConnection,
    pass_type: &str,
    serial: &str,
    presented: &str,
) -> Result<bool, PassError> {
    match get_pass(db, serial).await? {
        Some(pass) => Ok(pass.pass_type == pass_type && pass.auth_token == presented),
        None => Ok(false),
    }
}

// Device directory functions

/// Register a device's interest in a pass. Idempotent upsert keyed by the
/// (device_id, pass_serial) pair; re-registration replaces the push token.
/// Returns true when a new registration was created.
pub async fn register_device(
    db: &DatabaseConnection,
    device_id: &str,
    pass_type: &str,
    serial: &str,
    push_token: &str,
) -> Result<bool, PassError> {
    use entities::registration::{Column, Entity};
    use sea_orm::sea_query::OnConflict;

    let existing = Entity::find()
        .filter(Column::DeviceId.eq(device_id))
        .filter(Column::PassSerial.eq(serial))
        .one(db)
        .await?;

    let now = Utc::now().timestamp_millis();

    let registration = entities::registration::ActiveModel {
        device_id: Set(device_id.to_string()),
        pass_serial: Set(serial.to_string()),
        pass_type: Set(pass_type.to_string()),
        push_token: Set(push_token.to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    };

    Entity::insert(registration)
        .on_conflict(
            OnConflict::columns([Column::DeviceId, Column::PassSerial])
                .update_columns([Column::PushToken, Column::UpdatedAt])
                .to_owned(),
        )
        .exec(db)
        .await?;

    Ok(existing.is_none())
}

/// Remove a registration. A missing pair is a silent no-op, not an error.
pub async fn unregister_device(
    db: &DatabaseConnection,
    device_id: &str,
    serial: &str,
) -> Result<(), PassError> {
    use entities::registration::{Column, Entity};

    Entity::delete_many()
        .filter(Column::DeviceId.eq(device_id))
        .filter(Column::PassSerial.eq(serial))
        .exec(db)
        .await?;

    Ok(())
}

pub async fn get_registration(
    db: &DatabaseConnection,
    device_id: &str,
    serial: &str,
) -> Result<Option<Registration>, PassError> {
    use entities::registration::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::DeviceId.eq(device_id))
        .filter(Column::PassSerial.eq(serial))
        .one(db)
        .await?
    {
        Ok(Some(Registration {
            device_id: model.device_id,
            pass_serial: model.pass_serial,
            pass_type: model.pass_type,
            push_token: model.push_token,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }))
    } else {
        Ok(None)
    }
}

/// Push tokens of every device registered for the serial. May be empty.
pub async fn list_push_tokens_for_serial(
    db: &DatabaseConnection,
    serial: &str,
) -> Result<Vec<(String, String)>, PassError> {
    use entities::registration::{Column, Entity};

    let rows = Entity::find()
        .filter(Column::PassSerial.eq(serial))
        .order_by_asc(Column::DeviceId)
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.device_id, r.push_token))
        .collect())
}

/// All registrations a device holds for a pass type.
pub async fn list_registrations_for_device(
    db: &DatabaseConnection,
    device_id: &str,
    pass_type: &str,
) -> Result<Vec<Registration>, PassError> {
    use entities::registration::{Column, Entity};

    let rows = Entity::find()
        .filter(Column::DeviceId.eq(device_id))
        .filter(Column::PassType.eq(pass_type))
        .order_by_asc(Column::PassSerial)
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .map(|model| Registration {
            device_id: model.device_id,
            pass_serial: model.pass_serial,
            pass_type: model.pass_type,
            push_token: model.push_token,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
        .collect())
}

/// Remove registrations whose pass row no longer exists.
pub async fn prune_orphaned_registrations(db: &DatabaseConnection) -> Result<u64, PassError> {
    use entities::registration::{Column, Entity};
    use sea_orm::sea_query::Query;

    let known_serials = Query::select()
        .column(entities::pass::Column::Serial)
        .from(entities::pass::Entity)
        .to_owned();

    let result = Entity::delete_many()
        .filter(Column::PassSerial.not_in_subquery(known_serials))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

/// Delete job execution records older than the cutoff.
pub async fn prune_job_history(
    db: &DatabaseConnection,
    older_than_secs: i64,
) -> Result<u64, PassError> {
    use entities::job_execution::{Column, Entity};

    let cutoff = Utc::now().timestamp() - older_than_secs;
    let result = Entity::delete_many()
        .filter(Column::StartedAt.lt(cutoff))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}
