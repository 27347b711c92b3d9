use crate::errors::PassError;
use crate::push::{PushOutcome, PushTransport};
use crate::storage;
use sea_orm::DatabaseConnection;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Changed,
    Unchanged,
}

/// Compare a registration's last-known marker against the pass's current one.
/// The comparison is strict: equal markers never report a change, so clock
/// coarseness cannot produce a missed update (the marker is bumped past the
/// old value on every touch).
pub fn decide(last_seen: i64, current: i64) -> UpdateStatus {
    if current > last_seen {
        UpdateStatus::Changed
    } else {
        UpdateStatus::Unchanged
    }
}

/// Passes registered to the device whose marker is strictly newer than
/// `since`.
pub async fn changed_passes(
    db: &DatabaseConnection,
    device_id: &str,
    pass_type: &str,
    since: i64,
) -> Result<Vec<storage::Pass>, PassError> {
    let registrations = storage::list_registrations_for_device(db, device_id, pass_type).await?;

    let mut changed = Vec::new();
    for registration in registrations {
        if let Some(pass) = storage::get_pass(db, &registration.pass_serial).await? {
            if decide(since, pass.updated_at) == UpdateStatus::Changed {
                changed.push(pass);
            }
        }
    }

    Ok(changed)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NotifySummary {
    pub attempted: usize,
    pub delivered: usize,
    pub purged: usize,
    pub failed: usize,
}

/// Send a content-empty wake-up to every device registered for the serial.
///
/// Best-effort, at-most-once per address: a failed delivery is logged and
/// the fan-out continues. There is no retry queue; the elevated marker makes
/// the next business event (or the device's own poll) converge. A
/// permanently invalid address removes its registration.
pub async fn notify_all(
    db: &DatabaseConnection,
    push: &dyn PushTransport,
    serial: &str,
) -> Result<NotifySummary, PassError> {
    let pass = storage::get_pass(db, serial)
        .await?
        .ok_or_else(|| PassError::NotFound(format!("unknown pass serial: {}", serial)))?;

    let targets = storage::list_push_tokens_for_serial(db, serial).await?;

    let mut summary = NotifySummary::default();
    for (device_id, push_token) in targets {
        summary.attempted += 1;
        match push.send_wakeup(&push_token, &pass.pass_type).await {
            Ok(PushOutcome::Delivered) => summary.delivered += 1,
            Ok(PushOutcome::AddressGone) => {
                warn!(%device_id, %serial, "Push address permanently invalid, removing registration");
                storage::unregister_device(db, &device_id, serial).await?;
                summary.purged += 1;
            }
            Err(e) => {
                warn!(%device_id, %serial, "Wake-up delivery failed: {}", e);
                summary.failed += 1;
            }
        }
    }

    info!(
        %serial,
        attempted = summary.attempted,
        delivered = summary.delivered,
        purged = summary.purged,
        failed = summary.failed,
        "Wake-up fan-out complete"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_newer_marker_is_changed() {
        assert_eq!(decide(100, 200), UpdateStatus::Changed);
        assert_eq!(decide(0, 1), UpdateStatus::Changed);
    }

    #[test]
    fn test_decide_equal_marker_is_unchanged() {
        assert_eq!(decide(100, 100), UpdateStatus::Unchanged);
        assert_eq!(decide(0, 0), UpdateStatus::Unchanged);
    }

    #[test]
    fn test_decide_older_marker_is_unchanged() {
        assert_eq!(decide(200, 100), UpdateStatus::Unchanged);
    }
}
