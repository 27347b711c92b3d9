// Tests for the update notification protocol:
//
// 1. Freshness markers strictly increase under repeated touches
// 2. A poll after a touch reports the changed serial, a re-poll converges
// 3. The wake-up fan-out is best-effort and skips unregistered devices
// 4. A permanently invalid push address removes its registration

mod helpers;

use helpers::{seed_pass, seed_registration, RecordingPush, TestDb};
use passrelay::errors::PassError;
use passrelay::{notifier, storage};

/// Two touches in immediate succession must still yield strictly
/// increasing markers, even when they land in the same millisecond.
#[tokio::test]
async fn test_touch_yields_strictly_increasing_markers() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let pass = seed_pass(&db, "coupon.example", "S1", "tok1").await;

    let first = storage::touch_pass(&db, "S1")
        .await
        .expect("First touch failed");
    let second = storage::touch_pass(&db, "S1")
        .await
        .expect("Second touch failed");

    assert!(
        first > pass.updated_at,
        "First touch should advance the marker"
    );
    assert!(second > first, "Second touch should advance the marker again");
}

#[tokio::test]
async fn test_touch_unknown_serial_is_not_found() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let result = storage::touch_pass(&db, "missing").await;
    assert!(
        matches!(result, Err(PassError::NotFound(_))),
        "Touching an unknown serial should be NotFound"
    );
}

/// End-to-end poll scenario: create a pass, register a device, bump the
/// marker, poll with the pre-touch marker, then poll again with the new one.
#[tokio::test]
async fn test_poll_reports_changed_serial_then_converges() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let pass = seed_pass(&db, "coupon.example", "S1", "tok1").await;
    seed_registration(&db, "D1", "coupon.example", "S1", "addr1").await;

    let pre_touch_marker = pass.updated_at;
    let new_marker = storage::touch_pass(&db, "S1").await.expect("Touch failed");

    // Poll with the marker the device last saw
    let changed = notifier::changed_passes(&db, "D1", "coupon.example", pre_touch_marker)
        .await
        .expect("Poll failed");
    assert_eq!(changed.len(), 1, "S1 should be reported as changed");
    assert_eq!(changed[0].serial, "S1");
    assert_eq!(changed[0].updated_at, new_marker);

    // Poll again with the marker just handed out - nothing changed since
    let unchanged = notifier::changed_passes(&db, "D1", "coupon.example", new_marker)
        .await
        .expect("Second poll failed");
    assert!(
        unchanged.is_empty(),
        "Nothing should be reported after the device caught up"
    );
}

/// A device that never polled (marker 0) sees every registered pass.
#[tokio::test]
async fn test_poll_without_marker_reports_all_registered() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    seed_pass(&db, "coupon.example", "S1", "tok1").await;
    seed_pass(&db, "coupon.example", "S2", "tok2").await;
    seed_registration(&db, "D1", "coupon.example", "S1", "addr1").await;
    seed_registration(&db, "D1", "coupon.example", "S2", "addr1").await;

    let changed = notifier::changed_passes(&db, "D1", "coupon.example", 0)
        .await
        .expect("Poll failed");

    let mut serials: Vec<String> = changed.into_iter().map(|p| p.serial).collect();
    serials.sort();
    assert_eq!(serials, vec!["S1".to_string(), "S2".to_string()]);
}

/// Registrations under a different pass type are not part of the poll.
#[tokio::test]
async fn test_poll_is_scoped_to_pass_type() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    seed_pass(&db, "coupon.example", "S1", "tok1").await;
    seed_pass(&db, "ticket.example", "T1", "tok2").await;
    seed_registration(&db, "D1", "coupon.example", "S1", "addr1").await;
    seed_registration(&db, "D1", "ticket.example", "T1", "addr1").await;

    let changed = notifier::changed_passes(&db, "D1", "coupon.example", 0)
        .await
        .expect("Poll failed");

    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].serial, "S1");
}

#[tokio::test]
async fn test_notify_all_delivers_one_wakeup_per_registration() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    seed_pass(&db, "coupon.example", "S1", "tok1").await;
    seed_registration(&db, "D1", "coupon.example", "S1", "addr1").await;
    seed_registration(&db, "D2", "coupon.example", "S1", "addr2").await;

    let push = RecordingPush::new();
    let summary = notifier::notify_all(&db, &push, "S1")
        .await
        .expect("Fan-out failed");

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.purged, 0);
    assert_eq!(summary.failed, 0);

    let mut deliveries = push.deliveries();
    deliveries.sort();
    assert_eq!(
        deliveries,
        vec![
            ("addr1".to_string(), "coupon.example".to_string()),
            ("addr2".to_string(), "coupon.example".to_string()),
        ],
        "The wake-up topic should be the pass type"
    );
}

/// Register then unregister: the fan-out must make zero delivery attempts.
#[tokio::test]
async fn test_notify_all_after_unregister_makes_no_attempts() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    seed_pass(&db, "coupon.example", "S1", "tok1").await;
    seed_registration(&db, "D1", "coupon.example", "S1", "addr1").await;

    storage::unregister_device(&db, "D1", "S1")
        .await
        .expect("Unregister failed");

    let push = RecordingPush::new();
    let summary = notifier::notify_all(&db, &push, "S1")
        .await
        .expect("Fan-out failed");

    assert_eq!(summary.attempted, 0);
    assert!(push.deliveries().is_empty(), "No wake-ups should be sent");
}

/// A gateway-reported permanently invalid address removes that registration
/// and leaves the others untouched.
#[tokio::test]
async fn test_gone_address_purges_its_registration() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    seed_pass(&db, "coupon.example", "S1", "tok1").await;
    seed_registration(&db, "D1", "coupon.example", "S1", "addr1").await;
    seed_registration(&db, "D2", "coupon.example", "S1", "addr2").await;

    let push = RecordingPush::with_gone_tokens(&["addr1"]);
    let summary = notifier::notify_all(&db, &push, "S1")
        .await
        .expect("Fan-out failed");

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.purged, 1);

    let purged = storage::get_registration(&db, "D1", "S1")
        .await
        .expect("Lookup failed");
    assert!(purged.is_none(), "D1's registration should be removed");

    let kept = storage::get_registration(&db, "D2", "S1")
        .await
        .expect("Lookup failed");
    assert!(kept.is_some(), "D2's registration should survive");
}

#[tokio::test]
async fn test_notify_all_unknown_serial_is_not_found() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let push = RecordingPush::new();
    let result = notifier::notify_all(&db, &push, "missing").await;

    assert!(matches!(result, Err(PassError::NotFound(_))));
    assert!(push.deliveries().is_empty());
}
