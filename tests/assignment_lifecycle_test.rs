//! Lifecycle scenarios against an in-memory SQLite store.

mod common;

use assert_matches::assert_matches;
use common::{new_assignment, TestApp};
use devicedesk_api::{
    entities::{
        assignment::{AssignmentStatus, ReturnStatus, ShippingStatus},
        DeviceStatus,
    },
    errors::ServiceError,
    events::Event,
    lifecycle::{check_invariants, ClosureRecord, NewAssignment},
};
use rstest::rstest;
use uuid::Uuid;

const DEVICE_IMEI: &str = "356938035643809";
const OLD_IMEI: &str = "490154203237518";

fn with_voucher(mut input: NewAssignment) -> NewAssignment {
    input.shipping_voucher_id = Some("ACS-7788123".to_string());
    input
}

fn expecting_return(mut input: NewAssignment, imei: &str) -> NewAssignment {
    input.expects_return = true;
    input.return_device_imei = Some(imei.to_string());
    input
}

#[tokio::test]
async fn scenario_a_ship_deliver_close_releases_device() {
    let app = TestApp::new().await;
    let device = app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let mirror = app.seed_mirror(DEVICE_IMEI).await;
    let svc = &app.state.assignments;

    let created = svc
        .create_assignment(with_voucher(new_assignment(DEVICE_IMEI)))
        .await
        .unwrap();
    assert_eq!(created.shipping_status, Some(ShippingStatus::Pending));

    let assigned = app.device(device.id).await;
    assert_eq!(assigned.status, DeviceStatus::Assigned);
    assert_eq!(assigned.assigned_to.as_deref(), Some("Eleni Markou"));
    assert_eq!(assigned.ticket.as_deref(), Some("HD-1024"));
    assert_eq!(
        app.mirror(mirror.id).await.assigned_user.as_deref(),
        Some("Eleni Markou")
    );

    let shipped = svc.start_shipping(created.id).await.unwrap();
    assert_eq!(shipped.shipping_status, Some(ShippingStatus::Shipped));
    assert!(shipped.shipped_at.is_some());

    let delivered = svc
        .update_shipping(
            created.id,
            ShippingStatus::Delivered,
            Some("Left with reception".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(delivered.shipping_status, Some(ShippingStatus::Delivered));
    assert_eq!(delivered.shipped_at, shipped.shipped_at);
    assert!(delivered.delivered_at.is_some());
    assert_eq!(delivered.return_status, None);

    let outcome = svc
        .close(created.id, Some("Handover complete".to_string()), Some(DeviceStatus::Used))
        .await
        .unwrap();
    assert_eq!(outcome.device_id, device.id);
    assert_eq!(outcome.imei, DEVICE_IMEI);
    assert_eq!(outcome.resulting_device_status, DeviceStatus::Used);

    let released = app.device(device.id).await;
    assert_eq!(released.status, DeviceStatus::Used);
    assert_eq!(released.assigned_to, None);
    assert_eq!(released.ticket, None);
    assert_eq!(app.mirror(mirror.id).await.assigned_user, None);

    let closed = svc.get_assignment(created.id).await.unwrap();
    assert_eq!(closed.status, AssignmentStatus::Completed);
    assert_eq!(closed.closed_at, Some(outcome.closed_at));
    assert_eq!(closed.closure_reason.as_deref(), Some("Handover complete"));
    let record = ClosureRecord::from_json(closed.closure_metadata.as_ref().unwrap()).unwrap();
    assert_eq!(record.resulting_status(), DeviceStatus::Used);
    assert_eq!(record.reason(), Some("Handover complete"));
    assert!(check_invariants(&closed).is_empty());
}

#[tokio::test]
async fn scenario_b_delivery_initialises_pending_return() {
    let app = TestApp::new().await;
    app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = &app.state.assignments;

    let created = svc
        .create_assignment(expecting_return(
            with_voucher(new_assignment(DEVICE_IMEI)),
            OLD_IMEI,
        ))
        .await
        .unwrap();
    assert_eq!(created.return_status, None);

    svc.start_shipping(created.id).await.unwrap();
    let delivered = svc.mark_delivered(created.id).await.unwrap();

    assert_eq!(delivered.shipping_status, Some(ShippingStatus::Delivered));
    assert_eq!(delivered.return_status, Some(ReturnStatus::Pending));
    assert!(check_invariants(&delivered).is_empty());
}

#[tokio::test]
async fn scenario_c_missing_returned_device_is_a_warning() {
    let app = TestApp::new().await;
    let device = app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = &app.state.assignments;

    let created = svc
        .create_assignment(expecting_return(new_assignment(DEVICE_IMEI), OLD_IMEI))
        .await
        .unwrap();

    let outcome = svc
        .register_return(created.id, true, Some("Box arrived".to_string()))
        .await
        .unwrap();

    assert_eq!(outcome.assignment.return_status, Some(ReturnStatus::Received));
    assert!(outcome.assignment.return_received_at.is_some());
    assert_eq!(outcome.returned_device_id, None);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains(OLD_IMEI));

    // Only the assignment's own device exists and it is untouched.
    assert_eq!(app.device(device.id).await.status, DeviceStatus::Assigned);
}

#[tokio::test]
async fn scenario_d_closing_twice_is_invalid_and_changes_nothing() {
    let app = TestApp::new().await;
    let device = app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = &app.state.assignments;

    let created = svc
        .create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap();
    svc.close(created.id, None, Some(DeviceStatus::Repaired))
        .await
        .unwrap();
    let before = svc.get_assignment(created.id).await.unwrap();

    let err = svc
        .close(created.id, Some("again".to_string()), Some(DeviceStatus::Lost))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidState(_));

    assert_eq!(svc.get_assignment(created.id).await.unwrap(), before);
    assert_eq!(app.device(device.id).await.status, DeviceStatus::Repaired);
}

#[tokio::test]
async fn received_return_releases_the_returned_device() {
    let app = TestApp::new().await;
    app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let old = app.seed_device_raw(OLD_IMEI, DeviceStatus::Assigned).await;
    let old_mirror = app.seed_mirror(OLD_IMEI).await;
    let svc = &app.state.assignments;

    let created = svc
        .create_assignment(expecting_return(new_assignment(DEVICE_IMEI), OLD_IMEI))
        .await
        .unwrap();

    let outcome = svc.register_return(created.id, true, None).await.unwrap();
    assert_eq!(outcome.returned_device_id, Some(old.id));
    assert!(outcome.warnings.is_empty());

    let returned = app.device(old.id).await;
    assert_eq!(returned.status, DeviceStatus::Used);
    assert_eq!(returned.assigned_to, None);
    assert_eq!(app.mirror(old_mirror.id).await.assigned_user, None);

    let err = svc.register_return(created.id, true, None).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidState(_));
}

#[tokio::test]
async fn not_received_return_stays_pending_and_can_be_received_later() {
    let app = TestApp::new().await;
    app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = &app.state.assignments;

    let created = svc
        .create_assignment(expecting_return(new_assignment(DEVICE_IMEI), OLD_IMEI))
        .await
        .unwrap();

    let pending = svc
        .register_return(created.id, false, Some("Courier missed pickup".to_string()))
        .await
        .unwrap();
    assert_eq!(pending.assignment.return_status, Some(ReturnStatus::Pending));
    assert_eq!(pending.assignment.return_received_at, None);
    assert!(pending.warnings.is_empty());

    let received = svc.register_return(created.id, true, None).await.unwrap();
    assert_eq!(received.assignment.return_status, Some(ReturnStatus::Received));
    assert_eq!(
        received.assignment.return_notes.as_deref(),
        Some("Courier missed pickup")
    );
}

#[tokio::test]
async fn return_on_assignment_without_expected_return_is_rejected() {
    let app = TestApp::new().await;
    app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = &app.state.assignments;

    let created = svc
        .create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap();

    let err = svc.register_return(created.id, true, None).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidState(_));
    let row = svc.get_assignment(created.id).await.unwrap();
    assert_eq!(row.return_status, None);
}

#[tokio::test]
async fn mark_delivered_twice_fails_and_keeps_timestamps() {
    let app = TestApp::new().await;
    app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = &app.state.assignments;

    let created = svc
        .create_assignment(with_voucher(new_assignment(DEVICE_IMEI)))
        .await
        .unwrap();
    svc.start_shipping(created.id).await.unwrap();
    let delivered = svc.mark_delivered(created.id).await.unwrap();

    let err = svc.mark_delivered(created.id).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidState(_));

    let again = svc
        .update_shipping(created.id, ShippingStatus::Delivered, None)
        .await
        .unwrap();
    assert_eq!(again.shipped_at, delivered.shipped_at);
    assert_eq!(again.delivered_at, delivered.delivered_at);
}

#[tokio::test]
async fn shipping_without_voucher_is_missing_voucher() {
    let app = TestApp::new().await;
    app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = &app.state.assignments;

    let created = svc
        .create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap();
    assert_eq!(created.shipping_status, None);

    assert_matches!(
        svc.start_shipping(created.id).await,
        Err(ServiceError::MissingVoucher(id)) if id == created.id
    );
    assert_matches!(
        svc.update_shipping(created.id, ShippingStatus::Shipped, None).await,
        Err(ServiceError::MissingVoucher(_))
    );
    let row = svc.get_assignment(created.id).await.unwrap();
    assert_eq!(row.shipping_status, None);
}

#[tokio::test]
async fn operations_on_unknown_assignment_are_not_found() {
    let app = TestApp::new().await;
    let svc = &app.state.assignments;
    let missing = Uuid::new_v4();

    assert_matches!(svc.start_shipping(missing).await, Err(ServiceError::NotFound(_)));
    assert_matches!(svc.mark_delivered(missing).await, Err(ServiceError::NotFound(_)));
    assert_matches!(
        svc.register_return(missing, true, None).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(svc.close(missing, None, None).await, Err(ServiceError::NotFound(_)));
}

#[rstest]
#[case(DeviceStatus::New)]
#[case(DeviceStatus::Assigned)]
#[tokio::test]
async fn close_rejects_non_outcome_statuses_before_touching_the_store(
    #[case] requested: DeviceStatus,
) {
    let app = TestApp::new().await;
    app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = &app.state.assignments;
    let created = svc
        .create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap();

    let err = svc.close(created.id, None, Some(requested)).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert!(svc.get_assignment(created.id).await.unwrap().is_active());
}

#[tokio::test]
async fn close_defaults_to_used() {
    let app = TestApp::new().await;
    let device = app.seed_device(DEVICE_IMEI, DeviceStatus::Repaired).await;
    let svc = &app.state.assignments;
    let created = svc
        .create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap();

    let outcome = svc.close(created.id, None, None).await.unwrap();
    assert_eq!(outcome.resulting_device_status, DeviceStatus::Used);
    assert_eq!(app.device(device.id).await.status, DeviceStatus::Used);
}

#[tokio::test]
async fn second_active_assignment_for_a_device_conflicts() {
    let app = TestApp::new().await;
    app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = &app.state.assignments;

    let first = svc
        .create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap();

    // The device is ASSIGNED now, so plain creation is refused on status.
    let err = svc
        .create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidState(_));

    // After closing, the device can be handed out again.
    svc.close(first.id, None, None).await.unwrap();
    let second = svc
        .create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap();
    assert!(second.is_active());
}

#[tokio::test]
async fn active_assignment_check_wins_over_stale_device_status() {
    let app = TestApp::new().await;
    let device = app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = &app.state.assignments;

    svc.create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap();

    // Registry drifted back to an assignable status while the assignment is open.
    devicedesk_api::services::devices::DeviceRegistry::update_status(
        &*app.state.db,
        device.id,
        DeviceStatus::Used,
        None,
        None,
    )
    .await
    .unwrap();

    let err = svc
        .create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[rstest]
#[case(DeviceStatus::Lost)]
#[case(DeviceStatus::NotRepaired)]
#[tokio::test]
async fn unassignable_devices_are_refused(#[case] status: DeviceStatus) {
    let app = TestApp::new().await;
    let device = app.seed_device_raw(DEVICE_IMEI, status).await;

    let err = app
        .state
        .assignments
        .create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidState(_));
    assert_eq!(app.device(device.id).await.status, status);
}

#[tokio::test]
async fn creation_validates_before_store_access() {
    let app = TestApp::new().await;
    let svc = &app.state.assignments;

    let mut no_return_imei = new_assignment(DEVICE_IMEI);
    no_return_imei.expects_return = true;
    assert_matches!(
        svc.create_assignment(no_return_imei).await,
        Err(ServiceError::ValidationError(_))
    );

    let same_imei = expecting_return(new_assignment(DEVICE_IMEI), DEVICE_IMEI);
    assert_matches!(
        svc.create_assignment(same_imei).await,
        Err(ServiceError::ValidationError(_))
    );

    // No device is seeded: a lookup would have produced NotFound.
    let mut blank_name = new_assignment(DEVICE_IMEI);
    blank_name.assignee_name = "   ".to_string();
    assert_matches!(
        svc.create_assignment(blank_name).await,
        Err(ServiceError::ValidationError(_))
    );

    assert_matches!(
        svc.create_assignment(new_assignment(DEVICE_IMEI)).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn concurrent_closes_let_exactly_one_win() {
    let app = TestApp::new().await;
    app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = app.state.assignments.clone();
    let created = svc
        .create_assignment(new_assignment(DEVICE_IMEI))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        svc.close(created.id, Some("agent a".to_string()), Some(DeviceStatus::Used)),
        svc.close(created.id, Some("agent b".to_string()), Some(DeviceStatus::Lost)),
    );

    let results = [a, b];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_matches!(loser, ServiceError::InvalidState(_));

    let closed = svc.get_assignment(created.id).await.unwrap();
    let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
    let record = ClosureRecord::from_json(closed.closure_metadata.as_ref().unwrap()).unwrap();
    assert_eq!(record.resulting_status(), winner.resulting_device_status);
}

#[tokio::test]
async fn committed_transitions_publish_events() {
    let app = TestApp::new().await;
    let device = app.seed_device(DEVICE_IMEI, DeviceStatus::New).await;
    let svc = &app.state.assignments;

    let created = svc
        .create_assignment(with_voucher(new_assignment(DEVICE_IMEI)))
        .await
        .unwrap();
    svc.start_shipping(created.id).await.unwrap();
    svc.close(created.id, None, Some(DeviceStatus::Lost))
        .await
        .unwrap();

    let events = app.drain_events().await;
    let names: Vec<&str> = events.iter().map(Event::name).collect();
    assert_eq!(
        names,
        vec![
            "assignment_created",
            "device_status_changed",
            "shipping_started",
            "assignment_closed",
            "device_status_changed",
        ]
    );
    assert_matches!(
        events.last(),
        Some(Event::DeviceStatusChanged { device_id, old_status: DeviceStatus::Assigned, new_status: DeviceStatus::Lost })
            if *device_id == device.id
    );

    // Failed operations publish nothing.
    let _ = svc.close(created.id, None, None).await;
    assert!(app.drain_events().await.is_empty());
}
