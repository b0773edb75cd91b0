//! Status transitions end to end: the legal walk, rejections, cancel
//! promotion and the customer-facing cancel, ready, reschedule and rating
//! operations.

mod common;

use common::*;
use salonflow::error::BookingError;
use salonflow::models::CustomerRef;
use salonflow::notify::EventKind;
use salonflow::status::AppointmentStatus;
use salonflow::store;

async fn booked(app: &TestApp) -> String {
    let ana = actor(app, "ST1").await;
    let aggregate = app
        .booking
        .create_appointment(
            &ana,
            create_request(vec![detail("SVC1", &["ST1"], None, "2026-09-01T10:00:00Z")]),
        )
        .await
        .unwrap();
    aggregate.appointment.id
}

#[tokio::test]
async fn the_legal_walk_carries_details_along() {
    let app = setup().await;
    let ana = actor(&app, "ST1").await;
    let id = booked(&app).await;

    for status in [
        AppointmentStatus::Confirmed,
        AppointmentStatus::Arrived,
        AppointmentStatus::InService,
        AppointmentStatus::Completed,
    ] {
        let aggregate = app
            .booking
            .update_status(&ana, &id, status, None)
            .await
            .unwrap();
        assert_eq!(aggregate.appointment.status, status);
        assert_eq!(aggregate.details[0].detail.status, status);
    }
}

#[tokio::test]
async fn jumping_straight_to_completed_is_rejected() {
    let app = setup().await;
    let ana = actor(&app, "ST1").await;
    let id = booked(&app).await;

    let err = app
        .booking
        .update_status(&ana, &id, AppointmentStatus::Completed, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BookingError::InvalidTransition {
            from: AppointmentStatus::New,
            to: AppointmentStatus::Completed,
        }
    ));
    let row = store::fetch_appointment(&app.pool, &id).await.unwrap();
    assert_eq!(row.status, AppointmentStatus::New);
    let details = store::fetch_details(&app.pool, &id).await.unwrap();
    assert_eq!(details[0].status, AppointmentStatus::New);
}

#[tokio::test]
async fn cancelling_requires_a_reason() {
    let app = setup().await;
    let ana = actor(&app, "ST1").await;
    let id = booked(&app).await;

    for reason in [None, Some("   ".to_string())] {
        let err = app
            .booking
            .update_status(&ana, &id, AppointmentStatus::Cancel, reason)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }
    let row = store::fetch_appointment(&app.pool, &id).await.unwrap();
    assert_eq!(row.status, AppointmentStatus::New);
}

#[tokio::test]
async fn cancelling_the_primary_promotes_the_first_live_sibling() {
    let app = setup().await;
    let ana = actor(&app, "ST1").await;
    let (_, primary, secondary) = seeded_group(&app).await;

    app.booking
        .update_status(
            &ana,
            &primary,
            AppointmentStatus::Cancel,
            Some("customer emergency".to_string()),
        )
        .await
        .unwrap();

    let cancelled = store::fetch_appointment(&app.pool, &primary).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancel);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("customer emergency"));
    assert!(!cancelled.is_primary);
    let details = store::fetch_details(&app.pool, &primary).await.unwrap();
    assert_eq!(details[0].status, AppointmentStatus::Cancel);

    let promoted = store::fetch_appointment(&app.pool, &secondary).await.unwrap();
    assert!(promoted.is_primary);
    assert_eq!(promoted.status, AppointmentStatus::New);
}

#[tokio::test]
async fn cancelling_the_last_member_leaves_no_primary() {
    let app = setup().await;
    let ana = actor(&app, "ST1").await;
    let (group_id, primary, secondary) = seeded_group(&app).await;

    app.booking
        .update_status(
            &ana,
            &primary,
            AppointmentStatus::Cancel,
            Some("customer emergency".to_string()),
        )
        .await
        .unwrap();
    app.booking
        .update_status(
            &ana,
            &secondary,
            AppointmentStatus::Cancel,
            Some("no longer needed".to_string()),
        )
        .await
        .unwrap();

    let sql = format!(
        "SELECT COUNT(*) FROM appointments
         WHERE appointment_group_id = '{group_id}' AND is_primary = 1 AND deleted_at IS NULL"
    );
    assert_eq!(count(&app.pool, &sql).await, 0);
}

#[tokio::test]
async fn terminal_statuses_accept_no_further_moves() {
    let app = setup().await;
    let ana = actor(&app, "ST1").await;

    let cancelled = booked(&app).await;
    app.booking
        .update_status(
            &ana,
            &cancelled,
            AppointmentStatus::Cancel,
            Some("double booked".to_string()),
        )
        .await
        .unwrap();
    let err = app
        .booking
        .update_status(&ana, &cancelled, AppointmentStatus::Confirmed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));

    let absent = booked(&app).await;
    app.booking
        .update_status(&ana, &absent, AppointmentStatus::NoShow, None)
        .await
        .unwrap();
    let err = app
        .booking
        .update_status(&ana, &absent, AppointmentStatus::Arrived, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));
}

#[tokio::test]
async fn customer_cancel_scopes_to_ownership() {
    let app = setup().await;
    let id = booked(&app).await;

    let err = app
        .booking
        .cancel(
            &CustomerRef::Marketplace("M1".to_string()),
            &id,
            "not mine anyway",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::NotFound { .. }));

    let owner = CustomerRef::Registered("C1".to_string());
    let err = app.booking.cancel(&owner, &id, "  ").await.unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    let aggregate = app
        .booking
        .cancel(&owner, &id, "running late, sorry")
        .await
        .unwrap();
    assert_eq!(aggregate.appointment.status, AppointmentStatus::Cancel);
    assert_eq!(
        aggregate.appointment.cancel_reason.as_deref(),
        Some("running late, sorry")
    );
}

#[tokio::test]
async fn ready_marks_arrival_exactly_once() {
    let app = setup().await;
    let ana = actor(&app, "ST1").await;
    let owner = CustomerRef::Registered("C1".to_string());

    let walk_in = booked(&app).await;
    let aggregate = app.booking.set_ready(&owner, &walk_in).await.unwrap();
    assert_eq!(aggregate.appointment.status, AppointmentStatus::Arrived);
    let err = app.booking.set_ready(&owner, &walk_in).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));

    let confirmed = booked(&app).await;
    app.booking
        .update_status(&ana, &confirmed, AppointmentStatus::Confirmed, None)
        .await
        .unwrap();
    let aggregate = app.booking.set_ready(&owner, &confirmed).await.unwrap();
    assert_eq!(aggregate.appointment.status, AppointmentStatus::Arrived);
}

#[tokio::test]
async fn reschedule_shifts_every_detail_and_reopens_the_booking() {
    let app = setup().await;
    let ana = actor(&app, "ST1").await;
    let owner = CustomerRef::Registered("C1".to_string());

    let aggregate = app
        .booking
        .create_appointment(
            &ana,
            create_request(vec![
                detail("SVC1", &["ST1"], None, "2026-09-01T10:00:00Z"),
                detail("SVC2", &["ST2"], None, "2026-09-01T11:00:00Z"),
            ]),
        )
        .await
        .unwrap();
    let id = aggregate.appointment.id.clone();
    app.booking
        .update_status(&ana, &id, AppointmentStatus::Confirmed, None)
        .await
        .unwrap();

    let mut events = app.events.subscribe();
    let moved = app
        .booking
        .reschedule(&owner, &id, at("2026-09-02T14:00:00Z"))
        .await
        .unwrap();

    assert_eq!(moved.appointment.status, AppointmentStatus::New);
    assert_eq!(moved.appointment.date, "2026-09-02");
    assert_eq!(moved.details[0].detail.start_time, at("2026-09-02T14:00:00Z"));
    assert_eq!(moved.details[1].detail.start_time, at("2026-09-02T15:00:00Z"));
    assert!(moved
        .details
        .iter()
        .all(|entry| entry.detail.status == AppointmentStatus::New));

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, EventKind::Edited);
}

#[tokio::test]
async fn reschedule_from_new_stays_new() {
    let app = setup().await;
    let owner = CustomerRef::Registered("C1".to_string());
    let id = booked(&app).await;

    let moved = app
        .booking
        .reschedule(&owner, &id, at("2026-09-01T16:30:00Z"))
        .await
        .unwrap();
    assert_eq!(moved.appointment.status, AppointmentStatus::New);
    assert_eq!(moved.details[0].detail.start_time, at("2026-09-01T16:30:00Z"));
}

#[tokio::test]
async fn reschedule_refuses_once_service_started() {
    let app = setup().await;
    let ana = actor(&app, "ST1").await;
    let owner = CustomerRef::Registered("C1".to_string());
    let id = booked(&app).await;

    for status in [
        AppointmentStatus::Confirmed,
        AppointmentStatus::Arrived,
        AppointmentStatus::InService,
    ] {
        app.booking.update_status(&ana, &id, status, None).await.unwrap();
    }

    let err = app
        .booking
        .reschedule(&owner, &id, at("2026-09-02T14:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BookingError::StatusForbids {
            status: AppointmentStatus::InService,
            action: "rescheduled",
        }
    ));
}

#[tokio::test]
async fn rating_gates_on_completion_and_range() {
    let app = setup().await;
    let ana = actor(&app, "ST1").await;
    let owner = CustomerRef::Registered("C1".to_string());
    let id = booked(&app).await;

    let err = app.booking.rate(&owner, &id, 5, None).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::StatusForbids { action: "rated", .. }
    ));

    for status in [
        AppointmentStatus::Confirmed,
        AppointmentStatus::Arrived,
        AppointmentStatus::InService,
        AppointmentStatus::Completed,
    ] {
        app.booking.update_status(&ana, &id, status, None).await.unwrap();
    }

    for out_of_range in [0, 6] {
        let err = app
            .booking
            .rate(&owner, &id, out_of_range, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    let rated = app
        .booking
        .rate(&owner, &id, 5, Some("great cut".to_string()))
        .await
        .unwrap();
    assert_eq!(rated.appointment.number_rating, Some(5));
    assert_eq!(rated.appointment.content_review.as_deref(), Some("great cut"));
}

#[tokio::test]
async fn status_changes_emit_edited_snapshots() {
    let app = setup().await;
    let ana = actor(&app, "ST1").await;
    let id = booked(&app).await;

    let mut events = app.events.subscribe();
    app.booking
        .update_status(&ana, &id, AppointmentStatus::Confirmed, None)
        .await
        .unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, EventKind::Edited);
    assert_eq!(
        event.details[0].appointment_status,
        AppointmentStatus::Confirmed
    );
    assert_eq!(event.details[0].status, AppointmentStatus::Confirmed);
}
