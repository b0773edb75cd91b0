#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use salonflow::booking::{
    BookingService, CreateAppointmentRequest, CreateGroupRequest, GroupMemberRequest,
    UpdateAppointmentRequest, UpdateGroupRequest,
};
use salonflow::models::{Actor, BookingSource};
use salonflow::notify::{BookingEvent, BroadcastNotifier};
use salonflow::validator::DetailInput;

/// Two locations, three staff members, two services sharing one chair.
/// ST1 offers both services, ST2 only the longer one, ST3 works at the
/// other location and offers nothing.
const SEED: &[&str] = &[
    "INSERT INTO locations (id, company_id, name) VALUES ('L1', 'CO1', 'Downtown')",
    "INSERT INTO locations (id, company_id, name) VALUES ('L2', 'CO1', 'Uptown')",
    "INSERT INTO staff (id, display_name) VALUES ('ST1', 'Ana')",
    "INSERT INTO staff (id, display_name) VALUES ('ST2', 'Ben')",
    "INSERT INTO staff (id, display_name) VALUES ('ST3', 'Cleo')",
    "INSERT INTO staff_locations (staff_id, location_id) VALUES ('ST1', 'L1')",
    "INSERT INTO staff_locations (staff_id, location_id) VALUES ('ST2', 'L1')",
    "INSERT INTO staff_locations (staff_id, location_id) VALUES ('ST3', 'L2')",
    "INSERT INTO services (id, location_id, name, duration_minutes) VALUES ('SVC1', 'L1', 'Cut', 30)",
    "INSERT INTO services (id, location_id, name, duration_minutes) VALUES ('SVC2', 'L1', 'Color', 45)",
    "INSERT INTO staff_services (staff_id, service_id) VALUES ('ST1', 'SVC1')",
    "INSERT INTO staff_services (staff_id, service_id) VALUES ('ST1', 'SVC2')",
    "INSERT INTO staff_services (staff_id, service_id) VALUES ('ST2', 'SVC2')",
    "INSERT INTO resources (id, location_id, name) VALUES ('R1', 'L1', 'Chair 1')",
    "INSERT INTO service_resources (service_id, resource_id) VALUES ('SVC1', 'R1')",
    "INSERT INTO service_resources (service_id, resource_id) VALUES ('SVC2', 'R1')",
    "INSERT INTO customers (id, display_name) VALUES ('C1', 'Dana')",
    "INSERT INTO marketplace_customers (id, display_name) VALUES ('M1', 'Eve')",
];

pub struct TestApp {
    pub pool: SqlitePool,
    pub booking: BookingService,
    pub events: broadcast::Sender<BookingEvent>,
}

pub async fn setup() -> TestApp {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    salonflow::db::run_migrations(&pool).await.unwrap();
    for statement in SEED {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }

    let (events, _) = broadcast::channel(32);
    let notifier = Arc::new(BroadcastNotifier::new(events.clone()));
    let booking = BookingService::new(pool.clone(), notifier);
    TestApp {
        pool,
        booking,
        events,
    }
}

pub async fn actor(app: &TestApp, staff_id: &str) -> Actor {
    Actor::load(&app.pool, staff_id).await.unwrap()
}

pub fn day(value: &str) -> NaiveDate {
    value.parse().unwrap()
}

pub fn at(value: &str) -> DateTime<Utc> {
    value.parse().unwrap()
}

pub fn detail(
    service_id: &str,
    staff_ids: &[&str],
    resource_id: Option<&str>,
    start_time: &str,
) -> DetailInput {
    DetailInput {
        service_id: service_id.to_string(),
        staff_ids: staff_ids.iter().map(|id| id.to_string()).collect(),
        resource_id: resource_id.map(str::to_string),
        start_time: at(start_time),
    }
}

/// A dashboard booking for customer C1 at the seeded location.
pub fn create_request(details: Vec<DetailInput>) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        location_id: "L1".to_string(),
        customer_id: Some("C1".to_string()),
        marketplace_customer_id: None,
        date: day("2026-09-01"),
        details,
        booking_source: BookingSource::Dashboard,
        appointment_group_id: None,
        related_appointment_id: None,
    }
}

pub fn member(is_primary: bool, details: Vec<DetailInput>) -> GroupMemberRequest {
    GroupMemberRequest {
        customer_id: None,
        marketplace_customer_id: None,
        is_primary,
        details,
    }
}

pub fn update_request() -> UpdateAppointmentRequest {
    UpdateAppointmentRequest {
        location_id: "L1".to_string(),
        date: None,
        customer_id: None,
        marketplace_customer_id: None,
        create_details: Vec::new(),
        update_details: Vec::new(),
        delete_detail_ids: Vec::new(),
        create_siblings: Vec::new(),
    }
}

pub fn group_update_request() -> UpdateGroupRequest {
    UpdateGroupRequest {
        location_id: "L1".to_string(),
        date: None,
        create_appointments: Vec::new(),
        update_appointments: Vec::new(),
        delete_appointment_ids: Vec::new(),
    }
}

pub async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(sql)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// A two-member group booked by ST1. Returns the group id plus the ids of
/// the primary and the secondary member.
pub async fn seeded_group(app: &TestApp) -> (String, String, String) {
    let ana = actor(app, "ST1").await;
    let aggregates = app
        .booking
        .create_appointment_group(
            &ana,
            CreateGroupRequest {
                location_id: "L1".to_string(),
                date: day("2026-09-01"),
                appointments: vec![
                    member(true, vec![detail("SVC1", &["ST1"], None, "2026-09-01T10:00:00Z")]),
                    member(false, vec![detail("SVC2", &["ST2"], None, "2026-09-01T10:00:00Z")]),
                ],
            },
        )
        .await
        .unwrap();
    let group_id = aggregates[0]
        .appointment
        .appointment_group_id
        .clone()
        .unwrap();
    let primary = aggregates
        .iter()
        .find(|a| a.appointment.is_primary)
        .unwrap()
        .appointment
        .id
        .clone();
    let secondary = aggregates
        .iter()
        .find(|a| !a.appointment.is_primary)
        .unwrap()
        .appointment
        .id
        .clone();
    (group_id, primary, secondary)
}
