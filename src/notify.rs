use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::AppointmentAggregate;
use crate::status::AppointmentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// New committed bookings, e.g. for downstream calendar locking.
    Locked,
    /// Changes to existing bookings.
    Edited,
}

/// Flat post-commit view of one appointment detail, the unit downstream
/// consumers care about.
#[derive(Debug, Clone, Serialize)]
pub struct DetailSnapshot {
    pub appointment_id: String,
    pub appointment_code: String,
    pub appointment_status: AppointmentStatus,
    pub detail_id: String,
    pub location_id: String,
    pub service_id: String,
    pub service_name: String,
    pub resource_id: Option<String>,
    pub staff_ids: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: AppointmentStatus,
}

impl DetailSnapshot {
    pub fn collect(aggregate: &AppointmentAggregate) -> Vec<Self> {
        aggregate
            .details
            .iter()
            .map(|entry| Self {
                appointment_id: aggregate.appointment.id.clone(),
                appointment_code: aggregate.appointment.appointment_code.clone(),
                appointment_status: aggregate.appointment.status,
                detail_id: entry.detail.id.clone(),
                location_id: aggregate.appointment.location_id.clone(),
                service_id: entry.service.id.clone(),
                service_name: entry.service.name.clone(),
                resource_id: entry.detail.resource_id.clone(),
                staff_ids: entry.staff.iter().map(|member| member.id.clone()).collect(),
                start_time: entry.detail.start_time,
                duration_minutes: entry.detail.duration_minutes,
                status: entry.detail.status,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingEvent {
    pub kind: EventKind,
    pub details: Vec<DetailSnapshot>,
}

/// Post-commit notification contract. The engine hands over committed
/// snapshots and does not care whether delivery succeeds.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: EventKind, details: Vec<DetailSnapshot>);
}

pub struct BroadcastNotifier {
    sender: broadcast::Sender<BookingEvent>,
}

impl BroadcastNotifier {
    pub fn new(sender: broadcast::Sender<BookingEvent>) -> Self {
        Self { sender }
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, kind: EventKind, details: Vec<DetailSnapshot>) {
        // send only fails when nobody is subscribed, which is fine here
        let _ = self.sender.send(BookingEvent { kind, details });
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::{
        AppointmentDetailRow, AppointmentRow, BookingSource, DetailAggregate, LocationRow,
        ServiceRow, ServiceStatus, StaffRow,
    };

    fn aggregate() -> AppointmentAggregate {
        let start = Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap();
        AppointmentAggregate {
            appointment: AppointmentRow {
                id: "A1".into(),
                location_id: "L1".into(),
                appointment_group_id: None,
                customer_id: Some("C1".into()),
                marketplace_customer_id: None,
                date: "2026-03-14".into(),
                status: AppointmentStatus::New,
                is_primary: true,
                appointment_code: "AB123456".into(),
                booking_source: BookingSource::Dashboard,
                cancel_reason: None,
                number_rating: None,
                content_review: None,
                created_at: start.to_rfc3339(),
                deleted_at: None,
            },
            location: LocationRow {
                id: "L1".into(),
                company_id: "CO1".into(),
                name: "Downtown".into(),
            },
            customer: None,
            details: vec![DetailAggregate {
                detail: AppointmentDetailRow {
                    id: "D1".into(),
                    appointment_id: "A1".into(),
                    service_id: "SVC1".into(),
                    resource_id: None,
                    start_time: start,
                    duration_minutes: 30,
                    status: AppointmentStatus::New,
                    created_at: start.to_rfc3339(),
                    deleted_at: None,
                },
                service: ServiceRow {
                    id: "SVC1".into(),
                    location_id: "L1".into(),
                    category_id: None,
                    name: "Cut".into(),
                    duration_minutes: 30,
                    price_cents: 2500,
                    color: "#aa2222".into(),
                    status: ServiceStatus::Active,
                },
                resource: None,
                staff: vec![StaffRow {
                    id: "ST1".into(),
                    display_name: "Ana".into(),
                }],
            }],
        }
    }

    #[test]
    fn snapshots_flatten_the_aggregate() {
        let snapshots = DetailSnapshot::collect(&aggregate());
        assert_eq!(snapshots.len(), 1);
        let snap = &snapshots[0];
        assert_eq!(snap.appointment_code, "AB123456");
        assert_eq!(snap.service_name, "Cut");
        assert_eq!(snap.staff_ids, vec!["ST1".to_string()]);
        assert_eq!(snap.duration_minutes, 30);
    }

    #[test]
    fn event_kind_wire_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&EventKind::Locked).unwrap(), r#""locked""#);
        assert_eq!(serde_json::to_string(&EventKind::Edited).unwrap(), r#""edited""#);
    }

    #[tokio::test]
    async fn broadcast_notifier_reaches_subscribers() {
        let (sender, mut receiver) = broadcast::channel(8);
        let notifier = BroadcastNotifier::new(sender);

        notifier.notify(EventKind::Locked, DetailSnapshot::collect(&aggregate()));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Locked);
        assert_eq!(event.details.len(), 1);
    }

    #[test]
    fn notify_without_subscribers_is_a_no_op() {
        let (sender, _) = broadcast::channel(8);
        let notifier = BroadcastNotifier::new(sender);
        notifier.notify(EventKind::Edited, Vec::new());
    }
}
