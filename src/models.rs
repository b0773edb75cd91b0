use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::BookingError;
use crate::status::AppointmentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingSource {
    Dashboard,
    Marketplace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AppointmentRow {
    pub id: String,
    pub location_id: String,
    pub appointment_group_id: Option<String>,
    pub customer_id: Option<String>,
    pub marketplace_customer_id: Option<String>,
    pub date: String,
    pub status: AppointmentStatus,
    pub is_primary: bool,
    pub appointment_code: String,
    pub booking_source: BookingSource,
    pub cancel_reason: Option<String>,
    pub number_rating: Option<i64>,
    pub content_review: Option<String>,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AppointmentDetailRow {
    pub id: String,
    pub appointment_id: String,
    pub service_id: String,
    pub resource_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: AppointmentStatus,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AppointmentGroupRow {
    pub id: String,
    pub location_id: String,
    pub date: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ServiceRow {
    pub id: String,
    pub location_id: String,
    pub category_id: Option<String>,
    pub name: String,
    pub duration_minutes: i64,
    pub price_cents: i64,
    pub color: String,
    pub status: ServiceStatus,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ResourceRow {
    pub id: String,
    pub location_id: String,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StaffRow {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LocationRow {
    pub id: String,
    pub company_id: String,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CustomerRow {
    pub id: String,
    pub display_name: String,
    pub phone: Option<String>,
}

/// Exactly one of the two customer kinds may reference an appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerRef {
    Registered(String),
    Marketplace(String),
}

impl CustomerRef {
    /// Builds the reference out of the two wire fields, rejecting requests
    /// that set both.
    pub fn from_request(
        customer_id: Option<String>,
        marketplace_customer_id: Option<String>,
    ) -> Result<Option<Self>, BookingError> {
        match (customer_id, marketplace_customer_id) {
            (Some(_), Some(_)) => Err(BookingError::validation(
                "customer_id and marketplace_customer_id are mutually exclusive",
            )),
            (Some(id), None) => Ok(Some(Self::Registered(id))),
            (None, Some(id)) => Ok(Some(Self::Marketplace(id))),
            (None, None) => Ok(None),
        }
    }

    pub fn registered_id(&self) -> Option<&str> {
        match self {
            Self::Registered(id) => Some(id),
            Self::Marketplace(_) => None,
        }
    }

    pub fn marketplace_id(&self) -> Option<&str> {
        match self {
            Self::Registered(_) => None,
            Self::Marketplace(id) => Some(id),
        }
    }
}

/// The staff member driving a dashboard operation, with the locations they
/// may act on.
#[derive(Debug, Clone)]
pub struct Actor {
    pub staff_id: String,
    pub location_ids: Vec<String>,
}

impl Actor {
    pub async fn load(pool: &SqlitePool, staff_id: &str) -> Result<Self, BookingError> {
        let location_ids = sqlx::query_scalar::<_, String>(
            "SELECT location_id FROM staff_locations WHERE staff_id = ?",
        )
        .bind(staff_id)
        .fetch_all(pool)
        .await?;

        if location_ids.is_empty() {
            return Err(BookingError::not_found("staff", staff_id));
        }
        Ok(Self {
            staff_id: staff_id.to_string(),
            location_ids,
        })
    }

    pub fn permits(&self, location_id: &str) -> bool {
        self.location_ids.iter().any(|id| id == location_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailAggregate {
    pub detail: AppointmentDetailRow,
    pub service: ServiceRow,
    pub resource: Option<ResourceRow>,
    pub staff: Vec<StaffRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentAggregate {
    pub appointment: AppointmentRow,
    pub location: LocationRow,
    pub customer: Option<CustomerRow>,
    pub details: Vec<DetailAggregate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customer_ref_rejects_both_kinds_at_once() {
        let err = CustomerRef::from_request(Some("c1".into()), Some("m1".into())).unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[test]
    fn customer_ref_accepts_either_kind_or_none() {
        assert_eq!(
            CustomerRef::from_request(Some("c1".into()), None).unwrap(),
            Some(CustomerRef::Registered("c1".into()))
        );
        assert_eq!(
            CustomerRef::from_request(None, Some("m1".into())).unwrap(),
            Some(CustomerRef::Marketplace("m1".into()))
        );
        assert_eq!(CustomerRef::from_request(None, None).unwrap(), None);
    }
}
