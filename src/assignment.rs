use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::sql_placeholders;
use crate::error::BookingError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ServiceMatch {
    pub id: String,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ResourceMatch {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StaffMatch {
    pub id: String,
}

/// Read-only view of who can perform what, where. The slot validator speaks
/// only this interface, so the graph can be backed by anything that answers
/// the three lookups.
#[async_trait]
pub trait AssignmentGraph: Send + Sync {
    /// The service, provided it is offered at `location_id`, has at least one
    /// of `staff_ids` assigned to it, and supports `resource_id` when one is
    /// requested.
    async fn service_for(
        &self,
        service_id: &str,
        staff_ids: &[String],
        resource_id: Option<&str>,
        location_id: &str,
    ) -> Result<Option<ServiceMatch>, BookingError>;

    /// The resource, provided it lives at `location_id` and supports
    /// `service_id`.
    async fn resource_for(
        &self,
        resource_id: &str,
        service_id: &str,
        location_id: &str,
    ) -> Result<Option<ResourceMatch>, BookingError>;

    /// Every member of `staff_ids` who works at `location_id` and offers
    /// `service_id`.
    async fn staff_for(
        &self,
        staff_ids: &[String],
        service_id: &str,
        location_id: &str,
    ) -> Result<Vec<StaffMatch>, BookingError>;
}

#[derive(Clone)]
pub struct SqliteAssignmentGraph {
    pool: SqlitePool,
}

impl SqliteAssignmentGraph {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssignmentGraph for SqliteAssignmentGraph {
    async fn service_for(
        &self,
        service_id: &str,
        staff_ids: &[String],
        resource_id: Option<&str>,
        location_id: &str,
    ) -> Result<Option<ServiceMatch>, BookingError> {
        if staff_ids.is_empty() {
            return Ok(None);
        }
        let sql = format!(
            r#"SELECT s.id, s.duration_minutes
               FROM services s
               WHERE s.id = ?
                 AND s.location_id = ?
                 AND EXISTS (
                     SELECT 1 FROM staff_services ss
                     WHERE ss.service_id = s.id AND ss.staff_id IN ({})
                 )
                 AND (? IS NULL OR EXISTS (
                     SELECT 1 FROM service_resources sr
                     WHERE sr.service_id = s.id AND sr.resource_id = ?
                 ))
               LIMIT 1"#,
            sql_placeholders(staff_ids.len())
        );

        let mut query = sqlx::query_as::<_, ServiceMatch>(&sql)
            .bind(service_id)
            .bind(location_id);
        for staff_id in staff_ids {
            query = query.bind(staff_id);
        }
        let row = query
            .bind(resource_id)
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn resource_for(
        &self,
        resource_id: &str,
        service_id: &str,
        location_id: &str,
    ) -> Result<Option<ResourceMatch>, BookingError> {
        let row = sqlx::query_as::<_, ResourceMatch>(
            r#"SELECT r.id
               FROM resources r
               WHERE r.id = ?
                 AND r.location_id = ?
                 AND EXISTS (
                     SELECT 1 FROM service_resources sr
                     WHERE sr.resource_id = r.id AND sr.service_id = ?
                 )
               LIMIT 1"#,
        )
        .bind(resource_id)
        .bind(location_id)
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn staff_for(
        &self,
        staff_ids: &[String],
        service_id: &str,
        location_id: &str,
    ) -> Result<Vec<StaffMatch>, BookingError> {
        if staff_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"SELECT st.id
               FROM staff st
               WHERE st.id IN ({})
                 AND EXISTS (
                     SELECT 1 FROM staff_locations sl
                     WHERE sl.staff_id = st.id AND sl.location_id = ?
                 )
                 AND EXISTS (
                     SELECT 1 FROM staff_services ss
                     WHERE ss.staff_id = st.id AND ss.service_id = ?
                 )"#,
            sql_placeholders(staff_ids.len())
        );

        let mut query = sqlx::query_as::<_, StaffMatch>(&sql);
        for staff_id in staff_ids {
            query = query.bind(staff_id);
        }
        let rows = query
            .bind(location_id)
            .bind(service_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
