use futures::future::try_join_all;
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::{new_id, sql_placeholders};
use crate::error::BookingError;
use crate::models::{
    AppointmentAggregate, AppointmentDetailRow, AppointmentGroupRow, AppointmentRow, CustomerRef,
    CustomerRow, DetailAggregate, LocationRow, ResourceRow, ServiceRow, StaffRow,
};
use crate::status::AppointmentStatus;

const APPOINTMENT_COLUMNS: &str = r#"id, location_id, appointment_group_id, customer_id,
    marketplace_customer_id, date, status, is_primary, appointment_code, booking_source,
    cancel_reason, number_rating, content_review, created_at, deleted_at"#;

const DETAIL_COLUMNS: &str = r#"id, appointment_id, service_id, resource_id, start_time,
    duration_minutes, status, created_at, deleted_at"#;

// ---- reads (any executor, run outside the write transaction) ----

pub async fn fetch_location(pool: &SqlitePool, id: &str) -> Result<LocationRow, BookingError> {
    sqlx::query_as::<_, LocationRow>("SELECT id, company_id, name FROM locations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| BookingError::not_found("location", id))
}

pub async fn fetch_customer(
    pool: &SqlitePool,
    customer: &CustomerRef,
) -> Result<CustomerRow, BookingError> {
    let (table, id, entity) = match customer {
        CustomerRef::Registered(id) => ("customers", id, "customer"),
        CustomerRef::Marketplace(id) => ("marketplace_customers", id, "marketplace customer"),
    };
    let sql = format!("SELECT id, display_name, phone FROM {table} WHERE id = ?");
    sqlx::query_as::<_, CustomerRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| BookingError::not_found(entity, id))
}

pub async fn fetch_service(pool: &SqlitePool, id: &str) -> Result<ServiceRow, BookingError> {
    sqlx::query_as::<_, ServiceRow>(
        r#"SELECT id, location_id, category_id, name, duration_minutes, price_cents, color, status
           FROM services WHERE id = ?"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| BookingError::not_found("service", id))
}

pub async fn fetch_resource(pool: &SqlitePool, id: &str) -> Result<ResourceRow, BookingError> {
    sqlx::query_as::<_, ResourceRow>("SELECT id, location_id, name FROM resources WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| BookingError::not_found("resource", id))
}

pub async fn fetch_appointment(
    pool: &SqlitePool,
    id: &str,
) -> Result<AppointmentRow, BookingError> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ? AND deleted_at IS NULL"
    );
    sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| BookingError::not_found("appointment", id))
}

/// Customer-facing lookups scope by ownership instead of location.
pub async fn fetch_appointment_for_customer(
    pool: &SqlitePool,
    id: &str,
    customer: &CustomerRef,
) -> Result<AppointmentRow, BookingError> {
    let column = match customer {
        CustomerRef::Registered(_) => "customer_id",
        CustomerRef::Marketplace(_) => "marketplace_customer_id",
    };
    let customer_id = match customer {
        CustomerRef::Registered(value) | CustomerRef::Marketplace(value) => value,
    };
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE id = ? AND {column} = ? AND deleted_at IS NULL"
    );
    sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(id)
        .bind(customer_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| BookingError::not_found("appointment", id))
}

pub async fn fetch_group(
    pool: &SqlitePool,
    id: &str,
) -> Result<AppointmentGroupRow, BookingError> {
    sqlx::query_as::<_, AppointmentGroupRow>(
        "SELECT id, location_id, date, created_at FROM appointment_groups WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| BookingError::not_found("appointment group", id))
}

pub async fn fetch_group_members(
    pool: &SqlitePool,
    group_id: &str,
) -> Result<Vec<AppointmentRow>, BookingError> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE appointment_group_id = ? AND deleted_at IS NULL
         ORDER BY created_at, id"
    );
    Ok(sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(group_id)
        .fetch_all(pool)
        .await?)
}

pub async fn code_exists(pool: &SqlitePool, code: &str) -> Result<bool, BookingError> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM appointments WHERE appointment_code = ? AND deleted_at IS NULL",
    )
    .bind(code)
    .fetch_one(pool)
    .await?;
    Ok(found > 0)
}

pub async fn fetch_details(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Result<Vec<AppointmentDetailRow>, BookingError> {
    let sql = format!(
        "SELECT {DETAIL_COLUMNS} FROM appointment_details
         WHERE appointment_id = ? AND deleted_at IS NULL
         ORDER BY start_time, id"
    );
    Ok(sqlx::query_as::<_, AppointmentDetailRow>(&sql)
        .bind(appointment_id)
        .fetch_all(pool)
        .await?)
}

pub async fn fetch_details_by_ids(
    pool: &SqlitePool,
    appointment_id: &str,
    detail_ids: &[String],
) -> Result<Vec<AppointmentDetailRow>, BookingError> {
    if detail_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {DETAIL_COLUMNS} FROM appointment_details
         WHERE appointment_id = ? AND deleted_at IS NULL AND id IN ({})",
        sql_placeholders(detail_ids.len())
    );
    let mut query = sqlx::query_as::<_, AppointmentDetailRow>(&sql).bind(appointment_id);
    for detail_id in detail_ids {
        query = query.bind(detail_id);
    }
    Ok(query.fetch_all(pool).await?)
}

pub async fn fetch_detail_staff(
    pool: &SqlitePool,
    detail_id: &str,
) -> Result<Vec<StaffRow>, BookingError> {
    Ok(sqlx::query_as::<_, StaffRow>(
        r#"SELECT st.id, st.display_name
           FROM appointment_detail_staff ads
           JOIN staff st ON st.id = ads.staff_id
           WHERE ads.appointment_detail_id = ?
           ORDER BY ads.rowid"#,
    )
    .bind(detail_id)
    .fetch_all(pool)
    .await?)
}

/// The fully joined post-commit view: appointment, location, customer and
/// every live detail with its service, resource and staff.
pub async fn load_aggregate(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Result<AppointmentAggregate, BookingError> {
    let appointment = fetch_appointment(pool, appointment_id).await?;

    let (location, details) = tokio::try_join!(
        fetch_location(pool, &appointment.location_id),
        fetch_details(pool, appointment_id),
    )?;

    let customer = match (&appointment.customer_id, &appointment.marketplace_customer_id) {
        (Some(id), _) => Some(fetch_customer(pool, &CustomerRef::Registered(id.clone())).await?),
        (None, Some(id)) => {
            Some(fetch_customer(pool, &CustomerRef::Marketplace(id.clone())).await?)
        }
        (None, None) => None,
    };

    let entries = try_join_all(details.into_iter().map(|detail| async move {
        let (service, staff) = tokio::try_join!(
            fetch_service(pool, &detail.service_id),
            fetch_detail_staff(pool, &detail.id),
        )?;
        let resource = match detail.resource_id.as_deref() {
            Some(id) => Some(fetch_resource(pool, id).await?),
            None => None,
        };
        Ok::<_, BookingError>(DetailAggregate {
            detail,
            service,
            resource,
            staff,
        })
    }))
    .await?;

    Ok(AppointmentAggregate {
        appointment,
        location,
        customer,
        details: entries,
    })
}

pub async fn load_group_aggregates(
    pool: &SqlitePool,
    group_id: &str,
) -> Result<Vec<AppointmentAggregate>, BookingError> {
    let members = fetch_group_members(pool, group_id).await?;
    try_join_all(
        members
            .iter()
            .map(|member| load_aggregate(pool, &member.id)),
    )
    .await
}

// ---- writes (transaction connection only) ----

pub async fn insert_group(
    conn: &mut SqliteConnection,
    group: &AppointmentGroupRow,
) -> Result<(), BookingError> {
    sqlx::query(
        r#"INSERT INTO appointment_groups (id, location_id, date, created_at)
           VALUES (?, ?, ?, ?)"#,
    )
    .bind(&group.id)
    .bind(&group.location_id)
    .bind(&group.date)
    .bind(&group.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_appointment(
    conn: &mut SqliteConnection,
    row: &AppointmentRow,
) -> Result<(), BookingError> {
    sqlx::query(
        r#"INSERT INTO appointments
           (id, location_id, appointment_group_id, customer_id, marketplace_customer_id,
            date, status, is_primary, appointment_code, booking_source, cancel_reason,
            number_rating, content_review, created_at, deleted_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&row.id)
    .bind(&row.location_id)
    .bind(&row.appointment_group_id)
    .bind(&row.customer_id)
    .bind(&row.marketplace_customer_id)
    .bind(&row.date)
    .bind(row.status)
    .bind(row.is_primary)
    .bind(&row.appointment_code)
    .bind(row.booking_source)
    .bind(&row.cancel_reason)
    .bind(row.number_rating)
    .bind(&row.content_review)
    .bind(&row.created_at)
    .bind(&row.deleted_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_detail(
    conn: &mut SqliteConnection,
    row: &AppointmentDetailRow,
) -> Result<(), BookingError> {
    sqlx::query(
        r#"INSERT INTO appointment_details
           (id, appointment_id, service_id, resource_id, start_time, duration_minutes,
            status, created_at, deleted_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&row.id)
    .bind(&row.appointment_id)
    .bind(&row.service_id)
    .bind(&row.resource_id)
    .bind(row.start_time)
    .bind(row.duration_minutes)
    .bind(row.status)
    .bind(&row.created_at)
    .bind(&row.deleted_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_detail_staff(
    conn: &mut SqliteConnection,
    detail_id: &str,
    staff_id: &str,
) -> Result<(), BookingError> {
    sqlx::query(
        r#"INSERT INTO appointment_detail_staff (id, appointment_detail_id, staff_id)
           VALUES (?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(detail_id)
    .bind(staff_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn set_group(
    conn: &mut SqliteConnection,
    appointment_id: &str,
    group_id: &str,
) -> Result<(), BookingError> {
    sqlx::query("UPDATE appointments SET appointment_group_id = ? WHERE id = ?")
        .bind(group_id)
        .bind(appointment_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_group_date(
    conn: &mut SqliteConnection,
    group_id: &str,
    date: &str,
) -> Result<(), BookingError> {
    sqlx::query("UPDATE appointment_groups SET date = ? WHERE id = ?")
        .bind(date)
        .bind(group_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_primary(
    conn: &mut SqliteConnection,
    appointment_id: &str,
    is_primary: bool,
) -> Result<(), BookingError> {
    sqlx::query("UPDATE appointments SET is_primary = ? WHERE id = ?")
        .bind(is_primary)
        .bind(appointment_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    appointment_id: &str,
    status: AppointmentStatus,
    cancel_reason: Option<&str>,
) -> Result<(), BookingError> {
    sqlx::query("UPDATE appointments SET status = ?, cancel_reason = COALESCE(?, cancel_reason) WHERE id = ?")
        .bind(status)
        .bind(cancel_reason)
        .bind(appointment_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_detail_status(
    conn: &mut SqliteConnection,
    detail_id: &str,
    status: AppointmentStatus,
) -> Result<(), BookingError> {
    sqlx::query("UPDATE appointment_details SET status = ? WHERE id = ?")
        .bind(status)
        .bind(detail_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_date(
    conn: &mut SqliteConnection,
    appointment_id: &str,
    date: &str,
) -> Result<(), BookingError> {
    sqlx::query("UPDATE appointments SET date = ? WHERE id = ?")
        .bind(date)
        .bind(appointment_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_customer(
    conn: &mut SqliteConnection,
    appointment_id: &str,
    customer: &CustomerRef,
) -> Result<(), BookingError> {
    let (customer_id, marketplace_customer_id) =
        (customer.registered_id(), customer.marketplace_id());
    sqlx::query(
        "UPDATE appointments SET customer_id = ?, marketplace_customer_id = ? WHERE id = ?",
    )
    .bind(customer_id)
    .bind(marketplace_customer_id)
    .bind(appointment_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn set_rating(
    conn: &mut SqliteConnection,
    appointment_id: &str,
    number_rating: i64,
    content_review: Option<&str>,
) -> Result<(), BookingError> {
    sqlx::query("UPDATE appointments SET number_rating = ?, content_review = ? WHERE id = ?")
        .bind(number_rating)
        .bind(content_review)
        .bind(appointment_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_detail_start(
    conn: &mut SqliteConnection,
    detail_id: &str,
    start_time: chrono::DateTime<chrono::Utc>,
) -> Result<(), BookingError> {
    sqlx::query("UPDATE appointment_details SET start_time = ? WHERE id = ?")
        .bind(start_time)
        .bind(detail_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn soft_delete_appointment(
    conn: &mut SqliteConnection,
    appointment_id: &str,
    deleted_at: &str,
) -> Result<(), BookingError> {
    sqlx::query("UPDATE appointments SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(deleted_at)
        .bind(appointment_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn soft_delete_details_for(
    conn: &mut SqliteConnection,
    appointment_id: &str,
    deleted_at: &str,
) -> Result<(), BookingError> {
    sqlx::query(
        "UPDATE appointment_details SET deleted_at = ? WHERE appointment_id = ? AND deleted_at IS NULL",
    )
    .bind(deleted_at)
    .bind(appointment_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn soft_delete_detail(
    conn: &mut SqliteConnection,
    detail_id: &str,
    deleted_at: &str,
) -> Result<(), BookingError> {
    sqlx::query("UPDATE appointment_details SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(deleted_at)
        .bind(detail_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
