use std::{env, fs, path::Path};

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn sql_placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Best-effort audit trail. Booking operations never fail because of it.
pub async fn log_activity(
    pool: &SqlitePool,
    kind: &str,
    message: &str,
    staff_id: Option<&str>,
    appointment_id: Option<&str>,
) {
    let _ = sqlx::query(
        r#"INSERT INTO activities (id, kind, message, created_at, staff_id, appointment_id)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(kind)
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(staff_id)
    .bind(appointment_id)
    .execute(pool)
    .await;
}

/// Seeds a demo location with a working assignment graph when SEED_DEMO=true,
/// so a fresh database is bookable right away. Ids are fixed strings on
/// purpose; requests can be composed without querying first.
pub async fn seed_demo(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let seed = env::var("SEED_DEMO").unwrap_or_else(|_| "false".to_string());
    if seed != "true" {
        return Ok(());
    }

    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM locations LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    sqlx::query("INSERT INTO locations (id, company_id, name) VALUES ('loc-demo', 'co-demo', 'Demo Salon')")
        .execute(pool)
        .await?;

    let services = [
        ("svc-haircut", "Haircut", 30i64, 2500i64, "#8b5cf6"),
        ("svc-color", "Color", 90, 12000, "#f59e0b"),
    ];
    for (id, name, duration, price, color) in services {
        sqlx::query(
            r#"INSERT INTO services (id, location_id, name, duration_minutes, price_cents, color)
               VALUES (?, 'loc-demo', ?, ?, ?, ?)"#,
        )
        .bind(id)
        .bind(name)
        .bind(duration)
        .bind(price)
        .bind(color)
        .execute(pool)
        .await?;
    }

    sqlx::query("INSERT INTO resources (id, location_id, name) VALUES ('res-chair-1', 'loc-demo', 'Chair 1')")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO service_resources (service_id, resource_id) VALUES ('svc-haircut', 'res-chair-1')")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO service_resources (service_id, resource_id) VALUES ('svc-color', 'res-chair-1')")
        .execute(pool)
        .await?;

    let members = [("staff-ana", "Ana"), ("staff-ben", "Ben")];
    for (id, name) in members {
        sqlx::query("INSERT INTO staff (id, display_name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(pool)
            .await?;
        sqlx::query("INSERT INTO staff_locations (staff_id, location_id) VALUES (?, 'loc-demo')")
            .bind(id)
            .execute(pool)
            .await?;
        for (service_id, _, _, _, _) in services {
            sqlx::query("INSERT INTO staff_services (staff_id, service_id) VALUES (?, ?)")
                .bind(id)
                .bind(service_id)
                .execute(pool)
                .await?;
        }
    }

    sqlx::query("INSERT INTO customers (id, display_name, phone) VALUES ('cust-demo', 'Demo Customer', '+100000000')")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO marketplace_customers (id, display_name, phone) VALUES ('mkt-demo', 'Marketplace Customer', NULL)")
        .execute(pool)
        .await?;

    log::info!("Seeded demo location 'loc-demo' with staff, services and resources");
    Ok(())
}
