use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Deserialize;

use crate::assignment::AssignmentGraph;
use crate::error::BookingError;

/// One proposed service-performance inside an appointment, as submitted by
/// the caller. Duration is never part of the input.
#[derive(Debug, Clone, Deserialize)]
pub struct DetailInput {
    pub service_id: String,
    pub staff_ids: Vec<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    pub start_time: DateTime<Utc>,
}

/// A detail that passed the assignment checks, carrying the duration read
/// from the matched service. This is the only shape the coordinator persists.
#[derive(Debug, Clone)]
pub struct ValidatedDetail {
    pub service_id: String,
    pub staff_ids: Vec<String>,
    pub resource_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
}

fn mismatch() -> BookingError {
    BookingError::conflict("service or resource or staff not match")
}

fn dedupe_preserving_order(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Validates a whole detail batch against the assignment graph at one
/// location. All lookups for all details run concurrently; one bad detail
/// fails the batch. Output order matches input order.
///
/// Performs no writes, so callers run it before opening a transaction.
pub async fn validate_details(
    graph: &dyn AssignmentGraph,
    location_id: &str,
    details: &[DetailInput],
) -> Result<Vec<ValidatedDetail>, BookingError> {
    if details.is_empty() {
        return Err(BookingError::validation(
            "at least one appointment detail is required",
        ));
    }
    if details.iter().any(|detail| detail.staff_ids.is_empty()) {
        return Err(BookingError::validation(
            "every appointment detail requires at least one staff id",
        ));
    }

    let requested: Vec<Vec<String>> = details
        .iter()
        .map(|detail| dedupe_preserving_order(&detail.staff_ids))
        .collect();

    let lookups = details.iter().zip(requested.iter()).map(|(detail, staff_ids)| async move {
        let resource_id = detail.resource_id.as_deref();
        match resource_id {
            Some(rid) => {
                let (service, resource, staff) = tokio::try_join!(
                    graph.service_for(&detail.service_id, staff_ids, resource_id, location_id),
                    graph.resource_for(rid, &detail.service_id, location_id),
                    graph.staff_for(staff_ids, &detail.service_id, location_id),
                )?;
                Ok::<_, BookingError>((service, resource, staff))
            }
            None => {
                let (service, staff) = tokio::try_join!(
                    graph.service_for(&detail.service_id, staff_ids, None, location_id),
                    graph.staff_for(staff_ids, &detail.service_id, location_id),
                )?;
                Ok((service, None, staff))
            }
        }
    });
    let matches = try_join_all(lookups).await?;

    let mut service_ids = HashSet::new();
    let mut resource_ids = HashSet::new();
    let mut resource_bearing = 0usize;
    let mut validated = Vec::with_capacity(details.len());

    for ((detail, staff_ids), (service, resource, staff)) in
        details.iter().zip(requested).zip(matches)
    {
        let service = service.ok_or_else(mismatch)?;
        service_ids.insert(service.id.clone());

        if detail.resource_id.is_some() {
            resource_bearing += 1;
            let resource = resource.ok_or_else(mismatch)?;
            resource_ids.insert(resource.id);
        }

        // Partial staff matches pass the lookup but not the cardinality
        // re-check: the lookup already filters to the requested set, so
        // distinct-count equality means set equality.
        let distinct: HashSet<&str> = staff.iter().map(|member| member.id.as_str()).collect();
        if staff.is_empty() || distinct.len() != staff_ids.len() {
            return Err(mismatch());
        }

        validated.push(ValidatedDetail {
            service_id: detail.service_id.clone(),
            staff_ids,
            resource_id: detail.resource_id.clone(),
            start_time: detail.start_time,
            duration_minutes: service.duration_minutes,
        });
    }

    if service_ids.len() != details.len() || resource_ids.len() != resource_bearing {
        return Err(mismatch());
    }

    Ok(validated)
}
