use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::try_join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};

use crate::assignment::SqliteAssignmentGraph;
use crate::codes::{self, GROUP_CODE_RETRIES, SINGLE_CODE_RETRIES};
use crate::db::{log_activity, new_id};
use crate::error::BookingError;
use crate::models::{
    Actor, AppointmentAggregate, AppointmentDetailRow, AppointmentGroupRow, AppointmentRow,
    BookingSource, CustomerRef,
};
use crate::notify::{DetailSnapshot, EventKind, Notifier};
use crate::status::{ensure_transition, transition_allowed, AppointmentStatus};
use crate::store;
use crate::validator::{validate_details, DetailInput, ValidatedDetail};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    pub location_id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub marketplace_customer_id: Option<String>,
    pub date: NaiveDate,
    pub details: Vec<DetailInput>,
    pub booking_source: BookingSource,
    #[serde(default)]
    pub appointment_group_id: Option<String>,
    #[serde(default)]
    pub related_appointment_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupMemberRequest {
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub marketplace_customer_id: Option<String>,
    pub is_primary: bool,
    pub details: Vec<DetailInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroupRequest {
    pub location_id: String,
    pub date: NaiveDate,
    pub appointments: Vec<GroupMemberRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceDetailRequest {
    pub id: String,
    #[serde(flatten)]
    pub input: DetailInput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiblingAppointmentRequest {
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub marketplace_customer_id: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
    pub details: Vec<DetailInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub location_id: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub marketplace_customer_id: Option<String>,
    #[serde(default)]
    pub create_details: Vec<DetailInput>,
    #[serde(default)]
    pub update_details: Vec<ReplaceDetailRequest>,
    #[serde(default)]
    pub delete_detail_ids: Vec<String>,
    #[serde(default)]
    pub create_siblings: Vec<SiblingAppointmentRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateGroupMemberRequest {
    pub id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub marketplace_customer_id: Option<String>,
    #[serde(default)]
    pub is_primary: Option<bool>,
    pub details: Vec<DetailInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateGroupRequest {
    pub location_id: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub create_appointments: Vec<GroupMemberRequest>,
    #[serde(default)]
    pub update_appointments: Vec<UpdateGroupMemberRequest>,
    #[serde(default)]
    pub delete_appointment_ids: Vec<String>,
}

/// The transaction coordinator. The only component that begins transactions
/// for booking writes; everything it commits satisfies the assignment,
/// code-uniqueness and group-primary invariants.
#[derive(Clone)]
pub struct BookingService {
    pool: SqlitePool,
    graph: SqliteAssignmentGraph,
    notifier: Arc<dyn Notifier>,
}

impl BookingService {
    pub fn new(pool: SqlitePool, notifier: Arc<dyn Notifier>) -> Self {
        let graph = SqliteAssignmentGraph::new(pool.clone());
        Self {
            pool,
            graph,
            notifier,
        }
    }

    async fn next_code(&self, rng: &mut StdRng, attempts: u32) -> Result<String, BookingError> {
        codes::unique_code(rng, attempts, |code| {
            let pool = self.pool.clone();
            async move { store::code_exists(&pool, &code).await }
        })
        .await
    }

    /// Codes for a batch: checked against the live table and against the
    /// codes already drawn for this batch.
    async fn next_codes(&self, count: usize, attempts: u32) -> Result<Vec<String>, BookingError> {
        let mut rng = StdRng::from_entropy();
        let mut drawn: Vec<String> = Vec::with_capacity(count);
        for _ in 0..count {
            let code = codes::unique_code(&mut rng, attempts, |code| {
                let pool = self.pool.clone();
                let taken_locally = drawn.contains(&code);
                async move {
                    if taken_locally {
                        return Ok(true);
                    }
                    store::code_exists(&pool, &code).await
                }
            })
            .await?;
            drawn.push(code);
        }
        Ok(drawn)
    }

    async fn resolve_customer(
        &self,
        customer_id: Option<String>,
        marketplace_customer_id: Option<String>,
    ) -> Result<Option<CustomerRef>, BookingError> {
        let customer = CustomerRef::from_request(customer_id, marketplace_customer_id)?;
        if let Some(customer) = &customer {
            store::fetch_customer(&self.pool, customer).await?;
        }
        Ok(customer)
    }

    fn emit(&self, kind: EventKind, aggregates: &[AppointmentAggregate]) {
        let details: Vec<DetailSnapshot> = aggregates.iter().flat_map(DetailSnapshot::collect).collect();
        self.notifier.notify(kind, details);
    }

    // -- reads --

    pub async fn get_appointment(
        &self,
        actor: &Actor,
        appointment_id: &str,
    ) -> Result<AppointmentAggregate, BookingError> {
        let appointment = store::fetch_appointment(&self.pool, appointment_id).await?;
        if !actor.permits(&appointment.location_id) {
            return Err(BookingError::Forbidden);
        }
        store::load_aggregate(&self.pool, appointment_id).await
    }

    // -- creation --

    pub async fn create_appointment(
        &self,
        actor: &Actor,
        request: CreateAppointmentRequest,
    ) -> Result<AppointmentAggregate, BookingError> {
        if !actor.permits(&request.location_id) {
            return Err(BookingError::Forbidden);
        }
        store::fetch_location(&self.pool, &request.location_id).await?;
        let customer = self
            .resolve_customer(request.customer_id.clone(), request.marketplace_customer_id.clone())
            .await?;

        if request.appointment_group_id.is_some() && request.related_appointment_id.is_some() {
            return Err(BookingError::validation(
                "appointment_group_id and related_appointment_id are mutually exclusive",
            ));
        }

        // Group membership is decided before the transaction; the rows are
        // written inside it.
        let mut attach_group: Option<String> = None;
        let mut spawn_group_for: Option<AppointmentRow> = None;
        if let Some(group_id) = &request.appointment_group_id {
            let group = store::fetch_group(&self.pool, group_id).await?;
            if group.location_id != request.location_id {
                return Err(BookingError::validation(
                    "appointment group belongs to a different location",
                ));
            }
            attach_group = Some(group.id);
        } else if let Some(related_id) = &request.related_appointment_id {
            let related = store::fetch_appointment(&self.pool, related_id).await?;
            if related.location_id != request.location_id {
                return Err(BookingError::validation(
                    "related appointment belongs to a different location",
                ));
            }
            match &related.appointment_group_id {
                Some(group_id) => attach_group = Some(group_id.clone()),
                None => spawn_group_for = Some(related),
            }
        }

        let details = validate_details(&self.graph, &request.location_id, &request.details).await?;
        let mut rng = StdRng::from_entropy();
        let code = self.next_code(&mut rng, SINGLE_CODE_RETRIES).await?;

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let group_id = match (&attach_group, &spawn_group_for) {
            (Some(group_id), _) => Some(group_id.clone()),
            (None, Some(related)) => {
                let group = AppointmentGroupRow {
                    id: new_id(),
                    location_id: request.location_id.clone(),
                    date: related.date.clone(),
                    created_at: now.clone(),
                };
                store::insert_group(&mut tx, &group).await?;
                store::set_group(&mut tx, &related.id, &group.id).await?;
                Some(group.id)
            }
            (None, None) => None,
        };

        // A standalone appointment is its own primary; an appointment joining
        // a group defers to the primary already in it.
        let row = AppointmentRow {
            id: new_id(),
            location_id: request.location_id.clone(),
            appointment_group_id: group_id.clone(),
            customer_id: customer.as_ref().and_then(|c| c.registered_id()).map(str::to_string),
            marketplace_customer_id: customer
                .as_ref()
                .and_then(|c| c.marketplace_id())
                .map(str::to_string),
            date: request.date.to_string(),
            status: AppointmentStatus::New,
            is_primary: group_id.is_none(),
            appointment_code: code,
            booking_source: request.booking_source,
            cancel_reason: None,
            number_rating: None,
            content_review: None,
            created_at: now.clone(),
            deleted_at: None,
        };
        store::insert_appointment(&mut tx, &row).await?;
        write_details(&mut tx, &row.id, &details, AppointmentStatus::New, &now).await?;

        tx.commit().await?;

        let aggregate = store::load_aggregate(&self.pool, &row.id).await?;
        self.emit(EventKind::Locked, std::slice::from_ref(&aggregate));
        log_activity(
            &self.pool,
            "appointment_created",
            &format!("Appointment {} created", row.appointment_code),
            Some(&actor.staff_id),
            Some(&row.id),
        )
        .await;
        Ok(aggregate)
    }

    pub async fn create_appointment_group(
        &self,
        actor: &Actor,
        request: CreateGroupRequest,
    ) -> Result<Vec<AppointmentAggregate>, BookingError> {
        if !actor.permits(&request.location_id) {
            return Err(BookingError::Forbidden);
        }
        store::fetch_location(&self.pool, &request.location_id).await?;
        if request.appointments.is_empty() {
            return Err(BookingError::validation(
                "an appointment group requires at least one appointment",
            ));
        }

        let primaries = request
            .appointments
            .iter()
            .filter(|member| member.is_primary)
            .count();
        if primaries != 1 {
            return Err(BookingError::conflict(
                "appointment group must have exactly one primary appointment",
            ));
        }

        let customers = request
            .appointments
            .iter()
            .map(|member| {
                CustomerRef::from_request(
                    member.customer_id.clone(),
                    member.marketplace_customer_id.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        try_join_all(
            customers
                .iter()
                .flatten()
                .map(|customer| store::fetch_customer(&self.pool, customer)),
        )
        .await?;

        // Everything validates before any row is written; one bad member
        // aborts the whole batch.
        let validated = try_join_all(request.appointments.iter().map(|member| {
            validate_details(&self.graph, &request.location_id, &member.details)
        }))
        .await?;
        let member_codes = self
            .next_codes(request.appointments.len(), GROUP_CODE_RETRIES)
            .await?;

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let group = AppointmentGroupRow {
            id: new_id(),
            location_id: request.location_id.clone(),
            date: request.date.to_string(),
            created_at: now.clone(),
        };
        store::insert_group(&mut tx, &group).await?;

        for ((member, details), code) in request
            .appointments
            .iter()
            .zip(validated.iter())
            .zip(member_codes.into_iter())
        {
            let customer = CustomerRef::from_request(
                member.customer_id.clone(),
                member.marketplace_customer_id.clone(),
            )?;
            let row = AppointmentRow {
                id: new_id(),
                location_id: request.location_id.clone(),
                appointment_group_id: Some(group.id.clone()),
                customer_id: customer.as_ref().and_then(|c| c.registered_id()).map(str::to_string),
                marketplace_customer_id: customer
                    .as_ref()
                    .and_then(|c| c.marketplace_id())
                    .map(str::to_string),
                date: request.date.to_string(),
                status: AppointmentStatus::New,
                is_primary: member.is_primary,
                appointment_code: code,
                booking_source: BookingSource::Dashboard,
                cancel_reason: None,
                number_rating: None,
                content_review: None,
                created_at: now.clone(),
                deleted_at: None,
            };
            store::insert_appointment(&mut tx, &row).await?;
            write_details(&mut tx, &row.id, details, AppointmentStatus::New, &now).await?;
        }

        tx.commit().await?;

        let aggregates = store::load_group_aggregates(&self.pool, &group.id).await?;
        self.emit(EventKind::Locked, &aggregates);
        log_activity(
            &self.pool,
            "appointment_group_created",
            &format!(
                "Appointment group with {} appointments created",
                aggregates.len()
            ),
            Some(&actor.staff_id),
            None,
        )
        .await;
        Ok(aggregates)
    }

    // -- mutation --

    pub async fn update_appointment(
        &self,
        actor: &Actor,
        appointment_id: &str,
        request: UpdateAppointmentRequest,
    ) -> Result<AppointmentAggregate, BookingError> {
        let appointment = store::fetch_appointment(&self.pool, appointment_id).await?;
        if !actor.permits(&appointment.location_id) {
            return Err(BookingError::Forbidden);
        }
        if request.location_id != appointment.location_id {
            return Err(BookingError::validation(
                "an appointment cannot move to another location",
            ));
        }
        let customer = self
            .resolve_customer(request.customer_id.clone(), request.marketplace_customer_id.clone())
            .await?;

        let replace_ids: Vec<String> = request
            .update_details
            .iter()
            .map(|replace| replace.id.clone())
            .collect();
        let replace_set: HashSet<&str> = replace_ids.iter().map(String::as_str).collect();
        if replace_set.len() != replace_ids.len() {
            return Err(BookingError::conflict(
                "duplicate appointment detail id in update list",
            ));
        }
        let delete_set: HashSet<&str> = request.delete_detail_ids.iter().map(String::as_str).collect();
        if let Some(shared) = replace_set.intersection(&delete_set).next() {
            return Err(BookingError::conflict(format!(
                "appointment detail {shared} appears in both update and delete lists"
            )));
        }

        // Every targeted detail must exist and be live before anything runs.
        let mut targeted: Vec<String> = replace_ids.clone();
        targeted.extend(request.delete_detail_ids.iter().cloned());
        let found = store::fetch_details_by_ids(&self.pool, appointment_id, &targeted).await?;
        let found_ids: HashSet<&str> = found.iter().map(|detail| detail.id.as_str()).collect();
        for id in &targeted {
            if !found_ids.contains(id.as_str()) {
                return Err(BookingError::not_found("appointment detail", id.clone()));
            }
        }

        if !request.create_siblings.is_empty() {
            let already_primary = request
                .create_siblings
                .iter()
                .any(|sibling| sibling.is_primary);
            if already_primary {
                return Err(BookingError::conflict(
                    "appointment group already has a primary appointment",
                ));
            }
        }
        let sibling_customers = request
            .create_siblings
            .iter()
            .map(|sibling| {
                CustomerRef::from_request(
                    sibling.customer_id.clone(),
                    sibling.marketplace_customer_id.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        try_join_all(
            sibling_customers
                .iter()
                .flatten()
                .map(|customer| store::fetch_customer(&self.pool, customer)),
        )
        .await?;

        // One validation batch for the appointment's own new and replacement
        // details; one batch per sibling.
        let mut own_inputs: Vec<DetailInput> = request.create_details.clone();
        own_inputs.extend(request.update_details.iter().map(|replace| replace.input.clone()));
        let own_validated = if own_inputs.is_empty() {
            Vec::new()
        } else {
            validate_details(&self.graph, &appointment.location_id, &own_inputs).await?
        };
        let (created_details, replaced_details) = own_validated.split_at(request.create_details.len());

        let sibling_details = try_join_all(request.create_siblings.iter().map(|sibling| {
            validate_details(&self.graph, &appointment.location_id, &sibling.details)
        }))
        .await?;
        let sibling_codes = self
            .next_codes(request.create_siblings.len(), GROUP_CODE_RETRIES)
            .await?;

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        if let Some(customer) = &customer {
            store::set_customer(&mut tx, appointment_id, customer).await?;
        }
        if let Some(date) = request.date {
            store::set_date(&mut tx, appointment_id, &date.to_string()).await?;
        }

        for detail_id in &request.delete_detail_ids {
            store::soft_delete_detail(&mut tx, detail_id, &now).await?;
        }
        for replace in &request.update_details {
            store::soft_delete_detail(&mut tx, &replace.id, &now).await?;
        }
        write_details(&mut tx, appointment_id, replaced_details, appointment.status, &now).await?;
        write_details(&mut tx, appointment_id, created_details, appointment.status, &now).await?;

        if !request.create_siblings.is_empty() {
            let group_id = match &appointment.appointment_group_id {
                Some(group_id) => group_id.clone(),
                None => {
                    let group = AppointmentGroupRow {
                        id: new_id(),
                        location_id: appointment.location_id.clone(),
                        date: appointment.date.clone(),
                        created_at: now.clone(),
                    };
                    store::insert_group(&mut tx, &group).await?;
                    store::set_group(&mut tx, appointment_id, &group.id).await?;
                    group.id
                }
            };

            for ((sibling, details), code) in request
                .create_siblings
                .iter()
                .zip(sibling_details.iter())
                .zip(sibling_codes.into_iter())
            {
                let sibling_customer = CustomerRef::from_request(
                    sibling.customer_id.clone(),
                    sibling.marketplace_customer_id.clone(),
                )?;
                let row = AppointmentRow {
                    id: new_id(),
                    location_id: appointment.location_id.clone(),
                    appointment_group_id: Some(group_id.clone()),
                    customer_id: sibling_customer
                        .as_ref()
                        .and_then(|c| c.registered_id())
                        .map(str::to_string),
                    marketplace_customer_id: sibling_customer
                        .as_ref()
                        .and_then(|c| c.marketplace_id())
                        .map(str::to_string),
                    date: appointment.date.clone(),
                    status: AppointmentStatus::New,
                    is_primary: false,
                    appointment_code: code,
                    booking_source: BookingSource::Dashboard,
                    cancel_reason: None,
                    number_rating: None,
                    content_review: None,
                    created_at: now.clone(),
                    deleted_at: None,
                };
                store::insert_appointment(&mut tx, &row).await?;
                write_details(&mut tx, &row.id, details, AppointmentStatus::New, &now).await?;
            }
        }

        tx.commit().await?;

        let aggregate = store::load_aggregate(&self.pool, appointment_id).await?;
        self.emit(EventKind::Edited, std::slice::from_ref(&aggregate));
        log_activity(
            &self.pool,
            "appointment_updated",
            &format!("Appointment {} updated", aggregate.appointment.appointment_code),
            Some(&actor.staff_id),
            Some(appointment_id),
        )
        .await;
        Ok(aggregate)
    }

    pub async fn update_appointment_group(
        &self,
        actor: &Actor,
        group_id: &str,
        request: UpdateGroupRequest,
    ) -> Result<Vec<AppointmentAggregate>, BookingError> {
        let group = store::fetch_group(&self.pool, group_id).await?;
        if !actor.permits(&group.location_id) {
            return Err(BookingError::Forbidden);
        }
        if request.location_id != group.location_id {
            return Err(BookingError::validation(
                "an appointment group cannot move to another location",
            ));
        }

        let members = store::fetch_group_members(&self.pool, group_id).await?;

        let update_ids: Vec<String> = request
            .update_appointments
            .iter()
            .map(|member| member.id.clone())
            .collect();
        let update_set: HashSet<&str> = update_ids.iter().map(String::as_str).collect();
        if update_set.len() != update_ids.len() {
            return Err(BookingError::conflict(
                "duplicate appointment id in update list",
            ));
        }
        let delete_set: HashSet<&str> = request
            .delete_appointment_ids
            .iter()
            .map(String::as_str)
            .collect();
        if let Some(shared) = update_set.intersection(&delete_set).next() {
            return Err(BookingError::conflict(format!(
                "appointment {shared} appears in both update and delete lists"
            )));
        }

        let by_id: HashMap<&str, &AppointmentRow> = members
            .iter()
            .map(|member| (member.id.as_str(), member))
            .collect();
        for id in update_set.iter().chain(delete_set.iter()) {
            if !by_id.contains_key(id) {
                return Err(BookingError::not_found("appointment", (*id).to_string()));
            }
        }

        // Exactly one primary must survive the whole operation.
        let mut primaries = 0usize;
        for member in &members {
            let id = member.id.as_str();
            if delete_set.contains(id) {
                continue;
            }
            if let Some(update) = request
                .update_appointments
                .iter()
                .find(|update| update.id == member.id)
            {
                if update.is_primary.unwrap_or(member.is_primary) {
                    primaries += 1;
                }
            } else if member.is_primary {
                primaries += 1;
            }
        }
        primaries += request
            .create_appointments
            .iter()
            .filter(|member| member.is_primary)
            .count();
        if primaries != 1 {
            return Err(BookingError::conflict(
                "appointment group must have exactly one primary appointment",
            ));
        }

        let create_customers = request
            .create_appointments
            .iter()
            .map(|member| {
                CustomerRef::from_request(
                    member.customer_id.clone(),
                    member.marketplace_customer_id.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let update_customers = request
            .update_appointments
            .iter()
            .map(|member| {
                CustomerRef::from_request(
                    member.customer_id.clone(),
                    member.marketplace_customer_id.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        try_join_all(
            create_customers
                .iter()
                .chain(update_customers.iter())
                .flatten()
                .map(|customer| store::fetch_customer(&self.pool, customer)),
        )
        .await?;

        let created_validated = try_join_all(request.create_appointments.iter().map(|member| {
            validate_details(&self.graph, &group.location_id, &member.details)
        }))
        .await?;
        let updated_validated = try_join_all(request.update_appointments.iter().map(|member| {
            validate_details(&self.graph, &group.location_id, &member.details)
        }))
        .await?;
        let create_codes = self
            .next_codes(request.create_appointments.len(), GROUP_CODE_RETRIES)
            .await?;

        let group_date = request
            .date
            .map(|date| date.to_string())
            .unwrap_or_else(|| group.date.clone());

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        if request.date.is_some() {
            store::set_group_date(&mut tx, group_id, &group_date).await?;
        }

        for id in &request.delete_appointment_ids {
            store::soft_delete_appointment(&mut tx, id, &now).await?;
            store::soft_delete_details_for(&mut tx, id, &now).await?;
        }

        // Member updates are tombstone-and-recreate under the original code;
        // soft-deleted rows free their code for the replacement row inside
        // this same transaction.
        for ((update, details), customer) in request
            .update_appointments
            .iter()
            .zip(updated_validated.iter())
            .zip(update_customers.into_iter())
        {
            let old = by_id[update.id.as_str()];
            store::soft_delete_appointment(&mut tx, &old.id, &now).await?;
            store::soft_delete_details_for(&mut tx, &old.id, &now).await?;

            let (customer_id, marketplace_customer_id) = match &customer {
                Some(customer) => (
                    customer.registered_id().map(str::to_string),
                    customer.marketplace_id().map(str::to_string),
                ),
                None => (old.customer_id.clone(), old.marketplace_customer_id.clone()),
            };
            let row = AppointmentRow {
                id: new_id(),
                location_id: old.location_id.clone(),
                appointment_group_id: Some(group_id.to_string()),
                customer_id,
                marketplace_customer_id,
                date: request
                    .date
                    .map(|date| date.to_string())
                    .unwrap_or_else(|| old.date.clone()),
                status: old.status,
                is_primary: update.is_primary.unwrap_or(old.is_primary),
                appointment_code: old.appointment_code.clone(),
                booking_source: old.booking_source,
                cancel_reason: old.cancel_reason.clone(),
                number_rating: old.number_rating,
                content_review: old.content_review.clone(),
                created_at: now.clone(),
                deleted_at: None,
            };
            store::insert_appointment(&mut tx, &row).await?;
            write_details(&mut tx, &row.id, details, old.status, &now).await?;
        }

        for ((member, details), code) in request
            .create_appointments
            .iter()
            .zip(created_validated.iter())
            .zip(create_codes.into_iter())
        {
            let customer = CustomerRef::from_request(
                member.customer_id.clone(),
                member.marketplace_customer_id.clone(),
            )?;
            let row = AppointmentRow {
                id: new_id(),
                location_id: group.location_id.clone(),
                appointment_group_id: Some(group_id.to_string()),
                customer_id: customer.as_ref().and_then(|c| c.registered_id()).map(str::to_string),
                marketplace_customer_id: customer
                    .as_ref()
                    .and_then(|c| c.marketplace_id())
                    .map(str::to_string),
                date: group_date.clone(),
                status: AppointmentStatus::New,
                is_primary: member.is_primary,
                appointment_code: code,
                booking_source: BookingSource::Dashboard,
                cancel_reason: None,
                number_rating: None,
                content_review: None,
                created_at: now.clone(),
                deleted_at: None,
            };
            store::insert_appointment(&mut tx, &row).await?;
            write_details(&mut tx, &row.id, details, AppointmentStatus::New, &now).await?;
        }

        tx.commit().await?;

        let aggregates = store::load_group_aggregates(&self.pool, group_id).await?;
        self.emit(EventKind::Edited, &aggregates);
        log_activity(
            &self.pool,
            "appointment_group_updated",
            &format!("Appointment group {group_id} updated"),
            Some(&actor.staff_id),
            None,
        )
        .await;
        Ok(aggregates)
    }

    pub async fn delete_appointment(
        &self,
        actor: &Actor,
        appointment_id: &str,
    ) -> Result<(), BookingError> {
        let appointment = store::fetch_appointment(&self.pool, appointment_id).await?;
        if !actor.permits(&appointment.location_id) {
            return Err(BookingError::Forbidden);
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        store::soft_delete_appointment(&mut tx, appointment_id, &now).await?;
        store::soft_delete_details_for(&mut tx, appointment_id, &now).await?;
        tx.commit().await?;

        log_activity(
            &self.pool,
            "appointment_deleted",
            &format!("Appointment {} deleted", appointment.appointment_code),
            Some(&actor.staff_id),
            Some(appointment_id),
        )
        .await;
        Ok(())
    }

    // -- status --

    pub async fn update_status(
        &self,
        actor: &Actor,
        appointment_id: &str,
        status: AppointmentStatus,
        cancel_reason: Option<String>,
    ) -> Result<AppointmentAggregate, BookingError> {
        let appointment = store::fetch_appointment(&self.pool, appointment_id).await?;
        if !actor.permits(&appointment.location_id) {
            return Err(BookingError::Forbidden);
        }
        let aggregate = self
            .apply_transition(&appointment, status, cancel_reason.as_deref())
            .await?;
        log_activity(
            &self.pool,
            "appointment_status_updated",
            &format!(
                "Appointment {} moved to {status}",
                appointment.appointment_code
            ),
            Some(&actor.staff_id),
            Some(appointment_id),
        )
        .await;
        Ok(aggregate)
    }

    pub async fn cancel(
        &self,
        customer: &CustomerRef,
        appointment_id: &str,
        cancel_reason: &str,
    ) -> Result<AppointmentAggregate, BookingError> {
        let appointment =
            store::fetch_appointment_for_customer(&self.pool, appointment_id, customer).await?;
        let aggregate = self
            .apply_transition(&appointment, AppointmentStatus::Cancel, Some(cancel_reason))
            .await?;
        log_activity(
            &self.pool,
            "appointment_cancelled",
            &format!("Appointment {} cancelled", appointment.appointment_code),
            None,
            Some(appointment_id),
        )
        .await;
        Ok(aggregate)
    }

    pub async fn set_ready(
        &self,
        customer: &CustomerRef,
        appointment_id: &str,
    ) -> Result<AppointmentAggregate, BookingError> {
        let appointment =
            store::fetch_appointment_for_customer(&self.pool, appointment_id, customer).await?;
        let aggregate = self
            .apply_transition(&appointment, AppointmentStatus::Arrived, None)
            .await?;
        log_activity(
            &self.pool,
            "appointment_ready",
            &format!("Appointment {} marked ready", appointment.appointment_code),
            None,
            Some(appointment_id),
        )
        .await;
        Ok(aggregate)
    }

    /// Shared transition path: table check, cancel-reason rule, detail
    /// propagation where each detail's own transition is legal, primary
    /// promotion on cancel.
    async fn apply_transition(
        &self,
        appointment: &AppointmentRow,
        to: AppointmentStatus,
        cancel_reason: Option<&str>,
    ) -> Result<AppointmentAggregate, BookingError> {
        ensure_transition(appointment.status, to)?;
        if to == AppointmentStatus::Cancel
            && cancel_reason.map(str::trim).map_or(true, str::is_empty)
        {
            return Err(BookingError::validation(
                "a cancel reason is required to cancel an appointment",
            ));
        }

        let details = store::fetch_details(&self.pool, &appointment.id).await?;
        let siblings = match (&appointment.appointment_group_id, to) {
            (Some(group_id), AppointmentStatus::Cancel) if appointment.is_primary => {
                store::fetch_group_members(&self.pool, group_id).await?
            }
            _ => Vec::new(),
        };

        let mut tx = self.pool.begin().await?;
        store::set_status(&mut tx, &appointment.id, to, cancel_reason).await?;
        for detail in &details {
            if transition_allowed(detail.status, to) {
                store::set_detail_status(&mut tx, &detail.id, to).await?;
            }
        }
        if to == AppointmentStatus::Cancel
            && appointment.appointment_group_id.is_some()
            && appointment.is_primary
        {
            store::set_primary(&mut tx, &appointment.id, false).await?;
            let successor = siblings.iter().find(|sibling| {
                sibling.id != appointment.id && sibling.status != AppointmentStatus::Cancel
            });
            if let Some(successor) = successor {
                store::set_primary(&mut tx, &successor.id, true).await?;
            }
        }
        tx.commit().await?;

        let aggregate = store::load_aggregate(&self.pool, &appointment.id).await?;
        self.emit(EventKind::Edited, std::slice::from_ref(&aggregate));
        Ok(aggregate)
    }

    // -- customer-facing slot changes --

    pub async fn reschedule(
        &self,
        customer: &CustomerRef,
        appointment_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<AppointmentAggregate, BookingError> {
        let appointment =
            store::fetch_appointment_for_customer(&self.pool, appointment_id, customer).await?;
        let back_to_new = match appointment.status {
            AppointmentStatus::New => false,
            status if transition_allowed(status, AppointmentStatus::New) => true,
            status => {
                return Err(BookingError::StatusForbids {
                    status,
                    action: "rescheduled",
                })
            }
        };

        let details = store::fetch_details(&self.pool, appointment_id).await?;
        let earliest = details
            .iter()
            .map(|detail| detail.start_time)
            .min()
            .ok_or_else(|| {
                BookingError::validation("appointment has no details to reschedule")
            })?;
        let delta = start_time - earliest;

        let mut tx = self.pool.begin().await?;
        store::set_date(&mut tx, appointment_id, &start_time.date_naive().to_string()).await?;
        if back_to_new {
            store::set_status(&mut tx, appointment_id, AppointmentStatus::New, None).await?;
        }
        for detail in &details {
            store::set_detail_start(&mut tx, &detail.id, detail.start_time + delta).await?;
            if back_to_new && transition_allowed(detail.status, AppointmentStatus::New) {
                store::set_detail_status(&mut tx, &detail.id, AppointmentStatus::New).await?;
            }
        }
        tx.commit().await?;

        let aggregate = store::load_aggregate(&self.pool, appointment_id).await?;
        self.emit(EventKind::Edited, std::slice::from_ref(&aggregate));
        log_activity(
            &self.pool,
            "appointment_rescheduled",
            &format!(
                "Appointment {} rescheduled to {}",
                appointment.appointment_code,
                start_time.to_rfc3339()
            ),
            None,
            Some(appointment_id),
        )
        .await;
        Ok(aggregate)
    }

    pub async fn rate(
        &self,
        customer: &CustomerRef,
        appointment_id: &str,
        number_rating: i64,
        content_review: Option<String>,
    ) -> Result<AppointmentAggregate, BookingError> {
        let appointment =
            store::fetch_appointment_for_customer(&self.pool, appointment_id, customer).await?;
        if appointment.status != AppointmentStatus::Completed {
            return Err(BookingError::StatusForbids {
                status: appointment.status,
                action: "rated",
            });
        }
        if !(1..=5).contains(&number_rating) {
            return Err(BookingError::validation("rating must be between 1 and 5"));
        }

        let mut tx = self.pool.begin().await?;
        store::set_rating(&mut tx, appointment_id, number_rating, content_review.as_deref()).await?;
        tx.commit().await?;

        log_activity(
            &self.pool,
            "appointment_rated",
            &format!(
                "Appointment {} rated {number_rating}",
                appointment.appointment_code
            ),
            None,
            Some(appointment_id),
        )
        .await;
        store::load_aggregate(&self.pool, appointment_id).await
    }
}

/// Inserts detail rows plus their staff links for one appointment. Durations
/// come from validation, never from the caller.
async fn write_details(
    conn: &mut SqliteConnection,
    appointment_id: &str,
    details: &[ValidatedDetail],
    status: AppointmentStatus,
    created_at: &str,
) -> Result<(), BookingError> {
    for detail in details {
        let row = AppointmentDetailRow {
            id: new_id(),
            appointment_id: appointment_id.to_string(),
            service_id: detail.service_id.clone(),
            resource_id: detail.resource_id.clone(),
            start_time: detail.start_time,
            duration_minutes: detail.duration_minutes,
            status,
            created_at: created_at.to_string(),
            deleted_at: None,
        };
        store::insert_detail(conn, &row).await?;
        for staff_id in &detail.staff_ids {
            store::insert_detail_staff(conn, &row.id, staff_id).await?;
        }
    }
    Ok(())
}
