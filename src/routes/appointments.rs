use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::booking::{
    CreateAppointmentRequest, CreateGroupRequest, UpdateAppointmentRequest, UpdateGroupRequest,
};
use crate::error::BookingError;
use crate::models::Actor;
use crate::state::AppState;
use crate::status::AppointmentStatus;

pub fn configure(cfg: &mut web::ServiceConfig) {
    // Registered as full-path resources rather than a `/api` scope: an actix
    // scope matches its prefix greedily, so a `/api` scope here would swallow
    // the `/api/customer/...` routes registered by the customer module.
    cfg.service(web::resource("/api/appointments").route(web::post().to(create_appointment)))
        .service(
            web::resource("/api/appointments/{id}")
                .route(web::get().to(get_appointment))
                .route(web::put().to(update_appointment))
                .route(web::delete().to(delete_appointment)),
        )
        .service(
            web::resource("/api/appointments/{id}/status").route(web::post().to(update_status)),
        )
        .service(web::resource("/api/appointment-groups").route(web::post().to(create_group)))
        .service(
            web::resource("/api/appointment-groups/{id}").route(web::put().to(update_group)),
        );
}

/// Staff identity arrives as a header; authentication itself lives upstream.
async fn staff_actor(req: &HttpRequest, state: &AppState) -> Result<Actor, BookingError> {
    let staff_id = req
        .headers()
        .get("X-Staff-Id")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| BookingError::validation("X-Staff-Id header is required"))?;
    Actor::load(&state.db, staff_id).await
}

async fn create_appointment(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<CreateAppointmentRequest>,
) -> Result<HttpResponse, BookingError> {
    let actor = staff_actor(&req, &state).await?;
    let aggregate = state
        .booking
        .create_appointment(&actor, payload.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(aggregate))
}

async fn get_appointment(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let actor = staff_actor(&req, &state).await?;
    let aggregate = state.booking.get_appointment(&actor, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(aggregate))
}

async fn update_appointment(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    payload: web::Json<UpdateAppointmentRequest>,
) -> Result<HttpResponse, BookingError> {
    let actor = staff_actor(&req, &state).await?;
    let aggregate = state
        .booking
        .update_appointment(&actor, &path.into_inner(), payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(aggregate))
}

async fn delete_appointment(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, BookingError> {
    let actor = staff_actor(&req, &state).await?;
    state
        .booking
        .delete_appointment(&actor, &path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: AppointmentStatus,
    #[serde(default)]
    cancel_reason: Option<String>,
}

async fn update_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    payload: web::Json<StatusPayload>,
) -> Result<HttpResponse, BookingError> {
    let actor = staff_actor(&req, &state).await?;
    let payload = payload.into_inner();
    let aggregate = state
        .booking
        .update_status(&actor, &path.into_inner(), payload.status, payload.cancel_reason)
        .await?;
    Ok(HttpResponse::Ok().json(aggregate))
}

async fn create_group(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<CreateGroupRequest>,
) -> Result<HttpResponse, BookingError> {
    let actor = staff_actor(&req, &state).await?;
    let aggregates = state
        .booking
        .create_appointment_group(&actor, payload.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(aggregates))
}

async fn update_group(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    payload: web::Json<UpdateGroupRequest>,
) -> Result<HttpResponse, BookingError> {
    let actor = staff_actor(&req, &state).await?;
    let aggregates = state
        .booking
        .update_appointment_group(&actor, &path.into_inner(), payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(aggregates))
}
