use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::BookingError;
use crate::models::CustomerRef;
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/customer")
            .service(web::resource("/appointments/{id}/cancel").route(web::post().to(cancel)))
            .service(
                web::resource("/appointments/{id}/reschedule").route(web::post().to(reschedule)),
            )
            .service(web::resource("/appointments/{id}/ready").route(web::post().to(ready)))
            .service(web::resource("/appointments/{id}/rating").route(web::post().to(rate))),
    );
}

#[derive(Debug, Deserialize)]
struct CustomerIdentity {
    #[serde(default)]
    customer_id: Option<String>,
    #[serde(default)]
    marketplace_customer_id: Option<String>,
}

impl CustomerIdentity {
    fn into_ref(self) -> Result<CustomerRef, BookingError> {
        CustomerRef::from_request(self.customer_id, self.marketplace_customer_id)?
            .ok_or_else(|| BookingError::validation("a customer reference is required"))
    }
}

#[derive(Debug, Deserialize)]
struct CancelPayload {
    #[serde(flatten)]
    identity: CustomerIdentity,
    cancel_reason: String,
}

async fn cancel(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<CancelPayload>,
) -> Result<HttpResponse, BookingError> {
    let payload = payload.into_inner();
    let customer = payload.identity.into_ref()?;
    let aggregate = state
        .booking
        .cancel(&customer, &path.into_inner(), &payload.cancel_reason)
        .await?;
    Ok(HttpResponse::Ok().json(aggregate))
}

#[derive(Debug, Deserialize)]
struct ReschedulePayload {
    #[serde(flatten)]
    identity: CustomerIdentity,
    start_time: DateTime<Utc>,
}

async fn reschedule(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ReschedulePayload>,
) -> Result<HttpResponse, BookingError> {
    let payload = payload.into_inner();
    let customer = payload.identity.into_ref()?;
    let aggregate = state
        .booking
        .reschedule(&customer, &path.into_inner(), payload.start_time)
        .await?;
    Ok(HttpResponse::Ok().json(aggregate))
}

#[derive(Debug, Deserialize)]
struct ReadyPayload {
    #[serde(flatten)]
    identity: CustomerIdentity,
}

async fn ready(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ReadyPayload>,
) -> Result<HttpResponse, BookingError> {
    let customer = payload.into_inner().identity.into_ref()?;
    let aggregate = state.booking.set_ready(&customer, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(aggregate))
}

#[derive(Debug, Deserialize)]
struct RatingPayload {
    #[serde(flatten)]
    identity: CustomerIdentity,
    number_rating: i64,
    #[serde(default)]
    content_review: Option<String>,
}

async fn rate(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<RatingPayload>,
) -> Result<HttpResponse, BookingError> {
    let payload = payload.into_inner();
    let customer = payload.identity.into_ref()?;
    let aggregate = state
        .booking
        .rate(
            &customer,
            &path.into_inner(),
            payload.number_rating,
            payload.content_review,
        )
        .await?;
    Ok(HttpResponse::Ok().json(aggregate))
}
