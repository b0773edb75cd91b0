use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::booking::BookingService;
use crate::notify::BookingEvent;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub booking: BookingService,
    pub events: broadcast::Sender<BookingEvent>,
}
