use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BookingError;

/// Appointment and appointment-detail lifecycle. Stored as TEXT, wire format
/// SCREAMING_SNAKE_CASE on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    New,
    Confirmed,
    Arrived,
    InService,
    Completed,
    Cancel,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Confirmed => "CONFIRMED",
            Self::Arrived => "ARRIVED",
            Self::InService => "IN_SERVICE",
            Self::Completed => "COMPLETED",
            Self::Cancel => "CANCEL",
            Self::NoShow => "NO_SHOW",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancel | Self::NoShow)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transition table. Every status write in the engine goes through this
/// check; there is no other path to a status column.
///
/// CONFIRMED -> NEW exists so a reschedule can put a confirmed booking back
/// into the unconfirmed queue. ARRIVED is reachable only from NEW and
/// CONFIRMED. COMPLETED, CANCEL and NO_SHOW have no outgoing edges.
pub fn transition_allowed(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    use AppointmentStatus::*;
    matches!(
        (from, to),
        (New, Confirmed)
            | (New, Arrived)
            | (New, Cancel)
            | (New, NoShow)
            | (Confirmed, New)
            | (Confirmed, Arrived)
            | (Confirmed, Cancel)
            | (Confirmed, NoShow)
            | (Arrived, InService)
            | (Arrived, Cancel)
            | (Arrived, NoShow)
            | (InService, Completed)
            | (InService, Cancel)
    )
}

pub fn ensure_transition(
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Result<(), BookingError> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition { from, to })
    }
}
