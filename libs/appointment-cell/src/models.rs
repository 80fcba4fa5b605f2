// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
    /// Present only for appointments booked into a FixedSlot window.
    pub slot_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Scheduled is the only live state; the other three are terminal.
/// NoShow is set manually by staff, never by the booking flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Canceled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Canceled => "canceled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != AppointmentStatus::Scheduled
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// Booking request. `slot_id` selects a unit of a FixedSlot window;
/// `start_time`/`end_time` pick a sub-interval of a FlexibleRange window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
    pub slot_id: Option<Uuid>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub notes: Option<String>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

/// Booking failures, in the order the engine checks them. Each carries a
/// stable code so clients can react ("pick another slot") without parsing
/// messages.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BookingError {
    #[error("Schedule not found for this doctor")]
    ScheduleNotFound,

    #[error("Schedule is no longer active")]
    ScheduleInactive,

    #[error("Appointment must start at least {lead_minutes} minutes in the future (current clinic time: {now})")]
    PastOrTooSoon { lead_minutes: i64, now: String },

    #[error("Slot not found in this schedule")]
    SlotNotFound,

    #[error("Slot is already taken")]
    SlotTaken,

    #[error("No remaining capacity in this schedule window")]
    CapacityExhausted,

    #[error("Requested time falls outside the schedule window")]
    TimeOutOfBounds,

    #[error("Daily limit of {max} appointments with this doctor reached")]
    DailyCapReached { max: i64 },

    #[error("Overlaps an existing appointment from {start} to {end}")]
    OverlappingAppointment { start: NaiveTime, end: NaiveTime },

    #[error("An appointment at exactly this time already exists")]
    DuplicateExactTime,

    #[error("Database error: {0}")]
    Database(String),
}

impl BookingError {
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::ScheduleNotFound => "schedule_not_found",
            BookingError::ScheduleInactive => "schedule_inactive",
            BookingError::PastOrTooSoon { .. } => "past_or_too_soon",
            BookingError::SlotNotFound => "slot_not_found",
            BookingError::SlotTaken => "slot_taken",
            BookingError::CapacityExhausted => "capacity_exhausted",
            BookingError::TimeOutOfBounds => "time_out_of_bounds",
            BookingError::DailyCapReached { .. } => "daily_cap_reached",
            BookingError::OverlappingAppointment { .. } => "overlapping_appointment",
            BookingError::DuplicateExactTime => "duplicate_exact_time",
            BookingError::Database(_) => "storage_error",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CancelError {
    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Only the booking patient may cancel this appointment")]
    NotOwner,

    #[error("Appointment is not in a cancelable state")]
    NotCancelable,

    #[error("Same-day appointments require at least {lead_minutes} minutes notice to cancel")]
    TooLateToCancel { lead_minutes: i64 },

    #[error("Database error: {0}")]
    Database(String),
}

impl CancelError {
    pub fn code(&self) -> &'static str {
        match self {
            CancelError::AppointmentNotFound => "appointment_not_found",
            CancelError::NotOwner => "not_owner",
            CancelError::NotCancelable => "not_cancelable",
            CancelError::TooLateToCancel { .. } => "too_late_to_cancel",
            CancelError::Database(_) => "storage_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(AppointmentStatus::NoShow).unwrap(),
            serde_json::json!("no_show")
        );
        let parsed: AppointmentStatus = serde_json::from_value(serde_json::json!("canceled")).unwrap();
        assert_eq!(parsed, AppointmentStatus::Canceled);
    }

    #[test]
    fn only_scheduled_is_live() {
        assert!(!AppointmentStatus::Scheduled.is_terminal());
        assert!(AppointmentStatus::Completed.is_terminal());
        assert!(AppointmentStatus::Canceled.is_terminal());
        assert!(AppointmentStatus::NoShow.is_terminal());
    }
}
