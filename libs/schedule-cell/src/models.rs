// libs/schedule-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// SCHEDULE WINDOW MODELS
// ==============================================================================

/// A doctor's declared working window for one date.
///
/// The booking mode is a tagged variant so slot-based and range-based
/// windows carry their own fields instead of overloading one integer as
/// both a derived slot count and an admin-set capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(flatten)]
    pub mode: ScheduleMode,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Window pre-divided into uniform bookable units at creation time.
    FixedSlot { slot_duration_minutes: i64 },
    /// No sub-divisions; patients pick any sub-interval, gated by a
    /// concurrent-booking capacity counter.
    FlexibleRange { capacity: i32, booked_count: i32 },
}

impl ScheduleWindow {
    /// Total bookable units. Derived for FixedSlot, admin-set for
    /// FlexibleRange.
    pub fn capacity(&self) -> i64 {
        match &self.mode {
            ScheduleMode::FixedSlot { slot_duration_minutes } => {
                if *slot_duration_minutes <= 0 {
                    return 0;
                }
                let span = (self.end_time - self.start_time).num_minutes();
                span / slot_duration_minutes
            }
            ScheduleMode::FlexibleRange { capacity, .. } => *capacity as i64,
        }
    }

    pub fn contains_interval(&self, start: NaiveTime, end: NaiveTime) -> bool {
        start >= self.start_time && start < self.end_time && end > start && end <= self.end_time
    }
}

/// A single bookable unit of a FixedSlot window. Spans are immutable after
/// generation; only `taken` ever changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub taken: bool,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduleRequest {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(flatten)]
    pub mode: CreateScheduleMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CreateScheduleMode {
    FixedSlot { slot_duration_minutes: i64 },
    FlexibleRange { capacity: i32 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRangeQuery {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

/// What a patient can still book inside one window.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotListing {
    /// Untaken slots, ordered by start time.
    Slots { slots: Vec<Slot> },
    /// Flexible window descriptor; `available` is false once the
    /// concurrent-booking capacity is used up.
    Range {
        start_time: NaiveTime,
        end_time: NaiveTime,
        capacity: i32,
        booked_count: i32,
        available: bool,
    },
}

/// Proof of a successful reservation, consumed by the booking engine.
/// For FixedSlot reservations it carries the reserved slot so appointment
/// times are copied from the unit that was actually taken.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub schedule_id: Uuid,
    pub slot: Option<Slot>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleError {
    #[error("Schedule not found")]
    NotFound,

    #[error("End time must be after start time")]
    InvalidTimeRange,

    #[error("Schedule must start at least {lead_minutes} minutes in the future (current clinic time: {now})")]
    PastOrTooSoon { lead_minutes: i64, now: String },

    #[error("An identical schedule window already exists for this doctor and date")]
    DuplicateWindow,

    #[error("Schedule has active appointments and cannot be removed")]
    ScheduleInUse,

    #[error("Invalid schedule parameters: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl ScheduleError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleError::NotFound => "schedule_not_found",
            ScheduleError::InvalidTimeRange => "invalid_time_range",
            ScheduleError::PastOrTooSoon { .. } => "past_or_too_soon",
            ScheduleError::DuplicateWindow => "duplicate_window",
            ScheduleError::ScheduleInUse => "schedule_in_use",
            ScheduleError::Validation(_) => "invalid_schedule",
            ScheduleError::Database(_) => "storage_error",
        }
    }
}

/// Failure modes of the atomic reserve step. The booking engine maps these
/// onto its own error taxonomy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReserveError {
    #[error("Slot not found in this schedule")]
    SlotNotFound,

    #[error("Slot is already taken")]
    SlotTaken,

    #[error("No remaining capacity in this schedule window")]
    CapacityExhausted,

    /// The capacity counter moved under us but capacity remains; the caller
    /// may re-read and retry once.
    #[error("Concurrent update to schedule capacity")]
    TransientConflict,

    #[error("Database error: {0}")]
    Database(String),
}
