// libs/schedule-cell/src/services/availability.rs
use chrono::{Duration, NaiveDate};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::postgrest::{return_representation, PostgrestClient};
use shared_utils::clock::{Clock, SystemClock};

use crate::models::{
    Reservation, ReserveError, ScheduleError, ScheduleMode, ScheduleWindow, Slot, SlotListing,
};

/// Availability index over schedule windows and their slots.
///
/// Listings are allowed to be stale; `reserve` is the authoritative gate and
/// is executed as a store-side conditional update (a filtered PATCH that
/// matches at most the row state the caller observed), so two concurrent
/// reservations of the same unit resolve to exactly one success.
pub struct AvailabilityService {
    store: Arc<PostgrestClient>,
    clock: Arc<dyn Clock>,
    booking_lead_minutes: i64,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: Arc::new(PostgrestClient::new(config)),
            clock: Arc::new(SystemClock::new(config.clinic_utc_offset_minutes)),
            booking_lead_minutes: config.rules.booking_lead_minutes,
        }
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(PostgrestClient::new(config)),
            clock,
            booking_lead_minutes: config.rules.booking_lead_minutes,
        }
    }

    /// Fetch one schedule window by id.
    pub async fn get_schedule(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<ScheduleWindow, ScheduleError> {
        let path = format!("/rest/v1/doctor_schedules?id=eq.{}", schedule_id);
        let result: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(ScheduleError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| ScheduleError::Database(format!("Failed to parse schedule: {}", e)))
    }

    /// Windows a patient could still book for a doctor in a date range:
    /// active, not past, not capacity-exhausted, and for today not inside
    /// the booking lead buffer.
    pub async fn list_available_schedules(
        &self,
        doctor_id: Uuid,
        date_from: NaiveDate,
        date_to: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<ScheduleWindow>, ScheduleError> {
        debug!("Listing available schedules for doctor {} from {} to {}",
               doctor_id, date_from, date_to);

        let path = format!(
            "/rest/v1/doctor_schedules?doctor_id=eq.{}&is_active=eq.true&date=gte.{}&date=lte.{}&order=date.asc,start_time.asc",
            doctor_id, date_from, date_to
        );
        let result: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        let windows: Vec<ScheduleWindow> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| ScheduleError::Database(format!("Failed to parse schedules: {}", e)))?;

        let earliest_start =
            self.clock.now().naive_local() + Duration::minutes(self.booking_lead_minutes);

        let mut available = Vec::new();
        for window in windows {
            if window.date.and_time(window.start_time) < earliest_start {
                continue;
            }
            if self.has_remaining_capacity(&window, auth_token).await? {
                available.push(window);
            }
        }

        Ok(available)
    }

    /// Bookable units of one window: untaken slots for FixedSlot, the range
    /// descriptor for FlexibleRange.
    pub async fn list_available_slots(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<SlotListing, ScheduleError> {
        let window = self.get_schedule(schedule_id, auth_token).await?;

        match window.mode {
            ScheduleMode::FixedSlot { .. } => {
                let slots = self.free_slots(schedule_id, auth_token).await?;
                Ok(SlotListing::Slots { slots })
            }
            ScheduleMode::FlexibleRange { capacity, booked_count } => Ok(SlotListing::Range {
                start_time: window.start_time,
                end_time: window.end_time,
                capacity,
                booked_count,
                available: booked_count < capacity,
            }),
        }
    }

    /// Atomically claim one bookable unit.
    ///
    /// FixedSlot: compare-and-swap on the slot's `taken` flag via a filtered
    /// PATCH; the store only matches the row while `taken=false`, so a lost
    /// race comes back as an empty representation.
    ///
    /// FlexibleRange: compare-and-swap increment of `booked_count` against
    /// the value the caller observed. A miss with capacity remaining is a
    /// transient conflict the caller may retry once after re-reading.
    pub async fn reserve(
        &self,
        window: &ScheduleWindow,
        slot_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Reservation, ReserveError> {
        match &window.mode {
            ScheduleMode::FixedSlot { .. } => {
                let slot_id = slot_id.ok_or(ReserveError::SlotNotFound)?;
                let slot = self.reserve_slot(window.id, slot_id, auth_token).await?;
                Ok(Reservation { schedule_id: window.id, slot: Some(slot) })
            }
            ScheduleMode::FlexibleRange { capacity, booked_count } => {
                self.reserve_capacity(window.id, *capacity, *booked_count, auth_token)
                    .await?;
                Ok(Reservation { schedule_id: window.id, slot: None })
            }
        }
    }

    /// Give back a unit claimed by `reserve`. The booking engine only calls
    /// this for reservations it knows it holds (rollback and cancellation);
    /// double-release protection is the caller's contract.
    pub async fn release(
        &self,
        schedule_id: Uuid,
        slot_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), ReserveError> {
        match slot_id {
            Some(slot_id) => self.release_slot(schedule_id, slot_id, auth_token).await,
            None => self.release_capacity(schedule_id, auth_token).await,
        }
    }

    // Private helpers

    async fn has_remaining_capacity(
        &self,
        window: &ScheduleWindow,
        auth_token: &str,
    ) -> Result<bool, ScheduleError> {
        match &window.mode {
            ScheduleMode::FlexibleRange { capacity, booked_count } => {
                Ok(booked_count < capacity)
            }
            ScheduleMode::FixedSlot { .. } => {
                let path = format!(
                    "/rest/v1/time_slots?schedule_id=eq.{}&taken=eq.false&select=id&limit=1",
                    window.id
                );
                let free: Vec<Value> = self
                    .store
                    .request(Method::GET, &path, Some(auth_token), None)
                    .await
                    .map_err(|e| ScheduleError::Database(e.to_string()))?;
                Ok(!free.is_empty())
            }
        }
    }

    async fn free_slots(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Slot>, ScheduleError> {
        let path = format!(
            "/rest/v1/time_slots?schedule_id=eq.{}&taken=eq.false&order=start_time.asc",
            schedule_id
        );
        let result: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| ScheduleError::Database(format!("Failed to parse slots: {}", e)))
    }

    async fn reserve_slot(
        &self,
        schedule_id: Uuid,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<Slot, ReserveError> {
        let path = format!(
            "/rest/v1/time_slots?id=eq.{}&schedule_id=eq.{}&taken=eq.false",
            slot_id, schedule_id
        );
        let flipped: Vec<Value> = self
            .store
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "taken": true })),
                Some(return_representation()),
            )
            .await
            .map_err(|e| ReserveError::Database(e.to_string()))?;

        if let Some(row) = flipped.first() {
            return serde_json::from_value(row.clone())
                .map_err(|e| ReserveError::Database(format!("Failed to parse slot: {}", e)));
        }

        // The guard did not match: either the slot is foreign/absent or it
        // was taken before us. Distinguish for the error taxonomy.
        let lookup = format!(
            "/rest/v1/time_slots?id=eq.{}&schedule_id=eq.{}",
            slot_id, schedule_id
        );
        let existing: Vec<Value> = self
            .store
            .request(Method::GET, &lookup, Some(auth_token), None)
            .await
            .map_err(|e| ReserveError::Database(e.to_string()))?;

        if existing.is_empty() {
            Err(ReserveError::SlotNotFound)
        } else {
            debug!("Slot {} lost reservation race", slot_id);
            Err(ReserveError::SlotTaken)
        }
    }

    async fn reserve_capacity(
        &self,
        schedule_id: Uuid,
        capacity: i32,
        observed_booked: i32,
        auth_token: &str,
    ) -> Result<(), ReserveError> {
        if observed_booked >= capacity {
            return Err(ReserveError::CapacityExhausted);
        }

        let path = format!(
            "/rest/v1/doctor_schedules?id=eq.{}&booked_count=eq.{}",
            schedule_id, observed_booked
        );
        let updated: Vec<Value> = self
            .store
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({
                    "booked_count": observed_booked + 1,
                    "updated_at": chrono::Utc::now().to_rfc3339(),
                })),
                Some(return_representation()),
            )
            .await
            .map_err(|e| ReserveError::Database(e.to_string()))?;

        if !updated.is_empty() {
            return Ok(());
        }

        // Counter moved under us. Re-read to decide whether this is genuine
        // exhaustion or a retryable race.
        let window: Vec<Value> = self
            .store
            .request(
                Method::GET,
                &format!("/rest/v1/doctor_schedules?id=eq.{}", schedule_id),
                Some(auth_token),
                None,
            )
            .await
            .map_err(|e| ReserveError::Database(e.to_string()))?;

        let current_booked = window
            .first()
            .and_then(|w| w.get("booked_count"))
            .and_then(|v| v.as_i64())
            .unwrap_or(i64::from(capacity));

        if current_booked >= i64::from(capacity) {
            Err(ReserveError::CapacityExhausted)
        } else {
            Err(ReserveError::TransientConflict)
        }
    }

    async fn release_slot(
        &self,
        schedule_id: Uuid,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ReserveError> {
        let path = format!(
            "/rest/v1/time_slots?id=eq.{}&schedule_id=eq.{}&taken=eq.true",
            slot_id, schedule_id
        );
        let released: Vec<Value> = self
            .store
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "taken": false })),
                Some(return_representation()),
            )
            .await
            .map_err(|e| ReserveError::Database(e.to_string()))?;

        if released.is_empty() {
            // Releasing an already-free slot means the caller broke its
            // contract; log it rather than failing the surrounding cancel.
            warn!("Release of slot {} matched no taken row", slot_id);
        }

        Ok(())
    }

    async fn release_capacity(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ReserveError> {
        // CAS decrement; bounded retries because a busy window legitimately
        // moves the counter between our read and our guard.
        for _ in 0..3 {
            let window: Vec<Value> = self
                .store
                .request(
                    Method::GET,
                    &format!("/rest/v1/doctor_schedules?id=eq.{}", schedule_id),
                    Some(auth_token),
                    None,
                )
                .await
                .map_err(|e| ReserveError::Database(e.to_string()))?;

            let Some(booked) = window
                .first()
                .and_then(|w| w.get("booked_count"))
                .and_then(|v| v.as_i64())
            else {
                return Err(ReserveError::Database("Schedule row disappeared during release".to_string()));
            };

            if booked <= 0 {
                warn!("Release on schedule {} with zero booked_count", schedule_id);
                return Ok(());
            }

            let path = format!(
                "/rest/v1/doctor_schedules?id=eq.{}&booked_count=eq.{}",
                schedule_id, booked
            );
            let updated: Vec<Value> = self
                .store
                .request_with_headers(
                    Method::PATCH,
                    &path,
                    Some(auth_token),
                    Some(json!({
                        "booked_count": booked - 1,
                        "updated_at": chrono::Utc::now().to_rfc3339(),
                    })),
                    Some(return_representation()),
                )
                .await
                .map_err(|e| ReserveError::Database(e.to_string()))?;

            if !updated.is_empty() {
                return Ok(());
            }
        }

        Err(ReserveError::Database(
            "Failed to release schedule capacity after retries".to_string(),
        ))
    }
}
