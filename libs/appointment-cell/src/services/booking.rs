// libs/appointment-cell/src/services/booking.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::postgrest::{return_representation, PostgrestClient};
use shared_utils::clock::{Clock, SystemClock};

use schedule_cell::models::{Reservation, ReserveError, ScheduleError, ScheduleMode, Slot};
use schedule_cell::services::availability::AvailabilityService;

use crate::models::{Appointment, BookAppointmentRequest, BookingError};
use crate::services::validation;

/// The booking engine. Validation runs in a fixed order and short-circuits
/// on the first failure; all pre-checks are advisory, the `reserve` call at
/// the end is the only authoritative claim on a bookable unit.
pub struct AppointmentBookingService {
    store: Arc<PostgrestClient>,
    availability: AvailabilityService,
    clock: Arc<dyn Clock>,
    booking_lead_minutes: i64,
    max_daily_per_doctor: i64,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.clinic_utc_offset_minutes));
        Self::with_clock(config, clock)
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(PostgrestClient::new(config)),
            availability: AvailabilityService::with_clock(config, Arc::clone(&clock)),
            clock,
            booking_lead_minutes: config.rules.booking_lead_minutes,
            max_daily_per_doctor: config.rules.max_daily_per_doctor,
        }
    }

    pub async fn book_appointment(
        &self,
        patient_id: Uuid,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        // 1. Window exists, belongs to the doctor, and is active.
        let window = self
            .availability
            .get_schedule(request.schedule_id, auth_token)
            .await
            .map_err(|e| match e {
                ScheduleError::NotFound => BookingError::ScheduleNotFound,
                other => BookingError::Database(other.to_string()),
            })?;

        if window.doctor_id != request.doctor_id {
            return Err(BookingError::ScheduleNotFound);
        }
        if !window.is_active {
            return Err(BookingError::ScheduleInactive);
        }

        let now = self.clock.now().naive_local();

        // 2. A window on a past date is unbookable before we look at units.
        if window.date < now.date() {
            return Err(BookingError::PastOrTooSoon {
                lead_minutes: self.booking_lead_minutes,
                now: now.to_string(),
            });
        }

        // 3. Resolve the requested unit to a concrete interval.
        let (start, end) = match &window.mode {
            ScheduleMode::FixedSlot { .. } => {
                let slot_id = request.slot_id.ok_or(BookingError::SlotNotFound)?;
                let slot = self.fetch_slot(window.id, slot_id, auth_token).await?;
                if slot.taken {
                    return Err(BookingError::SlotTaken);
                }
                (slot.start_time, slot.end_time)
            }
            ScheduleMode::FlexibleRange { .. } => {
                let (start, end) = request
                    .start_time
                    .zip(request.end_time)
                    .ok_or(BookingError::TimeOutOfBounds)?;
                if !window.contains_interval(start, end) {
                    return Err(BookingError::TimeOutOfBounds);
                }
                (start, end)
            }
        };

        validation::ensure_lead_buffer(window.date, start, now, self.booking_lead_minutes)?;

        // 4-5. Daily cap and collision checks against the patient's other
        // appointments on this date.
        let same_day = self
            .patient_appointments_on(patient_id, window.date, auth_token)
            .await?;
        validation::ensure_daily_cap(&same_day, request.doctor_id, self.max_daily_per_doctor)?;
        // Slot requests carry no caller-chosen end, so collision is judged
        // on the exact start only; free-interval requests get the full
        // half-open overlap test.
        if matches!(window.mode, ScheduleMode::FixedSlot { .. }) {
            validation::ensure_no_exact_duplicate(&same_day, start)?;
        } else {
            validation::ensure_no_overlap(&same_day, start, end)?;
        }

        // 6. Authoritative reservation. A transient CAS miss on a flexible
        // window gets exactly one retry against re-read state.
        let reservation = match self.availability.reserve(&window, request.slot_id, auth_token).await {
            Ok(r) => r,
            Err(ReserveError::TransientConflict) => {
                debug!("Transient capacity conflict on schedule {}, retrying once", window.id);
                let fresh = self
                    .availability
                    .get_schedule(window.id, auth_token)
                    .await
                    .map_err(|e| BookingError::Database(e.to_string()))?;
                self.availability
                    .reserve(&fresh, request.slot_id, auth_token)
                    .await
                    .map_err(map_reserve_error)?
            }
            Err(e) => return Err(map_reserve_error(e)),
        };

        let slot_times = reservation.slot.as_ref().map(|s| (s.start_time, s.end_time));
        let (start, end) = slot_times.unwrap_or((start, end));

        match self
            .insert_appointment(patient_id, &request, window.date, start, end, &reservation, auth_token)
            .await
        {
            Ok(appointment) => {
                info!("Booked appointment {} for patient {} with doctor {} on {}",
                      appointment.id, patient_id, request.doctor_id, appointment.date);
                Ok(appointment)
            }
            Err(e) => {
                // The unit is reserved but no appointment references it;
                // give it back before surfacing the failure.
                warn!("Appointment insert failed after reserve, rolling back: {}", e);
                if let Err(release_err) = self
                    .availability
                    .release(reservation.schedule_id, reservation.slot.as_ref().map(|s| s.id), auth_token)
                    .await
                {
                    warn!("Reservation rollback failed: {}", release_err);
                }
                Err(e)
            }
        }
    }

    /// All appointments of one patient, newest first.
    pub async fn list_patient_appointments(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&order=date.desc,start_time.desc",
            patient_id
        );
        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| BookingError::Database(format!("Failed to parse appointments: {}", e)))
    }

    async fn fetch_slot(
        &self,
        schedule_id: Uuid,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<Slot, BookingError> {
        let path = format!(
            "/rest/v1/time_slots?id=eq.{}&schedule_id=eq.{}",
            slot_id, schedule_id
        );
        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or(BookingError::SlotNotFound)
            .and_then(|row| {
                serde_json::from_value(row)
                    .map_err(|e| BookingError::Database(format!("Failed to parse slot: {}", e)))
            })
    }

    async fn patient_appointments_on(
        &self,
        patient_id: Uuid,
        date: chrono::NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&date=eq.{}&status=eq.scheduled",
            patient_id, date
        );
        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| BookingError::Database(format!("Failed to parse appointments: {}", e)))
    }

    async fn insert_appointment(
        &self,
        patient_id: Uuid,
        request: &BookAppointmentRequest,
        date: chrono::NaiveDate,
        start: chrono::NaiveTime,
        end: chrono::NaiveTime,
        reservation: &Reservation,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let row = json!({
            "patient_id": patient_id,
            "doctor_id": request.doctor_id,
            "schedule_id": reservation.schedule_id,
            "slot_id": reservation.slot.as_ref().map(|s| s.id),
            "date": date,
            "start_time": start,
            "end_time": end,
            "status": "scheduled",
            "notes": request.notes,
        });

        let created: Vec<Value> = self
            .store
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(row),
                Some(return_representation()),
            )
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?;

        created
            .first()
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| BookingError::Database(format!("Failed to parse appointment: {}", e)))?
            .ok_or_else(|| BookingError::Database("Insert returned no representation".to_string()))
    }
}

fn map_reserve_error(e: ReserveError) -> BookingError {
    match e {
        ReserveError::SlotNotFound => BookingError::SlotNotFound,
        ReserveError::SlotTaken => BookingError::SlotTaken,
        ReserveError::CapacityExhausted => BookingError::CapacityExhausted,
        // Second miss in a row; report the window as contended-out rather
        // than looping.
        ReserveError::TransientConflict => BookingError::CapacityExhausted,
        ReserveError::Database(msg) => BookingError::Database(msg),
    }
}
