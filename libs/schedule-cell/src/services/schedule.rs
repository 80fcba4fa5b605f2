// libs/schedule-cell/src/services/schedule.rs
use chrono::Duration;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::postgrest::{return_representation, PostgrestClient};
use shared_utils::clock::{Clock, SystemClock};

use crate::models::{
    CreateScheduleMode, CreateScheduleRequest, ScheduleError, ScheduleWindow,
};
use crate::services::slots::generate_slots;

/// Doctor-facing lifecycle of schedule windows: creation (with eager slot
/// generation), deactivation, and removal.
pub struct ScheduleService {
    store: Arc<PostgrestClient>,
    clock: Arc<dyn Clock>,
    schedule_lead_minutes: i64,
}

impl ScheduleService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: Arc::new(PostgrestClient::new(config)),
            clock: Arc::new(SystemClock::new(config.clinic_utc_offset_minutes)),
            schedule_lead_minutes: config.rules.schedule_lead_minutes,
        }
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(PostgrestClient::new(config)),
            clock,
            schedule_lead_minutes: config.rules.schedule_lead_minutes,
        }
    }

    /// Create a window for a doctor. For FixedSlot windows the bookable
    /// slots are generated and persisted here, in the same call; listing
    /// never computes slots on the fly.
    pub async fn create_schedule(
        &self,
        doctor_id: Uuid,
        request: CreateScheduleRequest,
        auth_token: &str,
    ) -> Result<ScheduleWindow, ScheduleError> {
        if request.end_time <= request.start_time {
            return Err(ScheduleError::InvalidTimeRange);
        }

        match &request.mode {
            CreateScheduleMode::FixedSlot { slot_duration_minutes } => {
                if *slot_duration_minutes <= 0 {
                    return Err(ScheduleError::Validation(
                        "Slot duration must be positive".to_string(),
                    ));
                }
                let span = (request.end_time - request.start_time).num_minutes();
                if span < *slot_duration_minutes {
                    return Err(ScheduleError::Validation(format!(
                        "Window of {} minutes cannot hold a single {}-minute slot",
                        span, slot_duration_minutes
                    )));
                }
            }
            CreateScheduleMode::FlexibleRange { capacity } => {
                if *capacity <= 0 {
                    return Err(ScheduleError::Validation(
                        "Capacity must be positive".to_string(),
                    ));
                }
            }
        }

        // Windows must start at least the lead buffer into the future,
        // measured on the clinic clock.
        let now = self.clock.now();
        let earliest = now.naive_local() + Duration::minutes(self.schedule_lead_minutes);
        if request.date.and_time(request.start_time) < earliest {
            return Err(ScheduleError::PastOrTooSoon {
                lead_minutes: self.schedule_lead_minutes,
                now: now.to_rfc3339(),
            });
        }

        self.ensure_not_duplicate(doctor_id, &request, auth_token).await?;

        let mut row = json!({
            "doctor_id": doctor_id,
            "date": request.date,
            "start_time": request.start_time,
            "end_time": request.end_time,
            "is_active": true,
        });
        match &request.mode {
            CreateScheduleMode::FixedSlot { slot_duration_minutes } => {
                row["mode"] = json!("fixed_slot");
                row["slot_duration_minutes"] = json!(slot_duration_minutes);
            }
            CreateScheduleMode::FlexibleRange { capacity } => {
                row["mode"] = json!("flexible_range");
                row["capacity"] = json!(capacity);
                row["booked_count"] = json!(0);
            }
        }

        let created: Vec<Value> = self
            .store
            .request_with_headers(
                Method::POST,
                "/rest/v1/doctor_schedules",
                Some(auth_token),
                Some(row),
                Some(return_representation()),
            )
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        let window: ScheduleWindow = created
            .first()
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ScheduleError::Database(format!("Failed to parse schedule: {}", e)))?
            .ok_or_else(|| {
                ScheduleError::Database("Insert returned no representation".to_string())
            })?;

        if let CreateScheduleMode::FixedSlot { slot_duration_minutes } = request.mode {
            self.insert_slots(&window, slot_duration_minutes, auth_token)
                .await?;
        }

        info!("Created schedule {} for doctor {} on {} ({} bookable units)",
              window.id, doctor_id, window.date, window.capacity());
        Ok(window)
    }

    /// All windows of a doctor in a date range, active or not. Doctor-facing
    /// listing, unlike the patient-facing availability view.
    pub async fn list_doctor_schedules(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<ScheduleWindow>, ScheduleError> {
        let path = format!(
            "/rest/v1/doctor_schedules?doctor_id=eq.{}&order=date.asc,start_time.asc",
            doctor_id
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
            .map_err(|e| ScheduleError::Database(format!("Failed to parse schedules: {}", e)))
    }

    /// Hide a window from availability listings without touching its slots
    /// or existing appointments.
    pub async fn deactivate_schedule(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<ScheduleWindow, ScheduleError> {
        let path = format!("/rest/v1/doctor_schedules?id=eq.{}", schedule_id);
        let updated: Vec<Value> = self
            .store
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({
                    "is_active": false,
                    "updated_at": chrono::Utc::now().to_rfc3339(),
                })),
                Some(return_representation()),
            )
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        updated
            .first()
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ScheduleError::Database(format!("Failed to parse schedule: {}", e)))?
            .ok_or(ScheduleError::NotFound)
    }

    /// Remove a window and its slots. Refused while any scheduled
    /// appointment still references the window.
    pub async fn delete_schedule(
        &self,
        schedule_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let in_use_path = format!(
            "/rest/v1/appointments?schedule_id=eq.{}&status=eq.scheduled&select=id&limit=1",
            schedule_id
        );
        let in_use: Vec<Value> = self
            .store
            .request(Method::GET, &in_use_path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        if !in_use.is_empty() {
            return Err(ScheduleError::ScheduleInUse);
        }

        // Without return=representation a DELETE comes back bodyless, so ask
        // for the rows to keep the response parseable.
        let slots_path = format!("/rest/v1/time_slots?schedule_id=eq.{}", schedule_id);
        let _: Vec<Value> = self
            .store
            .request_with_headers(
                Method::DELETE,
                &slots_path,
                Some(auth_token),
                None,
                Some(return_representation()),
            )
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        let path = format!("/rest/v1/doctor_schedules?id=eq.{}", schedule_id);
        let deleted: Vec<Value> = self
            .store
            .request_with_headers(
                Method::DELETE,
                &path,
                Some(auth_token),
                None,
                Some(return_representation()),
            )
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        if deleted.is_empty() {
            return Err(ScheduleError::NotFound);
        }

        info!("Deleted schedule {}", schedule_id);
        Ok(())
    }

    async fn ensure_not_duplicate(
        &self,
        doctor_id: Uuid,
        request: &CreateScheduleRequest,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let path = format!(
            "/rest/v1/doctor_schedules?doctor_id=eq.{}&date=eq.{}&start_time=eq.{}&end_time=eq.{}&select=id&limit=1",
            doctor_id, request.date, request.start_time, request.end_time
        );
        let existing: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        if existing.is_empty() {
            Ok(())
        } else {
            Err(ScheduleError::DuplicateWindow)
        }
    }

    async fn insert_slots(
        &self,
        window: &ScheduleWindow,
        slot_duration_minutes: i64,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let slots = generate_slots(
            window.id,
            window.start_time,
            window.end_time,
            slot_duration_minutes,
        );
        debug!("Generating {} slots for schedule {}", slots.len(), window.id);

        let rows: Vec<Value> = slots
            .iter()
            .map(|s| {
                json!({
                    "id": s.id,
                    "schedule_id": s.schedule_id,
                    "start_time": s.start_time,
                    "end_time": s.end_time,
                    "taken": false,
                })
            })
            .collect();

        // PostgREST bulk insert: one POST with an array body.
        let _: Vec<Value> = self
            .store
            .request_with_headers(
                Method::POST,
                "/rest/v1/time_slots",
                Some(auth_token),
                Some(Value::Array(rows)),
                Some(return_representation()),
            )
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        Ok(())
    }
}
