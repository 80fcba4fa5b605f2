// libs/appointment-cell/src/services/lifecycle.rs
use chrono::Duration;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::postgrest::{return_representation, PostgrestClient};
use shared_models::auth::User;
use shared_utils::clock::{Clock, SystemClock};

use schedule_cell::services::availability::AvailabilityService;

use crate::models::{Appointment, AppointmentStatus, CancelError};

/// Post-booking state transitions: cancellation, manual no-show, and the
/// reconciliation sweep.
///
/// Every transition out of Scheduled goes through a status-guarded PATCH
/// (`status=eq.scheduled`), so when cancel and reconcile race, whichever
/// commits first wins and the loser observes an empty representation.
pub struct AppointmentLifecycleService {
    store: Arc<PostgrestClient>,
    availability: AvailabilityService,
    clock: Arc<dyn Clock>,
    cancel_lead_minutes: i64,
}

impl AppointmentLifecycleService {
    pub fn new(config: &AppConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.clinic_utc_offset_minutes));
        Self::with_clock(config, clock)
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(PostgrestClient::new(config)),
            availability: AvailabilityService::with_clock(config, Arc::clone(&clock)),
            clock,
            cancel_lead_minutes: config.rules.cancel_lead_minutes,
        }
    }

    /// Cancel a Scheduled appointment and free its unit.
    ///
    /// Same-day cancellations need at least the cancel lead buffer before
    /// the start time; future dates cancel without restriction.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        requester: &User,
        auth_token: &str,
    ) -> Result<Appointment, CancelError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;

        if !requester.is_admin() && requester.id != appointment.patient_id.to_string() {
            return Err(CancelError::NotOwner);
        }
        if appointment.status.is_terminal() {
            return Err(CancelError::NotCancelable);
        }

        let now = self.clock.now().naive_local();
        let today = now.date();
        if appointment.date < today {
            // Missed the window entirely; reconciliation will complete it.
            return Err(CancelError::TooLateToCancel {
                lead_minutes: self.cancel_lead_minutes,
            });
        }
        if appointment.date == today {
            let cutoff = appointment.date.and_time(appointment.start_time)
                - Duration::minutes(self.cancel_lead_minutes);
            if now > cutoff {
                return Err(CancelError::TooLateToCancel {
                    lead_minutes: self.cancel_lead_minutes,
                });
            }
        }

        let canceled = self
            .transition(appointment_id, AppointmentStatus::Canceled, auth_token)
            .await?
            // Guard missed: reconcile (or another cancel) got there first.
            .ok_or(CancelError::NotCancelable)?;

        self.availability
            .release(canceled.schedule_id, canceled.slot_id, auth_token)
            .await
            .map_err(|e| {
                CancelError::Database(format!(
                    "Appointment canceled but unit not yet released: {}", e
                ))
            })?;

        info!("Canceled appointment {} for patient {}",
              canceled.id, canceled.patient_id);
        Ok(canceled)
    }

    /// Staff-only manual transition for patients who never arrived. The
    /// unit is not released; its time has passed.
    pub async fn mark_no_show(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, CancelError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        if appointment.status.is_terminal() {
            return Err(CancelError::NotCancelable);
        }

        self.transition(appointment_id, AppointmentStatus::NoShow, auth_token)
            .await?
            .ok_or(CancelError::NotCancelable)
    }

    /// Sweep Scheduled appointments whose time has fully passed into
    /// Completed. Idempotent: a second sweep finds nothing, and each row
    /// transition is individually status-guarded.
    ///
    /// Returns the number of appointments actually transitioned.
    pub async fn reconcile_past_appointments(
        &self,
        auth_token: &str,
    ) -> Result<usize, CancelError> {
        let now = self.clock.now().naive_local();
        let today = now.date();
        let time = now.time().format("%H:%M:%S").to_string();

        // Past date, or today with the end time already behind us.
        let filter = format!(
            "(date.lt.{},and(date.eq.{},end_time.lt.{}))",
            today, today, time
        );
        let path = format!(
            "/rest/v1/appointments?status=eq.scheduled&or={}",
            urlencoding::encode(&filter)
        );
        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| CancelError::Database(e.to_string()))?;

        let candidates: Vec<Appointment> = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| CancelError::Database(format!("Failed to parse appointments: {}", e)))?;

        debug!("Reconcile sweep found {} candidate appointments", candidates.len());

        let mut completed = 0;
        for appointment in candidates {
            match self
                .transition(appointment.id, AppointmentStatus::Completed, auth_token)
                .await?
            {
                Some(_) => completed += 1,
                // Lost to a concurrent cancel; nothing to do.
                None => warn!("Appointment {} left Scheduled during sweep", appointment.id),
            }
        }

        if completed > 0 {
            info!("Reconciled {} past appointments to completed", completed);
        }
        Ok(completed)
    }

    async fn fetch_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, CancelError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| CancelError::Database(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or(CancelError::AppointmentNotFound)
            .and_then(|row| {
                serde_json::from_value(row).map_err(|e| {
                    CancelError::Database(format!("Failed to parse appointment: {}", e))
                })
            })
    }

    /// Status-guarded transition out of Scheduled. `None` means the guard
    /// did not match, i.e. the appointment already left Scheduled.
    async fn transition(
        &self,
        appointment_id: Uuid,
        to: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Option<Appointment>, CancelError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.scheduled",
            appointment_id
        );
        let updated: Vec<Value> = self
            .store
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "status": to.as_str() })),
                Some(return_representation()),
            )
            .await
            .map_err(|e| CancelError::Database(e.to_string()))?;

        updated
            .first()
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CancelError::Database(format!("Failed to parse appointment: {}", e)))
    }
}
