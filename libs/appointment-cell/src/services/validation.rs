// libs/appointment-cell/src/services/validation.rs
//
// Pure booking rules. Each function takes already-fetched state so the
// rules stay unit-testable without a store; the booking engine owns the
// ordering and the fetches.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::models::{Appointment, BookingError};

/// The requested start must lie at least the booking lead buffer past the
/// clinic clock.
pub fn ensure_lead_buffer(
    date: NaiveDate,
    start: NaiveTime,
    now: NaiveDateTime,
    lead_minutes: i64,
) -> Result<(), BookingError> {
    if date.and_time(start) < now + Duration::minutes(lead_minutes) {
        return Err(BookingError::PastOrTooSoon {
            lead_minutes,
            now: now.to_string(),
        });
    }
    Ok(())
}

/// At most `max` live appointments per patient per doctor per day.
/// `same_day` is the patient's Scheduled appointments on the target date.
pub fn ensure_daily_cap(
    same_day: &[Appointment],
    doctor_id: Uuid,
    max: i64,
) -> Result<(), BookingError> {
    let with_doctor = same_day.iter().filter(|a| a.doctor_id == doctor_id).count() as i64;
    if with_doctor >= max {
        return Err(BookingError::DailyCapReached { max });
    }
    Ok(())
}

/// Half-open interval overlap against the patient's same-day appointments,
/// regardless of doctor. Back-to-back bookings (end == next start) pass.
pub fn ensure_no_overlap(
    same_day: &[Appointment],
    start: NaiveTime,
    end: NaiveTime,
) -> Result<(), BookingError> {
    for existing in same_day {
        if start < existing.end_time && end > existing.start_time {
            return Err(BookingError::OverlappingAppointment {
                start: existing.start_time,
                end: existing.end_time,
            });
        }
    }
    Ok(())
}

/// Slot bookings refuse an exact-start duplicate in place of the interval
/// overlap test; the slot grid already keeps units disjoint.
pub fn ensure_no_exact_duplicate(
    same_day: &[Appointment],
    start: NaiveTime,
) -> Result<(), BookingError> {
    if same_day.iter().any(|a| a.start_time == start) {
        return Err(BookingError::DuplicateExactTime);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use crate::models::AppointmentStatus;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn appt(doctor_id: Uuid, start: NaiveTime, end: NaiveTime) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id,
            schedule_id: Uuid::new_v4(),
            slot_id: None,
            date: d(1),
            start_time: start,
            end_time: end,
            status: AppointmentStatus::Scheduled,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn lead_buffer_boundaries() {
        let now = d(1).and_time(t(10, 0));

        // 10 minutes out fails a 15-minute lead, 20 minutes out passes.
        assert_matches!(
            ensure_lead_buffer(d(1), t(10, 10), now, 15),
            Err(BookingError::PastOrTooSoon { lead_minutes: 15, .. })
        );
        assert_matches!(ensure_lead_buffer(d(1), t(10, 20), now, 15), Ok(()));
        // Exactly on the boundary is allowed.
        assert_matches!(ensure_lead_buffer(d(1), t(10, 15), now, 15), Ok(()));
        // Yesterday is past no matter the time.
        assert_matches!(
            ensure_lead_buffer(d(1), t(23, 0), d(2).and_time(t(0, 0)), 15),
            Err(BookingError::PastOrTooSoon { .. })
        );
    }

    #[test]
    fn daily_cap_counts_only_this_doctor() {
        let doctor = Uuid::new_v4();
        let other = Uuid::new_v4();
        let same_day = vec![
            appt(doctor, t(9, 0), t(9, 30)),
            appt(other, t(10, 0), t(10, 30)),
        ];

        assert_matches!(ensure_daily_cap(&same_day, doctor, 2), Ok(()));

        let same_day = vec![
            appt(doctor, t(9, 0), t(9, 30)),
            appt(doctor, t(10, 0), t(10, 30)),
        ];
        assert_matches!(
            ensure_daily_cap(&same_day, doctor, 2),
            Err(BookingError::DailyCapReached { max: 2 })
        );
        // The cap is per doctor.
        assert_matches!(ensure_daily_cap(&same_day, other, 2), Ok(()));
    }

    #[test]
    fn overlap_is_half_open() {
        let doctor = Uuid::new_v4();
        let same_day = vec![appt(doctor, t(10, 0), t(10, 30))];

        assert_matches!(
            ensure_no_overlap(&same_day, t(10, 15), t(10, 45)),
            Err(BookingError::OverlappingAppointment { .. })
        );
        assert_matches!(
            ensure_no_overlap(&same_day, t(9, 45), t(10, 15)),
            Err(BookingError::OverlappingAppointment { .. })
        );
        // Touching endpoints do not overlap.
        assert_matches!(ensure_no_overlap(&same_day, t(10, 30), t(11, 0)), Ok(()));
        assert_matches!(ensure_no_overlap(&same_day, t(9, 30), t(10, 0)), Ok(()));
    }

    #[test]
    fn exact_start_duplicate_detected() {
        let same_day = vec![appt(Uuid::new_v4(), t(10, 0), t(10, 30))];

        assert_matches!(
            ensure_no_exact_duplicate(&same_day, t(10, 0)),
            Err(BookingError::DuplicateExactTime)
        );
        assert_matches!(ensure_no_exact_duplicate(&same_day, t(10, 30)), Ok(()));
    }
}
