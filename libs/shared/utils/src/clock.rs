use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};

/// Source of "now" in the clinic's single fixed civil timezone.
///
/// Every wall-clock comparison in the booking core goes through this trait
/// so tests can pin the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn time_now(&self) -> NaiveTime {
        self.now().time()
    }
}

/// System clock shifted into the configured clinic offset.
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(utc_offset_minutes: i32) -> Self {
        // Offsets outside +/-24h are rejected by chrono; fall back to UTC
        // rather than panicking on a bad env value.
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Clock pinned to one instant, for tests.
pub struct FixedClock {
    now: DateTime<FixedOffset>,
}

impl FixedClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self { now }
    }

    /// Parse an RFC 3339 instant, e.g. "2025-06-01T10:00:00+05:30".
    pub fn at(rfc3339: &str) -> Self {
        Self {
            now: DateTime::parse_from_rfc3339(rfc3339).expect("valid rfc3339 instant"),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_pinned_instant() {
        let clock = FixedClock::at("2025-06-01T10:00:00+05:30");
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(clock.time_now(), NaiveTime::from_hms_opt(10, 0, 0).unwrap());
    }

    #[test]
    fn system_clock_rejects_out_of_range_offset() {
        // 25 hours east is invalid; must fall back to UTC, not panic.
        let clock = SystemClock::new(25 * 60);
        assert_eq!(clock.now().offset().local_minus_utc(), 0);
    }

    #[test]
    fn system_clock_applies_clinic_offset() {
        let clock = SystemClock::new(330);
        assert_eq!(clock.now().offset().local_minus_utc(), 330 * 60);
    }
}
