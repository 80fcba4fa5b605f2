use std::env;
use tracing::warn;

/// Booking business rules. Three distinct lead buffers apply (schedule
/// creation, booking, same-day cancellation); they are configuration,
/// not constants.
#[derive(Debug, Clone)]
pub struct BookingRules {
    /// Minimum minutes between "now" and a newly created schedule window.
    pub schedule_lead_minutes: i64,
    /// Minimum minutes between "now" and a bookable start time.
    pub booking_lead_minutes: i64,
    /// Minimum minutes before start for a same-day cancellation.
    pub cancel_lead_minutes: i64,
    /// Maximum Scheduled appointments per patient per doctor per day.
    pub max_daily_per_doctor: i64,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            schedule_lead_minutes: 30,
            booking_lead_minutes: 15,
            cancel_lead_minutes: 120,
            max_daily_per_doctor: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    /// Fixed civil timezone of the clinic, as minutes east of UTC.
    /// All wall-clock comparisons use this single zone.
    pub clinic_utc_offset_minutes: i32,
    pub rules: BookingRules,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            clinic_utc_offset_minutes: env_i64("CLINIC_UTC_OFFSET_MINUTES", 330) as i32,
            rules: BookingRules {
                schedule_lead_minutes: env_i64("SCHEDULE_LEAD_MINUTES", 30),
                booking_lead_minutes: env_i64("BOOKING_LEAD_MINUTES", 15),
                cancel_lead_minutes: env_i64("CANCEL_LEAD_MINUTES", 120),
                max_daily_per_doctor: env_i64("MAX_DAILY_PER_DOCTOR", 2),
            },
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid integer, using default {}", key, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_match_deployment_buffers() {
        let rules = BookingRules::default();
        assert_eq!(rules.schedule_lead_minutes, 30);
        assert_eq!(rules.booking_lead_minutes, 15);
        assert_eq!(rules.cancel_lead_minutes, 120);
        assert_eq!(rules.max_daily_per_doctor, 2);
    }
}
