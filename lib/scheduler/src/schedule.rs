//! Cron expression parsing and timezone-aware fire-time computation.

use crate::error::SchedulingError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronExpr;
use std::str::FromStr;

/// A parsed, validated cron schedule bound to a timezone.
///
/// Expressions are accepted in standard five-field unix-cron form
/// (`minute hour day-of-month month day-of-week`); a `0 ` seconds field is
/// prepended before handing the expression to the `cron` crate, which
/// requires one.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: CronExpr,
    timezone: Tz,
}

impl CronSchedule {
    /// Parses a five-field cron expression and an IANA timezone name.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingError::InvalidCron` if the expression does not
    /// parse, or `SchedulingError::UnknownTimezone` if the timezone name
    /// does not resolve.
    pub fn parse(cron_expression: &str, timezone: &str) -> Result<Self, SchedulingError> {
        let with_seconds = format!("0 {cron_expression}");
        let expression =
            CronExpr::from_str(&with_seconds).map_err(|e| SchedulingError::InvalidCron {
                message: format!("{cron_expression}: {e}"),
            })?;

        let timezone = Tz::from_str(timezone).map_err(|_| SchedulingError::UnknownTimezone {
            timezone: timezone.to_string(),
        })?;

        Ok(Self { expression, timezone })
    }

    /// Returns the next fire time strictly after `after`, evaluated in this
    /// schedule's timezone and converted back to UTC.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let after_local = after.with_timezone(&self.timezone);
        self.expression
            .after(&after_local)
            .next()
            .map(|next| next.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_valid_five_field_expression() {
        let schedule = CronSchedule::parse("0 7 * * *", "UTC").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 7, 0, 0).unwrap());
    }

    #[test]
    fn rejects_malformed_expression() {
        let err = CronSchedule::parse("not a cron", "UTC").unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidCron { .. }));
    }

    #[test]
    fn rejects_unknown_timezone() {
        let err = CronSchedule::parse("0 7 * * *", "Not/AZone").unwrap_err();
        assert!(matches!(err, SchedulingError::UnknownTimezone { .. }));
    }

    #[test]
    fn every_five_minutes_skips_to_next_future_slot_only() {
        let schedule = CronSchedule::parse("*/5 * * * *", "UTC").unwrap();
        let last_fire = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let recovery_now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 17, 0).unwrap();

        let next = schedule.next_after(recovery_now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 10, 20, 0).unwrap());
        assert!(next > last_fire);
    }

    #[test]
    fn respects_non_utc_timezone() {
        let schedule = CronSchedule::parse("0 9 * * *", "America/New_York").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        // 09:00 America/New_York in January (EST, UTC-5) is 14:00 UTC.
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 14, 0, 0).unwrap());
    }
}
