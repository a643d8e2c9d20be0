/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Cron expression evaluation.
//!
//! Pure functions computing the next fire time for a trigger spec. All
//! evaluation is timezone-explicit: cron expressions are evaluated in the
//! schedule's configured timezone (never local-host time) and the result
//! is converted back to UTC. This avoids double-fire ambiguity around DST
//! transitions.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use croner::Cron;

use crate::error::ValidationError;

/// Computes the next fire time for a standard 5-field cron expression,
/// strictly after `from`.
///
/// Supports `*`, ranges, steps, and lists in the minute, hour,
/// day-of-month, month, and day-of-week fields. Deterministic: repeated
/// calls with the same `from` return the same instant.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidCronExpression`] for malformed
/// expressions and [`ValidationError::InvalidTimezone`] for unknown
/// timezone names.
pub fn next_fire_time(
    expression: &str,
    timezone: &str,
    from: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    let cron = parse_expression(expression)?;
    let tz: Tz = timezone
        .parse()
        .map_err(|_| ValidationError::InvalidTimezone(timezone.to_string()))?;

    let zoned_from = from.with_timezone(&tz);
    let next = cron
        .find_next_occurrence(&zoned_from, false)
        .map_err(|e| ValidationError::InvalidCronExpression {
            expression: expression.to_string(),
            message: e.to_string(),
        })?;

    Ok(next.with_timezone(&Utc))
}

/// Computes the next fire time for an interval trigger: `from` plus the
/// interval, rejecting zero-minute intervals.
pub fn next_interval_fire(
    interval_minutes: u32,
    from: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    if interval_minutes == 0 {
        return Err(ValidationError::ZeroInterval);
    }
    Ok(from + Duration::minutes(i64::from(interval_minutes)))
}

/// Parses a cron expression, validating it without evaluating.
pub fn parse_expression(expression: &str) -> Result<Cron, ValidationError> {
    Cron::new(expression)
        .parse()
        .map_err(|e| ValidationError::InvalidCronExpression {
            expression: expression.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_fire_midnight_utc() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = next_fire_time("0 0 * * *", "UTC", from).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_next_fire_is_idempotent() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let first = next_fire_time("*/15 * * * *", "UTC", from).unwrap();
        let second = next_fire_time("*/15 * * * *", "UTC", from).unwrap();

        assert_eq!(first, second);
        assert!(first > from);
    }

    #[test]
    fn test_next_fire_strictly_after_from() {
        // `from` is exactly on a fire boundary; the result must be the
        // next occurrence, not `from` itself.
        let from = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let next = next_fire_time("0 0 * * *", "UTC", from).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_next_fire_respects_timezone() {
        // Midnight in New York is 05:00 UTC during EST.
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = next_fire_time("0 0 * * *", "America/New_York", from).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 5, 0, 0).unwrap());
    }

    #[test]
    fn test_ranges_steps_and_lists() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(next_fire_time("0-30/10 * * * *", "UTC", from).is_ok());
        assert!(next_fire_time("0 9,17 * * 1-5", "UTC", from).is_ok());
    }

    #[test]
    fn test_invalid_expression_rejected() {
        let from = Utc::now();

        let result = next_fire_time("not a cron", "UTC", from);
        assert!(matches!(
            result,
            Err(ValidationError::InvalidCronExpression { .. })
        ));

        let result = next_fire_time("61 * * * *", "UTC", from);
        assert!(matches!(
            result,
            Err(ValidationError::InvalidCronExpression { .. })
        ));
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let result = next_fire_time("0 0 * * *", "Mars/Olympus_Mons", Utc::now());
        assert!(matches!(result, Err(ValidationError::InvalidTimezone(_))));
    }

    #[test]
    fn test_interval_fire() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = next_interval_fire(5, from).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = next_interval_fire(0, Utc::now());
        assert!(matches!(result, Err(ValidationError::ZeroInterval)));
    }
}
