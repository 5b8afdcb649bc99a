use std::collections::HashSet;

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};

#[derive(Debug, Clone, thiserror::Error)]
pub enum CronError {
    #[error("invalid cron expression: {0}")]
    InvalidExpression(String),
    #[error("invalid field {field:?}: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("no matching time found within one year for: {0}")]
    NotFound(String),
}

struct Fields {
    minutes: HashSet<u32>,
    hours: HashSet<u32>,
    days: HashSet<u32>,
    months: HashSet<u32>,
    weekdays: HashSet<u32>,
}

fn parse_field(field: &str, min_val: u32, max_val: u32) -> Result<HashSet<u32>, String> {
    let mut result = HashSet::new();
    for part in field.split(',') {
        if part == "*" {
            result.extend(min_val..=max_val);
        } else if let Some(step_str) = part.strip_prefix("*/") {
            let step: u32 = step_str.parse().map_err(|_| part.to_string())?;
            if step == 0 {
                return Err(part.to_string());
            }
            let mut v = min_val;
            while v <= max_val {
                result.insert(v);
                v += step;
            }
        } else if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.parse().map_err(|_| part.to_string())?;
            let end: u32 = end.parse().map_err(|_| part.to_string())?;
            if start > end {
                return Err(part.to_string());
            }
            result.extend(start..=end);
        } else {
            result.insert(part.parse().map_err(|_| part.to_string())?);
        }
    }
    Ok(result)
}

fn parse(expression: &str) -> Result<Fields, CronError> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(CronError::InvalidExpression(expression.to_string()));
    }
    let field = |s, min, max, name| {
        parse_field(s, min, max).map_err(|value| CronError::InvalidField { field: name, value })
    };
    Ok(Fields {
        minutes: field(parts[0], 0, 59, "minute")?,
        hours: field(parts[1], 0, 23, "hour")?,
        days: field(parts[2], 1, 31, "day_of_month")?,
        months: field(parts[3], 1, 12, "month")?,
        weekdays: field(parts[4], 0, 6, "day_of_week")?,
    })
}

/// Find the next minute-aligned instant at or after `after + 1 minute` that
/// matches `expression`, searching forward up to one year.
pub fn next_run(expression: &str, after: NaiveDateTime) -> Result<NaiveDateTime, CronError> {
    let fields = parse(expression)?;
    let mut candidate = after
        .with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(after)
        + Duration::minutes(1);

    const MAX_MINUTES_PER_YEAR: i64 = 525_600;
    for _ in 0..MAX_MINUTES_PER_YEAR {
        let weekday_sunday_indexed = candidate.weekday().num_days_from_sunday();
        if fields.minutes.contains(&candidate.minute())
            && fields.hours.contains(&candidate.hour())
            && fields.days.contains(&candidate.day())
            && fields.months.contains(&candidate.month())
            && fields.weekdays.contains(&weekday_sunday_indexed)
        {
            return Ok(candidate);
        }
        candidate += Duration::minutes(1);
    }
    Err(CronError::NotFound(expression.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn every_minute_advances_by_one() {
        let after = dt(2026, 1, 1, 10, 0);
        assert_eq!(next_run("* * * * *", after).unwrap(), dt(2026, 1, 1, 10, 1));
    }

    #[test]
    fn nine_am_daily() {
        // 2026-01-01 is a Thursday.
        let after = dt(2026, 1, 1, 10, 0);
        assert_eq!(next_run("0 9 * * *", after).unwrap(), dt(2026, 1, 2, 9, 0));
    }

    #[test]
    fn sunday_only_cron_fires_on_a_sunday() {
        // 2026-01-01 is a Thursday; the next Sunday is 2026-01-04.
        let after = dt(2026, 1, 1, 0, 0);
        let result = next_run("0 9 * * 0", after).unwrap();
        assert_eq!(result, dt(2026, 1, 4, 9, 0));
        assert_eq!(result.weekday().num_days_from_sunday(), 0);
    }

    #[test]
    fn weekday_range_excludes_weekend() {
        // 2026-01-02 is a Friday; next weekday 9am run should skip to Monday 1/5.
        let after = dt(2026, 1, 2, 10, 0);
        let result = next_run("0 9 * * 1-5", after).unwrap();
        assert_eq!(result, dt(2026, 1, 5, 9, 0));
    }

    #[test]
    fn every_15_minutes() {
        let after = dt(2026, 1, 1, 10, 1);
        assert_eq!(
            next_run("*/15 * * * *", after).unwrap(),
            dt(2026, 1, 1, 10, 15)
        );
    }

    #[test]
    fn malformed_expression_is_rejected() {
        assert!(next_run("* * *", dt(2026, 1, 1, 0, 0)).is_err());
    }
}
