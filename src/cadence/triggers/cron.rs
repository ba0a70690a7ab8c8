// SPDX-License-Identifier: MIT

//! Five-field cron expressions: `minute hour day-of-month month day-of-week`
//!
//! Each field accepts `*`, `*/n`, `a`, `a-b`, `a-b/n`, `a/n` and comma lists.
//! Day-of-week runs 0-7 with both 0 and 7 meaning Sunday. When both day
//! fields are restricted a day matches if either does. All times are UTC.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

use crate::kit::error::ScheduleError;

/// Bound on search iterations; impossible dates (e.g. Feb 30) give up here
const MAX_SEARCH_STEPS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    restricted: bool,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: Field,
    hours: Field,
    days: Field,
    months: Field,
    weekdays: Field,
}

impl fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpr").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for CronExpr {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronExpr::parse(s)
    }
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let error = |message: String| ScheduleError::Cron {
            expr: expr.to_string(),
            message,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(error(format!("expected 5 fields, found {}", fields.len())));
        }

        let minutes = parse_field(fields[0], 0, 59).map_err(|m| error(format!("minute: {}", m)))?;
        let hours = parse_field(fields[1], 0, 23).map_err(|m| error(format!("hour: {}", m)))?;
        let days = parse_field(fields[2], 1, 31).map_err(|m| error(format!("day of month: {}", m)))?;
        let months = parse_field(fields[3], 1, 12).map_err(|m| error(format!("month: {}", m)))?;
        let mut weekdays =
            parse_field(fields[4], 0, 7).map_err(|m| error(format!("day of week: {}", m)))?;
        if weekdays.contains(7) {
            weekdays.bits = (weekdays.bits | 1) & !(1u64 << 7);
        }

        Ok(Self {
            source: fields.join(" "),
            minutes,
            hours,
            days,
            months,
            weekdays,
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days.contains(date.day());
        let dow = self.weekdays.contains(date.weekday().num_days_from_sunday());
        match (self.days.restricted, self.weekdays.restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First matching minute strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.naive_utc().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let mut t: NaiveDateTime = start;

        for _ in 0..MAX_SEARCH_STEPS {
            let date = t.date();
            if !self.months.contains(date.month()) {
                let (y, m) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                t = NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(date) {
                t = date.succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t.and_utc());
        }
        None
    }
}

fn parse_field(text: &str, min: u32, max: u32) -> Result<Field, String> {
    let mut bits = 0u64;
    for item in text.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}'", step))?;
                if step == 0 {
                    return Err("step must be greater than zero".to_string());
                }
                if step > max - min {
                    return Err(format!("step {} exceeds the {}-{} range", step, min, max));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, min, max)?, parse_value(b, min, max)?)
        } else {
            let v = parse_value(range, min, max)?;
            // `a/n` runs from a to the end of the range
            (v, if step.is_some() { max } else { v })
        };
        if lo > hi {
            return Err(format!("range {}-{} is reversed", lo, hi));
        }

        let step = step.unwrap_or(1);
        let mut v = lo;
        while v <= hi {
            bits |= 1u64 << v;
            v += step;
        }
    }
    Ok(Field {
        bits,
        restricted: !text.starts_with('*'),
    })
}

fn parse_value(text: &str, min: u32, max: u32) -> Result<u32, String> {
    let v: u32 = text
        .parse()
        .map_err(|_| format!("invalid value '{}'", text))?;
    if v < min || v > max {
        return Err(format!("{} is outside {}-{}", v, min, max));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_minute() {
        let cron = CronExpr::parse("* * * * *").unwrap();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 30).unwrap();
        assert_eq!(cron.next_after(t), Some(at(2024, 1, 1, 10, 1)));
    }

    #[test]
    fn test_is_strictly_after() {
        let cron = CronExpr::parse("0 9 * * *").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 1, 9, 0)), Some(at(2024, 1, 2, 9, 0)));
        assert_eq!(cron.next_after(at(2024, 1, 1, 8, 59)), Some(at(2024, 1, 1, 9, 0)));
    }

    #[test]
    fn test_steps_and_lists() {
        let cron = CronExpr::parse("*/15 8-10 * * *").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 1, 8, 16)), Some(at(2024, 1, 1, 8, 30)));
        assert_eq!(cron.next_after(at(2024, 1, 1, 10, 45)), Some(at(2024, 1, 2, 8, 0)));

        let cron = CronExpr::parse("5,35 * * * *").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 1, 0, 6)), Some(at(2024, 1, 1, 0, 35)));
    }

    #[test]
    fn test_weekdays() {
        // 2024-01-06 is a Saturday
        let cron = CronExpr::parse("0 9 * * 1-5").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 6, 12, 0)), Some(at(2024, 1, 8, 9, 0)));

        let sunday = CronExpr::parse("0 0 * * 7").unwrap();
        assert_eq!(sunday.next_after(at(2024, 1, 1, 0, 0)), Some(at(2024, 1, 7, 0, 0)));
    }

    #[test]
    fn test_day_fields_combine_with_or() {
        // the 15th, or any Monday
        let cron = CronExpr::parse("0 0 15 * 1").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 2, 0, 0)), Some(at(2024, 1, 8, 0, 0)));
        assert_eq!(cron.next_after(at(2024, 1, 12, 0, 0)), Some(at(2024, 1, 15, 0, 0)));
    }

    #[test]
    fn test_month_rollover_and_leap_day() {
        let cron = CronExpr::parse("0 0 1 1 *").unwrap();
        assert_eq!(cron.next_after(at(2024, 3, 1, 0, 0)), Some(at(2025, 1, 1, 0, 0)));

        let leap = CronExpr::parse("0 12 29 2 *").unwrap();
        assert_eq!(leap.next_after(at(2024, 3, 1, 0, 0)), Some(at(2028, 2, 29, 12, 0)));
    }

    #[test]
    fn test_impossible_date_gives_up() {
        let cron = CronExpr::parse("0 0 30 2 *").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("60 * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("59/4294967295 * * * *").is_err());
        assert!(CronExpr::parse("*/60 * * * *").is_err());
        assert!(CronExpr::parse("5-1 * * * *").is_err());
        assert!(CronExpr::parse("a * * * *").is_err());
        assert!(matches!(
            "0 0 0 * *".parse::<CronExpr>(),
            Err(ScheduleError::Cron { .. })
        ));
    }
}
