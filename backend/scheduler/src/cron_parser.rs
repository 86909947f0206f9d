/// Cron expression validation and normalization.
///
/// Config files use standard 5-field syntax (min hour dom mon dow). The
/// `cron` crate wants a leading seconds field and numbers weekdays from
/// Sunday = 1, so expressions are normalized before parsing: a `0` seconds
/// field is prepended and numeric weekdays are rewritten as names.
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use std::str::FromStr;

const VALID_RANGES: &[(u32, u32)] = &[
    (0, 59), // minute
    (0, 23), // hour
    (1, 31), // day of month
    (1, 12), // month
    (0, 7),  // day of week (0 and 7 both = Sunday)
];

const DAY_NAMES: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Validate a 5-field expression and return the 6-field form the `cron`
/// crate accepts.
pub fn validate_cron(expr: &str) -> Result<String> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() != 5 {
        bail!(
            "Cron expression must have exactly 5 fields, got {}: '{}'",
            parts.len(),
            expr
        );
    }
    for (i, part) in parts.iter().enumerate() {
        validate_field(part, VALID_RANGES[i].0, VALID_RANGES[i].1)
            .map_err(|e| anyhow!("Field {} ('{}') invalid: {}", i + 1, part, e))?;
    }
    let dow = normalize_weekdays(parts[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        parts[0], parts[1], parts[2], parts[3], dow
    ))
}

/// Validate and parse into a schedule.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let normalized = validate_cron(expr)?;
    Schedule::from_str(&normalized).map_err(|e| anyhow!("Invalid cron '{}': {}", expr, e))
}

/// Next fire time strictly after `after`, evaluated in `offset` local time.
pub fn next_fire(
    schedule: &Schedule,
    offset: FixedOffset,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&offset))
        .next()
        .map(|dt| dt.with_timezone(&Utc))
}

fn day_number(token: &str) -> Option<u32> {
    if let Ok(n) = token.parse::<u32>() {
        return Some(n);
    }
    let lower = token.to_ascii_lowercase();
    DAY_NAMES[..7]
        .iter()
        .position(|d| d.to_ascii_lowercase() == lower)
        .map(|p| p as u32)
}

/// Rewrite numeric weekdays (`1-5`, `0,6`) as names (`Mon-Fri`, `Sun,Sat`).
/// Step values after `/` stay numeric.
fn normalize_weekdays(field: &str) -> Result<String> {
    let (range_part, step) = match field.split_once('/') {
        Some((r, s)) => (r, Some(s)),
        None => (field, None),
    };
    let rewrite = |tok: &str| -> Result<String> {
        if tok == "*" || tok == "?" {
            return Ok(tok.to_string());
        }
        match tok.parse::<usize>() {
            Ok(n) if n < DAY_NAMES.len() => Ok(DAY_NAMES[n].to_string()),
            Ok(n) => bail!("weekday {} out of range", n),
            Err(_) => Ok(tok.to_string()),
        }
    };
    let mut items = Vec::new();
    for item in range_part.split(',') {
        let rewritten = match item.split_once('-') {
            Some((lo, hi)) => format!("{}-{}", rewrite(lo)?, rewrite(hi)?),
            None => rewrite(item)?,
        };
        items.push(rewritten);
    }
    let mut out = items.join(",");
    if let Some(step) = step {
        out.push('/');
        out.push_str(step);
    }
    Ok(out)
}

/// Check whether a cron field is syntactically valid within [min, max].
/// The day-of-week field also accepts names (`Mon`..`Sun`).
fn validate_field(field: &str, min: u32, max: u32) -> Result<()> {
    if field == "*" || field == "?" {
        return Ok(());
    }
    let range_part = if let Some((r, s)) = field.split_once('/') {
        let step: u32 = s.parse().map_err(|_| anyhow!("step '{}' not numeric", s))?;
        if step == 0 {
            bail!("step must be > 0");
        }
        r
    } else {
        field
    };

    let value = |tok: &str| -> Result<u32> {
        if max == 7 {
            day_number(tok).ok_or_else(|| anyhow!("'{}' not a weekday", tok))
        } else {
            tok.parse().map_err(|_| anyhow!("'{}' not numeric", tok))
        }
    };

    for part in range_part.split(',') {
        if part == "*" {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            let (lo, hi) = (value(lo)?, value(hi)?);
            if lo > hi || lo < min || hi > max {
                bail!("range {}-{} out of [{}, {}]", lo, hi, min, max);
            }
        } else {
            let v = value(part)?;
            if v < min || v > max {
                bail!("value {} out of [{}, {}]", v, min, max);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn prepends_seconds_field() {
        assert_eq!(
            validate_cron("0 9-16 * * Mon-Fri").unwrap(),
            "0 0 9-16 * * Mon-Fri"
        );
    }

    #[test]
    fn numeric_weekdays_become_names() {
        assert_eq!(validate_cron("30 9 * * 1-5").unwrap(), "0 30 9 * * Mon-Fri");
        assert_eq!(validate_cron("0 12 * * 0,6").unwrap(), "0 0 12 * * Sun,Sat");
        assert_eq!(validate_cron("0 12 * * */2").unwrap(), "0 0 12 * * */2");
    }

    #[test]
    fn rejects_wrong_field_count_and_ranges() {
        assert!(validate_cron("0 0 9 * * Mon").is_err());
        assert!(validate_cron("61 9 * * *").is_err());
        assert!(validate_cron("0 9 * * Funday").is_err());
        assert!(validate_cron("*/0 9 * * *").is_err());
    }

    #[test]
    fn next_fire_respects_offset_and_weekdays() {
        let schedule = parse_schedule("0 9-16 * * Mon-Fri").unwrap();
        let eastern = FixedOffset::west_opt(5 * 3600).unwrap();
        // Saturday 2026-10-17 12:00 UTC; next weekday slot is Monday 09:00 local.
        let after = Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap();
        let next = next_fire(&schedule, eastern, after)
            .unwrap()
            .with_timezone(&eastern);
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (9, 0));
    }
}
