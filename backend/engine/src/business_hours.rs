//! Business-hours gate: decides whether a lead may be contacted right now
//! in its own local time.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Utc, Weekday};
use leadflow_config::BusinessHoursConfig;
use leadflow_core::{LeadflowError, Result};

use crate::timezone::AreaCodeZones;

/// True when `local` falls inside `[start_hour, end_hour)` on one of `weekdays`.
pub fn is_now_within_window(
    local: DateTime<FixedOffset>,
    start_hour: u32,
    end_hour: u32,
    weekdays: &[Weekday],
) -> bool {
    weekdays.contains(&local.weekday()) && (start_hour..end_hour).contains(&local.hour())
}

#[derive(Debug, Clone)]
pub struct BusinessHoursGate {
    start_hour: u32,
    end_hour: u32,
    weekdays: Vec<Weekday>,
    zones: AreaCodeZones,
}

impl BusinessHoursGate {
    pub fn new(start_hour: u32, end_hour: u32, weekdays: Vec<Weekday>, zones: AreaCodeZones) -> Self {
        Self {
            start_hour,
            end_hour,
            weekdays,
            zones,
        }
    }

    pub fn from_config(cfg: &BusinessHoursConfig) -> Result<Self> {
        let weekdays = cfg.parsed_weekdays().map_err(LeadflowError::Config)?;
        Ok(Self::new(
            cfg.start_hour,
            cfg.end_hour,
            weekdays,
            AreaCodeZones::from_config(cfg),
        ))
    }

    /// A gate that is always open, in UTC.
    pub fn always_open() -> Self {
        Self::new(
            0,
            24,
            vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ],
            AreaCodeZones::new("", 0),
        )
    }

    pub fn local_time(&self, phone: Option<&str>, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.zones.offset_for_phone(phone))
    }

    pub fn local_date(&self, phone: Option<&str>, now: DateTime<Utc>) -> NaiveDate {
        self.local_time(phone, now).date_naive()
    }

    pub fn is_open_for(&self, phone: Option<&str>, now: DateTime<Utc>) -> bool {
        is_now_within_window(
            self.local_time(phone, now),
            self.start_hour,
            self.end_hour,
            &self.weekdays,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn weekdays() -> Vec<Weekday> {
        vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
    }

    fn gate() -> BusinessHoursGate {
        BusinessHoursGate::new(9, 17, weekdays(), AreaCodeZones::new("212", -5))
    }

    #[test]
    fn window_is_half_open() {
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        // Monday 2026-10-19.
        let at = |h, m| est.with_ymd_and_hms(2026, 10, 19, h, m, 0).unwrap();
        assert!(!is_now_within_window(at(8, 59), 9, 17, &weekdays()));
        assert!(is_now_within_window(at(9, 0), 9, 17, &weekdays()));
        assert!(is_now_within_window(at(16, 59), 9, 17, &weekdays()));
        assert!(!is_now_within_window(at(17, 0), 9, 17, &weekdays()));
    }

    #[test]
    fn weekend_is_closed() {
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        let saturday_noon = est.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap();
        assert!(!is_now_within_window(saturday_noon, 9, 17, &weekdays()));
    }

    #[test]
    fn evaluated_in_lead_local_time() {
        // Monday 15:00 UTC = 10:00 New York, 07:00 San Francisco.
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 15, 0, 0).unwrap();
        let gate = gate();
        assert!(gate.is_open_for(Some("+1 212 555 0100"), now));
        assert!(!gate.is_open_for(Some("+1 415 555 0100"), now));
    }

    #[test]
    fn local_date_crosses_midnight_per_zone() {
        // Tuesday 03:00 UTC is still Monday evening on the west coast.
        let now = Utc.with_ymd_and_hms(2026, 10, 20, 3, 0, 0).unwrap();
        let gate = gate();
        assert_eq!(
            gate.local_date(Some("415-555-0100"), now),
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
        );
        assert_eq!(
            gate.local_date(None, now),
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
        );
    }

    #[test]
    fn always_open_gate() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 2, 0, 0).unwrap();
        assert!(BusinessHoursGate::always_open().is_open_for(None, now));
    }
}
