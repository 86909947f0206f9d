//! Lead-local time zones resolved from the phone number's area code.
//!
//! Offsets are fixed (standard time, no DST).

use chrono::{FixedOffset, Offset, Utc};
use leadflow_config::BusinessHoursConfig;
use std::collections::HashMap;

const EASTERN: i32 = -5;
const CENTRAL: i32 = -6;
const MOUNTAIN: i32 = -7;
const PACIFIC: i32 = -8;
const ALASKA: i32 = -9;
const HAWAII: i32 = -10;

#[rustfmt::skip]
const AREA_CODES: &[(&str, i32)] = &[
    // Eastern
    ("201", EASTERN), ("202", EASTERN), ("212", EASTERN), ("215", EASTERN),
    ("301", EASTERN), ("305", EASTERN), ("313", EASTERN), ("347", EASTERN),
    ("404", EASTERN), ("407", EASTERN), ("410", EASTERN), ("412", EASTERN),
    ("561", EASTERN), ("617", EASTERN), ("646", EASTERN), ("703", EASTERN),
    ("718", EASTERN), ("786", EASTERN), ("917", EASTERN), ("954", EASTERN),
    ("973", EASTERN),
    // Central
    ("210", CENTRAL), ("214", CENTRAL), ("281", CENTRAL), ("312", CENTRAL),
    ("314", CENTRAL), ("316", CENTRAL), ("414", CENTRAL), ("469", CENTRAL),
    ("504", CENTRAL), ("512", CENTRAL), ("612", CENTRAL), ("615", CENTRAL),
    ("713", CENTRAL), ("773", CENTRAL),
    // Mountain
    ("303", MOUNTAIN), ("406", MOUNTAIN), ("480", MOUNTAIN), ("505", MOUNTAIN),
    ("602", MOUNTAIN), ("720", MOUNTAIN), ("801", MOUNTAIN),
    // Pacific
    ("206", PACIFIC), ("213", PACIFIC), ("310", PACIFIC), ("323", PACIFIC),
    ("408", PACIFIC), ("415", PACIFIC), ("503", PACIFIC), ("510", PACIFIC),
    ("619", PACIFIC), ("650", PACIFIC), ("702", PACIFIC), ("818", PACIFIC),
    ("916", PACIFIC), ("949", PACIFIC),
    ("907", ALASKA),
    ("808", HAWAII),
];

/// Extract the 3-digit area code from a NANP phone number in any common
/// format (`+1 (212) 555-0100`, `212.555.0100`, `12125550100`).
pub fn area_code_of(phone: &str) -> Option<String> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    let national = match digits.len() {
        10 => digits.as_str(),
        11 if digits.starts_with('1') => &digits[1..],
        _ => return None,
    };
    Some(national[..3].to_string())
}

fn hours(h: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(h * 3600)
}

#[derive(Debug, Clone)]
pub struct AreaCodeZones {
    table: HashMap<&'static str, i32>,
    default_area_code: String,
    fallback: FixedOffset,
}

impl AreaCodeZones {
    pub fn new(default_area_code: impl Into<String>, fallback_offset_hours: i32) -> Self {
        let fallback = hours(fallback_offset_hours)
            .or_else(|| hours(EASTERN))
            .unwrap_or_else(|| Utc.fix());
        Self {
            table: AREA_CODES.iter().copied().collect(),
            default_area_code: default_area_code.into(),
            fallback,
        }
    }

    pub fn from_config(cfg: &BusinessHoursConfig) -> Self {
        Self::new(cfg.default_area_code.clone(), cfg.default_utc_offset_hours)
    }

    pub fn offset_for_area_code(&self, area_code: &str) -> Option<FixedOffset> {
        self.table.get(area_code).and_then(|h| hours(*h))
    }

    /// Offset for a lead's phone. A missing or unparseable phone uses the
    /// default area code; an unknown area code uses the fallback offset.
    pub fn offset_for_phone(&self, phone: Option<&str>) -> FixedOffset {
        let code = phone
            .and_then(area_code_of)
            .unwrap_or_else(|| self.default_area_code.clone());
        self.offset_for_area_code(&code).unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_phone_formats() {
        assert_eq!(area_code_of("+1 (212) 555-0100").as_deref(), Some("212"));
        assert_eq!(area_code_of("415.555.0123").as_deref(), Some("415"));
        assert_eq!(area_code_of("13125550199").as_deref(), Some("312"));
        assert_eq!(area_code_of("555-0100"), None);
        assert_eq!(area_code_of("+44 20 7946 0958"), None);
    }

    #[test]
    fn resolves_offsets_with_fallbacks() {
        let zones = AreaCodeZones::new("212", -5);
        assert_eq!(zones.offset_for_phone(Some("415-555-0123")), FixedOffset::west_opt(8 * 3600).unwrap());
        assert_eq!(zones.offset_for_phone(Some("312 555 0199")), FixedOffset::west_opt(6 * 3600).unwrap());
        // No phone: default area code (New York).
        assert_eq!(zones.offset_for_phone(None), FixedOffset::west_opt(5 * 3600).unwrap());
        // Unknown area code: fallback offset.
        let zones = AreaCodeZones::new("212", 0);
        assert_eq!(zones.offset_for_phone(Some("999-555-0100")), FixedOffset::east_opt(0).unwrap());
    }
}
