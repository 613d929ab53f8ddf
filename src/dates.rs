// src/dates.rs
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Fixed-date national holidays, keyed by (day, month). Movable feasts
/// (Carnaval, Corpus Christi) are not observed as quota days here because
/// the sheet has no year-dependent holiday column.
static HOLIDAYS: Lazy<HashSet<(u32, u32)>> = Lazy::new(|| {
    [
        (1, 1),   // Confraternização Universal
        (21, 4),  // Tiradentes
        (1, 5),   // Dia do Trabalho
        (7, 9),   // Independência
        (12, 10), // Nossa Senhora Aparecida
        (2, 11),  // Finados
        (15, 11), // Proclamação da República
        (20, 11), // Consciência Negra
        (25, 12), // Natal
    ]
    .into_iter()
    .collect()
});

pub fn is_holiday(date: NaiveDate) -> bool {
    HOLIDAYS.contains(&(date.day(), date.month()))
}

pub fn first_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let Some(first) = first_of_month(year, month) else {
        return 0;
    };
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match next {
        Some(next) => (next - first).num_days() as u32,
        None => 0,
    }
}

/// Canonical assignment key for a calendar day: `YYYY-MM-DD`.
pub fn date_key(year: i32, month: u32, day: u32) -> String {
    format!("{:04}-{:02}-{:02}", year, month, day)
}

/// Day number of an assignment key, provided the key is a valid date of the
/// given (year, month). Out-of-month or malformed keys yield `None`.
pub fn day_of_key(key: &str, year: i32, month: u32) -> Option<u32> {
    let date = NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()?;
    (date.year() == year && date.month() == month).then(|| date.day())
}

/// Seeds the consecutive-workday counter at the start of a month from the
/// employee's last recorded day off: the whole-day distance between that day
/// and the first of the month, floored at zero. A day off on the final day
/// of the previous month seeds 1, so day 1 continues the run rather than
/// starting a fresh one. `NaiveDate` subtraction is whole-day by
/// construction, so no time-of-day normalization is needed.
pub fn seed_consecutive_work_days(
    last_day_off: Option<NaiveDate>,
    year: i32,
    month: u32,
) -> u32 {
    let Some(first) = first_of_month(year, month) else {
        return 0;
    };
    match last_day_off {
        Some(last) if last < first => (first - last).num_days().max(0) as u32,
        _ => 0,
    }
}

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})").expect("iso date regex"));
static BR_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("br date regex"));

/// Normalizes the date formats the sheet emits for `lastDayOff`: ISO
/// `YYYY-MM-DD` (with or without a trailing time component) and Brazilian
/// `DD/MM/YYYY`. Anything else yields `None` and the caller skips the entry.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(caps) = ISO_DATE_RE.captures(raw) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if let Some(caps) = BR_DATE_RE.captures(raw) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    None
}
