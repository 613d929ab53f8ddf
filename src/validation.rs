// src/validation.rs
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dates;
use crate::roster::{EmployeeRoster, MonthlySchedule, ShiftCatalog, ShiftCategory};

/// Policy knobs for validation and generation. Only `max_consecutive_days`
/// affects validation; the remaining fields steer the schedule generator and
/// ride along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    pub max_consecutive_days: u32,
    #[serde(default)]
    pub sunday_off_frequency: Option<u32>,
    #[serde(default)]
    pub prefer_consecutive_days_off: bool,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            max_consecutive_days: 6,
            sunday_off_frequency: None,
            prefer_consecutive_days_off: false,
        }
    }
}

/// Per-employee outcome, recomputed on every read of the schedule. Rule
/// violations are output for the grid to render as warnings, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub messages: Vec<String>,
    pub invalid_days: Vec<u32>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            messages: Vec::new(),
            invalid_days: Vec::new(),
        }
    }
}

/// Validates one employee's month against the consecutive-workday limit and
/// the days-off quota.
///
/// A day rests the employee only when an assignment exists, resolves in the
/// catalog and is categorized `DayOff`. Explicit work shifts, absences,
/// leaves, unassigned days and dangling shift ids all extend the working
/// run. The counter is seeded across the month boundary from the employee's
/// `last_day_off`.
pub fn validate(
    employee_id: &str,
    schedule: &MonthlySchedule,
    catalog: &ShiftCatalog,
    rules: &ValidationRules,
    roster: &EmployeeRoster,
) -> ValidationResult {
    // First load: nothing assigned to anyone yet, nothing to flag.
    if schedule.assignments.is_empty() {
        return ValidationResult::ok();
    }

    let Some(employee) = roster.get(employee_id) else {
        return ValidationResult {
            valid: false,
            messages: vec![format!(
                "Funcionário {} não encontrado na equipe.",
                employee_id
            )],
            invalid_days: Vec::new(),
        };
    };

    let total_days = dates::days_in_month(schedule.year, schedule.month);
    if total_days == 0 {
        return ValidationResult::ok();
    }

    let mut messages = Vec::new();
    let mut invalid_days = Vec::new();
    let max = rules.max_consecutive_days;

    let mut consecutive =
        dates::seed_consecutive_work_days(employee.last_day_off, schedule.year, schedule.month);
    let mut days_off = 0u32;

    let empty = std::collections::HashMap::new();
    let assignments = schedule.assignments.get(employee_id).unwrap_or(&empty);

    for day in 1..=total_days {
        let key = dates::date_key(schedule.year, schedule.month, day);
        let category = assignments
            .get(&key)
            .and_then(|id| catalog.by_id(id))
            .map(|shift| shift.category);

        let rests = match category {
            Some(ShiftCategory::DayOff) => true,
            Some(ShiftCategory::Work)
            | Some(ShiftCategory::Absence)
            | Some(ShiftCategory::Leave)
            | None => false,
        };

        if rests {
            consecutive = 0;
            days_off += 1;
            continue;
        }

        consecutive += 1;
        // Flag only the day a limit is crossed; within an unbroken run the
        // next flag comes a full window later, not on every subsequent day.
        if consecutive > max && consecutive % (max + 1) == 0 {
            invalid_days.push(day);
            messages.push(format!(
                "Mais de {} dias consecutivos de trabalho até o dia {}.",
                max, day
            ));
        }
    }

    let required = required_days_off(schedule.year, schedule.month, &employee.shift_pattern);
    if days_off == 0 {
        messages.push("Nenhuma folga atribuída no mês.".to_string());
    } else if days_off < required {
        messages.push(format!(
            "Faltam {} dia(s) de folga para atingir o mínimo de {} no mês.",
            required - days_off,
            required
        ));
    }

    debug!(
        employee = employee_id,
        days_off,
        required,
        violations = invalid_days.len(),
        "validated month"
    );

    ValidationResult {
        valid: messages.is_empty(),
        messages,
        invalid_days,
    }
}

/// Minimum number of day-off assignments a month must carry for a pattern.
///
/// 12x36 scales get roughly alternating days plus a fortnightly extra rest;
/// everyone else owes one day off per Sunday and holiday, with 5x2 patterns
/// also owed Saturdays. Unknown patterns fall back to the 6x1 rule.
pub fn required_days_off(year: i32, month: u32, shift_pattern: &str) -> u32 {
    let total_days = dates::days_in_month(year, month);
    if total_days == 0 {
        return 0;
    }

    let pattern = shift_pattern.to_uppercase();
    if pattern.contains("12X36") {
        return total_days / 2 + 2;
    }
    let saturdays_count = pattern.contains("5X2");

    let mut required = 0;
    for day in 1..=total_days {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        let weekly_rest = match date.weekday() {
            Weekday::Sun => true,
            Weekday::Sat => saturdays_count,
            _ => false,
        };
        if weekly_rest || dates::is_holiday(date) {
            required += 1;
        }
    }
    required
}

/// Day-off assignments an employee currently holds in the schedule's month.
/// Recorded into each `ScheduleChange` as the running tally.
pub fn count_days_off(
    employee_id: &str,
    schedule: &MonthlySchedule,
    catalog: &ShiftCatalog,
) -> u32 {
    let Some(assignments) = schedule.assignments.get(employee_id) else {
        return 0;
    };
    assignments
        .iter()
        .filter(|(key, _)| dates::day_of_key(key, schedule.year, schedule.month).is_some())
        .filter_map(|(_, id)| catalog.by_id(id))
        .filter(|shift| matches!(shift.category, ShiftCategory::DayOff))
        .count() as u32
}
