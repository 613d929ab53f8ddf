// src/roster.rs
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::dates;

pub type EmployeeId = String;
pub type ShiftId = String;
pub type Year = i32;
pub type MonthNum = u32; // 1-12

/// What a shift entry means for rest-rule accounting. Only `DayOff` resets
/// the consecutive-workday counter and counts toward the monthly quota;
/// `Absence` and `Leave` are non-working days that still do not rest the
/// employee in the legal sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftCategory {
    Work,
    DayOff,
    Absence,
    Leave,
}

/// Catalog entry managed by the admin configuration screen. The DSR rest day
/// is an ordinary entry whose category is `DayOff`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: ShiftId,
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub category: ShiftCategory,
}

/// Read-only snapshot of the shift catalog with id and code indexes.
/// Codes are matched case-insensitively because the sheet rows arrive in
/// whatever casing the last editor typed.
#[derive(Debug, Clone, Default)]
pub struct ShiftCatalog {
    shifts: Vec<Shift>,
    by_id: HashMap<ShiftId, usize>,
    by_code: HashMap<String, usize>,
}

impl ShiftCatalog {
    pub fn new(shifts: Vec<Shift>) -> Self {
        let mut by_id = HashMap::new();
        let mut by_code = HashMap::new();
        for (idx, shift) in shifts.iter().enumerate() {
            by_id.insert(shift.id.clone(), idx);
            by_code.insert(shift.code.to_uppercase(), idx);
        }
        Self {
            shifts,
            by_id,
            by_code,
        }
    }

    pub fn by_id(&self, id: &str) -> Option<&Shift> {
        self.by_id.get(id).map(|&idx| &self.shifts[idx])
    }

    pub fn by_code(&self, code: &str) -> Option<&Shift> {
        self.by_code
            .get(&code.trim().to_uppercase())
            .map(|&idx| &self.shifts[idx])
    }

    pub fn len(&self) -> usize {
        self.shifts.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: EmployeeId,
    #[serde(default)]
    pub name: String,
    /// Work pattern tag, e.g. "5x2", "6x1", "12x36". Open set; matching is
    /// by case-insensitive substring.
    pub shift_pattern: String,
    /// Most recent actual day off, used to seed consecutive-day counting
    /// across the month boundary.
    #[serde(default)]
    pub last_day_off: Option<NaiveDate>,
}

/// HR roster, read-only to the validator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRoster {
    employees: HashMap<EmployeeId, Employee>,
}

impl EmployeeRoster {
    pub fn new(employees: Vec<Employee>) -> Self {
        Self {
            employees: employees.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Employee> {
        self.employees.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Employee> {
        self.employees.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Employee> {
        self.employees.values()
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }
}

/// The aggregate being validated and merged, identified by (year, month).
/// Assignment date keys are `YYYY-MM-DD`; a missing key means "no shift
/// recorded", which the validator treats as an implicit workday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySchedule {
    pub year: Year,
    pub month: MonthNum,
    #[serde(default)]
    pub assignments: HashMap<EmployeeId, HashMap<String, ShiftId>>,
    #[serde(default)]
    pub comments: HashMap<EmployeeId, HashMap<String, String>>,
}

impl MonthlySchedule {
    pub fn new(year: Year, month: MonthNum) -> Self {
        Self {
            year,
            month,
            assignments: HashMap::new(),
            comments: HashMap::new(),
        }
    }

    pub fn shift_id_on(&self, employee_id: &str, date_key: &str) -> Option<&ShiftId> {
        self.assignments.get(employee_id)?.get(date_key)
    }

    pub fn set_assignment(&mut self, employee_id: &str, date_key: &str, shift_id: ShiftId) {
        self.assignments
            .entry(employee_id.to_string())
            .or_default()
            .insert(date_key.to_string(), shift_id);
    }

    /// Removes an assignment, dropping the employee entry once empty so a
    /// cleared schedule compares equal to a freshly built one.
    pub fn remove_assignment(&mut self, employee_id: &str, date_key: &str) -> Option<ShiftId> {
        let days = self.assignments.get_mut(employee_id)?;
        let removed = days.remove(date_key);
        if days.is_empty() {
            self.assignments.remove(employee_id);
        }
        removed
    }

    /// Date keys assigned to an employee within this schedule's month,
    /// sorted, paired with the day number. Keys that do not parse as dates
    /// of this (year, month) are ignored.
    pub fn assigned_days(&self, employee_id: &str) -> Vec<(String, u32)> {
        let mut days: Vec<(String, u32)> = self
            .assignments
            .get(employee_id)
            .map(|m| {
                m.keys()
                    .filter_map(|k| dates::day_of_key(k, self.year, self.month).map(|d| (k.clone(), d)))
                    .collect()
            })
            .unwrap_or_default();
        days.sort();
        days
    }
}

/// A pending local edit, queued until the persistence sink confirms it.
/// An empty `shift_code` encodes deletion so the sink knows to delete
/// rather than ignore the cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleChange {
    pub employee_id: EmployeeId,
    pub year: Year,
    pub month: MonthNum,
    pub day: u32,
    pub shift_code: String,
    /// Running count of day-off assignments the employee holds in the month
    /// at the time of the edit.
    pub days_off_total: u32,
}

impl ScheduleChange {
    pub fn key(&self) -> String {
        dirty_key(&self.employee_id, self.year, self.month, self.day)
    }
}

/// Cell identity used by the dirty set: `employeeId-year-month-day`,
/// month and day unpadded.
pub fn dirty_key(employee_id: &str, year: Year, month: MonthNum, day: u32) -> String {
    format!("{}-{}-{}-{}", employee_id, year, month, day)
}

/// Employee metadata edit queued for the sink alongside cell changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeMetaChange {
    pub employee_id: EmployeeId,
    pub shift_pattern: String,
    pub last_day_off: Option<NaiveDate>,
}

/// Owner of all unsaved local edits. Threaded explicitly through the edit
/// and merge paths; the merger consults it to veto remote overwrites, the
/// sync engine drains it on a successful flush.
#[derive(Debug, Clone, Default)]
pub struct DirtyState {
    cells: HashMap<String, ScheduleChange>,
    employees: HashSet<EmployeeId>,
}

impl DirtyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a cell edit. A later edit to the same cell replaces the
    /// earlier pending change; the key is unique per cell.
    pub fn record(&mut self, change: ScheduleChange) {
        self.cells.insert(change.key(), change);
    }

    pub fn mark_employee(&mut self, employee_id: &str) {
        self.employees.insert(employee_id.to_string());
    }

    pub fn is_cell_dirty(&self, key: &str) -> bool {
        self.cells.contains_key(key)
    }

    pub fn is_employee_dirty(&self, employee_id: &str) -> bool {
        self.employees.contains(employee_id)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.employees.is_empty()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Pending cell changes in deterministic (key) order, ready to flush.
    pub fn pending_changes(&self) -> Vec<ScheduleChange> {
        let mut changes: Vec<ScheduleChange> = self.cells.values().cloned().collect();
        changes.sort_by(|a, b| a.key().cmp(&b.key()));
        changes
    }

    /// Pending metadata changes, resolved against the current roster.
    /// Employees marked dirty but since removed from the roster are skipped.
    pub fn pending_meta_changes(&self, roster: &EmployeeRoster) -> Vec<EmployeeMetaChange> {
        let mut ids: Vec<&EmployeeId> = self.employees.iter().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| roster.get(id))
            .map(|e| EmployeeMetaChange {
                employee_id: e.id.clone(),
                shift_pattern: e.shift_pattern.clone(),
                last_day_off: e.last_day_off,
            })
            .collect()
    }

    /// Drops every pending entry. Called only after the sink accepted them.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.employees.clear();
    }
}
