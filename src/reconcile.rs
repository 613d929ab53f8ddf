// src/reconcile.rs
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::dates;
use crate::roster::{
    DirtyState, EmployeeId, EmployeeRoster, MonthlySchedule, ScheduleChange, ShiftCatalog, ShiftId,
    dirty_key,
};
use crate::validation;

/// Per-employee metadata as the sheet sends it. `last_day_off` arrives in
/// whatever date format the last writer used and is normalized during merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEmployeeMeta {
    #[serde(default)]
    pub shift_type: Option<String>,
    #[serde(default)]
    pub last_day_off: Option<String>,
}

/// Remote copy of one month as fetched from the sync service. Assignments
/// are keyed by bare day number (string) and carry shift *codes*, not ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    pub year: i32,
    pub month: u32,
    #[serde(default)]
    pub assignments: HashMap<EmployeeId, HashMap<String, String>>,
    #[serde(default)]
    pub metadata: HashMap<EmployeeId, RemoteEmployeeMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Cells overwritten or created from the remote copy.
    pub applied: usize,
    /// Local cells deleted because the remote copy no longer has them.
    pub deleted: usize,
    /// Remote cells discarded because a local pending edit wins.
    pub vetoed: usize,
    /// Employee metadata fields updated.
    pub meta_applied: usize,
    /// Entries dropped as malformed (bad day number, unknown code, bad date).
    pub skipped: usize,
}

impl MergeReport {
    fn changed(&self) -> bool {
        self.applied > 0 || self.deleted > 0 || self.meta_applied > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The snapshot is for a month the user has navigated away from.
    Stale,
    /// Nothing differed; callers skip re-render and persistence.
    Unchanged,
    Applied(MergeReport),
}

/// Mapping proposed by the schedule generator: employee -> ISO date -> shift id.
pub type ScheduleProposal = HashMap<EmployeeId, HashMap<String, ShiftId>>;

/// Merges a remotely fetched snapshot into the local schedule and roster.
///
/// Conflict policy is last-writer-wins with local priority: a cell or
/// employee carrying an unsaved local edit is never overwritten or deleted
/// by the remote copy. There is no per-cell versioning, so two concurrent
/// human editors are each reconciled against the shared snapshot but never
/// against each other; the later flush wins upstream.
///
/// Malformed entries (unparseable day numbers, unknown shift codes, bad
/// dates) are skipped one by one; the merge itself never fails.
pub fn merge_remote(
    local: &mut MonthlySchedule,
    roster: &mut EmployeeRoster,
    snapshot: &RemoteSnapshot,
    catalog: &ShiftCatalog,
    dirty: &DirtyState,
) -> MergeOutcome {
    if snapshot.year != local.year || snapshot.month != local.month {
        info!(
            snapshot_month = snapshot.month,
            snapshot_year = snapshot.year,
            local_month = local.month,
            local_year = local.year,
            "discarding stale snapshot after month navigation"
        );
        return MergeOutcome::Stale;
    }

    let mut report = MergeReport::default();
    let total_days = dates::days_in_month(local.year, local.month);

    // Remote -> local upserts, cell by cell.
    for (employee_id, days) in &snapshot.assignments {
        for (day_raw, code) in days {
            let day = match day_raw.trim().parse::<u32>() {
                Ok(d) if (1..=total_days).contains(&d) => d,
                _ => {
                    warn!(employee = %employee_id, day = %day_raw, "skipping remote cell with bad day number");
                    report.skipped += 1;
                    continue;
                }
            };
            let Some(shift) = catalog.by_code(code) else {
                warn!(employee = %employee_id, day, code = %code, "skipping remote cell with unknown shift code");
                report.skipped += 1;
                continue;
            };
            if dirty.is_cell_dirty(&dirty_key(employee_id, local.year, local.month, day)) {
                report.vetoed += 1;
                continue;
            }
            let key = dates::date_key(local.year, local.month, day);
            if local.shift_id_on(employee_id, &key) != Some(&shift.id) {
                local.set_assignment(employee_id, &key, shift.id.clone());
                report.applied += 1;
            }
        }
    }

    // Remote deletions propagate: a local assignment the snapshot no longer
    // carries goes away, unless a pending local edit holds the cell.
    let mut to_delete: Vec<(EmployeeId, String)> = Vec::new();
    for (employee_id, days) in &local.assignments {
        for key in days.keys() {
            let Some(day) = dates::day_of_key(key, local.year, local.month) else {
                continue;
            };
            let remote_has = snapshot
                .assignments
                .get(employee_id)
                .map_or(false, |m| m.contains_key(&day.to_string()));
            if remote_has {
                continue;
            }
            if dirty.is_cell_dirty(&dirty_key(employee_id, local.year, local.month, day)) {
                report.vetoed += 1;
                continue;
            }
            to_delete.push((employee_id.clone(), key.clone()));
        }
    }
    for (employee_id, key) in to_delete {
        local.remove_assignment(&employee_id, &key);
        report.deleted += 1;
    }

    // Employee metadata follows the same one-way guard, at employee level.
    for (employee_id, meta) in &snapshot.metadata {
        if dirty.is_employee_dirty(employee_id) {
            report.vetoed += 1;
            continue;
        }
        let Some(employee) = roster.get_mut(employee_id) else {
            warn!(employee = %employee_id, "skipping metadata for unknown employee");
            report.skipped += 1;
            continue;
        };
        if let Some(shift_type) = &meta.shift_type {
            if !shift_type.is_empty() && *shift_type != employee.shift_pattern {
                employee.shift_pattern = shift_type.clone();
                report.meta_applied += 1;
            }
        }
        if let Some(raw) = &meta.last_day_off {
            match dates::normalize_date(raw) {
                Some(date) => {
                    if employee.last_day_off != Some(date) {
                        employee.last_day_off = Some(date);
                        report.meta_applied += 1;
                    }
                }
                None => {
                    warn!(employee = %employee_id, raw = %raw, "skipping unparseable lastDayOff");
                    report.skipped += 1;
                }
            }
        }
    }

    if report.changed() {
        debug!(?report, "remote snapshot merged");
        MergeOutcome::Applied(report)
    } else {
        MergeOutcome::Unchanged
    }
}

/// Applies a generated proposal as a bulk local edit. Proposals are
/// authoritative: every resolvable cell overwrites whatever is there, and
/// every applied cell is recorded as a pending change so the next poll
/// cannot clobber it before it is saved. Returns the number of cells applied.
pub fn apply_proposal(
    local: &mut MonthlySchedule,
    proposal: &ScheduleProposal,
    catalog: &ShiftCatalog,
    dirty: &mut DirtyState,
) -> usize {
    let mut applied = 0;
    for (employee_id, days) in proposal {
        let mut entries: Vec<(&String, &ShiftId)> = days.iter().collect();
        entries.sort();
        for (date_raw, shift_id) in entries {
            let Some(date) = dates::normalize_date(date_raw) else {
                warn!(employee = %employee_id, date = %date_raw, "skipping proposal entry with bad date");
                continue;
            };
            if date.year() != local.year || date.month() != local.month {
                warn!(employee = %employee_id, date = %date_raw, "skipping proposal entry outside the month");
                continue;
            }
            let day = date.day();
            let Some(shift) = catalog.by_id(shift_id) else {
                warn!(employee = %employee_id, shift = %shift_id, "skipping proposal entry with dangling shift id");
                continue;
            };
            let key = dates::date_key(local.year, local.month, day);
            local.set_assignment(employee_id, &key, shift.id.clone());
            dirty.record(ScheduleChange {
                employee_id: employee_id.clone(),
                year: local.year,
                month: local.month,
                day,
                shift_code: shift.code.clone(),
                days_off_total: validation::count_days_off(employee_id, local, catalog),
            });
            applied += 1;
        }
    }
    if applied > 0 {
        info!(applied, "generated proposal applied");
    }
    applied
}

/// Removes every assignment the given employees hold in the current month,
/// queueing an empty-code change per removed cell so the sink deletes the
/// rows instead of ignoring them. Returns the number of cells cleared.
pub fn clear_assignments(
    local: &mut MonthlySchedule,
    employee_ids: &[EmployeeId],
    catalog: &ShiftCatalog,
    dirty: &mut DirtyState,
) -> usize {
    let mut cleared = 0;
    for employee_id in employee_ids {
        for (key, day) in local.assigned_days(employee_id) {
            local.remove_assignment(employee_id, &key);
            dirty.record(ScheduleChange {
                employee_id: employee_id.clone(),
                year: local.year,
                month: local.month,
                day,
                shift_code: String::new(),
                days_off_total: validation::count_days_off(employee_id, local, catalog),
            });
            cleared += 1;
        }
    }
    if cleared > 0 {
        info!(cleared, employees = employee_ids.len(), "assignments cleared");
    }
    cleared
}
