// src/reconcile_tests.rs

#[cfg(test)]
mod tests {
    use crate::dates;
    use crate::reconcile::{
        apply_proposal, clear_assignments, merge_remote, MergeOutcome, RemoteEmployeeMeta,
        RemoteSnapshot, ScheduleProposal,
    };
    use crate::roster::{
        dirty_key, DirtyState, Employee, EmployeeRoster, MonthlySchedule, ScheduleChange, Shift,
        ShiftCatalog, ShiftCategory,
    };
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("invalid date string: {}", s))
    }

    fn shift(id: &str, code: &str, category: ShiftCategory) -> Shift {
        Shift {
            id: id.to_string(),
            code: code.to_string(),
            name: String::new(),
            category,
        }
    }

    fn catalog() -> ShiftCatalog {
        ShiftCatalog::new(vec![
            shift("1", "M", ShiftCategory::Work),
            shift("2", "T", ShiftCategory::Work),
            shift("4", "F", ShiftCategory::DayOff),
            shift("6", "FAL", ShiftCategory::Absence),
        ])
    }

    fn roster_with(id: &str, pattern: &str) -> EmployeeRoster {
        EmployeeRoster::new(vec![Employee {
            id: id.to_string(),
            name: format!("Employee {}", id),
            shift_pattern: pattern.to_string(),
            last_day_off: None,
        }])
    }

    fn assign(schedule: &mut MonthlySchedule, employee_id: &str, day: u32, shift_id: &str) {
        let key = dates::date_key(schedule.year, schedule.month, day);
        schedule.set_assignment(employee_id, &key, shift_id.to_string());
    }

    fn snapshot(year: i32, month: u32) -> RemoteSnapshot {
        RemoteSnapshot {
            year,
            month,
            assignments: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    fn remote_cell(snapshot: &mut RemoteSnapshot, employee_id: &str, day: u32, code: &str) {
        snapshot
            .assignments
            .entry(employee_id.to_string())
            .or_default()
            .insert(day.to_string(), code.to_string());
    }

    fn dirty_cell(dirty: &mut DirtyState, employee_id: &str, year: i32, month: u32, day: u32) {
        dirty.record(ScheduleChange {
            employee_id: employee_id.to_string(),
            year,
            month,
            day,
            shift_code: "F".to_string(),
            days_off_total: 1,
        });
    }

    #[test]
    fn matching_snapshot_is_a_noop() {
        let mut local = MonthlySchedule::new(2025, 8);
        assign(&mut local, "E1", 1, "1");
        assign(&mut local, "E1", 2, "4");
        let before = local.clone();

        let mut remote = snapshot(2025, 8);
        remote_cell(&mut remote, "E1", 1, "M");
        remote_cell(&mut remote, "E1", 2, "F");

        let mut roster = roster_with("E1", "6x1");
        let outcome = merge_remote(&mut local, &mut roster, &remote, &catalog(), &DirtyState::new());
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(local, before);
    }

    #[test]
    fn remote_overwrite_applies_to_clean_cells() {
        let mut local = MonthlySchedule::new(2025, 8);
        assign(&mut local, "E1", 1, "1");

        let mut remote = snapshot(2025, 8);
        remote_cell(&mut remote, "E1", 1, "T");
        remote_cell(&mut remote, "E1", 2, "F");

        let mut roster = roster_with("E1", "6x1");
        let outcome = merge_remote(&mut local, &mut roster, &remote, &catalog(), &DirtyState::new());
        match outcome {
            MergeOutcome::Applied(report) => assert_eq!(report.applied, 2),
            other => panic!("expected Applied, got {:?}", other),
        }
        assert_eq!(
            local.shift_id_on("E1", "2025-08-01"),
            Some(&"2".to_string())
        );
        assert_eq!(
            local.shift_id_on("E1", "2025-08-02"),
            Some(&"4".to_string())
        );
    }

    #[test]
    fn dirty_cell_wins_over_remote_value() {
        let mut local = MonthlySchedule::new(2025, 8);
        assign(&mut local, "E1", 15, "4");
        let mut dirty = DirtyState::new();
        dirty_cell(&mut dirty, "E1", 2025, 8, 15);

        let mut remote = snapshot(2025, 8);
        remote_cell(&mut remote, "E1", 15, "M");

        let mut roster = roster_with("E1", "6x1");
        let outcome = merge_remote(&mut local, &mut roster, &remote, &catalog(), &dirty);
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(
            local.shift_id_on("E1", "2025-08-15"),
            Some(&"4".to_string())
        );
    }

    #[test]
    fn dirty_cell_wins_over_remote_deletion() {
        // Remote says employee E1 has nothing on day 15; the local edit is
        // unsaved and must survive the merge.
        let mut local = MonthlySchedule::new(2025, 8);
        assign(&mut local, "E1", 15, "4");
        let mut dirty = DirtyState::new();
        dirty_cell(&mut dirty, "E1", 2025, 8, 15);
        assert!(dirty.is_cell_dirty(&dirty_key("E1", 2025, 8, 15)));

        let remote = snapshot(2025, 8);
        let mut roster = roster_with("E1", "6x1");
        let outcome = merge_remote(&mut local, &mut roster, &remote, &catalog(), &dirty);
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(
            local.shift_id_on("E1", "2025-08-15"),
            Some(&"4".to_string())
        );
    }

    #[test]
    fn remote_deletion_propagates_to_clean_cells() {
        let mut local = MonthlySchedule::new(2025, 8);
        assign(&mut local, "E1", 15, "4");

        let remote = snapshot(2025, 8);
        let mut roster = roster_with("E1", "6x1");
        let outcome = merge_remote(&mut local, &mut roster, &remote, &catalog(), &DirtyState::new());
        match outcome {
            MergeOutcome::Applied(report) => assert_eq!(report.deleted, 1),
            other => panic!("expected Applied, got {:?}", other),
        }
        assert_eq!(local.shift_id_on("E1", "2025-08-15"), None);
    }

    #[test]
    fn malformed_remote_entries_are_skipped_not_fatal() {
        let mut local = MonthlySchedule::new(2025, 8);
        assign(&mut local, "E1", 1, "1");
        let before = local.clone();

        let mut remote = snapshot(2025, 8);
        remote_cell(&mut remote, "E1", 1, "M"); // unchanged
        remote_cell(&mut remote, "E1", 40, "M"); // day out of range
        remote_cell(&mut remote, "E1", 2, "ZZZ"); // unknown code
        remote
            .assignments
            .get_mut("E1")
            .unwrap()
            .insert("notaday".to_string(), "M".to_string());

        let mut roster = roster_with("E1", "6x1");
        let outcome = merge_remote(&mut local, &mut roster, &remote, &catalog(), &DirtyState::new());
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(local, before);
    }

    #[test]
    fn snapshot_for_another_month_is_discarded() {
        let mut local = MonthlySchedule::new(2025, 9);
        assign(&mut local, "E1", 1, "1");
        let before = local.clone();

        let mut remote = snapshot(2025, 8);
        remote_cell(&mut remote, "E1", 2, "F");

        let mut roster = roster_with("E1", "6x1");
        let outcome = merge_remote(&mut local, &mut roster, &remote, &catalog(), &DirtyState::new());
        assert_eq!(outcome, MergeOutcome::Stale);
        assert_eq!(local, before);
    }

    #[test]
    fn metadata_merges_and_normalizes_dates_for_clean_employees() {
        let mut local = MonthlySchedule::new(2025, 8);
        let mut remote = snapshot(2025, 8);
        remote.metadata.insert(
            "E1".to_string(),
            RemoteEmployeeMeta {
                shift_type: Some("12x36".to_string()),
                // Brazilian sheet format, must normalize to 2025-07-31.
                last_day_off: Some("31/07/2025".to_string()),
            },
        );

        let mut roster = roster_with("E1", "6x1");
        let outcome = merge_remote(&mut local, &mut roster, &remote, &catalog(), &DirtyState::new());
        match outcome {
            MergeOutcome::Applied(report) => assert_eq!(report.meta_applied, 2),
            other => panic!("expected Applied, got {:?}", other),
        }
        let employee = roster.get("E1").unwrap();
        assert_eq!(employee.shift_pattern, "12x36");
        assert_eq!(employee.last_day_off, Some(d("2025-07-31")));
    }

    #[test]
    fn dirty_employee_keeps_local_metadata() {
        let mut local = MonthlySchedule::new(2025, 8);
        let mut remote = snapshot(2025, 8);
        remote.metadata.insert(
            "E1".to_string(),
            RemoteEmployeeMeta {
                shift_type: Some("12x36".to_string()),
                last_day_off: Some("2025-07-31".to_string()),
            },
        );

        let mut dirty = DirtyState::new();
        dirty.mark_employee("E1");
        let mut roster = roster_with("E1", "6x1");
        let outcome = merge_remote(&mut local, &mut roster, &remote, &catalog(), &dirty);
        assert_eq!(outcome, MergeOutcome::Unchanged);
        let employee = roster.get("E1").unwrap();
        assert_eq!(employee.shift_pattern, "6x1");
        assert_eq!(employee.last_day_off, None);
    }

    #[test]
    fn unparseable_last_day_off_is_skipped() {
        let mut local = MonthlySchedule::new(2025, 8);
        let mut remote = snapshot(2025, 8);
        remote.metadata.insert(
            "E1".to_string(),
            RemoteEmployeeMeta {
                shift_type: None,
                last_day_off: Some("amanhã".to_string()),
            },
        );

        let mut roster = roster_with("E1", "6x1");
        let outcome = merge_remote(&mut local, &mut roster, &remote, &catalog(), &DirtyState::new());
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(roster.get("E1").unwrap().last_day_off, None);
    }

    #[test]
    fn proposal_overwrites_cells_and_marks_them_dirty() {
        let mut local = MonthlySchedule::new(2025, 8);
        assign(&mut local, "E1", 1, "1");
        let mut dirty = DirtyState::new();

        let mut proposal: ScheduleProposal = HashMap::new();
        proposal.entry("E1".to_string()).or_default().extend([
            ("2025-08-01".to_string(), "4".to_string()),
            ("2025-08-02".to_string(), "1".to_string()),
        ]);

        let applied = apply_proposal(&mut local, &proposal, &catalog(), &mut dirty);
        assert_eq!(applied, 2);
        assert_eq!(
            local.shift_id_on("E1", "2025-08-01"),
            Some(&"4".to_string())
        );
        assert!(dirty.is_cell_dirty(&dirty_key("E1", 2025, 8, 1)));
        assert!(dirty.is_cell_dirty(&dirty_key("E1", 2025, 8, 2)));

        let changes = dirty.pending_changes();
        let folga = changes
            .iter()
            .find(|c| c.day == 1)
            .expect("change for day 1");
        assert_eq!(folga.shift_code, "F");
        assert_eq!(folga.days_off_total, 1);
    }

    #[test]
    fn proposal_applied_cells_survive_the_next_poll() {
        // The generated cells are dirty, so a snapshot fetched before they
        // are saved cannot overwrite them.
        let mut local = MonthlySchedule::new(2025, 8);
        let mut dirty = DirtyState::new();

        let mut proposal: ScheduleProposal = HashMap::new();
        proposal
            .entry("E1".to_string())
            .or_default()
            .insert("2025-08-01".to_string(), "4".to_string());
        apply_proposal(&mut local, &proposal, &catalog(), &mut dirty);

        let mut remote = snapshot(2025, 8);
        remote_cell(&mut remote, "E1", 1, "M");
        let mut roster = roster_with("E1", "6x1");
        let outcome = merge_remote(&mut local, &mut roster, &remote, &catalog(), &dirty);
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(
            local.shift_id_on("E1", "2025-08-01"),
            Some(&"4".to_string())
        );
    }

    #[test]
    fn proposal_skips_bad_dates_and_dangling_ids() {
        let mut local = MonthlySchedule::new(2025, 8);
        let mut dirty = DirtyState::new();

        let mut proposal: ScheduleProposal = HashMap::new();
        proposal.entry("E1".to_string()).or_default().extend([
            ("2025-09-01".to_string(), "4".to_string()), // outside the month
            ("not-a-date".to_string(), "4".to_string()),
            ("2025-08-03".to_string(), "999".to_string()), // dangling id
            ("2025-08-04".to_string(), "4".to_string()),
        ]);

        let applied = apply_proposal(&mut local, &proposal, &catalog(), &mut dirty);
        assert_eq!(applied, 1);
        assert_eq!(dirty.cell_count(), 1);
        assert_eq!(
            local.shift_id_on("E1", "2025-08-04"),
            Some(&"4".to_string())
        );
    }

    #[test]
    fn clearing_employees_queues_delete_changes() {
        let mut local = MonthlySchedule::new(2025, 8);
        assign(&mut local, "E1", 1, "1");
        assign(&mut local, "E1", 2, "4");
        assign(&mut local, "E2", 1, "1");
        let mut dirty = DirtyState::new();

        let cleared = clear_assignments(
            &mut local,
            &["E1".to_string()],
            &catalog(),
            &mut dirty,
        );
        assert_eq!(cleared, 2);
        assert_eq!(local.shift_id_on("E1", "2025-08-01"), None);
        assert_eq!(local.shift_id_on("E1", "2025-08-02"), None);
        // Other employees untouched.
        assert_eq!(
            local.shift_id_on("E2", "2025-08-01"),
            Some(&"1".to_string())
        );

        let changes = dirty.pending_changes();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.shift_code.is_empty()));
        assert!(changes.iter().all(|c| c.employee_id == "E1"));
    }
}
