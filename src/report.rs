// src/report.rs
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

use crate::roster::{EmployeeId, EmployeeRoster, MonthlySchedule, ShiftCatalog};
use crate::validation::{self, ValidationResult};

/// One CSV row of the monthly validation report.
#[derive(Debug, Serialize)]
pub struct ReportRow {
    pub employee_id: String,
    pub name: String,
    pub shift_pattern: String,
    pub valid: bool,
    pub days_off: u32,
    pub required_days_off: u32,
    pub invalid_days: String,
    pub messages: String,
}

pub fn build_rows(
    results: &[(EmployeeId, ValidationResult)],
    schedule: &MonthlySchedule,
    catalog: &ShiftCatalog,
    roster: &EmployeeRoster,
) -> Vec<ReportRow> {
    results
        .iter()
        .map(|(id, result)| {
            let (name, pattern) = roster
                .get(id)
                .map(|e| (e.name.clone(), e.shift_pattern.clone()))
                .unwrap_or_default();
            ReportRow {
                employee_id: id.clone(),
                name,
                required_days_off: validation::required_days_off(
                    schedule.year,
                    schedule.month,
                    &pattern,
                ),
                shift_pattern: pattern,
                valid: result.valid,
                days_off: validation::count_days_off(id, schedule, catalog),
                invalid_days: result
                    .invalid_days
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(";"),
                messages: result.messages.join(" | "),
            }
        })
        .collect()
}

pub fn write_report<W: Write>(writer: W, rows: &[ReportRow]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer
            .serialize(row)
            .context("Failed to serialize report row")?;
    }
    csv_writer.flush().context("Failed to flush CSV report")?;
    Ok(())
}
