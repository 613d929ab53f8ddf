// src/sync.rs
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::reconcile::{self, MergeOutcome, RemoteSnapshot, ScheduleProposal};
use crate::roster::{
    DirtyState, EmployeeId, EmployeeMetaChange, EmployeeRoster, MonthlySchedule, ScheduleChange,
    ShiftCatalog,
};
use crate::validation::{self, ValidationResult, ValidationRules};
use crate::{dates, EscalaError};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;

/// Environment-backed sync configuration (`ESCALA_` prefix).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SyncConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, EscalaError> {
        envy::prefixed("ESCALA_")
            .from_env()
            .map_err(|e| EscalaError::Config(e.to_string()))
    }
}

/// A snapshot plus the digest of the raw payload it was parsed from, so a
/// byte-identical poll body can be dropped before the merge even runs.
#[derive(Debug, Clone)]
pub struct FetchedState {
    pub snapshot: RemoteSnapshot,
    pub digest: String,
}

/// Remote copy of the schedule, fetched periodically. `None` means the
/// service has no data for that month yet.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn fetch_schedule_state(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Option<FetchedState>, EscalaError>;
}

/// Accepts flushed pending changes. No retries here; the caller owns
/// backoff policy.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn push(
        &self,
        changes: &[ScheduleChange],
        meta: &[EmployeeMetaChange],
    ) -> Result<(), EscalaError>;
}

/// Opaque schedule generator. `on_progress(current, total)` is invoked zero
/// or more times with monotonically non-decreasing `current`.
#[async_trait]
pub trait ProposalSource: Send + Sync {
    async fn generate(
        &self,
        roster: &EmployeeRoster,
        catalog: &ShiftCatalog,
        year: i32,
        month: u32,
        rules: &ValidationRules,
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<Option<ScheduleProposal>, EscalaError>;
}

/// HTTP client for the sheet-backed sync service. One endpoint serves both
/// directions: GET returns the month snapshot, POST accepts flushed changes.
pub struct SheetScheduleSource {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushBody<'a> {
    changes: &'a [ScheduleChange],
    metadata: &'a [EmployeeMetaChange],
}

impl SheetScheduleSource {
    pub fn new(config: &SyncConfig) -> Result<Self, EscalaError> {
        let endpoint = Url::parse(&config.endpoint)?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl ScheduleSource for SheetScheduleSource {
    async fn fetch_schedule_state(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Option<FetchedState>, EscalaError> {
        let request = self
            .request(self.http.get(self.endpoint.clone()))
            .query(&[("year", year.to_string()), ("month", month.to_string())]);
        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(year, month, "remote has no schedule for this month");
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let body = response.text().await?;
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(None);
        }

        let digest = hex::encode(Sha256::digest(body.as_bytes()));
        let snapshot: RemoteSnapshot = serde_json::from_str(&body)?;
        Ok(Some(FetchedState { snapshot, digest }))
    }
}

#[async_trait]
impl PersistenceSink for SheetScheduleSource {
    async fn push(
        &self,
        changes: &[ScheduleChange],
        meta: &[EmployeeMetaChange],
    ) -> Result<(), EscalaError> {
        let body = PushBody {
            changes,
            metadata: meta,
        };
        self.request(self.http.post(self.endpoint.clone()))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Owns the local schedule state, the roster, and the pending-change log,
/// and drives the edit / poll / flush cycle.
///
/// Polling is single-flight by construction: `poll_once` takes `&mut self`,
/// so an edit and a merge can never interleave. Local edits are recorded in
/// the dirty set the moment they happen, which is what guarantees a fetch
/// already in flight cannot clobber them once it lands: the merge defers to
/// dirty cells, it does not care when they were created.
pub struct SyncEngine {
    schedule: MonthlySchedule,
    roster: EmployeeRoster,
    catalog: ShiftCatalog,
    rules: ValidationRules,
    dirty: DirtyState,
    last_digest: Option<String>,
}

impl SyncEngine {
    pub fn new(
        schedule: MonthlySchedule,
        roster: EmployeeRoster,
        catalog: ShiftCatalog,
        rules: ValidationRules,
    ) -> Self {
        info!(
            year = schedule.year,
            month = schedule.month,
            max_consecutive_days = rules.max_consecutive_days,
            sunday_off_frequency = ?rules.sunday_off_frequency,
            prefer_consecutive_days_off = rules.prefer_consecutive_days_off,
            "sync engine configured"
        );
        Self {
            schedule,
            roster,
            catalog,
            rules,
            dirty: DirtyState::new(),
            last_digest: None,
        }
    }

    pub fn schedule(&self) -> &MonthlySchedule {
        &self.schedule
    }

    pub fn roster(&self) -> &EmployeeRoster {
        &self.roster
    }

    pub fn catalog(&self) -> &ShiftCatalog {
        &self.catalog
    }

    pub fn dirty(&self) -> &DirtyState {
        &self.dirty
    }

    /// Month navigation. Pending changes are kept (they carry their own
    /// (year, month) and still need to reach the sink), but any snapshot
    /// fetched for the old month will now be discarded as stale.
    pub fn set_month(&mut self, year: i32, month: u32) {
        if self.schedule.year == year && self.schedule.month == month {
            return;
        }
        info!(year, month, "navigating to month");
        self.schedule = MonthlySchedule::new(year, month);
        self.last_digest = None;
    }

    /// Local cell edit. `shift_code` of `None` (or empty) clears the cell.
    pub fn edit_cell(
        &mut self,
        employee_id: &str,
        day: u32,
        shift_code: Option<&str>,
    ) -> Result<(), EscalaError> {
        let total_days = dates::days_in_month(self.schedule.year, self.schedule.month);
        if !(1..=total_days).contains(&day) {
            return Err(EscalaError::DayOutOfRange(day));
        }
        let key = dates::date_key(self.schedule.year, self.schedule.month, day);

        let code = match shift_code.map(str::trim) {
            Some(code) if !code.is_empty() => {
                let shift = self
                    .catalog
                    .by_code(code)
                    .ok_or_else(|| EscalaError::UnknownShiftCode(code.to_string()))?;
                self.schedule
                    .set_assignment(employee_id, &key, shift.id.clone());
                shift.code.clone()
            }
            _ => {
                self.schedule.remove_assignment(employee_id, &key);
                String::new()
            }
        };

        self.dirty.record(ScheduleChange {
            employee_id: employee_id.to_string(),
            year: self.schedule.year,
            month: self.schedule.month,
            day,
            shift_code: code,
            days_off_total: validation::count_days_off(employee_id, &self.schedule, &self.catalog),
        });
        Ok(())
    }

    /// Local metadata edit; marks the employee dirty so remote metadata
    /// stops overwriting them until flushed.
    pub fn edit_metadata(
        &mut self,
        employee_id: &str,
        shift_pattern: Option<String>,
        last_day_off: Option<NaiveDate>,
    ) -> Result<(), EscalaError> {
        let employee = self
            .roster
            .get_mut(employee_id)
            .ok_or_else(|| EscalaError::UnknownEmployee(employee_id.to_string()))?;
        if let Some(pattern) = shift_pattern {
            employee.shift_pattern = pattern;
        }
        if let Some(date) = last_day_off {
            employee.last_day_off = Some(date);
        }
        self.dirty.mark_employee(employee_id);
        Ok(())
    }

    /// Clears every assignment the given employees hold in the current month.
    pub fn clear_employees(&mut self, employee_ids: &[EmployeeId]) -> usize {
        reconcile::clear_assignments(
            &mut self.schedule,
            employee_ids,
            &self.catalog,
            &mut self.dirty,
        )
    }

    /// Runs the generator and applies its proposal as a bulk local edit.
    pub async fn apply_generated(
        &mut self,
        source: &dyn ProposalSource,
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<usize, EscalaError> {
        let proposal = source
            .generate(
                &self.roster,
                &self.catalog,
                self.schedule.year,
                self.schedule.month,
                &self.rules,
                on_progress,
            )
            .await?;
        let Some(proposal) = proposal else {
            info!("generator returned no proposal");
            return Ok(0);
        };
        Ok(reconcile::apply_proposal(
            &mut self.schedule,
            &proposal,
            &self.catalog,
            &mut self.dirty,
        ))
    }

    /// One poll of the remote copy, merged under the dirty-set veto.
    pub async fn poll_once(
        &mut self,
        source: &dyn ScheduleSource,
    ) -> Result<MergeOutcome, EscalaError> {
        let (year, month) = (self.schedule.year, self.schedule.month);
        let Some(fetched) = source.fetch_schedule_state(year, month).await? else {
            return Ok(MergeOutcome::Unchanged);
        };

        if self.last_digest.as_deref() == Some(fetched.digest.as_str()) {
            debug!(year, month, "poll body unchanged, skipping merge");
            return Ok(MergeOutcome::Unchanged);
        }

        let outcome = reconcile::merge_remote(
            &mut self.schedule,
            &mut self.roster,
            &fetched.snapshot,
            &self.catalog,
            &self.dirty,
        );
        if outcome != MergeOutcome::Stale {
            self.last_digest = Some(fetched.digest);
        }
        Ok(outcome)
    }

    /// Pushes pending changes to the sink; the dirty set is cleared only on
    /// success, so a failed flush leaves every edit queued for the next try.
    pub async fn flush(&mut self, sink: &dyn PersistenceSink) -> Result<usize, EscalaError> {
        if self.dirty.is_empty() {
            return Ok(0);
        }
        let changes = self.dirty.pending_changes();
        let meta = self.dirty.pending_meta_changes(&self.roster);
        sink.push(&changes, &meta).await?;
        let flushed = changes.len() + meta.len();
        self.dirty.clear();
        info!(flushed, "pending changes persisted");
        Ok(flushed)
    }

    /// Validates every roster employee against the current schedule,
    /// sorted by employee id.
    pub fn validate_all(&self) -> Vec<(EmployeeId, ValidationResult)> {
        let mut results: Vec<(EmployeeId, ValidationResult)> = self
            .roster
            .iter()
            .map(|e| {
                (
                    e.id.clone(),
                    validation::validate(
                        &e.id,
                        &self.schedule,
                        &self.catalog,
                        &self.rules,
                        &self.roster,
                    ),
                )
            })
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Fixed-interval flush-then-poll loop. Upstream failures are logged and
    /// retried on the next tick; unsaved edits survive them by staying dirty.
    pub async fn run<S, P>(&mut self, source: &S, sink: &P, interval: Duration)
    where
        S: ScheduleSource,
        P: PersistenceSink,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "sync loop started");
        loop {
            ticker.tick().await;
            if let Err(e) = self.flush(sink).await {
                error!("flush failed, keeping {} pending change(s): {}", self.dirty.cell_count(), e);
            }
            match self.poll_once(source).await {
                Ok(MergeOutcome::Applied(report)) => {
                    info!(
                        applied = report.applied,
                        deleted = report.deleted,
                        vetoed = report.vetoed,
                        skipped = report.skipped,
                        "remote changes merged"
                    );
                    let flagged = self
                        .validate_all()
                        .iter()
                        .filter(|(_, result)| !result.valid)
                        .count();
                    if flagged > 0 {
                        warn!(flagged, "employees violating labor rules after merge");
                    }
                }
                Ok(MergeOutcome::Unchanged) => {}
                Ok(MergeOutcome::Stale) => warn!("dropped stale snapshot"),
                Err(e) => error!("poll failed: {}", e),
            }
        }
    }
}
