// src/main.rs
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Datelike;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod dates;
mod reconcile;
#[cfg(test)]
mod reconcile_tests;
mod report;
mod roster;
mod sync;
mod validation;

use reconcile::ScheduleProposal;
use roster::{Employee, EmployeeRoster, MonthlySchedule, Shift, ShiftCatalog};
use sync::{ProposalSource, SheetScheduleSource, SyncConfig, SyncEngine};
use validation::ValidationRules;

#[derive(Error, Debug)]
pub enum EscalaError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote payload could not be parsed: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Invalid sync endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("Unknown shift code: {0}")]
    UnknownShiftCode(String),
    #[error("Unknown employee: {0}")]
    UnknownEmployee(String),
    #[error("Day {0} is outside the current month")]
    DayOutOfRange(u32),
}

#[derive(Parser)]
#[command(
    name = "escala-core",
    about = "Valida escalas mensais e sincroniza edições com a planilha"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct StateArgs {
    /// Employee roster JSON (array of employees)
    #[arg(long)]
    roster: PathBuf,
    /// Shift catalog JSON (array of shifts)
    #[arg(long)]
    shifts: PathBuf,
    /// Validation rules JSON; defaults to 6 consecutive days
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Target month (1-12); defaults to the current month
    #[arg(long)]
    month: Option<u32>,
    /// Target year; defaults to the current year
    #[arg(long)]
    year: Option<i32>,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a monthly schedule file and report rule violations
    Validate {
        #[command(flatten)]
        state: StateArgs,
        /// Monthly schedule JSON
        #[arg(long)]
        schedule: PathBuf,
        /// Write the per-employee report as CSV
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Poll the sheet sync service and persist local pending changes
    Sync {
        #[command(flatten)]
        state: StateArgs,
        /// Override ESCALA_POLL_INTERVAL_SECS
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Edit one cell or one employee's metadata, then persist the change
    Edit {
        #[command(flatten)]
        state: StateArgs,
        #[arg(long)]
        employee: String,
        /// Day of the month to edit
        #[arg(long, requires = "code")]
        day: Option<u32>,
        /// Shift code to assign; an empty string clears the cell
        #[arg(long, requires = "day")]
        code: Option<String>,
        /// New shift pattern for the employee
        #[arg(long)]
        pattern: Option<String>,
        /// New last day off (YYYY-MM-DD or DD/MM/YYYY)
        #[arg(long)]
        last_day_off: Option<String>,
    },
    /// Remove every assignment the given employees hold in the month
    Clear {
        #[command(flatten)]
        state: StateArgs,
        /// Employee ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        employees: Vec<String>,
    },
    /// Apply a generated proposal file as authoritative edits and persist it
    ApplyProposal {
        #[command(flatten)]
        state: StateArgs,
        /// Proposal JSON: employee id -> ISO date -> shift id
        #[arg(long)]
        proposal: PathBuf,
        /// Write the post-apply validation report as CSV
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate {
            state,
            schedule,
            out,
        } => cmd_validate(&state, &schedule, out.as_deref()),
        Command::Sync {
            state,
            interval_secs,
        } => cmd_sync(&state, interval_secs).await,
        Command::Edit {
            state,
            employee,
            day,
            code,
            pattern,
            last_day_off,
        } => cmd_edit(&state, &employee, day, code, pattern, last_day_off).await,
        Command::Clear { state, employees } => cmd_clear(&state, employees).await,
        Command::ApplyProposal {
            state,
            proposal,
            out,
        } => cmd_apply_proposal(&state, &proposal, out.as_deref()).await,
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))
}

impl StateArgs {
    fn roster(&self) -> Result<EmployeeRoster> {
        Ok(EmployeeRoster::new(load_json::<Vec<Employee>>(
            &self.roster,
        )?))
    }

    fn catalog(&self) -> Result<ShiftCatalog> {
        Ok(ShiftCatalog::new(load_json::<Vec<Shift>>(&self.shifts)?))
    }

    fn rules(&self) -> Result<ValidationRules> {
        match &self.rules {
            Some(path) => load_json(path),
            None => Ok(ValidationRules::default()),
        }
    }

    fn target_month(&self) -> (i32, u32) {
        let today = chrono::Local::now().date_naive();
        (
            self.year.unwrap_or_else(|| today.year()),
            self.month.unwrap_or_else(|| today.month()),
        )
    }
}

/// Builds an engine on the target month and hydrates it with one poll of
/// the remote copy, so edits land on current data.
async fn hydrated_engine(state: &StateArgs) -> Result<(SyncEngine, SheetScheduleSource)> {
    let config = SyncConfig::from_env().context("Sync configuration missing")?;
    let sheet = SheetScheduleSource::new(&config)?;

    let today = chrono::Local::now().date_naive();
    let mut engine = SyncEngine::new(
        MonthlySchedule::new(today.year(), today.month()),
        state.roster()?,
        state.catalog()?,
        state.rules()?,
    );
    let (year, month) = state.target_month();
    engine.set_month(year, month);
    engine.poll_once(&sheet).await?;
    Ok((engine, sheet))
}

fn write_report_file(
    engine: &SyncEngine,
    results: &[(String, validation::ValidationResult)],
    out: &Path,
) -> Result<()> {
    let rows = report::build_rows(results, engine.schedule(), engine.catalog(), engine.roster());
    let file =
        fs::File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
    report::write_report(file, &rows)?;
    info!(path = %out.display(), "report written");
    Ok(())
}

fn log_violations(results: &[(String, validation::ValidationResult)]) -> usize {
    let mut flagged = 0;
    for (id, result) in results {
        if result.valid {
            continue;
        }
        flagged += 1;
        for message in &result.messages {
            warn!(employee = %id, "{}", message);
        }
    }
    flagged
}

fn cmd_validate(state: &StateArgs, schedule_path: &Path, out: Option<&Path>) -> Result<()> {
    let roster = state.roster()?;
    let catalog = state.catalog()?;
    let schedule: MonthlySchedule = load_json(schedule_path)?;
    let rules = state.rules()?;

    info!(
        month = schedule.month,
        year = schedule.year,
        employees = roster.len(),
        shifts = catalog.len(),
        "validating schedule"
    );

    let mut results: Vec<_> = roster
        .iter()
        .map(|e| {
            (
                e.id.clone(),
                validation::validate(&e.id, &schedule, &catalog, &rules, &roster),
            )
        })
        .collect();
    results.sort_by(|a, b| a.0.cmp(&b.0));

    let flagged = log_violations(&results);
    info!(flagged, ok = results.len() - flagged, "validation finished");

    if let Some(out) = out {
        let rows = report::build_rows(&results, &schedule, &catalog, &roster);
        let file =
            fs::File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
        report::write_report(file, &rows)?;
        info!(path = %out.display(), "report written");
    }
    Ok(())
}

async fn cmd_sync(state: &StateArgs, interval_secs: Option<u64>) -> Result<()> {
    let mut config = SyncConfig::from_env().context("Sync configuration missing")?;
    if let Some(secs) = interval_secs {
        config.poll_interval_secs = secs;
    }

    let (year, month) = state.target_month();
    let sheet = SheetScheduleSource::new(&config)?;
    let mut engine = SyncEngine::new(
        MonthlySchedule::new(year, month),
        state.roster()?,
        state.catalog()?,
        state.rules()?,
    );

    tokio::select! {
        _ = engine.run(&sheet, &sheet, Duration::from_secs(config.poll_interval_secs)) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}

async fn cmd_edit(
    state: &StateArgs,
    employee: &str,
    day: Option<u32>,
    code: Option<String>,
    pattern: Option<String>,
    last_day_off: Option<String>,
) -> Result<()> {
    if day.is_none() && pattern.is_none() && last_day_off.is_none() {
        bail!("Nothing to edit: pass --day/--code, --pattern or --last-day-off");
    }
    let last_day_off = match &last_day_off {
        Some(raw) => Some(
            dates::normalize_date(raw)
                .with_context(|| format!("Unrecognized date format: {}", raw))?,
        ),
        None => None,
    };

    let (mut engine, sheet) = hydrated_engine(state).await?;
    if let Some(day) = day {
        engine.edit_cell(employee, day, code.as_deref())?;
    }
    if pattern.is_some() || last_day_off.is_some() {
        engine.edit_metadata(employee, pattern, last_day_off)?;
    }
    info!(pending = engine.dirty().cell_count(), "edit queued");

    let flushed = engine.flush(&sheet).await?;
    info!(flushed, "edit persisted");
    Ok(())
}

async fn cmd_clear(state: &StateArgs, employees: Vec<String>) -> Result<()> {
    let (mut engine, sheet) = hydrated_engine(state).await?;
    let cleared = engine.clear_employees(&employees);
    if cleared == 0 {
        info!("no assignments to clear");
        return Ok(());
    }
    let flushed = engine.flush(&sheet).await?;
    info!(cleared, flushed, "assignments cleared and persisted");
    Ok(())
}

/// Proposal produced offline by the schedule generator, ingested from disk.
struct FileProposalSource {
    path: PathBuf,
}

#[async_trait]
impl ProposalSource for FileProposalSource {
    async fn generate(
        &self,
        _roster: &EmployeeRoster,
        _catalog: &ShiftCatalog,
        _year: i32,
        _month: u32,
        _rules: &ValidationRules,
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<Option<ScheduleProposal>, EscalaError> {
        let data = fs::read_to_string(&self.path)
            .map_err(|e| EscalaError::Config(format!("{}: {}", self.path.display(), e)))?;
        let proposal: ScheduleProposal = serde_json::from_str(&data)?;
        on_progress(proposal.len(), proposal.len());
        Ok(Some(proposal))
    }
}

async fn cmd_apply_proposal(
    state: &StateArgs,
    proposal_path: &Path,
    out: Option<&Path>,
) -> Result<()> {
    let (mut engine, sheet) = hydrated_engine(state).await?;
    let generator = FileProposalSource {
        path: proposal_path.to_path_buf(),
    };

    let applied = engine
        .apply_generated(&generator, &|current, total| {
            info!(current, total, "generation progress");
        })
        .await?;
    if applied == 0 {
        info!("proposal contained no applicable cells");
        return Ok(());
    }

    let flushed = engine.flush(&sheet).await?;
    info!(applied, flushed, "proposal applied and persisted");

    let results = engine.validate_all();
    let flagged = log_violations(&results);
    info!(flagged, "post-apply validation finished");
    if let Some(out) = out {
        write_report_file(&engine, &results, out)?;
    }
    Ok(())
}
