//! `JobStore` over SQLite.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};

use super::job_repo::{self, JobFilter, JobRow};
use super::report_repo::{self, ReportItemRow};
use super::{Database, DatabaseError};
use crate::model::{Job, JobState, ObjectType, PluginState, PluginType, Report, ReportItem};
use crate::store::{JobStore, StoreError};

#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Jobs matching `filter`, newest first, plus the total match count.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<(Vec<Job>, u64), StoreError> {
        let (rows, total) = job_repo::query(&self.db, filter)?;
        let jobs = rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, total))
    }

    /// Report item counts per plugin state, e.g. `{"FAILURE": 1, "SUCCESS": 2}`.
    pub fn outcome_summary(&self, job_id: &str) -> Result<BTreeMap<String, u64>, StoreError> {
        Ok(report_repo::count_by_state(&self.db, job_id)?
            .into_iter()
            .collect())
    }
}

impl JobStore for SqliteJobStore {
    fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        job_repo::insert(&self.db, &job_to_row(job)?)?;
        Ok(())
    }

    fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        match job_repo::update(&self.db, &job_to_row(job)?)? {
            0 => Err(StoreError::NotFound(job.id.clone())),
            _ => Ok(()),
        }
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        job_repo::find_by_id(&self.db, id)?
            .map(job_from_row)
            .transpose()
    }

    fn save_report(&self, report: &Report) -> Result<(), StoreError> {
        let rows: Vec<ReportItemRow> = report
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| item_to_row(position as i64, item))
            .collect();
        report_repo::replace_for_job(&self.db, &report.job_id, &rows)?;
        Ok(())
    }

    fn get_report(&self, job_id: &str) -> Result<Option<Report>, StoreError> {
        if job_repo::find_by_id(&self.db, job_id)?.is_none() {
            return Ok(None);
        }
        let items = report_repo::find_by_job(&self.db, job_id)?
            .into_iter()
            .map(item_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Report {
            job_id: job_id.to_string(),
            items,
        }))
    }
}

fn invalid(table: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::Database(DatabaseError::InvalidRow {
        table,
        reason: reason.into(),
    })
}

fn parse_time(table: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| invalid(table, format!("bad timestamp '{}': {}", value, e)))
}

fn parse_opt_time(table: &'static str, value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|v| parse_time(table, &v)).transpose()
}

fn job_to_row(job: &Job) -> Result<JobRow, StoreError> {
    Ok(JobRow {
        id: job.id.clone(),
        name: job.name.clone(),
        plugin_id: job.plugin_id.clone(),
        plugin_type: job.plugin_type.as_str().to_string(),
        plugin_parameters: serde_json::to_string(&job.plugin_parameters)?,
        selection: serde_json::to_string(&job.selection)?,
        username: job.username.clone(),
        state: job.state.as_str().to_string(),
        state_details: job.state_details.clone(),
        stats: serde_json::to_string(&job.stats)?,
        created_at: job.created_at.to_rfc3339(),
        started_at: job.started_at.map(|t| t.to_rfc3339()),
        ended_at: job.ended_at.map(|t| t.to_rfc3339()),
        updated_at: Utc::now().to_rfc3339(),
    })
}

fn job_from_row(row: JobRow) -> Result<Job, StoreError> {
    let state: JobState = row.state.parse().map_err(|e: String| invalid("jobs", e))?;
    let plugin_type: PluginType = row
        .plugin_type
        .parse()
        .map_err(|e: String| invalid("jobs", e))?;
    let stats = serde_json::from_str(&row.stats)
        .map_err(|e| invalid("jobs", format!("stats: {}", e)))?;

    Ok(Job {
        id: row.id,
        name: row.name,
        plugin_id: row.plugin_id,
        plugin_type,
        plugin_parameters: serde_json::from_str(&row.plugin_parameters)?,
        selection: serde_json::from_str(&row.selection)?,
        username: row.username,
        created_at: parse_time("jobs", &row.created_at)?,
        started_at: parse_opt_time("jobs", row.started_at)?,
        ended_at: parse_opt_time("jobs", row.ended_at)?,
        state,
        state_details: row.state_details,
        stats,
    })
}

fn item_to_row(position: i64, item: &ReportItem) -> ReportItemRow {
    ReportItemRow {
        id: item.id.clone(),
        job_id: item.job_id.clone(),
        position,
        source_object_id: item.source_object_id.clone(),
        source_object_type: item.source_object_type.map(|t| t.as_str().to_string()),
        plugin_state: item.plugin_state.as_str().to_string(),
        details: item.details.clone(),
        html_details: item.html_details,
        started_at: item.started_at.to_rfc3339(),
        ended_at: item.ended_at.map(|t| t.to_rfc3339()),
    }
}

fn item_from_row(row: ReportItemRow) -> Result<ReportItem, StoreError> {
    let plugin_state: PluginState = row
        .plugin_state
        .parse()
        .map_err(|e: String| invalid("report_items", e))?;
    let source_object_type = row
        .source_object_type
        .map(|t| t.parse::<ObjectType>())
        .transpose()
        .map_err(|e| invalid("report_items", e.to_string()))?;

    Ok(ReportItem {
        id: row.id,
        job_id: row.job_id,
        source_object_id: row.source_object_id,
        source_object_type,
        plugin_state,
        details: row.details,
        html_details: row.html_details,
        started_at: parse_time("report_items", &row.started_at)?,
        ended_at: parse_opt_time("report_items", row.ended_at)?,
    })
}
