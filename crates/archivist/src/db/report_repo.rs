//! Report item repository for the `report_items` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct ReportItemRow {
    pub id: String,
    pub job_id: String,
    pub position: i64,
    pub source_object_id: String,
    pub source_object_type: Option<String>,
    pub plugin_state: String,
    pub details: String,
    pub html_details: bool,
    pub started_at: String,
    pub ended_at: Option<String>,
}

impl ReportItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            position: row.get("position")?,
            source_object_id: row.get("source_object_id")?,
            source_object_type: row.get("source_object_type")?,
            plugin_state: row.get("plugin_state")?,
            details: row.get("details")?,
            html_details: row.get("html_details")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
        })
    }
}

/// Replaces all items of `job_id` with `items` in one transaction.
pub fn replace_for_job(
    db: &Database,
    job_id: &str,
    items: &[ReportItemRow],
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM report_items WHERE job_id = ?1", params![job_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO report_items (id, job_id, position, source_object_id,
                 source_object_type, plugin_state, details, html_details, started_at, ended_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for item in items {
                stmt.execute(params![
                    item.id,
                    job_id,
                    item.position,
                    item.source_object_id,
                    item.source_object_type,
                    item.plugin_state,
                    item.details,
                    item.html_details,
                    item.started_at,
                    item.ended_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
}

/// Items of a job in processing order.
pub fn find_by_job(db: &Database, job_id: &str) -> Result<Vec<ReportItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM report_items WHERE job_id = ?1 ORDER BY position")?;
        let rows = stmt
            .query_map(params![job_id], ReportItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Item counts per outcome state for a job.
pub fn count_by_state(db: &Database, job_id: &str) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT plugin_state, COUNT(*) FROM report_items WHERE job_id = ?1
             GROUP BY plugin_state ORDER BY plugin_state",
        )?;
        let counts = stmt
            .query_map(params![job_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    })
}
