//! Job repository: CRUD operations for the `jobs` table.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row. Structured fields are stored as JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub name: String,
    pub plugin_id: String,
    pub plugin_type: String,
    pub plugin_parameters: String,
    pub selection: String,
    pub username: String,
    pub state: String,
    pub state_details: Option<String>,
    pub stats: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            plugin_id: row.get("plugin_id")?,
            plugin_type: row.get("plugin_type")?,
            plugin_parameters: row.get("plugin_parameters")?,
            selection: row.get("selection")?,
            username: row.get("username")?,
            state: row.get("state")?,
            state_details: row.get("state_details")?,
            stats: row.get("stats")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Optional equality filters and paging for [`query`].
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub state: Option<String>,
    pub plugin_id: Option<String>,
    pub username: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, name, plugin_id, plugin_type, plugin_parameters, selection,
             username, state, state_details, stats, created_at, started_at, ended_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                job.id,
                job.name,
                job.plugin_id,
                job.plugin_type,
                job.plugin_parameters,
                job.selection,
                job.username,
                job.state,
                job.state_details,
                job.stats,
                job.created_at,
                job.started_at,
                job.ended_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites the mutable fields of a job. Returns the number of rows
/// touched (0 when the job does not exist).
pub fn update(db: &Database, job: &JobRow) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET name=?2, plugin_parameters=?3, selection=?4, state=?5,
             state_details=?6, stats=?7, started_at=?8, ended_at=?9, updated_at=?10
             WHERE id=?1",
            params![
                job.id,
                job.name,
                job.plugin_parameters,
                job.selection,
                job.state,
                job.state_details,
                job.stats,
                job.started_at,
                job.ended_at,
                job.updated_at,
            ],
        )?;
        Ok(changed)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
            .optional()?;
        Ok(row)
    })
}

/// Jobs matching `filter`, newest first, plus the unpaged match count.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    let clauses = [
        ("state", &filter.state),
        ("plugin_id", &filter.plugin_id),
        ("username", &filter.username),
    ];
    let mut conditions = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for (column, value) in clauses {
        if let Some(value) = value {
            values.push(Value::Text(value.clone()));
            conditions.push(format!("{} = ?{}", column, values.len()));
        }
    }
    let where_clause = match conditions.is_empty() {
        true => String::new(),
        false => format!(" WHERE {}", conditions.join(" AND ")),
    };

    db.with_conn(|conn| {
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM jobs{}", where_clause),
            params_from_iter(values.iter()),
            |r| r.get(0),
        )?;

        let mut paged = values.clone();
        paged.push(Value::Integer(filter.limit.unwrap_or(100) as i64));
        paged.push(Value::Integer(filter.offset.unwrap_or(0) as i64));
        let sql = format!(
            "SELECT * FROM jobs{} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
            where_clause,
            values.len() + 1,
            values.len() + 2
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(paged.iter()), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rows, total))
    })
}
