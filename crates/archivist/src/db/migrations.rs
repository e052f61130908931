//! Versioned schema migrations.
//!
//! Applied versions are tracked in a `_migrations` table; pending ones run
//! in order, each at most once.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_report_items_table",
        sql: include_str!("sql/002_create_report_items.sql"),
    },
];

/// Applies every migration newer than the recorded version. Each one runs
/// in its own transaction together with its `_migrations` row.
pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, migration)?;
    }
    Ok(())
}

fn apply(conn: &mut Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: migration.version,
        reason: e.to_string(),
    };
    let tx = conn.transaction().map_err(failed)?;

    log::info!("applying migration v{} ({})", migration.version, migration.description);
    tx.execute_batch(migration.sql).map_err(failed)?;

    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        params![migration.version, migration.description],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&mut conn).unwrap();
        conn
    }

    fn applied(conn: &Connection) -> u32 {
        conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_rerun_applies_nothing() {
        let mut conn = migrated();
        run_all(&mut conn).unwrap();
        assert_eq!(applied(&conn), MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_report_items_cascade_with_jobs() {
        let conn = migrated();
        conn.execute_batch(
            "INSERT INTO jobs (id, name, plugin_id, plugin_type, selection, username, state, created_at, updated_at)
             VALUES ('j1', 'n', 'p', 'misc', '{}', 'u', 'CREATED', '2026-01-01', '2026-01-01');
             INSERT INTO report_items (id, job_id, position, source_object_id, plugin_state, started_at)
             VALUES ('i1', 'j1', 0, 'o1', 'SUCCESS', '2026-01-01');
             DELETE FROM jobs WHERE id = 'j1';",
        )
        .unwrap();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM report_items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_jobs_table_carries_stats() {
        let conn = migrated();
        let columns: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('jobs')")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(columns.iter().any(|c| c == "stats"));

        conn.execute_batch(
            "INSERT INTO jobs (id, name, plugin_id, plugin_type, selection, username, state, created_at, updated_at)
             VALUES ('j1', 'n', 'p', 'misc', '{}', 'u', 'CREATED', '2026-01-01', '2026-01-01');",
        )
        .unwrap();
        let stats: String = conn
            .query_row("SELECT stats FROM jobs WHERE id = 'j1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stats, "{}");
    }
}
