//! Built-in plugins over files on disk, with jobs persisted in SQLite.

mod common;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use archivist::db::job_repo::JobFilter;
use archivist::db::SqliteJobStore;
use archivist::model::{
    ArchivedFile, ArchivedObject, Checksum, JobState, ObjectType, PluginState, PluginType,
    SelectedObjects,
};
use archivist::store::JobStore;
use archivist::{Filter, JobOrchestrator, JobRequest, MemoryCatalog, PluginRegistry};

use common::settings;

fn file(id: &str, name: &str, checksum: Option<&str>) -> ArchivedObject {
    ArchivedObject::File(ArchivedFile {
        id: id.to_string(),
        aip_id: "aip-1".to_string(),
        representation_id: "rep-1".to_string(),
        name: name.to_string(),
        size: 0,
        checksum: checksum.map(|value| Checksum {
            algorithm: "sha256".to_string(),
            value: value.to_string(),
        }),
        properties: BTreeMap::new(),
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Three files of `aip-1`: intact, corrupted and never checksummed.
fn catalog(dir: &Path) -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    let contents: [(&str, &str, &[u8]); 3] = [
        ("f-1", "letter.pdf", b"%PDF-1.4 letter"),
        ("f-2", "scan.png", b"\x89PNG\r\n\x1a\n scan"),
        ("f-3", "notes.txt", b"field notes"),
    ];
    for (id, name, bytes) in contents {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        let checksum = match id {
            "f-1" => Some(sha256_hex(bytes)),
            "f-2" => Some(sha256_hex(b"what was ingested")),
            _ => None,
        };
        catalog.insert_with_file(file(id, name, checksum.as_deref()), path);
    }
    catalog
}

fn orchestrator(dir: &TempDir, store: SqliteJobStore) -> JobOrchestrator {
    let catalog = Arc::new(catalog(dir.path()));
    JobOrchestrator::new(
        PluginRegistry::with_builtin(),
        Arc::new(store),
        catalog.clone(),
        catalog,
        settings(2, 2),
    )
}

#[test]
fn test_fixity_check_persists_outcomes() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("jobs.db");
    let orchestrator = orchestrator(&dir, SqliteJobStore::open(&db_path).unwrap());

    let job = orchestrator
        .submit(
            JobRequest::new(
                "fixity-check",
                PluginType::AipToAip,
                SelectedObjects::filter(Filter::equals("aip_id", "aip-1"), ObjectType::File),
            )
            .name("fixity audit")
            .username("curator"),
        )
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.state_details.as_deref(), Some("1 of 3 objects failed"));

    // a fresh connection sees the final state
    let store = SqliteJobStore::open(&db_path).unwrap();
    let stored = store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.name, "fixity audit");
    assert_eq!(
        (stored.stats.total, stored.stats.success, stored.stats.failure, stored.stats.remaining),
        (3, 2, 1, 0)
    );

    let report = store.get_report(&job.id).unwrap().unwrap();
    assert_eq!(report.len(), 3);
    assert_eq!(report.item_for("f-1").unwrap().plugin_state, PluginState::Success);
    let corrupted = report.item_for("f-2").unwrap();
    assert_eq!(corrupted.plugin_state, PluginState::Failure);
    assert!(corrupted.details.contains("mismatch"));
    assert_eq!(report.item_for("f-3").unwrap().plugin_state, PluginState::PartialSuccess);
    assert!(report
        .items
        .iter()
        .all(|i| i.source_object_type == Some(ObjectType::File)));

    let (failed, total) = store
        .list_jobs(&JobFilter {
            state: Some("FAILED".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(failed[0].id, job.id);
}

#[test]
fn test_format_identification_completes() {
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, SqliteJobStore::open_in_memory().unwrap());

    let job = orchestrator
        .run(JobRequest::new(
            "format-identification",
            PluginType::AipToAip,
            SelectedObjects::ids(["f-1", "f-2", "f-3"]),
        ))
        .unwrap();

    assert_eq!(job.state, JobState::Completed);
    let report = orchestrator.report(&job.id).unwrap();
    assert_eq!(report.count(PluginState::Success), 3);
    assert!(report.item_for("f-1").unwrap().details.contains("application/pdf"));
}
