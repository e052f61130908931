use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{info, warn};

use crate::broadcast::JobProgressBroadcaster;
use crate::catalog::MemoryCatalog;
use crate::config::{load_config, EngineConfig};
use crate::db::job_repo::JobFilter;
use crate::db::SqliteJobStore;
use crate::logging::init_logging;
use crate::model::{JobState, ObjectType, PluginType, SelectedObjects};
use crate::notify::{JobNotifier, WebhookNotifier};
use crate::orchestrator::{JobOrchestrator, JobRequest, OrchestratorSettings};
use crate::plugin::PluginRegistry;
use crate::selection::Filter;
use crate::store::JobStore;

#[derive(Parser, Debug)]
#[command(name = "archivist")]
#[command(about = "Run preservation plugins over archived object selections")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to the engine config JSON. Built-in defaults when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error or a filter directive).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override the job database location.
    #[arg(long)]
    pub database: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the available plugins.
    Plugins {},
    /// Run a plugin over objects of a catalog manifest.
    Run {
        /// JSON manifest describing the archived objects.
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        plugin: String,
        /// Explicit object ids, comma separated.
        #[arg(long, value_delimiter = ',', conflicts_with = "filter")]
        ids: Vec<String>,
        /// `field=value` conditions, all of which must hold.
        #[arg(long)]
        filter: Vec<String>,
        /// Object type of a filter selection. Defaults to the plugin's.
        #[arg(long)]
        object_type: Option<String>,
        /// Plugin parameter as `key=value`.
        #[arg(long = "param")]
        params: Vec<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "cli")]
        user: String,
    },
    /// Print a stored job, its outcome counts and its report as JSON.
    Status {
        job_id: String,
    },
    /// List stored jobs, newest first.
    Jobs {
        #[arg(long)]
        state: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("load config: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    init_logging(&config.logging, args.log_level.as_deref())?;

    match &args.cmd {
        Command::Plugins {} => plugins(),
        Command::Run {
            catalog,
            plugin,
            ids,
            filter,
            object_type,
            params,
            name,
            user,
        } => {
            let store = open_store(&args, &config)?;
            let selection = build_selection(plugin, ids, filter, object_type.as_deref())?;
            let mut request = JobRequest::new(plugin.as_str(), plugin_type_of(plugin)?, selection)
                .username(user.as_str());
            if let Some(name) = name {
                request = request.name(name.as_str());
            }
            for (key, value) in parse_params(params)? {
                request = request.parameter(key, value);
            }
            run(&config, store, catalog, request)
        }
        Command::Status { job_id } => status(&open_store(&args, &config)?, job_id),
        Command::Jobs { state, limit } => jobs(&open_store(&args, &config)?, state.as_deref(), *limit),
    }
}

fn open_store(args: &Args, config: &EngineConfig) -> Result<SqliteJobStore> {
    let path = args
        .database
        .clone()
        .or_else(|| config.database_path())
        .ok_or_else(|| anyhow!("no database path configured and no home directory found"))?;
    SqliteJobStore::open(&path).with_context(|| format!("open job database: {}", path.display()))
}

fn plugins() -> Result<()> {
    let registry = PluginRegistry::with_builtin();
    println!("{}", serde_json::to_string_pretty(&registry.list())?);
    Ok(())
}

fn plugin_type_of(plugin: &str) -> Result<PluginType> {
    PluginRegistry::with_builtin()
        .info(plugin)
        .map(|info| info.plugin_type)
        .ok_or_else(|| anyhow!("unknown plugin '{}'", plugin))
}

fn build_selection(
    plugin: &str,
    ids: &[String],
    filters: &[String],
    object_type: Option<&str>,
) -> Result<SelectedObjects> {
    if !ids.is_empty() {
        return Ok(SelectedObjects::ids(ids.iter().map(|id| id.trim())));
    }

    let mut filter = Filter::all();
    for expr in filters {
        filter = filter.and(Filter::parse_equals(expr)?);
    }
    let object_type = match object_type {
        Some(raw) => raw.parse::<ObjectType>().map_err(|e| anyhow!(e))?,
        None => PluginRegistry::with_builtin()
            .info(plugin)
            .map(|info| info.object_type)
            .ok_or_else(|| anyhow!("unknown plugin '{}'", plugin))?,
    };
    Ok(SelectedObjects::filter(filter, object_type))
}

fn parse_params(params: &[String]) -> Result<BTreeMap<String, String>> {
    params
        .iter()
        .map(|p| match p.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(anyhow!("expected key=value, got '{}'", p)),
        })
        .collect()
}

fn run(config: &EngineConfig, store: SqliteJobStore, catalog: &Path, request: JobRequest) -> Result<()> {
    let catalog = Arc::new(
        MemoryCatalog::from_manifest_path(catalog)
            .with_context(|| format!("load catalog: {}", catalog.display()))?,
    );
    let broadcaster = JobProgressBroadcaster::default();
    let mut progress = broadcaster.subscribe();

    let mut orchestrator = JobOrchestrator::new(
        PluginRegistry::with_builtin(),
        Arc::new(store),
        catalog.clone(),
        catalog,
        OrchestratorSettings::from(config),
    )
    .with_broadcaster(broadcaster);
    if let Some(notification) = &config.notification {
        let notifier: Arc<dyn JobNotifier> = Arc::new(WebhookNotifier::from_config(notification)?);
        orchestrator = orchestrator.with_notifier(notifier);
    }
    let orchestrator = Arc::new(orchestrator);

    let handle = orchestrator.submit(request)?;
    let job_id = handle.id().to_string();
    info!(job_id = %job_id, "job submitted");

    {
        let orchestrator = Arc::clone(&orchestrator);
        let job_id = job_id.clone();
        ctrlc::set_handler(move || match orchestrator.cancel(&job_id) {
            Ok(true) => eprintln!("cancel requested, waiting for running batches"),
            Ok(false) => {}
            Err(e) => warn!("cancel failed: {}", e),
        })
        .context("install Ctrl-C handler")?;
    }

    loop {
        match progress.try_recv() {
            Ok(event) if event.job_id == job_id => {
                let c = event.counters;
                eprintln!(
                    "[{:>3}%] {} success={} failure={} remaining={}",
                    event.completion_percentage, event.state, c.success, c.failure, c.remaining
                );
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) => {
                if handle.is_finished() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(TryRecvError::Closed) => break,
        }
    }

    let job = handle.join()?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    if job.state != JobState::Completed {
        bail!(
            "job {} {}: {}",
            job.id,
            job.state,
            job.state_details.as_deref().unwrap_or("no details")
        );
    }
    Ok(())
}

fn status(store: &SqliteJobStore, job_id: &str) -> Result<()> {
    let job = store
        .get_job(job_id)?
        .ok_or_else(|| anyhow!("job not found: {}", job_id))?;
    let report = store.get_report(job_id)?;
    let outcomes = store.outcome_summary(job_id)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "job": job,
            "outcomes": outcomes,
            "report": report,
        }))?
    );
    Ok(())
}

fn jobs(store: &SqliteJobStore, state: Option<&str>, limit: u64) -> Result<()> {
    let state = state
        .map(|s| s.parse::<JobState>().map_err(|e| anyhow!(e)))
        .transpose()?;
    let (jobs, total) = store.list_jobs(&JobFilter {
        state: state.map(|s| s.as_str().to_string()),
        limit: Some(limit),
        ..Default::default()
    })?;

    for job in &jobs {
        println!(
            "{}  {:<9}  {:>3}%  {}  {}",
            job.id, job.state, job.stats.completion_percentage, job.plugin_id, job.name
        );
    }
    eprintln!("{} of {} jobs", jobs.len(), total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let params = parse_params(&["algorithm = sha256".to_string(), "empty=".to_string()]).unwrap();
        assert_eq!(params.get("algorithm").map(String::as_str), Some("sha256"));
        assert_eq!(params.get("empty").map(String::as_str), Some(""));
        assert!(parse_params(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn test_selection_from_ids() {
        let selection =
            build_selection("fixity-check", &["a".to_string(), " b".to_string()], &[], None).unwrap();
        assert_eq!(selection, SelectedObjects::ids(["a", "b"]));
    }

    #[test]
    fn test_selection_from_filter_defaults_to_plugin_type() {
        let selection =
            build_selection("fixity-check", &[], &["aip_id=aip-1".to_string()], None).unwrap();
        assert_eq!(
            selection,
            SelectedObjects::filter(Filter::equals("aip_id", "aip-1"), ObjectType::File)
        );

        assert!(build_selection("fixity-check", &[], &["=x".to_string()], None).is_err());
        assert!(build_selection("nope", &[], &[], None).is_err());
        assert!(build_selection("fixity-check", &[], &[], Some("folder")).is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "archivist",
            "--log-level",
            "debug",
            "run",
            "--catalog",
            "manifest.json",
            "--plugin",
            "fixity-check",
            "--ids",
            "f-1,f-2",
            "--param",
            "algorithm=sha256",
        ])
        .unwrap();
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        match args.cmd {
            Command::Run { ids, params, user, .. } => {
                assert_eq!(ids, vec!["f-1", "f-2"]);
                assert_eq!(params, vec!["algorithm=sha256"]);
                assert_eq!(user, "cli");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_ids_conflict_with_filter() {
        let result = Args::try_parse_from([
            "archivist", "run", "--catalog", "m.json", "--plugin", "p", "--ids", "a", "--filter",
            "x=y",
        ]);
        assert!(result.is_err());
    }
}
