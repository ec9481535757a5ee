//! Jotter CLI - journal records from the command line
//!
//! Quick capture with minimal friction; the sync engine runs on demand.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use jotter_core::config::EngineConfig;
use jotter_core::export::{render_json_export, render_markdown_export};
use jotter_core::limiter::RateLimiter;
use jotter_core::models::{Record, RecordId, RecordKind};
use jotter_core::net::{HttpProbe, SampledNetworkMonitor};
use jotter_core::sync::{HttpTransport, SyncDirection, SyncOrchestrator, SyncRequest};
use jotter_core::RecordService;
use serde::Serialize;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "jotter")]
#[command(about = "Capture journal records from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Owner id for records (defaults to JOTTER_OWNER or "local")
    #[arg(long)]
    owner: Option<String>,

    /// Quick capture: jotter "what happened today"
    #[arg(trailing_var_arg = true)]
    entry: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new record
    #[command(alias = "new")]
    Add {
        /// Record text
        content: Vec<String>,
        /// Record kind
        #[arg(long, value_enum, default_value_t = KindArg::Entry)]
        kind: KindArg,
    },
    /// List recent records
    List {
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Soft-delete a record
    Delete {
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Run a sync session against the configured remote
    Sync {
        /// Direction to sync
        #[arg(long, value_enum, default_value_t = DirectionArg::Both)]
        direction: DirectionArg,
        /// Push through a poor link
        #[arg(long)]
        force: bool,
    },
    /// Show network status, queue length, and the last session summary
    Status,
    /// List recorded sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export records
    Export {
        /// Export format
        #[arg(long, value_enum, default_value_t = FormatArg::Json)]
        format: FormatArg,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] jotter_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No record content provided")]
    EmptyContent,
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Record not found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Sync is not configured. Set JOTTER_REMOTE_URL to enable `jotter sync`.")]
    SyncNotConfigured,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum KindArg {
    Entry,
    Checklist,
    Snippet,
}

impl From<KindArg> for RecordKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Entry => Self::Entry,
            KindArg::Checklist => Self::Checklist,
            KindArg::Snippet => Self::Snippet,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum DirectionArg {
    Upload,
    Download,
    Both,
}

impl From<DirectionArg> for SyncDirection {
    fn from(direction: DirectionArg) -> Self {
        match direction {
            DirectionArg::Upload => Self::Upload,
            DirectionArg::Download => Self::Download,
            DirectionArg::Both => Self::Both,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum FormatArg {
    Json,
    Markdown,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jotter=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let owner_id = resolve_owner(cli.owner);

    match cli.command {
        Some(Commands::Add { content, kind }) => {
            run_add(&content, kind.into(), &owner_id, &db_path).await?;
        }
        Some(Commands::List { limit, json }) => {
            run_list(limit, json, &owner_id, &db_path).await?;
        }
        Some(Commands::Delete { id }) => run_delete(&id, &owner_id, &db_path).await?,
        Some(Commands::Sync { direction, force }) => {
            run_sync(direction.into(), force, &owner_id, &db_path).await?;
        }
        Some(Commands::Status) => run_status(&owner_id, &db_path).await?,
        Some(Commands::Conflicts { limit, json }) => {
            run_conflicts(limit, json, &owner_id, &db_path).await?;
        }
        Some(Commands::Export { format, output }) => {
            run_export(format, output.as_deref(), &owner_id, &db_path).await?;
        }
        None => {
            // Quick capture mode: jotter "what happened"
            if cli.entry.is_empty() {
                use clap::CommandFactory;
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                run_add(&cli.entry, RecordKind::Entry, &owner_id, &db_path).await?;
            }
        }
    }

    Ok(())
}

async fn run_add(
    content_parts: &[String],
    kind: RecordKind,
    owner_id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let text = normalize_content(&content_parts.join(" ")).ok_or(CliError::EmptyContent)?;

    let service = open_service(db_path)?;
    let record = service
        .create_record(owner_id, kind, serde_json::json!({"text": text}))
        .await?;

    println!("{}", record.id);
    Ok(())
}

#[derive(Debug, Serialize)]
struct RecordListItem {
    id: String,
    kind: String,
    preview: String,
    sync_state: String,
    updated_at: i64,
}

async fn run_list(
    limit: usize,
    as_json: bool,
    owner_id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path)?;
    let records = service.list_records(owner_id, limit, 0).await?;

    if as_json {
        let items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for record in &records {
            let item = record_to_list_item(record);
            let short_id = item.id.chars().take(13).collect::<String>();
            println!(
                "{short_id:<13}  {:<9}  {:<40}  {}",
                item.kind, item.preview, item.sync_state
            );
        }
    }

    Ok(())
}

async fn run_delete(id: &str, owner_id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path)?;
    let record = resolve_record(id, owner_id, &service).await?;

    service.delete_record(&record.id).await?;
    println!("{}", record.id);
    Ok(())
}

async fn run_sync(
    direction: SyncDirection,
    force: bool,
    owner_id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path)?;
    let orchestrator = build_orchestrator(service)?;

    let report = orchestrator
        .run(
            SyncRequest::new(owner_id)
                .with_direction(direction)
                .with_force(force),
        )
        .await?;

    println!(
        "Synced {} record(s), {} failed, {} conflict(s){}",
        report.synced_ids.len(),
        report.failed.len(),
        report.conflicts.len(),
        if report.partial { " (partial)" } else { "" }
    );
    for failure in &report.failed {
        println!("  failed {}: {}", failure.record_id, failure.error);
    }
    for conflict in &report.conflicts {
        println!(
            "  conflict {}: local v{} vs remote v{}",
            conflict.record_id, conflict.local_version, conflict.remote_version
        );
    }
    Ok(())
}

async fn run_status(owner_id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path)?;
    let config = EngineConfig::default();

    let queue_length = service.queue_len(owner_id, config.attempt_ceiling).await?;
    println!("Queue: {queue_length} record(s) waiting");

    match service.last_run_summary(owner_id).await? {
        Some(summary) => {
            let finished = chrono::DateTime::from_timestamp_millis(summary.finished_at)
                .map(|when| when.to_rfc3339())
                .unwrap_or_else(|| summary.finished_at.to_string());
            println!(
                "Last session: {} synced, {} failed, {} conflict(s) at {finished}",
                summary.synced_count, summary.failed_count, summary.conflict_count
            );
        }
        None => println!("Last session: never"),
    }

    if let Ok(monitor) = build_monitor() {
        let status = monitor.sample().await;
        println!(
            "Network: {} ({:?})",
            if status.online { "online" } else { "offline" },
            status.quality
        );
    } else {
        println!("Network: not configured (set JOTTER_REMOTE_URL)");
    }

    Ok(())
}

async fn run_conflicts(
    limit: usize,
    as_json: bool,
    owner_id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path)?;
    let conflicts = service.list_conflicts(owner_id, limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for entry in &conflicts {
        let status = if entry.resolved_at.is_some() {
            "resolved"
        } else {
            "open"
        };
        println!(
            "{}  local v{} vs remote v{}  {status}",
            entry.conflict.record_id, entry.conflict.local_version, entry.conflict.remote_version
        );
    }
    Ok(())
}

async fn run_export(
    format: FormatArg,
    output_path: Option<&Path>,
    owner_id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path)?;
    let records = list_all_records(owner_id, &service).await?;
    let rendered = match format {
        FormatArg::Json => render_json_export(&records)?,
        FormatArg::Markdown => render_markdown_export(&records),
    };

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }

    Ok(())
}

async fn list_all_records(
    owner_id: &str,
    service: &RecordService,
) -> Result<Vec<Record>, CliError> {
    const PAGE_SIZE: usize = 500;

    let mut records = Vec::new();
    let mut offset = 0usize;

    loop {
        let batch = service.list_records(owner_id, PAGE_SIZE, offset).await?;
        let count = batch.len();
        records.extend(batch);

        if count < PAGE_SIZE {
            break;
        }
        offset += count;
    }

    Ok(records)
}

async fn resolve_record(
    query: &str,
    owner_id: &str,
    service: &RecordService,
) -> Result<Record, CliError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyRecordId);
    }

    if let Ok(record_id) = trimmed.parse::<RecordId>() {
        if let Some(record) = service.get_record(&record_id).await? {
            if record.owner_id == owner_id {
                return Ok(record);
            }
        }
        return Err(CliError::RecordNotFound(trimmed.to_string()));
    }

    let candidates: Vec<Record> = list_all_records(owner_id, service)
        .await?
        .into_iter()
        .filter(|record| record.id.to_string().starts_with(trimmed))
        .collect();

    match candidates.len() {
        0 => Err(CliError::RecordNotFound(trimmed.to_string())),
        1 => Ok(candidates.into_iter().next().ok_or_else(|| {
            CliError::RecordNotFound(trimmed.to_string())
        })?),
        _ => {
            let options = candidates
                .iter()
                .take(3)
                .map(|record| record.id.to_string().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{trimmed}' is ambiguous; matches: {options}"
            )))
        }
    }
}

fn record_to_list_item(record: &Record) -> RecordListItem {
    RecordListItem {
        id: record.id.to_string(),
        kind: record.kind.as_str().to_string(),
        preview: record_preview(record, 40),
        sync_state: record.sync_state.as_str().to_string(),
        updated_at: record.updated_at,
    }
}

fn record_preview(record: &Record, max_chars: usize) -> String {
    let text = record
        .payload
        .get("text")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("");
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("JOTTER_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jotter")
        .join("jotter.db")
}

fn resolve_owner(cli_owner: Option<String>) -> String {
    cli_owner
        .or_else(|| env::var("JOTTER_OWNER").ok())
        .map(|owner| owner.trim().to_string())
        .filter(|owner| !owner.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

fn open_service(path: &Path) -> Result<RecordService, CliError> {
    Ok(RecordService::open_path(path)?)
}

fn remote_url_from_env() -> Option<String> {
    env::var("JOTTER_REMOTE_URL")
        .ok()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
}

fn build_monitor() -> Result<Arc<SampledNetworkMonitor>, CliError> {
    let remote_url = remote_url_from_env().ok_or(CliError::SyncNotConfigured)?;
    let probe_url = env::var("JOTTER_PROBE_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| format!("{}/healthz", remote_url.trim_end_matches('/')));

    let probe = Arc::new(HttpProbe::new(
        probe_url,
        Duration::from_secs(10),
        Duration::from_secs(5),
    )?);
    Ok(Arc::new(SampledNetworkMonitor::new(
        probe,
        EngineConfig::default().network_refresh,
    )))
}

fn build_orchestrator(service: RecordService) -> Result<SyncOrchestrator, CliError> {
    let remote_url = remote_url_from_env().ok_or(CliError::SyncNotConfigured)?;
    let transport = Arc::new(HttpTransport::new(&remote_url, Duration::from_secs(10))?);
    let monitor = build_monitor()?;
    let config = EngineConfig::default();
    let limiter = Arc::new(RateLimiter::new(config.limits));

    Ok(SyncOrchestrator::new(
        service, transport, monitor, limiter, config,
    ))
}

#[cfg(test)]
mod tests {
    use jotter_core::models::RecordKind;
    use jotter_core::RecordService;
    use serde_json::json;

    use super::{
        normalize_content, record_preview, resolve_owner, resolve_record, CliError,
    };

    #[test]
    fn normalize_content_trims_and_rejects_empty() {
        assert_eq!(normalize_content("  hello  "), Some("hello".to_string()));
        assert_eq!(normalize_content(" \n\t "), None);
    }

    #[test]
    fn resolve_owner_falls_back_to_local() {
        assert_eq!(resolve_owner(Some("  ".to_string())), "local");
        assert_eq!(resolve_owner(Some("ada".to_string())), "ada");
    }

    #[test]
    fn record_preview_truncates_with_ellipsis() {
        let record = jotter_core::models::Record::new(
            "local",
            RecordKind::Entry,
            json!({"text": "This is a very long sentence that should be shortened"}),
        );
        let preview = record_preview(&record, 20);
        assert_eq!(preview, "This is a very lo...");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_record_supports_exact_and_prefix_id() {
        let service = RecordService::open_in_memory().unwrap();
        let a = service
            .create_record("local", RecordKind::Entry, json!({"text": "a"}))
            .await
            .unwrap();
        let b = service
            .create_record("local", RecordKind::Entry, json!({"text": "b"}))
            .await
            .unwrap();

        let by_exact = resolve_record(&a.id.to_string(), "local", &service)
            .await
            .unwrap();
        assert_eq!(by_exact.id, a.id);

        // UUID v7 ids share a timestamp prefix; use enough of b's id to be
        // unique against a's.
        let full = b.id.to_string();
        let prefix = &full[..full.len() - 2];
        let by_prefix = resolve_record(prefix, "local", &service).await.unwrap();
        assert_eq!(by_prefix.id, b.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_record_rejects_missing_and_foreign() {
        let service = RecordService::open_in_memory().unwrap();
        let theirs = service
            .create_record("someone-else", RecordKind::Entry, json!({"text": "x"}))
            .await
            .unwrap();

        let missing = resolve_record("does-not-exist", "local", &service)
            .await
            .unwrap_err();
        assert!(matches!(missing, CliError::RecordNotFound(_)));

        let foreign = resolve_record(&theirs.id.to_string(), "local", &service)
            .await
            .unwrap_err();
        assert!(matches!(foreign, CliError::RecordNotFound(_)));
    }
}
