//! Sync session orchestration
//!
//! One `run` drives an upload/download pass for a single owner. At most
//! one session per owner is in flight; a second caller is rejected, not
//! queued. Per-record work runs through a bounded in-flight window, and
//! the network is re-sampled between windows so a link that degrades
//! mid-run stops admitting new items while in-flight ones finish.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::limiter::{OperationClass, RateLimiter};
use crate::models::{
    QueueEntry, RecordId, RunSummary, SyncConflict, SyncFailure, SyncReport, SyncState,
};
use crate::net::SampledNetworkMonitor;
use crate::service::RecordService;
use crate::sync::conflict::{classify, Disposition};
use crate::sync::transport::{PushOutcome, RecordTransport};

/// Which way a session moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Upload,
    Download,
    #[default]
    Both,
}

impl SyncDirection {
    #[must_use]
    pub const fn includes_upload(self) -> bool {
        matches!(self, Self::Upload | Self::Both)
    }

    #[must_use]
    pub const fn includes_download(self) -> bool {
        matches!(self, Self::Download | Self::Both)
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown sync direction: {other}")),
        }
    }
}

/// Parameters for one session.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub owner_id: String,
    pub direction: SyncDirection,
    /// Optional explicit subset; anything not owned by `owner_id` is
    /// silently dropped
    pub record_ids: Option<Vec<RecordId>>,
    /// Push through a poor link
    pub force: bool,
}

impl SyncRequest {
    #[must_use]
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            direction: SyncDirection::Both,
            record_ids: None,
            force: false,
        }
    }

    #[must_use]
    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn with_record_ids(mut self, record_ids: Vec<RecordId>) -> Self {
        self.record_ids = Some(record_ids);
        self
    }

    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Whether this request touches more than a single record.
    fn is_multi_record(&self) -> bool {
        self.record_ids.as_ref().map_or(true, |ids| ids.len() > 1)
    }
}

type OwnerSet = Arc<Mutex<HashSet<String>>>;

/// Removes the owner from the active set when the session ends, however
/// it ends.
struct OwnerGuard {
    active: OwnerSet,
    owner_id: String,
}

impl OwnerGuard {
    fn acquire(active: &OwnerSet, owner_id: &str) -> Result<Self> {
        let mut set = active.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(owner_id.to_string()) {
            return Err(Error::SyncInProgress(owner_id.to_string()));
        }
        Ok(Self {
            active: Arc::clone(active),
            owner_id: owner_id.to_string(),
        })
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.owner_id);
    }
}

enum ItemOutcome {
    Synced(RecordId),
    Skipped,
    Conflicted(SyncConflict),
    Failed {
        record_id: RecordId,
        error: String,
        permanent: bool,
    },
}

/// Drives upload/download passes over a user's records.
///
/// Constructed with its collaborators so tests can substitute fakes for
/// the store, the transport, the network probe, and the limiter.
pub struct SyncOrchestrator {
    service: RecordService,
    transport: Arc<dyn RecordTransport>,
    monitor: Arc<SampledNetworkMonitor>,
    limiter: Arc<RateLimiter>,
    config: EngineConfig,
    active: OwnerSet,
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(
        service: RecordService,
        transport: Arc<dyn RecordTransport>,
        monitor: Arc<SampledNetworkMonitor>,
        limiter: Arc<RateLimiter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            service,
            transport,
            monitor,
            limiter,
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Engine tunables this orchestrator runs with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Owners that currently have queued work, for periodic sweeps.
    pub async fn owners_with_queued_work(&self) -> Result<Vec<String>> {
        self.service
            .owners_with_pending(self.config.attempt_ceiling)
            .await
    }

    /// Run one session for an owner.
    ///
    /// Rejected up front when the device is offline, the link is too poor
    /// for a multi-record request (unless forced), the owner is rate
    /// limited, or a session for the owner is already in flight. Past the
    /// preconditions the session always produces a report; a deadline or a
    /// degrading link yields a partial one instead of an error.
    pub async fn run(&self, request: SyncRequest) -> Result<SyncReport> {
        self.limiter
            .check(OperationClass::Sync, &request.owner_id)
            .await?;

        let status = self.monitor.sample().await;
        if !status.online {
            return Err(Error::Offline);
        }
        if status.is_poor() && request.is_multi_record() && !request.force {
            return Err(Error::PoorConnection);
        }

        let _guard = OwnerGuard::acquire(&self.active, &request.owner_id)?;

        let started_at = chrono::Utc::now().timestamp_millis();
        let deadline = Instant::now() + self.config.session_deadline;
        let mut report = SyncReport {
            started_at,
            ..SyncReport::default()
        };

        tracing::info!(
            owner = %request.owner_id,
            direction = ?request.direction,
            force = request.force,
            "Sync session started"
        );

        if request.direction.includes_upload() {
            self.upload_phase(&request, deadline, &mut report).await?;
        }

        if request.direction.includes_download() {
            self.download_phase(&request, &mut report).await?;
        }

        report.finished_at = chrono::Utc::now().timestamp_millis();
        let summary = RunSummary::from_report(&request.owner_id, &report);
        self.service.save_run_summary(&summary).await?;

        tracing::info!(
            owner = %request.owner_id,
            synced = report.synced_ids.len(),
            failed = report.failed.len(),
            conflicts = report.conflicts.len(),
            partial = report.partial,
            "Sync session finished"
        );

        Ok(report)
    }

    /// Resolve the upload working set for a request.
    async fn working_set(&self, request: &SyncRequest) -> Result<Vec<QueueEntry>> {
        let entries = self
            .service
            .drain_queue(&request.owner_id, self.config.attempt_ceiling)
            .await?;

        match &request.record_ids {
            None => Ok(entries),
            Some(ids) => {
                let wanted: HashSet<RecordId> = ids.iter().copied().collect();
                Ok(entries
                    .into_iter()
                    .filter(|entry| wanted.contains(&entry.record_id))
                    .collect())
            }
        }
    }

    async fn upload_phase(
        &self,
        request: &SyncRequest,
        deadline: Instant,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut pending: VecDeque<QueueEntry> = self.working_set(request).await?.into();

        while !pending.is_empty() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    owner = %request.owner_id,
                    remaining = pending.len(),
                    "Session deadline reached; returning partial result"
                );
                report.partial = true;
                break;
            }

            // Re-sample between windows: a link that degrades mid-run stops
            // admitting new items while in-flight ones finish. Poor quality
            // stays a soft signal: single-record requests proceed.
            let status = self.monitor.sample().await;
            if !status.online
                || (status.is_poor() && request.is_multi_record() && !request.force)
            {
                tracing::warn!(
                    owner = %request.owner_id,
                    online = status.online,
                    remaining = pending.len(),
                    "Link degraded mid-session; stopped admitting items"
                );
                report.partial = true;
                break;
            }

            let window_size = self.config.max_in_flight.min(pending.len());
            let mut in_flight: JoinSet<(RecordId, Result<ItemOutcome>)> = JoinSet::new();
            for entry in pending.drain(..window_size) {
                let service = self.service.clone();
                let transport = Arc::clone(&self.transport);
                let ceiling = self.config.attempt_ceiling;
                in_flight.spawn(async move {
                    let record_id = entry.record_id;
                    let outcome = upload_one(service, transport, entry, ceiling).await;
                    (record_id, outcome)
                });
            }

            while let Some(joined) = in_flight.join_next().await {
                match joined {
                    Ok((_, Ok(ItemOutcome::Synced(id)))) => report.synced_ids.push(id),
                    Ok((_, Ok(ItemOutcome::Skipped))) => {}
                    Ok((_, Ok(ItemOutcome::Conflicted(conflict)))) => {
                        report.conflicts.push(conflict);
                    }
                    Ok((
                        _,
                        Ok(ItemOutcome::Failed {
                            record_id,
                            error,
                            permanent,
                        }),
                    )) => report.failed.push(SyncFailure {
                        record_id,
                        error,
                        permanent,
                    }),
                    Ok((record_id, Err(error))) => report.failed.push(SyncFailure {
                        record_id,
                        error: error.to_string(),
                        permanent: false,
                    }),
                    Err(join_error) => {
                        tracing::error!(%join_error, "Upload task failed to complete");
                    }
                }
            }
        }

        Ok(())
    }

    async fn download_phase(&self, request: &SyncRequest, report: &mut SyncReport) -> Result<()> {
        let since = self.service.max_remote_version(&request.owner_id).await?;
        let remotes = match self.transport.pull_since(&request.owner_id, since).await {
            Ok(remotes) => remotes,
            Err(error) if error.is_retryable() && !report.is_empty() => {
                // Uploads already landed; deliver what we have instead of
                // throwing the whole session away.
                tracing::warn!(owner = %request.owner_id, %error, "Download failed; returning partial result");
                report.partial = true;
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        let wanted: Option<HashSet<RecordId>> = request
            .record_ids
            .as_ref()
            .map(|ids| ids.iter().copied().collect());

        for remote in remotes {
            if remote.owner_id != request.owner_id {
                continue;
            }
            if let Some(wanted) = &wanted {
                if !wanted.contains(&remote.id) {
                    continue;
                }
            }

            match self.service.get_record(&remote.id).await? {
                None => {
                    self.service.apply_remote(&remote).await?;
                    report.synced_ids.push(remote.id);
                }
                Some(local) => match classify(&local, remote.version) {
                    Disposition::NeedsDownload => {
                        self.service.apply_remote(&remote).await?;
                        report.synced_ids.push(remote.id);
                    }
                    Disposition::UpToDate | Disposition::NeedsUpload => {}
                    Disposition::Conflict => {
                        let conflict = self
                            .service
                            .mark_conflict(&remote.id, remote.version, remote.updated_at)
                            .await?;
                        self.service.remove_queue_entry(&remote.id).await?;
                        report.conflicts.push(conflict);
                    }
                },
            }
        }

        Ok(())
    }
}

/// Push one queued record and record the outcome in the store.
async fn upload_one(
    service: RecordService,
    transport: Arc<dyn RecordTransport>,
    entry: QueueEntry,
    attempt_ceiling: i64,
) -> Result<ItemOutcome> {
    let id = entry.record_id;

    let Some(record) = service.get_record(&id).await? else {
        // The row vanished under the queue entry; nothing left to push.
        service.remove_queue_entry(&id).await?;
        return Ok(ItemOutcome::Skipped);
    };

    if record.sync_state == SyncState::Conflict {
        // Conflicted records leave the automatic queue until explicitly
        // resolved.
        service.remove_queue_entry(&id).await?;
        return Ok(ItemOutcome::Skipped);
    }

    if record.is_synced() {
        service.remove_queue_entry(&id).await?;
        return Ok(ItemOutcome::Skipped);
    }

    service.mark_syncing(&id).await?;
    let pushed_local_version = record.local_version;

    match transport.push(&record).await {
        Ok(PushOutcome::Accepted { remote_version }) => {
            let state = service
                .mark_synced(&id, remote_version, pushed_local_version)
                .await?;
            if state == SyncState::Synced {
                service.remove_queue_entry(&id).await?;
            }
            // A stale push (concurrent local edit mid-flight) keeps its
            // collapsed queue entry so the newer payload uploads next time.
            Ok(ItemOutcome::Synced(id))
        }
        Ok(PushOutcome::Conflict {
            remote_version,
            remote_updated_at,
        }) => match classify(&record, remote_version) {
            Disposition::Conflict => {
                let conflict = service
                    .mark_conflict(&id, remote_version, remote_updated_at)
                    .await?;
                service.remove_queue_entry(&id).await?;
                Ok(ItemOutcome::Conflicted(conflict))
            }
            _ => {
                // The remote moved but the versions do not describe a fork;
                // leave the entry queued and retry next session.
                retryable_failure(&service, id, "remote version moved during push", attempt_ceiling)
                    .await
            }
        },
        Ok(PushOutcome::Rejected { reason }) => {
            service.mark_failed(&id, &reason).await?;
            service
                .kill_queue_entry(&id, attempt_ceiling, &reason)
                .await?;
            Ok(ItemOutcome::Failed {
                record_id: id,
                error: reason,
                permanent: true,
            })
        }
        Err(error) if error.is_retryable() => {
            retryable_failure(&service, id, &error.to_string(), attempt_ceiling).await
        }
        Err(error) => {
            let message = error.to_string();
            service.mark_failed(&id, &message).await?;
            service
                .kill_queue_entry(&id, attempt_ceiling, &message)
                .await?;
            Ok(ItemOutcome::Failed {
                record_id: id,
                error: message,
                permanent: true,
            })
        }
    }
}

async fn retryable_failure(
    service: &RecordService,
    id: RecordId,
    message: &str,
    attempt_ceiling: i64,
) -> Result<ItemOutcome> {
    let attempts = service.increment_attempts(&id, message).await?;
    service.mark_failed(&id, message).await?;

    let permanent = attempts >= attempt_ceiling;
    if permanent {
        tracing::warn!(record = %id, attempts, "Retry ceiling reached; giving up on entry");
    }

    Ok(ItemOutcome::Failed {
        record_id: id,
        error: message.to_string(),
        permanent,
    })
}
