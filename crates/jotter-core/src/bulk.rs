//! Bulk operations over bounded sets of record ids
//!
//! The one place where partial success is an expected, non-error outcome:
//! each item is applied independently and every failure is captured with
//! its record id, never aborting the batch.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::limiter::{OperationClass, RateLimiter};
use crate::models::RecordId;
use crate::net::SampledNetworkMonitor;
use crate::service::RecordService;

/// Action applied to every record in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    /// Soft-delete and queue the deletion
    Delete,
    /// Stamp archived and queue the update
    Archive,
    /// Re-queue for upload, resolving any open conflict rows
    Resync,
}

impl BulkAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Archive => "archive",
            Self::Resync => "resync",
        }
    }
}

impl FromStr for BulkAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "delete" => Ok(Self::Delete),
            "archive" => Ok(Self::Archive),
            "resync" => Ok(Self::Resync),
            other => Err(format!("unknown bulk action: {other}")),
        }
    }
}

/// One item's failure inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkError {
    pub record_id: RecordId,
    pub error: String,
}

/// Per-item accounting for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    pub success_count: usize,
    pub failed_count: usize,
    pub errors: Vec<BulkError>,
}

/// Applies one action across a bounded set of record ids.
pub struct BulkRunner {
    service: RecordService,
    monitor: Arc<SampledNetworkMonitor>,
    limiter: Arc<RateLimiter>,
    config: EngineConfig,
}

impl BulkRunner {
    #[must_use]
    pub fn new(
        service: RecordService,
        monitor: Arc<SampledNetworkMonitor>,
        limiter: Arc<RateLimiter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            service,
            monitor,
            limiter,
            config,
        }
    }

    /// Apply `action` to each record in `record_ids`.
    ///
    /// Rejects oversized batches, rate-limited callers, and offline or
    /// degraded links up front; past that, individual failures never abort
    /// the batch.
    pub async fn apply(
        &self,
        owner_id: &str,
        action: BulkAction,
        record_ids: &[RecordId],
    ) -> Result<BulkReport> {
        if record_ids.len() > self.config.max_bulk_batch {
            return Err(Error::InvalidInput(format!(
                "batch of {} exceeds the maximum of {}",
                record_ids.len(),
                self.config.max_bulk_batch
            )));
        }

        self.limiter.check(OperationClass::Bulk, owner_id).await?;

        let status = self.monitor.sample().await;
        if !status.online {
            return Err(Error::Offline);
        }
        if status.is_poor() {
            return Err(Error::PoorConnection);
        }

        let mut report = BulkReport::default();
        for record_id in record_ids {
            match self.apply_one(owner_id, action, record_id).await {
                Ok(()) => report.success_count += 1,
                Err(error) => {
                    report.failed_count += 1;
                    report.errors.push(BulkError {
                        record_id: *record_id,
                        error: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            owner = owner_id,
            action = action.as_str(),
            succeeded = report.success_count,
            failed = report.failed_count,
            "Bulk operation finished"
        );

        Ok(report)
    }

    async fn apply_one(
        &self,
        owner_id: &str,
        action: BulkAction,
        record_id: &RecordId,
    ) -> Result<()> {
        // Records the caller does not own read as missing.
        let record = self
            .service
            .get_record(record_id)
            .await?
            .filter(|record| record.owner_id == owner_id)
            .ok_or_else(|| Error::NotFound(record_id.to_string()))?;

        match action {
            BulkAction::Delete => {
                self.service.delete_record(&record.id).await?;
            }
            BulkAction::Archive => {
                self.service.archive_record(&record.id).await?;
            }
            BulkAction::Resync => {
                self.service.resync_record(&record.id).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::RecordKind;
    use crate::net::{LinkQuality, NetworkStatus, StaticProbe};
    use serde_json::json;
    use std::time::Duration;

    fn runner_with_status(status: NetworkStatus) -> (BulkRunner, RecordService) {
        let service = RecordService::open_in_memory().unwrap();
        let probe = Arc::new(StaticProbe::new(status));
        let monitor = Arc::new(SampledNetworkMonitor::new(probe, Duration::from_secs(60)));
        let limiter = Arc::new(RateLimiter::default());
        let runner = BulkRunner::new(
            service.clone(),
            monitor,
            limiter,
            EngineConfig::default(),
        );
        (runner, service)
    }

    fn online_runner() -> (BulkRunner, RecordService) {
        runner_with_status(NetworkStatus::online(LinkQuality::Good))
    }

    #[tokio::test]
    async fn partial_failure_is_not_an_error() {
        let (runner, service) = online_runner();

        let mut ids = Vec::new();
        for i in 0..7 {
            let record = service
                .create_record("user-1", RecordKind::Entry, json!({"n": i}))
                .await
                .unwrap();
            ids.push(record.id);
        }
        // Three ids that do not exist
        ids.extend([RecordId::new(), RecordId::new(), RecordId::new()]);

        let report = runner
            .apply("user-1", BulkAction::Delete, &ids)
            .await
            .unwrap();

        assert_eq!(report.success_count, 7);
        assert_eq!(report.failed_count, 3);
        assert_eq!(report.errors.len(), 3);
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let (runner, _service) = online_runner();
        let ids: Vec<RecordId> = (0..101).map(|_| RecordId::new()).collect();

        let err = runner
            .apply("user-1", BulkAction::Archive, &ids)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn poor_link_refuses_bulk_work() {
        let (runner, service) = runner_with_status(NetworkStatus::online(LinkQuality::Poor));
        let record = service
            .create_record("user-1", RecordKind::Entry, json!({}))
            .await
            .unwrap();

        let err = runner
            .apply("user-1", BulkAction::Delete, &[record.id])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PoorConnection));
    }

    #[tokio::test]
    async fn foreign_records_read_as_missing() {
        let (runner, service) = online_runner();
        let theirs = service
            .create_record("user-2", RecordKind::Entry, json!({}))
            .await
            .unwrap();

        let report = runner
            .apply("user-1", BulkAction::Delete, &[theirs.id])
            .await
            .unwrap();
        assert_eq!(report.success_count, 0);
        assert_eq!(report.failed_count, 1);

        // Untouched for its real owner
        let record = service.get_record(&theirs.id).await.unwrap().unwrap();
        assert!(!record.is_deleted());
    }
}
