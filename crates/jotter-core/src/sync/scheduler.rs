//! Background sync scheduling
//!
//! Mutations never trigger sync directly. The service announces each one
//! on a channel; this scheduler debounces the events and drives sessions
//! through the same rate-limit and single-flight gates as an interactive
//! call, so ordering and backpressure stay visible. An optional periodic
//! tick sweeps owners with queued work the same way.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::service::MutationEvent;
use crate::sync::session::{SyncOrchestrator, SyncRequest};

/// Consumes mutation events and triggers sync sessions.
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    events: UnboundedReceiver<MutationEvent>,
}

impl SyncScheduler {
    #[must_use]
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        events: UnboundedReceiver<MutationEvent>,
    ) -> Self {
        Self {
            orchestrator,
            events,
        }
    }

    /// Run the scheduler until the event channel closes.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let debounce = self.orchestrator.config().debounce;
        let tick = self.orchestrator.config().tick_interval;
        let mut interval = tick.map(tokio::time::interval);

        loop {
            let mut owners: HashSet<String> = HashSet::new();

            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    owners.insert(event.owner_id);

                    // Let the burst settle, then coalesce everything that
                    // arrived while waiting.
                    tokio::time::sleep(debounce).await;
                    while let Ok(event) = self.events.try_recv() {
                        owners.insert(event.owner_id);
                    }
                }
                _ = tick_next(interval.as_mut()), if interval.is_some() => {
                    match self.orchestrator.owners_with_queued_work().await {
                        Ok(queued) => owners.extend(queued),
                        Err(error) => {
                            tracing::warn!(%error, "Periodic sweep could not list queued owners");
                        }
                    }
                }
            }

            for owner_id in owners {
                self.sync_owner(&owner_id).await;
            }
        }

        tracing::debug!("Mutation event channel closed; scheduler stopping");
    }

    async fn sync_owner(&self, owner_id: &str) {
        match self.orchestrator.run(SyncRequest::new(owner_id)).await {
            Ok(report) => {
                tracing::debug!(
                    owner = owner_id,
                    synced = report.synced_ids.len(),
                    conflicts = report.conflicts.len(),
                    "Scheduled sync finished"
                );
            }
            // Expected outcomes for a background trigger: wait for the
            // next event or tick instead of escalating.
            Err(
                error @ (Error::Offline
                | Error::PoorConnection
                | Error::RateLimited { .. }
                | Error::SyncInProgress(_)),
            ) => {
                tracing::debug!(owner = owner_id, %error, "Scheduled sync deferred");
            }
            Err(error) => {
                tracing::warn!(owner = owner_id, %error, "Scheduled sync failed");
            }
        }
    }
}

async fn tick_next(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
