//! Connectivity monitoring
//!
//! The engine never probes the network on the hot path: a monitor caches
//! the last sample and refreshes it at most once per refresh interval.
//! Staleness within that window is acceptable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Observed link quality. `Poor` is a soft signal: bulk work is refused
/// but single-record syncs still go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkQuality {
    Good,
    Poor,
}

/// Point-in-time connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub online: bool,
    pub quality: LinkQuality,
}

impl NetworkStatus {
    #[must_use]
    pub const fn online(quality: LinkQuality) -> Self {
        Self {
            online: true,
            quality,
        }
    }

    #[must_use]
    pub const fn offline() -> Self {
        Self {
            online: false,
            quality: LinkQuality::Poor,
        }
    }

    #[must_use]
    pub const fn is_poor(&self) -> bool {
        matches!(self.quality, LinkQuality::Poor)
    }
}

/// One connectivity measurement. Injectable so the engine is testable
/// without a real network.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn probe(&self) -> NetworkStatus;
}

/// Probe with a fixed, settable status (tests and local-only mode).
pub struct StaticProbe {
    status: std::sync::Mutex<NetworkStatus>,
}

impl StaticProbe {
    #[must_use]
    pub fn new(status: NetworkStatus) -> Self {
        Self {
            status: std::sync::Mutex::new(status),
        }
    }

    pub fn set_status(&self, status: NetworkStatus) {
        *self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = status;
    }
}

#[async_trait]
impl NetworkProbe for StaticProbe {
    async fn probe(&self) -> NetworkStatus {
        *self
            .status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Probe that issues a HEAD request against a health endpoint.
///
/// Any response means online; responses slower than `degraded_after`
/// degrade quality to `poor`.
pub struct HttpProbe {
    endpoint: String,
    client: reqwest::Client,
    degraded_after: Duration,
}

impl HttpProbe {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        degraded_after: Duration,
    ) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| crate::Error::transport_fatal(error.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
            degraded_after,
        })
    }
}

#[async_trait]
impl NetworkProbe for HttpProbe {
    async fn probe(&self) -> NetworkStatus {
        let started = Instant::now();
        match self.client.head(&self.endpoint).send().await {
            Ok(_) if started.elapsed() > self.degraded_after => {
                NetworkStatus::online(LinkQuality::Poor)
            }
            Ok(_) => NetworkStatus::online(LinkQuality::Good),
            Err(error) => {
                tracing::debug!(%error, "Connectivity probe failed");
                NetworkStatus::offline()
            }
        }
    }
}

struct CachedSample {
    taken_at: Instant,
    status: NetworkStatus,
}

/// Monitor that caches probe results for a refresh interval.
pub struct SampledNetworkMonitor {
    probe: Arc<dyn NetworkProbe>,
    refresh: Duration,
    cached: Mutex<Option<CachedSample>>,
}

impl SampledNetworkMonitor {
    #[must_use]
    pub fn new(probe: Arc<dyn NetworkProbe>, refresh: Duration) -> Self {
        Self {
            probe,
            refresh,
            cached: Mutex::new(None),
        }
    }

    /// Last cached status without touching the network. Reports offline
    /// until the first sample lands.
    pub fn status(&self) -> NetworkStatus {
        self.cached
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|sample| sample.status))
            .unwrap_or_else(NetworkStatus::offline)
    }

    /// Current status, refreshing the cached sample when it is stale.
    pub async fn sample(&self) -> NetworkStatus {
        let mut guard = self.cached.lock().await;
        if let Some(sample) = guard.as_ref() {
            if sample.taken_at.elapsed() < self.refresh {
                return sample.status;
            }
        }

        let status = self.probe.probe().await;
        *guard = Some(CachedSample {
            taken_at: Instant::now(),
            status,
        });
        status
    }

    /// Poll until the link comes up or the timeout expires.
    pub async fn wait_for_online(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.sample().await.online {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let poll = self.refresh.min(Duration::from_millis(500));
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_before_first_sample_is_offline() {
        let probe = Arc::new(StaticProbe::new(NetworkStatus::online(LinkQuality::Good)));
        let monitor = SampledNetworkMonitor::new(probe, Duration::from_secs(5));
        assert!(!monitor.status().online);

        monitor.sample().await;
        assert!(monitor.status().online);
    }

    #[tokio::test]
    async fn sample_caches_within_refresh_window() {
        let probe = Arc::new(StaticProbe::new(NetworkStatus::online(LinkQuality::Good)));
        let monitor = SampledNetworkMonitor::new(probe.clone(), Duration::from_secs(60));

        assert!(monitor.sample().await.online);
        probe.set_status(NetworkStatus::offline());
        // Still within the refresh window: cached sample wins
        assert!(monitor.sample().await.online);
    }

    #[tokio::test]
    async fn sample_refreshes_after_window() {
        let probe = Arc::new(StaticProbe::new(NetworkStatus::online(LinkQuality::Good)));
        let monitor = SampledNetworkMonitor::new(probe.clone(), Duration::from_millis(10));

        assert!(monitor.sample().await.online);
        probe.set_status(NetworkStatus::offline());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!monitor.sample().await.online);
    }

    #[tokio::test]
    async fn wait_for_online_times_out() {
        let probe = Arc::new(StaticProbe::new(NetworkStatus::offline()));
        let monitor = SampledNetworkMonitor::new(probe, Duration::from_millis(10));
        assert!(!monitor.wait_for_online(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn wait_for_online_returns_on_recovery() {
        let probe = Arc::new(StaticProbe::new(NetworkStatus::offline()));
        let monitor = SampledNetworkMonitor::new(probe.clone(), Duration::from_millis(10));

        let handle = {
            let probe = probe.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                probe.set_status(NetworkStatus::online(LinkQuality::Good));
            })
        };

        assert!(monitor.wait_for_online(Duration::from_secs(2)).await);
        handle.await.unwrap();
    }
}
