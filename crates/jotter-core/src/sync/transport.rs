//! Transport abstraction for the remote record store
//!
//! The engine talks to the remote through this seam so tests run without
//! a real network.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Record, RecordId, RemoteRecord};

/// What the remote store said about one pushed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote accepted the payload at this version
    Accepted { remote_version: i64 },
    /// The remote holds a version that diverged from the pushed base
    Conflict {
        remote_version: i64,
        remote_updated_at: i64,
    },
    /// The remote rejected the payload; retrying cannot help
    Rejected { reason: String },
}

/// Network operations against the remote record store.
#[async_trait]
pub trait RecordTransport: Send + Sync {
    /// Push one record. The record's `remote_version` travels along as the
    /// base the remote compares against.
    async fn push(&self, record: &Record) -> Result<PushOutcome>;

    /// Pull an owner's records with a version greater than `since_version`.
    async fn pull_since(&self, owner_id: &str, since_version: i64) -> Result<Vec<RemoteRecord>>;
}

#[derive(Serialize)]
struct PushRequest<'a> {
    record: &'a Record,
    base_version: i64,
}

#[derive(Deserialize)]
struct PushAccepted {
    version: i64,
}

#[derive(Deserialize)]
struct PushConflictBody {
    remote_version: i64,
    remote_updated_at: i64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: &str) -> Result<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidInput("endpoint must not be empty".into()));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".into(),
        ))
    }
}

/// HTTP implementation of [`RecordTransport`].
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport against a remote base URL.
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_endpoint(base_url.as_ref())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::transport_fatal(error.to_string()))?;
        Ok(Self { base_url, client })
    }

    fn map_request_error(error: reqwest::Error) -> Error {
        // Connectivity and timeout problems are worth retrying; anything
        // that made it to a response body is handled by status code.
        if error.is_timeout() || error.is_connect() || error.is_request() {
            Error::transport_retryable(error.to_string())
        } else {
            Error::transport_fatal(error.to_string())
        }
    }
}

#[async_trait]
impl RecordTransport for HttpTransport {
    async fn push(&self, record: &Record) -> Result<PushOutcome> {
        let url = format!("{}/records", self.base_url);
        let request = PushRequest {
            record,
            base_version: record.remote_version,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        if status.is_success() {
            let accepted = response
                .json::<PushAccepted>()
                .await
                .map_err(|error| Error::transport_fatal(error.to_string()))?;
            return Ok(PushOutcome::Accepted {
                remote_version: accepted.version,
            });
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT {
            let conflict = serde_json::from_str::<PushConflictBody>(&body)
                .map_err(|error| Error::transport_fatal(error.to_string()))?;
            return Ok(PushOutcome::Conflict {
                remote_version: conflict.remote_version,
                remote_updated_at: conflict.remote_updated_at,
            });
        }

        if status.is_client_error() {
            return Ok(PushOutcome::Rejected {
                reason: parse_api_error(status, &body),
            });
        }

        Err(Error::transport_retryable(parse_api_error(status, &body)))
    }

    async fn pull_since(&self, owner_id: &str, since_version: i64) -> Result<Vec<RemoteRecord>> {
        let url = format!("{}/records", self.base_url);
        let since = since_version.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("owner_id", owner_id), ("since", since.as_str())])
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = parse_api_error(status, &body);
            if status.is_client_error() {
                return Err(Error::Validation(message));
            }
            return Err(Error::transport_retryable(message));
        }

        response
            .json::<Vec<RemoteRecord>>()
            .await
            .map_err(|error| Error::transport_fatal(error.to_string()))
    }
}

/// Scripted push behavior for [`MockTransport`].
#[derive(Debug, Clone)]
pub enum ScriptedPush {
    /// Accept at the pushed local version
    Accept,
    /// Accept at an explicit version
    AcceptAt(i64),
    /// Report a diverged remote
    Conflict {
        remote_version: i64,
        remote_updated_at: i64,
    },
    /// Reject the payload (validation failure)
    Reject(String),
    /// Fail with a retryable transport error
    FailRetryable(String),
}

/// A mock transport for testing.
///
/// Push outcomes can be scripted per record; unscripted pushes are
/// accepted at the pushed local version. Pull batches are queued per
/// owner and consumed one batch per call.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<RecordId, VecDeque<ScriptedPush>>>,
    pulls: Mutex<HashMap<String, VecDeque<Vec<RemoteRecord>>>>,
    pushed: Mutex<Vec<RecordId>>,
    latency: Mutex<Option<Duration>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue scripted outcomes for a record's pushes, consumed in order.
    pub fn script_push(&self, record_id: RecordId, outcomes: Vec<ScriptedPush>) {
        self.scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(record_id)
            .or_default()
            .extend(outcomes);
    }

    /// Queue one pull batch for an owner.
    pub fn queue_pull(&self, owner_id: impl Into<String>, batch: Vec<RemoteRecord>) {
        self.pulls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(owner_id.into())
            .or_default()
            .push_back(batch);
    }

    /// Add artificial latency to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self
            .latency
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(latency);
    }

    /// Record ids pushed so far, in push order.
    pub fn pushed(&self) -> Vec<RecordId> {
        self.pushed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    async fn simulate_latency(&self) {
        let latency = *self
            .latency
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RecordTransport for MockTransport {
    async fn push(&self, record: &Record) -> Result<PushOutcome> {
        self.simulate_latency().await;
        self.pushed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(record.id);

        let scripted = self
            .scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(&record.id)
            .and_then(VecDeque::pop_front);

        match scripted {
            None | Some(ScriptedPush::Accept) => Ok(PushOutcome::Accepted {
                remote_version: record.local_version,
            }),
            Some(ScriptedPush::AcceptAt(version)) => Ok(PushOutcome::Accepted {
                remote_version: version,
            }),
            Some(ScriptedPush::Conflict {
                remote_version,
                remote_updated_at,
            }) => Ok(PushOutcome::Conflict {
                remote_version,
                remote_updated_at,
            }),
            Some(ScriptedPush::Reject(reason)) => Ok(PushOutcome::Rejected { reason }),
            Some(ScriptedPush::FailRetryable(message)) => Err(Error::transport_retryable(message)),
        }
    }

    async fn pull_since(&self, owner_id: &str, since_version: i64) -> Result<Vec<RemoteRecord>> {
        self.simulate_latency().await;
        let batch = self
            .pulls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(owner_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();

        Ok(batch
            .into_iter()
            .filter(|record| record.version > since_version)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordKind;
    use serde_json::json;

    fn record() -> Record {
        Record::new("user-1", RecordKind::Entry, json!({"text": "x"}))
    }

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint("").is_err());
        assert!(normalize_endpoint("api.example.com").is_err());
        assert_eq!(
            normalize_endpoint("https://sync.example.com/").unwrap(),
            "https://sync.example.com"
        );
    }

    #[test]
    fn parse_api_error_prefers_structured_body() {
        let message = parse_api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error": "payload too large"}"#,
        );
        assert!(message.contains("payload too large"));
        assert!(message.contains("422"));
    }

    #[tokio::test]
    async fn mock_accepts_by_default() {
        let transport = MockTransport::new();
        let record = record();

        let outcome = transport.push(&record).await.unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Accepted {
                remote_version: record.local_version
            }
        );
        assert_eq!(transport.pushed(), vec![record.id]);
    }

    #[tokio::test]
    async fn mock_scripts_run_in_order() {
        let transport = MockTransport::new();
        let record = record();
        transport.script_push(
            record.id,
            vec![
                ScriptedPush::FailRetryable("connection reset".into()),
                ScriptedPush::Accept,
            ],
        );

        assert!(transport.push(&record).await.is_err());
        assert!(matches!(
            transport.push(&record).await.unwrap(),
            PushOutcome::Accepted { .. }
        ));
    }

    #[tokio::test]
    async fn mock_pull_filters_by_version_and_consumes_batches() {
        let transport = MockTransport::new();
        let old = RemoteRecord {
            id: RecordId::new(),
            owner_id: "user-1".into(),
            kind: RecordKind::Entry,
            payload: json!({}),
            version: 1,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
            archived_at: None,
        };
        let new = RemoteRecord {
            version: 5,
            id: RecordId::new(),
            ..old.clone()
        };
        transport.queue_pull("user-1", vec![old, new.clone()]);

        let pulled = transport.pull_since("user-1", 1).await.unwrap();
        assert_eq!(pulled, vec![new]);

        assert!(transport.pull_since("user-1", 0).await.unwrap().is_empty());
    }
}
