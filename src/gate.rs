//! Submission Gate - Single Point of Side Effects
//!
//! CRITICAL: at most one attempt is pending at any time. A request made
//! while one is in flight is refused, never queued.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::form::FormSpec;
use crate::hashing::snapshot_digest;
use crate::normalize::{FileDescriptor, NormalizedValue};
use crate::state::{FormSnapshot, FormState};
use crate::validation::{FormValidation, ValidationResult};
use crate::ENGINE_VERSION;

/// Body the gate hands to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub form_id: String,
    pub attempt_id: Uuid,
    pub idempotency_key: String,
    pub fields: FormSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub body: Value,
}

impl ServerResponse {
    pub fn success(body: Value) -> Self {
        Self { status: ResponseStatus::Success, http_status: Some(200), body }
    }

    pub fn failure(http_status: u16, body: Value) -> Self {
        Self { status: ResponseStatus::Failure, http_status: Some(http_status), body }
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Collaborator that performs the actual network or file transfer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(
        &self,
        endpoint: &str,
        payload: &SubmissionPayload,
    ) -> Result<ServerResponse, TransportError>;

    /// Sends `file` under the part name `field`, with the payload's text
    /// fields alongside.
    async fn upload(
        &self,
        endpoint: &str,
        field: &str,
        file: &FileDescriptor,
        payload: &SubmissionPayload,
    ) -> Result<ServerResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum AttemptError {
    #[error("Server rejected submission: {0}")]
    ValidationRejected(String),

    #[error("Size limit exceeded: {0}")]
    SizeLimitExceeded(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("No response within {0} ms")]
    Timeout(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub server_id: Option<String>,
    pub body: Value,
}

impl Receipt {
    fn from_body(body: Value) -> Self {
        let server_id = ["id", "filename"]
            .iter()
            .find_map(|key| match body.get(key)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        Self { server_id, body }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum AttemptOutcome {
    Pending,
    Success(Receipt),
    Failure(AttemptError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionAttempt {
    pub id: Uuid,
    pub form_id: String,
    pub snapshot: FormSnapshot,
    pub snapshot_digest: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: AttemptOutcome,
}

impl SubmissionAttempt {
    pub fn is_pending(&self) -> bool {
        self.outcome == AttemptOutcome::Pending
    }

    pub fn error_detail(&self) -> Option<&AttemptError> {
        match &self.outcome {
            AttemptOutcome::Failure(e) => Some(e),
            _ => None,
        }
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        match &self.outcome {
            AttemptOutcome::Success(r) => Some(r),
            _ => None,
        }
    }
}

/// The gate refused before any side effect happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateRefusal {
    #[error("Submission rejected locally: {}", describe_failures(.0))]
    Invalid(Vec<ValidationResult>),

    #[error("Submission {0} is still pending")]
    Pending(Uuid),

    #[error("Submission gate unavailable: {0}")]
    Unavailable(String),
}

fn describe_failures(results: &[ValidationResult]) -> String {
    results
        .iter()
        .map(|r| format!("{}: {}", r.field_name(), r.reason().unwrap_or("invalid")))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub size_limit_messages: Vec<String>,
}

impl GateConfig {
    pub fn from_spec(form: &FormSpec) -> Self {
        Self {
            endpoint: form.endpoint.clone(),
            timeout: Duration::from_millis(form.submit_timeout_ms),
            size_limit_messages: form.size_limit_messages.clone(),
        }
    }
}

struct PendingAttempt {
    attempt: SubmissionAttempt,
    handle: JoinHandle<Result<ServerResponse, AttemptError>>,
}

/// Guards the collaborator. Reads a snapshot, never the live state.
///
/// An attempt stays pending until it is collected with [`settle`] or
/// [`try_settle`], even once its task has finished. Callers must settle
/// before the gate accepts another submission.
///
/// [`settle`]: SubmissionGate::settle
/// [`try_settle`]: SubmissionGate::try_settle
pub struct SubmissionGate {
    submitter: Arc<dyn Submitter>,
    clock: Arc<dyn Clock>,
    config: GateConfig,
    pending: Option<PendingAttempt>,
}

impl SubmissionGate {
    pub fn new(submitter: Arc<dyn Submitter>, clock: Arc<dyn Clock>, config: GateConfig) -> Self {
        Self {
            submitter,
            clock,
            config,
            pending: None,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// True from dispatch until the attempt is settled or discarded.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The pending attempt's task is done and waiting to be settled.
    pub fn is_ready(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| p.handle.is_finished())
    }

    pub fn pending_attempt(&self) -> Option<&SubmissionAttempt> {
        self.pending.as_ref().map(|p| &p.attempt)
    }

    /// Starts one attempt on a spawned task and returns its id.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        &mut self,
        form: &FormSpec,
        state: &FormState,
        validation: &FormValidation,
    ) -> Result<Uuid, GateRefusal> {
        if let Some(pending) = &self.pending {
            if pending.handle.is_finished() {
                warn!(form = %form.id, attempt = %pending.attempt.id, "previous attempt finished but was never settled, request debounced");
            } else {
                warn!(form = %form.id, attempt = %pending.attempt.id, "submission already pending, request debounced");
            }
            return Err(GateRefusal::Pending(pending.attempt.id));
        }

        if !validation.valid {
            let failures: Vec<_> = validation.failures().cloned().collect();
            warn!(form = %form.id, failures = failures.len(), "submission rejected locally");
            return Err(GateRefusal::Invalid(failures));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| GateRefusal::Unavailable(e.to_string()))?;

        let snapshot = state.snapshot();
        let digest = snapshot_digest(&form.id, &form.form_version, &snapshot, ENGINE_VERSION)
            .map_err(|e| GateRefusal::Unavailable(e.to_string()))?;

        // The file travels as the upload body, not inside the field map.
        let mut fields = snapshot.clone();
        let file = form.file_field().and_then(|decl| match fields.remove(&decl.name)? {
            NormalizedValue::File(f) => Some((decl.name.clone(), f)),
            _ => None,
        });

        let attempt_id = Uuid::new_v4();
        let payload = SubmissionPayload {
            form_id: form.id.clone(),
            attempt_id,
            idempotency_key: digest.clone(),
            fields,
        };

        let submitter = Arc::clone(&self.submitter);
        let endpoint = self.config.endpoint.clone();
        let timeout = self.config.timeout;
        let handle = runtime.spawn(async move {
            let call = async {
                match &file {
                    Some((field, f)) => submitter.upload(&endpoint, field, f, &payload).await,
                    None => submitter.submit(&endpoint, &payload).await,
                }
            };
            // Elapsing only stops the wait; the remote side may still act.
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(AttemptError::Transport(e.to_string())),
                Err(_) => Err(AttemptError::Timeout(timeout.as_millis() as u64)),
            }
        });

        info!(form = %form.id, attempt = %attempt_id, endpoint = %self.config.endpoint, "submission dispatched");

        self.pending = Some(PendingAttempt {
            attempt: SubmissionAttempt {
                id: attempt_id,
                form_id: form.id.clone(),
                snapshot,
                snapshot_digest: digest,
                started_at: self.clock.now(),
                finished_at: None,
                outcome: AttemptOutcome::Pending,
            },
            handle,
        });

        Ok(attempt_id)
    }

    /// Waits for the pending attempt and returns it in its terminal state.
    /// Returns `None` right away when nothing is pending.
    pub async fn settle(&mut self) -> Option<SubmissionAttempt> {
        let joined = (&mut self.pending.as_mut()?.handle).await;
        let PendingAttempt { mut attempt, .. } = self.pending.take()?;

        let result = joined.unwrap_or_else(|e| {
            Err(AttemptError::Transport(format!("submission task failed: {}", e)))
        });

        attempt.finished_at = Some(self.clock.now());
        attempt.outcome = match result {
            Ok(response) => classify(response, &self.config.size_limit_messages),
            Err(e) => AttemptOutcome::Failure(e),
        };

        match &attempt.outcome {
            AttemptOutcome::Failure(e) => {
                warn!(form = %attempt.form_id, attempt = %attempt.id, error = %e, "submission failed");
            }
            _ => {
                info!(form = %attempt.form_id, attempt = %attempt.id, "submission succeeded");
            }
        }

        Some(attempt)
    }

    /// Like [`settle`](Self::settle) but only if the attempt already finished.
    pub async fn try_settle(&mut self) -> Option<SubmissionAttempt> {
        if !self.is_ready() {
            return None;
        }
        self.settle().await
    }

    /// Forgets the pending attempt. The task keeps running detached and its
    /// result is never observed.
    pub fn discard(&mut self) -> Option<Uuid> {
        let pending = self.pending.take()?;
        info!(form = %pending.attempt.form_id, attempt = %pending.attempt.id, "pending submission discarded");
        Some(pending.attempt.id)
    }
}

/// Maps a collaborator response onto an attempt outcome.
///
/// A failure counts as a size limit on 413, on a `LIMIT_FILE_SIZE` code, or
/// when its reason contains one of the form's `size_limit_messages`.
pub fn classify(response: ServerResponse, size_limit_messages: &[String]) -> AttemptOutcome {
    if response.status == ResponseStatus::Success {
        return AttemptOutcome::Success(Receipt::from_body(response.body));
    }

    let reason = server_reason(&response.body);
    let code = response.body.get("code").and_then(Value::as_str);
    let declared_size_limit = {
        let lowered = reason.to_lowercase();
        size_limit_messages
            .iter()
            .any(|m| !m.is_empty() && lowered.contains(&m.to_lowercase()))
    };
    let error = match response.http_status {
        Some(413) => AttemptError::SizeLimitExceeded(reason),
        _ if code == Some("LIMIT_FILE_SIZE") || declared_size_limit => {
            AttemptError::SizeLimitExceeded(reason)
        }
        Some(status) if (400..500).contains(&status) => AttemptError::ValidationRejected(reason),
        _ => AttemptError::Server(reason),
    };
    AttemptOutcome::Failure(error)
}

fn server_reason(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        Value::Null => "no reason given".to_string(),
        other => ["message", "error"]
            .iter()
            .find_map(|key| other.get(key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}
