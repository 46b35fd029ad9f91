//! Transport abstraction for the remote sync endpoint.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use offsign_core::{now_millis, QueuedSubmission, SignatureMap};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// The submission delivered to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    /// Session being completed.
    pub session_id: String,
    /// Recipient who signed.
    pub recipient_id: String,
    /// Signing credential.
    pub signing_key: String,
    /// Signatures by field id.
    pub signatures: SignatureMap,
    /// When the client finished signing, unix milliseconds.
    pub completed_at: u64,
    /// Client timestamp used for conflict arbitration, unix milliseconds.
    pub client_timestamp: u64,
}

impl SubmissionRequest {
    /// Builds a request from a queued submission.
    #[must_use]
    pub fn from_submission(submission: &QueuedSubmission) -> Self {
        Self {
            session_id: submission.session_id.clone(),
            recipient_id: submission.recipient_id.clone(),
            signing_key: submission.signing_key.clone(),
            signatures: submission.signatures.clone(),
            completed_at: now_millis(),
            client_timestamp: submission.client_timestamp,
        }
    }
}

/// The remote's view of a diverged session, carried by a 409-equivalent
/// response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    /// The remote's authoritative timestamp, unix milliseconds.
    pub server_timestamp: u64,
    /// The remote's signature map.
    pub signatures: SignatureMap,
}

/// Non-error outcomes of a delivery attempt.
///
/// Transport and server failures are [`SyncError`] values instead; their
/// [`SyncError::is_retryable`] classification drives retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx-equivalent: the endpoint accepted the submission.
    Accepted,
    /// 409-equivalent: remote state diverged; resolution required before
    /// retry.
    Conflict(ConflictInfo),
}

/// Delivers submissions to the remote sync endpoint.
///
/// Implement this to plug in an actual HTTP client; [`MockEndpoint`]
/// covers tests.
#[async_trait]
pub trait SubmissionTransport: Send + Sync {
    /// Attempts one delivery.
    async fn submit(&self, request: &SubmissionRequest) -> SyncResult<DeliveryOutcome>;
}

/// A scripted response for [`MockEndpoint`].
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Accept the submission.
    Accept,
    /// Report a conflict with the given remote state.
    Conflict(ConflictInfo),
    /// Fail with an HTTP-equivalent status.
    ServerError(u16),
    /// Fail at the transport level.
    NetworkError,
}

/// A mock endpoint with per-submission scripted responses.
///
/// Responses are keyed by `"{session_id}/{recipient_id}"` and consumed in
/// order; once a key's script is exhausted (or was never set) the endpoint
/// accepts. Every attempt is counted and every request recorded.
#[derive(Debug, Default)]
pub struct MockEndpoint {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    attempts: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<SubmissionRequest>>,
}

impl MockEndpoint {
    /// Creates an endpoint that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a scripted response for a submission key.
    pub fn script(&self, session_id: &str, recipient_id: &str, response: ScriptedResponse) {
        self.scripts
            .lock()
            .entry(format!("{session_id}/{recipient_id}"))
            .or_default()
            .push_back(response);
    }

    /// Returns the number of delivery attempts for a submission key.
    #[must_use]
    pub fn attempts(&self, session_id: &str, recipient_id: &str) -> u32 {
        self.attempts
            .lock()
            .get(&format!("{session_id}/{recipient_id}"))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the total number of delivery attempts.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.attempts.lock().values().sum()
    }

    /// Returns every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<SubmissionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SubmissionTransport for MockEndpoint {
    async fn submit(&self, request: &SubmissionRequest) -> SyncResult<DeliveryOutcome> {
        let key = format!("{}/{}", request.session_id, request.recipient_id);
        *self.attempts.lock().entry(key.clone()).or_insert(0) += 1;
        self.requests.lock().push(request.clone());

        let scripted = self.scripts.lock().get_mut(&key).and_then(VecDeque::pop_front);
        match scripted {
            None | Some(ScriptedResponse::Accept) => Ok(DeliveryOutcome::Accepted),
            Some(ScriptedResponse::Conflict(info)) => Ok(DeliveryOutcome::Conflict(info)),
            Some(ScriptedResponse::ServerError(status)) => {
                Err(SyncError::server(status, "scripted failure"))
            }
            Some(ScriptedResponse::NetworkError) => {
                Err(SyncError::network_retryable("scripted network failure"))
            }
        }
    }
}
