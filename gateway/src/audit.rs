//! Outcome notifications and the audit log.

use std::time::Duration;

use fxql_common::{CallerId, ErrorKind, IdempotencyKey, RequestId};
use fxql_protocol::Reply;
use tracing::info;

/// What happened to one request, as seen by observers.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Request ID, if the caller sent one.
    pub request_id: Option<RequestId>,
    /// Who called.
    pub caller: CallerId,
    /// Idempotency key, if any.
    pub idempotency_key: Option<IdempotencyKey>,
    /// SHA-256 of the request body; the body itself is never recorded.
    pub request_hash: Option<String>,
    /// Status returned.
    pub status: u16,
    /// Response code returned.
    pub code: String,
    /// Failure class, for rejections.
    pub kind: Option<ErrorKind>,
    /// Entries in the response.
    pub entries: usize,
    /// Whether the reply was replayed from the idempotency cache.
    pub replayed: bool,
    /// Time spent in the pipeline.
    pub duration: Duration,
}

impl Outcome {
    /// Summarize a finished request.
    pub fn new(
        request_id: Option<RequestId>,
        caller: CallerId,
        idempotency_key: Option<IdempotencyKey>,
        request_hash: Option<String>,
        reply: &Reply,
        duration: Duration,
    ) -> Self {
        Self {
            request_id,
            caller,
            idempotency_key,
            request_hash,
            status: reply.status,
            code: reply.response.code.clone(),
            kind: reply.kind,
            entries: reply.entry_count(),
            replayed: reply.replayed,
            duration,
        }
    }

    /// Whether the request succeeded.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Passive observer of request outcomes.
///
/// Implementations must not block and cannot fail; nothing they do reaches
/// the caller.
pub trait OutcomeSink: Send + Sync {
    /// Record one outcome.
    fn record(&self, outcome: &Outcome);
}

/// Writes every outcome to the audit log target.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuditSink;

impl AuditSink {
    /// Tracing target audit events are emitted under.
    pub const TARGET: &'static str = "fxql::audit";
}

impl OutcomeSink for AuditSink {
    fn record(&self, outcome: &Outcome) {
        info!(
            target: AuditSink::TARGET,
            request_id = outcome.request_id.as_ref().map(RequestId::as_str),
            caller = %outcome.caller,
            idempotency_key = outcome.idempotency_key.as_ref().map(IdempotencyKey::as_str),
            request_hash = outcome.request_hash.as_deref(),
            status = outcome.status,
            code = %outcome.code,
            kind = outcome.kind.map(|k| k.as_str()),
            entries = outcome.entries,
            replayed = outcome.replayed,
            duration_ms = u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            "Request completed"
        );
    }
}
