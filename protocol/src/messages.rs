//! Protocol message types.
//!
//! These types represent what a caller submits to the gateway and what it
//! gets back, independent of the transport carrying them.

use fxql_common::{
    iso8601, now, CallerId, ErrorKind, FxqlError, IdempotencyKey, PersistedEntry, RequestId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response code for accepted batches.
pub const SUCCESS_CODE: &str = "FXQL-200";

/// Response message for accepted batches.
pub const SUCCESS_MESSAGE: &str = "Rates Parsed Successfully.";

/// Statement submission body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FxqlRequest {
    /// Raw statement text.
    #[serde(rename = "FXQL")]
    pub fxql: String,
}

impl FxqlRequest {
    /// Create a new request body.
    pub fn new(fxql: impl Into<String>) -> Self {
        Self { fxql: fxql.into() }
    }
}

/// Per-request metadata supplied alongside the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    /// Who is calling; scopes rate limits and idempotency records.
    pub caller: CallerId,
    /// Enables replay of a previous response when present.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Passed through to observability only.
    pub request_id: Option<RequestId>,
}

impl RequestMetadata {
    /// Metadata for a caller with no idempotency key.
    pub fn new(caller: impl Into<CallerId>) -> Self {
        Self {
            caller: caller.into(),
            idempotency_key: None,
            request_id: None,
        }
    }

    /// Attach an idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<IdempotencyKey>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Attach a request ID.
    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }
}

/// Body plus metadata as one line-oriented wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Caller identity; required.
    #[serde(default)]
    pub caller: Option<String>,
    /// Optional idempotency key.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Optional request ID.
    #[serde(default)]
    pub request_id: Option<String>,
    /// The statement body.
    #[serde(flatten)]
    pub body: FxqlRequest,
}

impl RequestEnvelope {
    /// Split into the pipeline's body and metadata.
    ///
    /// A missing or blank caller is refused with [`FxqlError::InvalidRequest`].
    pub fn into_parts(self) -> Result<(FxqlRequest, RequestMetadata), FxqlError> {
        let caller = self
            .caller
            .filter(|c| !c.trim().is_empty())
            .map(CallerId::new)
            .ok_or_else(|| FxqlError::InvalidRequest("caller is required".to_string()))?;
        let metadata = RequestMetadata {
            caller,
            idempotency_key: self
                .idempotency_key
                .filter(|k| !k.is_empty())
                .map(IdempotencyKey::new),
            request_id: self.request_id.map(RequestId::new),
        };
        Ok((self.body, metadata))
    }
}

/// One field-level explanation of a rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Offending field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Offending value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Rule that was broken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    /// Human-readable explanation.
    pub message: String,
}

impl ErrorDetail {
    fn new(
        field: impl Into<String>,
        value: impl Into<Value>,
        constraint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            value: Some(value.into()),
            constraint: Some(constraint.into()),
            message: message.into(),
        }
    }

    /// Build the details list for an error, if the error has any.
    pub fn for_error(error: &FxqlError) -> Option<Vec<ErrorDetail>> {
        let detail = match error {
            FxqlError::MalformedStatement { location, expected } => ErrorDetail::new(
                "FXQL",
                location.fragment.as_str(),
                "grammar",
                format!(
                    "expected {} in statement {} (line {}, character {})",
                    expected, location.index, location.line, location.column
                ),
            ),
            FxqlError::EmptyStatement => ErrorDetail {
                field: Some("FXQL".to_string()),
                value: None,
                constraint: Some("nonEmpty".to_string()),
                message: "at least one statement is required".to_string(),
            },
            FxqlError::InvalidCurrency {
                field,
                code,
                location,
            } => ErrorDetail::new(
                *field,
                code.as_str(),
                "validCurrencyCode",
                format!(
                    "'{}' is not a supported currency code (statement {}, line {}, character {})",
                    code, location.index, location.line, location.column
                ),
            ),
            FxqlError::InvalidPrice {
                field,
                value,
                min,
                max,
                location,
            } => ErrorDetail::new(
                *field,
                value.as_str(),
                format!("between {} and {}", min, max),
                format!(
                    "price out of range (statement {}, line {}, character {})",
                    location.index, location.line, location.column
                ),
            ),
            FxqlError::InvalidCap {
                value,
                min,
                max,
                location,
            } => ErrorDetail::new(
                "capAmount",
                value.as_str(),
                format!("between {} and {}", min, max),
                format!(
                    "cap amount out of range (statement {}, line {}, character {})",
                    location.index, location.line, location.column
                ),
            ),
            FxqlError::ExceedsMaxEntries { count, max } => ErrorDetail::new(
                "FXQL",
                *count as u64,
                format!("at most {} statements", max),
                "too many currency pairs in one request",
            ),
            FxqlError::RateLimited {
                limiter,
                limit,
                retry_after_ms,
            } => ErrorDetail::new(
                "limiter",
                limiter.as_str(),
                format!("at most {} requests per window", limit),
                format!("retry after {}ms", retry_after_ms),
            ),
            _ => return None,
        };
        Some(vec![detail])
    }
}

/// Response envelope returned for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxqlResponse {
    /// Human-readable summary.
    pub message: String,
    /// Machine-readable outcome code.
    pub code: String,
    /// Persisted entries, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<PersistedEntry>>,
    /// Field-level explanations, on rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ErrorDetail>>,
    /// When the response was produced (ISO-8601).
    pub timestamp: String,
}

impl FxqlResponse {
    /// Envelope for an accepted batch.
    pub fn success(entries: Vec<PersistedEntry>) -> Self {
        Self {
            message: SUCCESS_MESSAGE.to_string(),
            code: SUCCESS_CODE.to_string(),
            data: Some(entries),
            details: None,
            timestamp: iso8601(now()),
        }
    }

    /// Envelope for a rejected request.
    pub fn error(error: &FxqlError) -> Self {
        Self {
            message: error.to_string(),
            code: error.error_code().to_string(),
            data: None,
            details: ErrorDetail::for_error(error),
            timestamp: iso8601(now()),
        }
    }
}

/// What the pipeline hands back to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// HTTP-style status code.
    pub status: u16,
    /// Whether this is a replay of a cached response.
    pub replayed: bool,
    /// Response envelope.
    pub response: FxqlResponse,
    /// Failure class, for observers. Not part of the wire form.
    #[serde(skip)]
    pub kind: Option<ErrorKind>,
}

impl Reply {
    /// Reply for an accepted batch.
    pub fn success(entries: Vec<PersistedEntry>) -> Self {
        Self {
            status: 200,
            replayed: false,
            response: FxqlResponse::success(entries),
            kind: None,
        }
    }

    /// Reply for a rejected request.
    pub fn error(error: &FxqlError) -> Self {
        Self {
            status: error.status_code(),
            replayed: false,
            response: FxqlResponse::error(error),
            kind: Some(error.kind()),
        }
    }

    /// Reply rebuilt from a cached response.
    pub fn replay(status: u16, response: FxqlResponse) -> Self {
        Self {
            status,
            replayed: true,
            response,
            kind: None,
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Number of entries carried, zero for rejections.
    pub fn entry_count(&self) -> usize {
        self.response.data.as_ref().map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxql_common::{ParsedEntry, StatementLocation};
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_body_uses_fxql_field() {
        let body: FxqlRequest =
            serde_json::from_str(r#"{"FXQL":"USD-GBP { BUY 1 SELL 2 CAP 3 }"}"#).unwrap();
        assert_eq!(body.fxql, "USD-GBP { BUY 1 SELL 2 CAP 3 }");
    }

    #[test]
    fn test_envelope_into_parts() {
        let envelope: RequestEnvelope =
            serde_json::from_str(r#"{"caller":"alpha","FXQL":"x","idempotencyKey":"k-1"}"#)
                .unwrap();
        let (body, meta) = envelope.into_parts().unwrap();
        assert_eq!(body.fxql, "x");
        assert_eq!(meta.caller, CallerId::new("alpha"));
        assert_eq!(meta.idempotency_key, Some(IdempotencyKey::new("k-1")));
        assert!(meta.request_id.is_none());
    }

    #[test]
    fn test_envelope_without_caller_refused() {
        for line in [
            r#"{"FXQL":"x","idempotencyKey":"k-1"}"#,
            r#"{"caller":"","FXQL":"x"}"#,
            r#"{"caller":"  ","FXQL":"x"}"#,
        ] {
            let envelope: RequestEnvelope = serde_json::from_str(line).unwrap();
            let err = envelope.into_parts().unwrap_err();
            assert!(matches!(err, FxqlError::InvalidRequest(_)), "{line}");
            assert_eq!(Reply::error(&err).status, 400);
        }
    }

    #[test]
    fn test_success_reply_shape() {
        let entry = ParsedEntry::new("USD".into(), "GBP".into(), dec!(0.85), dec!(0.90), 10_000);
        let reply = Reply::success(vec![PersistedEntry::new(entry, now())]);

        assert!(reply.is_success());
        assert_eq!(reply.entry_count(), 1);
        let json = serde_json::to_value(&reply.response).unwrap();
        assert_eq!(json["code"], SUCCESS_CODE);
        assert!(json.get("details").is_none());

        let wire = serde_json::to_value(&reply).unwrap();
        assert_eq!(wire["status"], 200);
        assert_eq!(wire["replayed"], false);
        assert!(wire.get("kind").is_none());
    }

    #[test]
    fn test_validation_reply_carries_detail() {
        let err = FxqlError::InvalidCurrency {
            field: "sourceCurrency",
            code: "XXX".to_string(),
            location: StatementLocation::new(1, 1, 1, "XXX-GBP { BUY 0.85 SELL 0.90 CAP 10000 }"),
        };
        let reply = Reply::error(&err);

        assert_eq!(reply.status, 400);
        assert_eq!(reply.kind, Some(ErrorKind::Validation));
        assert_eq!(reply.response.code, "FXQL_E_BAD_ISO");
        let details = reply.response.details.unwrap();
        assert_eq!(details[0].field.as_deref(), Some("sourceCurrency"));
        assert_eq!(details[0].value, Some(Value::from("XXX")));
        assert!(reply.response.data.is_none());
    }

    #[test]
    fn test_internal_error_has_no_details() {
        let reply = Reply::error(&FxqlError::Internal("boom".to_string()));
        assert_eq!(reply.status, 500);
        assert!(reply.response.details.is_none());
    }
}
