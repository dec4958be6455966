//! Signing request and response types

use axum::body::Bytes;
use serde::{Deserialize, Serialize};

use super::signer::{HeadersSignature, PolicySignature};

// ============================================================================
// Requests
// ============================================================================

/// A signing request, resolved once from the JSON payload.
#[derive(Debug, Clone)]
pub enum SigningRequest {
    /// String-to-sign of a REST request belonging to a multipart upload
    Headers(String),
    /// Policy document of a simple upload: the raw document plus its
    /// `conditions` array
    Policy {
        document: Bytes,
        conditions: Vec<serde_json::Value>,
    },
}

#[derive(Deserialize)]
struct SigningPayload {
    #[serde(default)]
    headers: Option<String>,
    #[serde(default)]
    conditions: Option<Vec<serde_json::Value>>,
}

impl SigningRequest {
    /// Parse the body posted to the signature endpoint.
    ///
    /// A non-empty `headers` string wins; otherwise the whole body is treated
    /// as a policy document and must carry `conditions`.
    pub fn from_json_body(body: Bytes) -> Result<Self, AuthorizeError> {
        let payload: SigningPayload = serde_json::from_slice(&body)
            .map_err(|e| AuthorizeError::MalformedRequest(e.to_string()))?;

        match payload {
            SigningPayload {
                headers: Some(headers),
                ..
            } if !headers.is_empty() => Ok(SigningRequest::Headers(headers)),
            SigningPayload {
                conditions: Some(conditions),
                ..
            } => Ok(SigningRequest::Policy {
                document: body,
                conditions,
            }),
            _ => Err(AuthorizeError::MalformedRequest(
                "expected `headers` or `conditions`".to_string(),
            )),
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Successful signing result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SignedResponse {
    Policy(PolicySignature),
    Headers(HeadersSignature),
}

// ============================================================================
// Error Types
// ============================================================================

/// Why a challenge refused to let a request be signed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DenyReason {
    #[error("request does not carry {0}")]
    MissingAttribute(&'static str),

    #[error("transfer {0} has not been approved")]
    TransferNotAllowed(String),

    #[error("bucket {actual} is not the expected bucket {expected}")]
    UnexpectedBucket { expected: String, actual: String },

    #[error("content-length-range {actual:?} does not match {expected:?}")]
    ContentLengthRange {
        expected: (u64, u64),
        actual: Option<(u64, u64)>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AuthorizeError {
    #[error("Malformed signing request: {0}")]
    MalformedRequest(String),

    #[error("This file has not been approved for transfer: {0}")]
    Denied(#[from] DenyReason),

    #[error("Object storage error: {0}")]
    Upstream(#[from] crate::error::StorageError),

    #[error("Object storage is not configured")]
    StorageUnavailable,
}

impl AuthorizeError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::Denied(_) => StatusCode::FORBIDDEN,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_payload() {
        let body = Bytes::from_static(br#"{"headers":"PUT\n\n\n\n/bucket/key"}"#);
        let request = SigningRequest::from_json_body(body).unwrap();
        assert!(matches!(request, SigningRequest::Headers(h) if h == "PUT\n\n\n\n/bucket/key"));
    }

    #[test]
    fn test_policy_payload_keeps_raw_document() {
        let raw = r#"{"expiration":"2026-10-18T12:00:00.000Z","conditions":[{"bucket":"b"}]}"#;
        let request = SigningRequest::from_json_body(Bytes::from(raw)).unwrap();
        let SigningRequest::Policy { document, conditions } = request else {
            panic!("expected policy request");
        };
        assert_eq!(document, raw.as_bytes());
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_empty_headers_falls_back_to_policy() {
        let body = Bytes::from_static(br#"{"headers":"","conditions":[]}"#);
        assert!(matches!(
            SigningRequest::from_json_body(body),
            Ok(SigningRequest::Policy { .. })
        ));
    }

    #[test]
    fn test_malformed_payloads() {
        for body in [&b"not json"[..], &br#"{"expiration":"x"}"#[..], &b"[1,2]"[..]] {
            assert!(matches!(
                SigningRequest::from_json_body(Bytes::copy_from_slice(body)),
                Err(AuthorizeError::MalformedRequest(_))
            ));
        }
    }
}
