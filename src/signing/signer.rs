//! HMAC-SHA1 request signing
//!
//! Produces the signatures S3 expects for browser uploads: a signed policy
//! document for simple POST uploads and a signed string-to-sign for the REST
//! requests of a multipart upload.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Signed policy document returned to the uploader
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySignature {
    /// Base64 of the policy document exactly as received
    pub policy: String,
    pub signature: String,
}

/// Signature for a REST (multipart) request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeadersSignature {
    pub signature: String,
}

/// Holds the client secret key; cheap to clone and safe to share.
#[derive(Clone)]
pub struct Signer {
    secret: Arc<[u8]>,
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    /// Base64 the policy, then sign the base64 text.
    pub fn sign_policy(&self, policy: &[u8]) -> PolicySignature {
        let policy = STANDARD.encode(policy);
        let signature = self.sign(policy.as_bytes());
        PolicySignature { policy, signature }
    }

    /// Sign the raw string-to-sign sent by the uploader.
    pub fn sign_headers(&self, headers: &str) -> HeadersSignature {
        HeadersSignature {
            signature: self.sign(headers.as_bytes()),
        }
    }

    fn sign(&self, message: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(message);
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}
