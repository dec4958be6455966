//! Upload Authorizer
//!
//! Signs direct-to-S3 upload requests after running the challenge, and
//! forwards delete requests to object storage.

use std::sync::Arc;

use crate::config::Config;
use crate::storage::{ObjectStore, S3Client};

use super::challenge::{
    extract_from_conditions, extract_from_headers, is_multipart_initiation, policy_from_config,
    ChallengeContext, ChallengePolicy,
};
use super::signer::Signer;
use super::types::{AuthorizeError, SignedResponse, SigningRequest};

/// Stateless apart from the immutable key material and policy
#[derive(Clone)]
pub struct UploadAuthorizer {
    inner: Arc<UploadAuthorizerInner>,
}

struct UploadAuthorizerInner {
    signer: Signer,
    policy: Arc<dyn ChallengePolicy>,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl UploadAuthorizer {
    pub fn new(
        signer: Signer,
        policy: Arc<dyn ChallengePolicy>,
        object_store: Option<Arc<dyn ObjectStore>>,
    ) -> Self {
        Self {
            inner: Arc::new(UploadAuthorizerInner {
                signer,
                policy,
                object_store,
            }),
        }
    }

    /// Build from configuration: signing key, challenge policy and, when S3
    /// credentials are present, an S3 client for deletes.
    pub fn from_config(config: &Config) -> Self {
        let object_store = config
            .object_store
            .as_ref()
            .map(|store| Arc::new(S3Client::new(store)) as Arc<dyn ObjectStore>);

        Self::new(
            Signer::new(&config.signing.client_secret_key),
            policy_from_config(&config.challenge),
            object_store,
        )
    }

    pub fn signer(&self) -> &Signer {
        &self.inner.signer
    }

    /// Sign a request, withholding the signature if the challenge denies it.
    ///
    /// Header requests are always signed first; only multipart initiations
    /// are challenged. Policy documents are challenged on their conditions
    /// and signed only when allowed.
    pub fn handle_signing_request(
        &self,
        request: &SigningRequest,
    ) -> Result<SignedResponse, AuthorizeError> {
        match request {
            SigningRequest::Headers(headers) => {
                let signed = self.inner.signer.sign_headers(headers);

                if is_multipart_initiation(headers) {
                    tracing::debug!("Chunked signing request");
                    let ctx = extract_from_headers(headers)?;
                    self.challenge(&ctx)?;
                }

                Ok(SignedResponse::Headers(signed))
            }
            SigningRequest::Policy {
                document,
                conditions,
            } => {
                tracing::debug!("Un-chunked signing request");
                let ctx = extract_from_conditions(conditions);
                self.challenge(&ctx)?;

                Ok(SignedResponse::Policy(self.inner.signer.sign_policy(document)))
            }
        }
    }

    fn challenge(&self, ctx: &ChallengeContext) -> Result<(), AuthorizeError> {
        self.inner.policy.evaluate(ctx).map_err(|reason| {
            tracing::warn!(
                target: "audit",
                reason = %reason,
                bucket = ctx.bucket().unwrap_or_default(),
                key = ctx.key().unwrap_or_default(),
                filename = ctx.filename().unwrap_or_default(),
                "Signing request denied"
            );
            AuthorizeError::Denied(reason)
        })
    }

    /// Forward a delete to object storage.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), AuthorizeError> {
        tracing::info!(target: "audit", bucket = %bucket, key = %key, "Deleting object");

        let store = self
            .inner
            .object_store
            .as_ref()
            .ok_or(AuthorizeError::StorageUnavailable)?;

        store.delete_object(bucket, key).await?;
        Ok(())
    }
}
