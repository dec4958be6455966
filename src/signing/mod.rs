//! S3 Upload Authorization
//!
//! Browser uploads that go directly to S3 need a signature from us:
//! - Simple uploads send a policy document, which is base64 encoded and signed
//! - Chunked (multipart) uploads send the string-to-sign of each REST request
//!
//! Multipart initiations and policy documents pass through a challenge first;
//! a denied request never sees its signature.

pub mod authorizer;
pub mod challenge;
pub mod signer;
pub mod types;

pub use authorizer::UploadAuthorizer;
pub use challenge::{
    AllOf, AllowAll, ChallengeContext, ChallengePolicy, ChallengeSource, ExpectedBucket,
    TransferAllowList,
};
pub use signer::{HeadersSignature, PolicySignature, Signer};
pub use types::*;
