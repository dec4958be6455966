//! Pre-signing challenge
//!
//! Before a signature is released, the metadata carried by the request
//! (destination bucket, object key, `x-amz-meta-*` values set by the
//! uploader) is collected into a [`ChallengeContext`] and handed to a
//! [`ChallengePolicy`]. Policies are plain trait objects so deployments can
//! swap in their own checks; closures work too.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ChallengeConfig;
use super::types::{AuthorizeError, DenyReason};

pub const META_PREFIX: &str = "x-amz-meta-";
pub const META_DATASET: &str = "x-amz-meta-dataset";
pub const META_FILENAME: &str = "x-amz-meta-qqfilename";

// ============================================================================
// Challenge Context
// ============================================================================

/// Where a context was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChallengeSource {
    /// Multipart initiation request (string-to-sign)
    #[default]
    Headers,
    /// Policy document conditions
    Conditions,
}

/// Attributes a policy can inspect. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeContext {
    pub source: ChallengeSource,
    attributes: BTreeMap<String, String>,
    content_length_range: Option<(u64, u64)>,
}

impl ChallengeContext {
    pub fn new(source: ChallengeSource) -> Self {
        Self {
            source,
            ..Default::default()
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn bucket(&self) -> Option<&str> {
        self.get("bucket")
    }

    pub fn key(&self) -> Option<&str> {
        self.get("key")
    }

    pub fn uuid(&self) -> Option<&str> {
        self.get("uuid")
    }

    pub fn dataset(&self) -> Option<&str> {
        self.get(META_DATASET)
    }

    pub fn filename(&self) -> Option<&str> {
        self.get(META_FILENAME)
    }

    /// `(min, max)` from a `content-length-range` policy condition
    pub fn content_length_range(&self) -> Option<(u64, u64)> {
        self.content_length_range
    }

    /// `bucket/dataset/filename`, the identifier allow-lists are written in
    pub fn transfer_id(&self) -> Result<String, DenyReason> {
        let bucket = self.bucket().ok_or(DenyReason::MissingAttribute("bucket"))?;
        let dataset = self
            .dataset()
            .ok_or(DenyReason::MissingAttribute(META_DATASET))?;
        let filename = self
            .filename()
            .ok_or(DenyReason::MissingAttribute(META_FILENAME))?;
        Ok(format!("{}/{}/{}", bucket, dataset, filename))
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// A POST without an `uploadId` starts a multipart upload; only those are
/// challenged; part uploads and completion requests are signed as-is.
pub fn is_multipart_initiation(headers: &str) -> bool {
    headers.starts_with("POST") && !headers.contains("uploadId")
}

/// Collect `x-amz-meta-*` headers and the `/{bucket}/{uuid}.{ext}?uploads`
/// resource from a multipart initiation string-to-sign.
pub fn extract_from_headers(headers: &str) -> Result<ChallengeContext, AuthorizeError> {
    let mut ctx = ChallengeContext::new(ChallengeSource::Headers);

    for line in headers.lines() {
        let line = line.trim();
        if !line.starts_with(META_PREFIX) {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            if name.len() > META_PREFIX.len() && !value.is_empty() {
                ctx.insert(name, value);
            }
        }
    }

    let resource = headers.trim_end().lines().last().unwrap_or_default().trim();
    let (bucket, uuid, extension) = parse_initiation_resource(resource).ok_or_else(|| {
        AuthorizeError::MalformedRequest(format!(
            "unexpected multipart initiation resource: {:?}",
            resource
        ))
    })?;

    ctx.insert("bucket", bucket);
    ctx.insert("uuid", uuid);
    ctx.insert("key", format!("{}.{}", uuid, extension));
    Ok(ctx)
}

fn parse_initiation_resource(resource: &str) -> Option<(&str, &str, &str)> {
    let rest = resource.strip_prefix('/')?;
    let (bucket, object) = rest.split_once('/')?;
    let (uuid, rest) = object.split_once('.')?;
    let (extension, query) = rest.split_once('?')?;

    if bucket.is_empty() || uuid.is_empty() || extension.is_empty() {
        return None;
    }
    if !query.starts_with("uploads") {
        return None;
    }
    Some((bucket, uuid, extension))
}

/// Flatten policy conditions into one mapping.
///
/// Object entries (`{"bucket": "..."}`) become attributes; the
/// `["content-length-range", min, max]` entry is kept as a range. Anything
/// else (`starts-with` rules, unknown shapes) is ignored.
pub fn extract_from_conditions(conditions: &[Value]) -> ChallengeContext {
    let mut ctx = ChallengeContext::new(ChallengeSource::Conditions);

    for condition in conditions {
        match condition {
            Value::Object(entries) => {
                for (key, value) in entries {
                    ctx.insert(key.clone(), value_to_string(value));
                }
            }
            Value::Array(items) => {
                if let [Value::String(name), min, max] = items.as_slice() {
                    if name == "content-length-range" {
                        if let (Some(min), Some(max)) = (value_to_u64(min), value_to_u64(max)) {
                            ctx.content_length_range = Some((min, max));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    ctx
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Policies
// ============================================================================

/// Decides whether a request may be signed
pub trait ChallengePolicy: Send + Sync {
    fn evaluate(&self, ctx: &ChallengeContext) -> Result<(), DenyReason>;
}

impl<F> ChallengePolicy for F
where
    F: Fn(&ChallengeContext) -> Result<(), DenyReason> + Send + Sync,
{
    fn evaluate(&self, ctx: &ChallengeContext) -> Result<(), DenyReason> {
        self(ctx)
    }
}

/// Signs everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ChallengePolicy for AllowAll {
    fn evaluate(&self, _ctx: &ChallengeContext) -> Result<(), DenyReason> {
        Ok(())
    }
}

/// Only transfers whose `bucket/dataset/filename` is listed are signed
#[derive(Debug, Clone, Default)]
pub struct TransferAllowList {
    allowed: Vec<String>,
}

impl TransferAllowList {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl ChallengePolicy for TransferAllowList {
    fn evaluate(&self, ctx: &ChallengeContext) -> Result<(), DenyReason> {
        let transfer = ctx.transfer_id()?;
        if self.allowed.iter().any(|allowed| *allowed == transfer) {
            Ok(())
        } else {
            Err(DenyReason::TransferNotAllowed(transfer))
        }
    }
}

/// Requests must target one bucket; policy documents may additionally be
/// required to declare an exact `content-length-range`.
#[derive(Debug, Clone)]
pub struct ExpectedBucket {
    bucket: String,
    content_length_range: Option<(u64, u64)>,
}

impl ExpectedBucket {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            content_length_range: None,
        }
    }

    pub fn with_content_length_range(mut self, min: u64, max: u64) -> Self {
        self.content_length_range = Some((min, max));
        self
    }
}

impl ChallengePolicy for ExpectedBucket {
    fn evaluate(&self, ctx: &ChallengeContext) -> Result<(), DenyReason> {
        let bucket = ctx.bucket().ok_or(DenyReason::MissingAttribute("bucket"))?;
        if bucket != self.bucket {
            return Err(DenyReason::UnexpectedBucket {
                expected: self.bucket.clone(),
                actual: bucket.to_string(),
            });
        }

        if let (Some(expected), ChallengeSource::Conditions) = (self.content_length_range, ctx.source) {
            if ctx.content_length_range() != Some(expected) {
                return Err(DenyReason::ContentLengthRange {
                    expected,
                    actual: ctx.content_length_range(),
                });
            }
        }

        Ok(())
    }
}

/// Every policy must allow; the first denial wins
#[derive(Clone, Default)]
pub struct AllOf {
    policies: Vec<Arc<dyn ChallengePolicy>>,
}

impl AllOf {
    pub fn new(policies: Vec<Arc<dyn ChallengePolicy>>) -> Self {
        Self { policies }
    }
}

impl ChallengePolicy for AllOf {
    fn evaluate(&self, ctx: &ChallengeContext) -> Result<(), DenyReason> {
        self.policies.iter().try_for_each(|policy| policy.evaluate(ctx))
    }
}

/// Build the policy described by the environment. With nothing configured
/// every request is allowed.
pub fn policy_from_config(config: &ChallengeConfig) -> Arc<dyn ChallengePolicy> {
    let mut policies: Vec<Arc<dyn ChallengePolicy>> = Vec::new();

    if let Some(bucket) = &config.expected_bucket {
        let mut policy = ExpectedBucket::new(bucket.clone());
        if let Some((min, max)) = config.content_length_range {
            policy = policy.with_content_length_range(min, max);
        }
        policies.push(Arc::new(policy));
    }

    if !config.allowed_transfers.is_empty() {
        policies.push(Arc::new(TransferAllowList::new(
            config.allowed_transfers.iter().cloned(),
        )));
    }

    match policies.len() {
        0 => Arc::new(AllowAll),
        1 => policies.remove(0),
        _ => Arc::new(AllOf::new(policies)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const INITIATE: &str = "POST\n\napplication/octet-stream\n\n\
        x-amz-acl:private\n\
        x-amz-date:Sat, 17 Oct 2026 10:00:00 GMT\n\
        x-amz-meta-dataset:ds1\n\
        x-amz-meta-qqfilename:file.txt\n\
        /bucket/3f2c9a1e-0b7d-4c55.txt?uploads";

    #[test]
    fn test_initiation_detection() {
        assert!(is_multipart_initiation(INITIATE));
        assert!(!is_multipart_initiation(
            "PUT\n\n\n\nx-amz-date:x\n/bucket/k.txt?partNumber=1&uploadId=abc"
        ));
        assert!(!is_multipart_initiation(
            "POST\n\napplication/xml\n\nx-amz-date:x\n/bucket/k.txt?uploadId=abc"
        ));
    }

    #[test]
    fn test_extract_from_headers() {
        let ctx = extract_from_headers(INITIATE).unwrap();

        assert_eq!(ctx.source, ChallengeSource::Headers);
        assert_eq!(ctx.bucket(), Some("bucket"));
        assert_eq!(ctx.uuid(), Some("3f2c9a1e-0b7d-4c55"));
        assert_eq!(ctx.key(), Some("3f2c9a1e-0b7d-4c55.txt"));
        assert_eq!(ctx.dataset(), Some("ds1"));
        assert_eq!(ctx.filename(), Some("file.txt"));
        assert_eq!(ctx.get("x-amz-acl"), None);
        assert_eq!(ctx.transfer_id().unwrap(), "bucket/ds1/file.txt");
    }

    #[test]
    fn test_extract_from_headers_rejects_unexpected_resource() {
        for resource in ["/bucket/noextension?uploads", "/bucket/a.txt", "bucket/a.txt?uploads", "//a.txt?uploads"] {
            let headers = format!("POST\n\n\n\nx-amz-date:x\n{}", resource);
            assert!(
                matches!(
                    extract_from_headers(&headers),
                    Err(AuthorizeError::MalformedRequest(_))
                ),
                "{resource:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_extract_from_conditions() {
        let conditions = vec![
            json!({"acl": "private"}),
            json!({"bucket": "bucket"}),
            json!({"key": "3f2c.txt"}),
            json!({"x-amz-meta-dataset": "ds1"}),
            json!({"x-amz-meta-qqfilename": "file.txt"}),
            json!({"success_action_status": 200}),
            json!(["content-length-range", "0", "15000000"]),
            json!(["starts-with", "$key", ""]),
            json!("ignored"),
        ];

        let ctx = extract_from_conditions(&conditions);
        assert_eq!(ctx.source, ChallengeSource::Conditions);
        assert_eq!(ctx.transfer_id().unwrap(), "bucket/ds1/file.txt");
        assert_eq!(ctx.get("success_action_status"), Some("200"));
        assert_eq!(ctx.content_length_range(), Some((0, 15_000_000)));
        assert_eq!(ctx.get("starts-with"), None);
    }

    #[test]
    fn test_allow_all_is_the_default() {
        let policy = policy_from_config(&ChallengeConfig::default());
        assert!(policy.evaluate(&ChallengeContext::default()).is_ok());
    }

    #[test]
    fn test_allow_list() {
        let policy = TransferAllowList::new(["bucket/ds1/file.txt"]);

        let allowed = ChallengeContext::new(ChallengeSource::Headers)
            .with("bucket", "bucket")
            .with(META_DATASET, "ds1")
            .with(META_FILENAME, "file.txt");
        assert_eq!(policy.evaluate(&allowed), Ok(()));

        let other = allowed.clone().with(META_FILENAME, "other.txt");
        assert_eq!(
            policy.evaluate(&other),
            Err(DenyReason::TransferNotAllowed("bucket/ds1/other.txt".into()))
        );

        let incomplete = ChallengeContext::new(ChallengeSource::Headers).with("bucket", "bucket");
        assert_eq!(
            policy.evaluate(&incomplete),
            Err(DenyReason::MissingAttribute(META_DATASET))
        );
    }

    #[test]
    fn test_expected_bucket_with_size_range() {
        let policy = ExpectedBucket::new("uploads").with_content_length_range(0, 15_000_000);

        let headers_ctx = ChallengeContext::new(ChallengeSource::Headers).with("bucket", "uploads");
        assert_eq!(policy.evaluate(&headers_ctx), Ok(()));

        let wrong_bucket = ChallengeContext::new(ChallengeSource::Headers).with("bucket", "elsewhere");
        assert!(matches!(
            policy.evaluate(&wrong_bucket),
            Err(DenyReason::UnexpectedBucket { .. })
        ));

        let matching = extract_from_conditions(&[
            json!({"bucket": "uploads"}),
            json!(["content-length-range", 0, 15000000]),
        ]);
        assert_eq!(policy.evaluate(&matching), Ok(()));

        let no_range = extract_from_conditions(&[json!({"bucket": "uploads"})]);
        assert_eq!(
            policy.evaluate(&no_range),
            Err(DenyReason::ContentLengthRange {
                expected: (0, 15_000_000),
                actual: None,
            })
        );
    }

    #[test]
    fn test_config_combines_policies() {
        let policy = policy_from_config(&ChallengeConfig {
            allowed_transfers: vec!["uploads/ds1/file.txt".into()],
            expected_bucket: Some("uploads".into()),
            content_length_range: None,
        });

        let ctx = ChallengeContext::new(ChallengeSource::Headers)
            .with("bucket", "uploads")
            .with(META_DATASET, "ds1")
            .with(META_FILENAME, "file.txt");
        assert!(policy.evaluate(&ctx).is_ok());
        assert!(policy.evaluate(&ctx.clone().with(META_DATASET, "ds2")).is_err());
    }

    #[test]
    fn test_closure_policy() {
        let deny_exe = |ctx: &ChallengeContext| match ctx.filename() {
            Some(name) if name.ends_with(".exe") => Err(DenyReason::TransferNotAllowed(name.to_string())),
            _ => Ok(()),
        };

        let ctx = ChallengeContext::new(ChallengeSource::Headers).with(META_FILENAME, "setup.exe");
        assert!(deny_exe.evaluate(&ctx).is_err());
        assert!(deny_exe.evaluate(&ctx.clone().with(META_FILENAME, "notes.txt")).is_ok());
    }
}
