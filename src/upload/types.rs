//! Upload types for the traditional (server-side) endpoint

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

// ============================================================================
// Identifiers
// ============================================================================

/// Validate one caller-supplied path segment (upload id or filename).
///
/// The value must be usable as exactly one normal path component: no
/// separators, no `.`/`..`, no NUL.
pub fn validate_segment<'a>(kind: &'static str, value: &'a str) -> Result<&'a str, UploadError> {
    let invalid = || UploadError::InvalidIdentifier {
        kind,
        value: value.to_string(),
    };

    if value.is_empty() || value.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }

    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(value),
        _ => Err(invalid()),
    }
}

// ============================================================================
// Part Requests
// ============================================================================

/// One part write as delivered by the intake endpoint.
#[derive(Debug, Clone)]
pub struct PartUpload {
    pub upload_id: String,
    pub filename: String,
    pub part_index: u32,
    /// 0 or 1 means the upload is not chunked
    pub total_parts: u32,
    /// Advisory only
    pub total_size: Option<u64>,
}

impl PartUpload {
    /// A single-shot upload
    pub fn whole(upload_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            upload_id: upload_id.into(),
            filename: filename.into(),
            part_index: 0,
            total_parts: 1,
            total_size: None,
        }
    }

    /// One part of a chunked upload
    pub fn part(
        upload_id: impl Into<String>,
        filename: impl Into<String>,
        part_index: u32,
        total_parts: u32,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            filename: filename.into(),
            part_index,
            total_parts,
            total_size: None,
        }
    }

    pub fn with_total_size(mut self, total_size: u64) -> Self {
        self.total_size = Some(total_size);
        self
    }

    pub fn is_chunked(&self) -> bool {
        self.total_parts > 1
    }

    /// Whether this is the part that should trigger a finalize attempt
    pub fn is_last_part(&self) -> bool {
        self.is_chunked() && self.part_index.checked_add(1) == Some(self.total_parts)
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of a finalize attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum FinalizeOutcome {
    /// All parts were concatenated and the working area removed
    Finalized { path: PathBuf, size: u64 },
    /// Some parts have not arrived yet; nothing was changed
    Pending { missing: Vec<u32> },
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid {kind}: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("Part index out of range: {index} (total parts: {total})")]
    InvalidPart { index: u32, total: u32 },

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid field {name}: {value:?}")]
    InvalidField { name: String, value: String },

    #[error("Malformed upload form: {0}")]
    MalformedForm(String),

    #[error("Upload not found: {0}")]
    NotFound(String),

    #[error("Assembled size {actual} does not match declared size {declared}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::InvalidIdentifier { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidPart { .. } => StatusCode::BAD_REQUEST,
            Self::MissingField(_) => StatusCode::BAD_REQUEST,
            Self::InvalidField { .. } => StatusCode::BAD_REQUEST,
            Self::MalformedForm(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SizeMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the client should give up instead of retrying the request
    pub fn prevent_retry(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_segment_accepts_plain_names() {
        assert!(validate_segment("upload id", "3f2c9a1e-0b7d-4c55-9c1e-1b2a3c4d5e6f").is_ok());
        assert!(validate_segment("filename", "holiday photo.jpeg").is_ok());
        assert!(validate_segment("filename", "archive..tar.gz").is_ok());
    }

    #[test]
    fn test_validate_segment_rejects_traversal() {
        for bad in ["", ".", "..", "../etc", "a/b", "..\\win", "/abs", "nul\0byte"] {
            assert!(
                matches!(
                    validate_segment("upload id", bad),
                    Err(UploadError::InvalidIdentifier { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_last_part_detection() {
        assert!(!PartUpload::whole("id", "f").is_last_part());
        assert!(!PartUpload::part("id", "f", 0, 3).is_last_part());
        assert!(PartUpload::part("id", "f", 2, 3).is_last_part());
    }
}
