//! Upload Routes
//!
//! Traditional endpoint for uploads sent to this server.
//!
//! Endpoints:
//! - POST /upload - Receive a whole file or one part of a chunked file
//! - DELETE /upload/:uuid - Delete an upload

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::IntoResponse,
    routing::{delete, post},
    Json, Router,
};
use serde::Serialize;

use crate::state::AppState;
use crate::upload::{FinalizeOutcome, PartUpload, UploadError};

// ============================================================================
// Responses
// ============================================================================

#[derive(Serialize)]
pub struct UploadResponse {
    pub success: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
    prevent_retry: bool,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = match &self {
            UploadError::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            UploadError::InvalidPart { .. } => "INVALID_PART",
            UploadError::MissingField(_) => "MISSING_FIELD",
            UploadError::InvalidField { .. } => "INVALID_FIELD",
            UploadError::MalformedForm(_) => "MALFORMED_FORM",
            UploadError::NotFound(_) => "NOT_FOUND",
            UploadError::SizeMismatch { .. } => "SIZE_MISMATCH",
            UploadError::Io(_) => "IO_ERROR",
        };

        if status.is_server_error() {
            tracing::error!("Upload failed: {}", self);
        }

        let body = Json(ErrorResponse {
            success: false,
            error: self.to_string(),
            code,
            prevent_retry: self.prevent_retry(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router(max_request_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/", post(upload))
        .route("/:uuid", delete(delete_upload))
        .layer(DefaultBodyLimit::max(max_request_bytes))
}

// ============================================================================
// Form
// ============================================================================

/// Multipart fields sent by the uploader
#[derive(Default)]
struct UploadForm {
    uuid: Option<String>,
    filename: Option<String>,
    part_index: Option<u32>,
    total_parts: Option<u32>,
    total_size: Option<u64>,
    file_name: Option<String>,
    file: Option<Bytes>,
}

impl UploadForm {
    async fn read(multipart: &mut Multipart) -> Result<Self, UploadError> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| UploadError::MalformedForm(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if name == "qqfile" {
                form.file_name = field.file_name().map(str::to_string);
                form.file = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| UploadError::MalformedForm(e.to_string()))?,
                );
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| UploadError::MalformedForm(e.to_string()))?;

            match name.as_str() {
                "qquuid" => form.uuid = Some(value),
                "qqfilename" => form.filename = Some(value),
                "qqpartindex" => form.part_index = Some(parse_number(&name, value)?),
                "qqtotalparts" => form.total_parts = Some(parse_number(&name, value)?),
                "qqtotalfilesize" => form.total_size = Some(parse_number(&name, value)?),
                _ => {
                    tracing::trace!(field = %name, "Ignoring upload field");
                }
            }
        }

        Ok(form)
    }

    fn into_part(self) -> Result<(PartUpload, Bytes), UploadError> {
        let upload_id = self
            .uuid
            .ok_or_else(|| UploadError::MissingField("qquuid".to_string()))?;
        let filename = self
            .filename
            .or(self.file_name)
            .ok_or_else(|| UploadError::MissingField("qqfilename".to_string()))?;
        let data = self
            .file
            .ok_or_else(|| UploadError::MissingField("qqfile".to_string()))?;

        let part = PartUpload {
            upload_id,
            filename,
            part_index: self.part_index.unwrap_or(0),
            total_parts: self.total_parts.unwrap_or(1),
            total_size: self.total_size,
        };

        Ok((part, data))
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: String) -> Result<T, UploadError> {
    value.trim().parse().map_err(|_| UploadError::InvalidField {
        name: name.to_string(),
        value,
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload
///
/// Store the file (or part). The request carrying the last part also
/// triggers reassembly.
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, UploadError> {
    let (part, data) = UploadForm::read(&mut multipart).await?.into_part()?;

    state.assembler().write_part(&part, &data).await?;

    if part.is_last_part() {
        let outcome = state
            .assembler()
            .maybe_finalize(&part.upload_id, &part.filename, part.total_parts, part.total_size)
            .await?;

        if let FinalizeOutcome::Pending { missing } = outcome {
            tracing::info!(
                upload_id = %part.upload_id,
                missing = ?missing,
                "Last part received before earlier parts; finalize deferred"
            );
        }
    }

    Ok(Json(UploadResponse { success: true }))
}

/// DELETE /upload/:uuid
async fn delete_upload(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<UploadResponse>, UploadError> {
    state.assembler().delete_upload(&uuid).await?;
    Ok(Json(UploadResponse { success: true }))
}
