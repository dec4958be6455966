//! Direct-to-S3 Routes
//!
//! Endpoints used when the browser uploads straight to the bucket:
//! - POST /s3/sign - Sign a policy document or a REST string-to-sign
//! - POST|DELETE /s3/delete/:key - Delete an uploaded object
//! - GET|POST /s3/success - Upload success notification

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::signing::{AuthorizeError, SignedResponse, SigningRequest};
use crate::state::AppState;

const DENIED_MESSAGE: &str =
    "This file has not been approved for transfer, check upload is to correct dataset.";

// ============================================================================
// Errors
// ============================================================================

#[derive(Serialize)]
struct DeniedResponse {
    invalid: bool,
    error: &'static str,
    reason: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AuthorizeError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();

        match self {
            AuthorizeError::Denied(reason) => (
                status,
                Json(DeniedResponse {
                    invalid: true,
                    error: DENIED_MESSAGE,
                    reason: reason.to_string(),
                }),
            )
                .into_response(),
            other => {
                if status.is_server_error() {
                    tracing::error!("S3 request failed: {}", other);
                }
                (
                    status,
                    Json(ErrorResponse {
                        error: other.to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the S3 router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sign", post(sign))
        .route("/delete/:key", post(delete_object).delete(delete_object))
        .route("/success", get(upload_success).post(upload_success))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /s3/sign
///
/// Body is either `{"headers": "..."}` for chunked uploads or the policy
/// document itself for simple uploads.
async fn sign(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SignedResponse>, AuthorizeError> {
    let request = SigningRequest::from_json_body(body)?;
    let signed = state.authorizer().handle_signing_request(&request)?;
    Ok(Json(signed))
}

#[derive(Debug, Default, Deserialize)]
struct DeleteParams {
    bucket: Option<String>,
    key: Option<String>,
}

impl DeleteParams {
    /// Fill fields missing here from `other`
    fn or(self, other: DeleteParams) -> DeleteParams {
        DeleteParams {
            bucket: non_empty(self.bucket).or(non_empty(other.bucket)),
            key: non_empty(self.key).or(non_empty(other.key)),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// POST|DELETE /s3/delete/:key?bucket=...&key=...
///
/// `bucket` and `key` come from the query, or from an urlencoded body when
/// the uploader falls back to `POST` with `_method=DELETE`. A `key` field,
/// when sent, takes precedence over the path.
async fn delete_object(
    State(state): State<AppState>,
    Path(path_key): Path<String>,
    Query(query): Query<DeleteParams>,
    form: Option<Form<DeleteParams>>,
) -> Result<StatusCode, AuthorizeError> {
    let form = form.map(|Form(form)| form).unwrap_or_default();
    let params = query.or(form);

    let bucket = params
        .bucket
        .ok_or_else(|| AuthorizeError::MalformedRequest("missing bucket".to_string()))?;
    let key = params.key.unwrap_or(path_key);

    state.authorizer().delete_object(&bucket, &key).await?;
    Ok(StatusCode::OK)
}

/// GET|POST /s3/success
///
/// Fine Uploader reports the bucket, key, uuid and name of each completed
/// upload here. Nothing is verified; the fields go to the audit log.
async fn upload_success(fields: Option<Form<BTreeMap<String, String>>>) -> StatusCode {
    let fields = fields.map(|Form(fields)| fields).unwrap_or_default();

    tracing::info!(
        target: "audit",
        bucket = fields.get("bucket").map(String::as_str).unwrap_or_default(),
        key = fields.get("key").map(String::as_str).unwrap_or_default(),
        uuid = fields.get("uuid").map(String::as_str).unwrap_or_default(),
        name = fields.get("name").map(String::as_str).unwrap_or_default(),
        fields = ?fields,
        "Upload succeeded"
    );

    StatusCode::OK
}
