//! Object endpoints for the local backend.
//!
//! `PUT` stores an object and, through the store's finalize events, triggers
//! the pipeline exactly as a bucket write would. `GET` returns the stored
//! bytes so the result can be inspected.

use crate::{errors::AppError, services::local_store::ObjectRow, state::AppState};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};

const METAGENERATION_HEADER: &str = "x-goog-metageneration";

/// `PUT /objects/{bucket}/{*key}`
pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let store = state
        .local
        .as_ref()
        .ok_or_else(|| AppError::not_found("object endpoints require the local backend"))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let row = store
        .put_object(&bucket, &key, &body, content_type, None)
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &row);
    Ok(response)
}

/// `GET /objects/{bucket}/{*key}`
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let store = state
        .local
        .as_ref()
        .ok_or_else(|| AppError::not_found("object endpoints require the local backend"))?;

    let (row, data) = store.get_object(&bucket, &key).await?;

    let mut response = Response::new(Body::from(data));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &row);
    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, row: &ObjectRow) {
    let content_type = row
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", row.md5_hash)) {
        headers.insert(header::ETAG, value);
    }

    headers.insert(
        HeaderName::from_static(METAGENERATION_HEADER),
        HeaderValue::from(row.metageneration),
    );

    if let Ok(value) = HeaderValue::from_str(&row.updated_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
