//! The simulated object-store endpoint that upload tickets point at.
//!
//! Transfers land here either as a raw `PUT` body or as a `POST` multipart
//! form with a `file` part (which is also what a sandwich ticket's prebuilt
//! framing parses as). Declared digest and size travel in the query string
//! and are validated by the blob store before anything is committed; a
//! `Content-MD5` header, when the sender supplies one, must agree with the
//! declared digest.

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;

use carrel_core::FileError;

use crate::api::AppState;
use crate::error::ServerError;

/// Query parameters on store transfers and reads.
#[derive(Debug, Deserialize)]
pub struct StoreQuery {
    /// Declared hex digest of the transferred bytes.
    pub md5: Option<String>,
    /// Declared size of the transferred bytes.
    pub size: Option<u64>,
    /// Upload key the transfer was authorized under. Opaque here; the
    /// registration round-trip is what consumes it.
    pub upload: Option<String>,
    /// Unix timestamp after which a redirect target stops working.
    pub expires: Option<i64>,
}

fn declared(query: &StoreQuery) -> Result<(&str, u64), FileError> {
    let md5 = query
        .md5
        .as_deref()
        .ok_or_else(|| FileError::BadRequest("md5 not provided".into()))?;
    let size = query
        .size
        .ok_or_else(|| FileError::BadRequest("size not provided".into()))?;
    Ok((md5, size))
}

/// A `Content-MD5` header, when the sender supplies one, must agree with the
/// digest the transfer was authorized for.
fn check_digest_header(headers: &HeaderMap, declared_md5: &str) -> Result<(), FileError> {
    let Some(sent) = headers.get("Content-MD5").and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    if sent.eq_ignore_ascii_case(declared_md5) {
        Ok(())
    } else {
        Err(FileError::BadRequest(
            "Content-MD5 header does not match the authorized digest".into(),
        ))
    }
}

/// `PUT /store/{key}` — raw single-part transfer.
pub async fn put_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ServerError> {
    let (md5, size) = declared(&query)?;
    check_digest_header(&headers, md5)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_owned();
    state.blobs.put(&key, body, md5, size, &content_type).await?;
    Ok(StatusCode::CREATED)
}

/// `POST /store/{key}` — multipart transfer; the content is the `file` part.
pub async fn post_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<StatusCode, ServerError> {
    let (md5, size) = declared(&query)?;
    check_digest_header(&headers, md5)?;
    let mut file: Option<(Bytes, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| FileError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_owned();
            let data = field
                .bytes()
                .await
                .map_err(|e| FileError::BadRequest(format!("malformed multipart body: {e}")))?;
            file = Some((data, content_type));
        }
    }

    let Some((data, content_type)) = file else {
        return Err(FileError::BadRequest("file part not provided".into()).into());
    };
    state.blobs.put(&key, data, md5, size, &content_type).await?;
    Ok(StatusCode::CREATED)
}

/// `GET /store/{key}` — serve a blob from a time-limited redirect target.
///
/// A trailing extra path segment is the view-mode filename: the blob is
/// looked up without it and served inline under that name.
pub async fn get_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<StoreQuery>,
) -> Result<Response, ServerError> {
    if let Some(expires) = query.expires {
        if Utc::now().timestamp() > expires {
            return Err(FileError::Forbidden("download link has expired".into()).into());
        }
    }

    let (blob, inline_name) = match state.blobs.get(&key).await? {
        Some(blob) => (blob, None),
        None => {
            let Some((head, tail)) = key.rsplit_once('/') else {
                return Err(FileError::NotFound.into());
            };
            let blob = state
                .blobs
                .get(head)
                .await?
                .ok_or(FileError::NotFound)?;
            (blob, Some(tail.to_owned()))
        }
    };

    let disposition = match &inline_name {
        Some(name) => format!("inline; filename=\"{}\"", name.replace('"', "")),
        None => "attachment".to_owned(),
    };

    let mut response = (StatusCode::OK, blob.data).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&blob.metadata.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
