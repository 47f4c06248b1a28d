//! The file-attachment protocol: authorization, registration, partial
//! update, and download resolution.
//!
//! All three mutating operations arrive on `POST /items/{key}/file` and are
//! discriminated the way the original wire contract does it: a query string
//! carrying `algorithm` and `upload` with a raw binary body is a partial
//! update, a form body carrying `upload` is a registration, and anything
//! else is an authorization request.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use carrel_blob::types::{BlobMetadata, ResolvedBlob};
use carrel_core::fingerprint::md5_bytes;
use carrel_core::{
    AttachmentItem, AttachmentKind, BlobKey, FileDescriptor, FileError, ItemKey, LibraryId,
    OwnerId, PatchAlgorithm, PatchError, Precondition, TicketBody, UploadTicket, ZipDescriptor,
    apply_patch,
};
use carrel_state::key::{KeyKind, StateKey};

use crate::api::AppState;
use crate::api::items::{self, load_item, store_item_update};
use crate::error::ServerError;

/// Header carrying the item's version after a successful mutation.
pub const VERSION_HEADER: &str = "Last-Modified-Version";

/// Characters escaped when a filename becomes a URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'%')
    .add(b'/');

/// Everything the server remembers about an issued upload ticket.
///
/// Stored without a state-store TTL; `expires_at` is explicit so the reaper
/// can release the quota reservation of a ticket that was never consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TicketRecord {
    upload_key: String,
    library: LibraryId,
    item_key: ItemKey,
    descriptor: FileDescriptor,
    zip: Option<ZipDescriptor>,
    /// Object-store key the transfer writes to (always the logical hash).
    store_key: String,
    /// Digest the transferred bytes must carry (the container's for zips).
    declared_md5: String,
    declared_size: u64,
    reserved_bytes: u64,
    owner: OwnerId,
    expires_at: DateTime<Utc>,
}

fn ticket_state_key(library: &LibraryId, upload_key: &str) -> StateKey {
    StateKey::new(library.as_str(), KeyKind::Ticket, upload_key)
}

fn usage_state_key(owner: &OwnerId) -> StateKey {
    StateKey::new(owner.as_str(), KeyKind::QuotaUsage, "bytes")
}

/// Query parameters on `POST /items/{key}/file`.
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub library: Option<String>,
    /// Partial-update algorithm name.
    pub algorithm: Option<String>,
    /// Upload key, when the partial-update body is raw patch bytes.
    pub upload: Option<String>,
}

impl FileQuery {
    fn library(&self) -> LibraryId {
        LibraryId::new(self.library.as_deref().unwrap_or(items::DEFAULT_LIBRARY))
    }
}

/// Url-encoded fields of an authorization or registration form.
#[derive(Debug, Default, Deserialize)]
struct FileForm {
    md5: Option<String>,
    filename: Option<String>,
    filesize: Option<String>,
    mtime: Option<String>,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    charset: Option<String>,
    params: Option<String>,
    zip: Option<String>,
    #[serde(rename = "zipMD5")]
    zip_md5: Option<String>,
    #[serde(rename = "zipFilename")]
    zip_filename: Option<String>,
    #[serde(rename = "zipFilesize")]
    zip_filesize: Option<String>,
    upload: Option<String>,
}

/// `POST /items/{key}/file` — authorization, registration, or partial update.
pub async fn post_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServerError> {
    let library = query.library();
    let item_key = ItemKey::new(key);
    let precondition = precondition_from(&headers)?;

    if let (Some(algorithm), Some(upload_key)) = (&query.algorithm, &query.upload) {
        return apply_partial(
            &state,
            &library,
            &item_key,
            &precondition,
            algorithm,
            upload_key,
            body,
        )
        .await;
    }

    let form: FileForm = serde_urlencoded::from_bytes(&body)
        .map_err(|e| FileError::BadRequest(format!("malformed request body: {e}")))?;

    if let Some(upload_key) = form.upload.clone() {
        return register(&state, &library, &item_key, &precondition, &upload_key).await;
    }

    authorize(&state, &library, &item_key, &precondition, form).await
}

fn precondition_from(headers: &HeaderMap) -> Result<Precondition, ServerError> {
    let header_str = |name: header::HeaderName| -> Result<Option<&str>, FileError> {
        headers
            .get(&name)
            .map(|value| {
                value
                    .to_str()
                    .map_err(|_| FileError::BadRequest(format!("invalid {name} header")))
            })
            .transpose()
    };
    let if_match = header_str(header::IF_MATCH)?;
    let if_none_match = header_str(header::IF_NONE_MATCH)?;
    Ok(Precondition::from_headers(if_match, if_none_match)?)
}

fn require<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, FileError> {
    field
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| FileError::BadRequest(format!("{name} not provided")))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, FileError> {
    value
        .parse()
        .map_err(|_| FileError::BadRequest(format!("invalid {name} value '{value}'")))
}

fn reject_linked(item: &AttachmentItem) -> Result<(), FileError> {
    if item.kind == AttachmentKind::Linked {
        return Err(FileError::BadRequest(
            "file operations are not valid for linked attachments".into(),
        ));
    }
    Ok(())
}

/// Build the logical descriptor (and container descriptor, for zips) from
/// the authorization form. Field validation happens here, before any quota
/// or existence check.
fn descriptors_from(form: &FileForm) -> Result<(FileDescriptor, Option<ZipDescriptor>), FileError> {
    let md5 = require(&form.md5, "md5")?;
    let filename = require(&form.filename, "filename")?;
    let filesize: u64 = parse_number(require(&form.filesize, "filesize")?, "filesize")?;
    let mtime: i64 = parse_number(require(&form.mtime, "mtime")?, "mtime")?;

    let mut descriptor = FileDescriptor {
        md5: md5.to_lowercase(),
        size: filesize,
        filename: filename.to_owned(),
        mtime,
        content_type: form.content_type.clone().unwrap_or_default(),
        charset: form.charset.clone(),
    };
    descriptor.validate()?;

    if form.zip.as_deref() != Some("1") {
        return Ok((descriptor, None));
    }

    let zip = ZipDescriptor {
        file: descriptor.clone(),
        zip_md5: require(&form.zip_md5, "zipMD5")?.to_lowercase(),
        zip_filename: require(&form.zip_filename, "zipFilename")?.to_owned(),
        zip_size: parse_number(require(&form.zip_filesize, "zipFilesize")?, "zipFilesize")?,
    };
    zip.validate()?;
    descriptor = zip.file.clone();
    Ok((descriptor, Some(zip)))
}

/// Round-trip 1: validate, enforce the precondition, reserve quota, check
/// for existing content, and either associate immediately or issue a ticket.
async fn authorize(
    state: &AppState,
    library: &LibraryId,
    item_key: &ItemKey,
    precondition: &Precondition,
    form: FileForm,
) -> Result<Response, ServerError> {
    reap_expired_tickets(state).await?;

    let (item, item_version) = load_item(state, library, item_key).await?;
    reject_linked(&item)?;

    let (descriptor, zip) = descriptors_from(&form)?;
    precondition.check(item.current_md5())?;

    let owner = state.config.owner_of(library);
    let policy = state.config.quota_for(&owner);
    let transfer_size = zip.as_ref().map_or(descriptor.size, |z| z.zip_size);

    // Reserve first so two racing authorizations cannot jointly pass the
    // ceiling. Everything after this point rolls the reservation back on
    // failure; a successful response keeps it, attached to the ticket or
    // committed outright on an exists hit.
    let reserve = i64::try_from(transfer_size)
        .map_err(|_| FileError::BadRequest("filesize too large".into()))?;
    let usage_key = usage_state_key(&owner);
    let projected = state.state.increment(&usage_key, reserve).await?;
    if policy.exceeded_by(projected.max(0).unsigned_abs()) {
        state.state.increment(&usage_key, -reserve).await?;
        return Err(FileError::QuotaExceeded {
            ceiling_bytes: policy.ceiling_bytes,
            owner,
        }
        .into());
    }

    let issue = authorize_reserved(
        state,
        library,
        item,
        item_version,
        descriptor,
        zip,
        form.params.as_deref() == Some("1"),
        transfer_size,
        &owner,
    )
    .await;
    match issue {
        Ok(response) => Ok(response),
        Err(err) => {
            state.state.increment(&usage_key, -reserve).await?;
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn authorize_reserved(
    state: &AppState,
    library: &LibraryId,
    mut item: AttachmentItem,
    item_version: u64,
    descriptor: FileDescriptor,
    zip: Option<ZipDescriptor>,
    form_params: bool,
    transfer_size: u64,
    owner: &OwnerId,
) -> Result<Response, ServerError> {
    let store_key = BlobKey::canonical(&descriptor.md5);
    let filename = descriptor.filename.clone();

    if blob_exists(state, &descriptor.md5, &filename, transfer_size).await? {
        // Content already stored: associate and bump the version without a
        // transfer. The quota charge for the new bytes stays, the same as
        // the original service bills deduplicated content.
        let zipped = zip.is_some();
        item.associate(descriptor, zipped);
        let new_version = store_item_update(state, library, &mut item, item_version).await?;
        let mut response =
            Json(serde_json::json!({ "exists": 1 })).into_response();
        response
            .headers_mut()
            .insert(VERSION_HEADER, HeaderValue::from(new_version));
        return Ok(response);
    }

    let upload_key = uuid::Uuid::new_v4().simple().to_string();
    let (declared_md5, declared_size) = zip
        .as_ref()
        .map_or((descriptor.md5.clone(), descriptor.size), |z| {
            (z.zip_md5.clone(), z.zip_size)
        });
    let content_type = if zip.is_some() {
        "application/zip".to_owned()
    } else if descriptor.content_type.is_empty() {
        "application/octet-stream".to_owned()
    } else {
        descriptor.content_type.clone()
    };

    let url = format!(
        "{}/store/{}?upload={}&md5={}&size={}",
        state.config.server.public_url(),
        store_key.key,
        upload_key,
        declared_md5,
        declared_size,
    );

    let (body, ticket_content_type) = if form_params {
        let mut params = std::collections::BTreeMap::new();
        params.insert("key".to_owned(), store_key.key.clone());
        params.insert("md5".to_owned(), declared_md5.clone());
        params.insert("size".to_owned(), declared_size.to_string());
        params.insert("contentType".to_owned(), content_type.clone());
        (TicketBody::Form { params }, "multipart/form-data".to_owned())
    } else {
        let boundary = format!("carrel-{}", uuid::Uuid::new_v4().simple());
        let prefix = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        );
        let suffix = format!("\r\n--{boundary}--\r\n");
        (
            TicketBody::Sandwich {
                prefix: prefix.into_bytes(),
                suffix: suffix.into_bytes(),
            },
            format!("multipart/form-data; boundary={boundary}"),
        )
    };

    let record = TicketRecord {
        upload_key: upload_key.clone(),
        library: library.clone(),
        item_key: item.key.clone(),
        descriptor,
        zip,
        store_key: store_key.key,
        declared_md5,
        declared_size,
        reserved_bytes: transfer_size,
        owner: owner.clone(),
        expires_at: Utc::now()
            + ChronoDuration::seconds(i64::try_from(state.config.tickets.ttl_seconds).unwrap_or(3600)),
    };
    let serialized =
        serde_json::to_string(&record).map_err(carrel_state::error::StateError::from)?;
    let issued = state
        .state
        .check_and_set(&ticket_state_key(library, &upload_key), &serialized, None)
        .await?;
    if !issued {
        return Err(FileError::BadRequest("upload key collision".into()).into());
    }

    let ticket = UploadTicket {
        upload_key,
        url,
        body,
        content_type: ticket_content_type,
    };
    Ok(Json(ticket).into_response())
}

/// Whether content with this logical digest and stored size is already
/// present, under either key layout. A size disagreement is not the same
/// blob, whatever the hash says, and falls through to a fresh transfer. A
/// legacy hit is copied to the hash-only key so later reads find it
/// canonically.
async fn blob_exists(
    state: &AppState,
    md5: &str,
    filename: &str,
    expected_size: u64,
) -> Result<bool, ServerError> {
    let canonical = BlobKey::canonical(md5);
    if let Some(meta) = state.blobs.head(&canonical.key).await? {
        return Ok(meta.size == expected_size);
    }
    let legacy = state
        .blobs
        .list_prefix(&BlobKey::legacy_prefix(md5))
        .await?;
    let Some(found) = legacy.first() else {
        return Ok(false);
    };
    let Some(meta) = state.blobs.head(found).await? else {
        return Ok(false);
    };
    if meta.size != expected_size {
        return Ok(false);
    }
    if *found != BlobKey::legacy(md5, filename).key {
        // Same content under another filename; migrate so the canonical
        // lookup succeeds from now on.
        state.blobs.copy(found, &canonical.key).await?;
    }
    Ok(true)
}

/// Round-trip 3: consume the ticket and commit the item row.
async fn register(
    state: &AppState,
    library: &LibraryId,
    item_key: &ItemKey,
    precondition: &Precondition,
    upload_key: &str,
) -> Result<Response, ServerError> {
    let (mut item, item_version) = load_item(state, library, item_key).await?;
    reject_linked(&item)?;
    precondition.check(item.current_md5())?;

    let record = consume_ticket(state, library, upload_key).await?;
    if record.item_key != *item_key {
        release_reservation(state, &record).await?;
        return Err(
            FileError::BadRequest("upload key was issued for a different item".into()).into(),
        );
    }

    let stored = state.blobs.head(&record.store_key).await?;
    if !stored.is_some_and(|meta| meta.md5.eq_ignore_ascii_case(&record.declared_md5)) {
        // Consuming the ticket on a failed registration matches single-use
        // semantics: the client renegotiates from the top.
        release_reservation(state, &record).await?;
        return Err(FileError::BadRequest("file has not been uploaded".into()).into());
    }

    let zipped = record.zip.is_some();
    item.associate(record.descriptor, zipped);
    let new_version = store_item_update(state, library, &mut item, item_version).await?;
    Ok(no_content_with_version(new_version))
}

/// Atomically take the ticket; a missing record means the key was never
/// issued or was already consumed, and an expired one is consumed and its
/// reservation released.
async fn consume_ticket(
    state: &AppState,
    library: &LibraryId,
    upload_key: &str,
) -> Result<TicketRecord, ServerError> {
    let Some(raw) = state
        .state
        .take(&ticket_state_key(library, upload_key))
        .await?
    else {
        return Err(
            FileError::BadRequest("upload key not found or already used".into()).into(),
        );
    };
    let record: TicketRecord =
        serde_json::from_str(&raw).map_err(carrel_state::error::StateError::from)?;
    if record.expires_at <= Utc::now() {
        release_reservation(state, &record).await?;
        return Err(FileError::BadRequest("upload key has expired".into()).into());
    }
    Ok(record)
}

async fn release_reservation(state: &AppState, record: &TicketRecord) -> Result<(), ServerError> {
    let delta = i64::try_from(record.reserved_bytes).unwrap_or(i64::MAX);
    state
        .state
        .increment(&usage_state_key(&record.owner), -delta)
        .await?;
    Ok(())
}

/// Release reservations held by tickets that expired unconsumed.
async fn reap_expired_tickets(state: &AppState) -> Result<(), ServerError> {
    let now = Utc::now();
    for (canonical, raw) in state.state.scan_kind(KeyKind::Ticket).await? {
        let Ok(record) = serde_json::from_str::<TicketRecord>(&raw) else {
            continue;
        };
        if record.expires_at > now {
            continue;
        }
        let mut parts = canonical.splitn(3, ':');
        let (Some(library), Some(_kind), Some(id)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        // `take` keeps a racing registration and the reaper from both
        // releasing the same reservation.
        if state
            .state
            .take(&StateKey::new(library, KeyKind::Ticket, id))
            .await?
            .is_some()
        {
            release_reservation(state, &record).await?;
        }
    }
    Ok(())
}

/// Round-trip 2b: apply a binary delta against the previously stored blob.
async fn apply_partial(
    state: &AppState,
    library: &LibraryId,
    item_key: &ItemKey,
    precondition: &Precondition,
    algorithm: &str,
    upload_key: &str,
    patch_bytes: Bytes,
) -> Result<Response, ServerError> {
    let (mut item, item_version) = load_item(state, library, item_key).await?;
    reject_linked(&item)?;
    precondition.check(item.current_md5())?;

    let algorithm = PatchAlgorithm::parse(algorithm)
        .ok_or_else(|| FileError::BadRequest(format!("unknown algorithm '{algorithm}'")))?;

    let record = consume_ticket(state, library, upload_key).await?;
    if record.item_key != *item_key {
        release_reservation(state, &record).await?;
        return Err(
            FileError::BadRequest("upload key was issued for a different item".into()).into(),
        );
    }

    let outcome = async {
        if algorithm != PatchAlgorithm::Bxdiff {
            return Err(ServerError::from(FileError::BadRequest(
                PatchError::Unsupported(algorithm.to_string()).to_string(),
            )));
        }
        let base_md5 = item.current_md5().ok_or(FileError::PreconditionFailed)?;
        let base = resolve_blob(state, base_md5, &item).await?.1;

        let rebuilt = apply_patch(&base.data, &patch_bytes)
            .map_err(|e| FileError::BadRequest(e.to_string()))?;
        let actual = md5_bytes(&rebuilt);
        if !actual.eq_ignore_ascii_case(&record.declared_md5) {
            return Err(FileError::ContentMismatch {
                expected: record.declared_md5.clone(),
                actual,
            }
            .into());
        }

        let content_type = if record.descriptor.content_type.is_empty() {
            "application/octet-stream".to_owned()
        } else {
            record.descriptor.content_type.clone()
        };
        state
            .blobs
            .put(
                &record.store_key,
                Bytes::from(rebuilt),
                &record.declared_md5,
                record.declared_size,
                &content_type,
            )
            .await?;
        Ok(())
    }
    .await;

    if let Err(err) = outcome {
        release_reservation(state, &record).await?;
        return Err(err);
    }

    let zipped = record.zip.is_some();
    item.associate(record.descriptor, zipped);
    let new_version = store_item_update(state, library, &mut item, item_version).await?;
    Ok(no_content_with_version(new_version))
}

fn no_content_with_version(version: u64) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .insert(VERSION_HEADER, HeaderValue::from(version));
    response
}

/// Find the stored blob for an item's current digest: hash-only key first,
/// then the legacy key rendered with the current filename.
async fn resolve_blob(
    state: &AppState,
    md5: &str,
    item: &AttachmentItem,
) -> Result<(String, ResolvedBlob), ServerError> {
    let canonical = BlobKey::canonical(md5);
    if let Some(blob) = state.blobs.get(&canonical.key).await? {
        return Ok((canonical.key, blob));
    }
    if let Some(file) = item.file.as_ref() {
        let legacy = BlobKey::legacy(md5, &file.filename);
        if let Some(blob) = state.blobs.get(&legacy.key).await? {
            return Ok((legacy.key, blob));
        }
    }
    Err(FileError::NotFound.into())
}

async fn resolve_head(
    state: &AppState,
    md5: &str,
    item: &AttachmentItem,
) -> Result<(String, BlobMetadata), ServerError> {
    let canonical = BlobKey::canonical(md5);
    if let Some(meta) = state.blobs.head(&canonical.key).await? {
        return Ok((canonical.key, meta));
    }
    if let Some(file) = item.file.as_ref() {
        let legacy = BlobKey::legacy(md5, &file.filename);
        if let Some(meta) = state.blobs.head(&legacy.key).await? {
            return Ok((legacy.key, meta));
        }
    }
    Err(FileError::NotFound.into())
}

async fn redirect_to_store(
    state: &AppState,
    library: &LibraryId,
    item_key: ItemKey,
    inline: bool,
) -> Result<Response, ServerError> {
    let (item, _) = load_item(state, library, &item_key).await?;
    let Some(file) = item.file.as_ref() else {
        return Err(FileError::NotFound.into());
    };
    let (key, _meta) = resolve_head(state, &file.md5, &item).await?;

    let expires = Utc::now().timestamp()
        + i64::try_from(state.config.downloads.redirect_ttl_seconds).unwrap_or(60);
    let base = state.config.server.public_url();
    let location = if inline {
        let filename = utf8_percent_encode(&file.filename, SEGMENT);
        format!("{base}/store/{key}/{filename}?expires={expires}")
    } else {
        format!("{base}/store/{key}?expires={expires}")
    };

    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(
        header::LOCATION,
        HeaderValue::from_str(&location)
            .map_err(|_| ServerError::Config("unrepresentable redirect target".into()))?,
    );
    Ok(response)
}

/// `GET /items/{key}/file` — 302 to a time-limited attachment URL.
pub async fn download_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<items::LibraryQuery>,
) -> Result<Response, ServerError> {
    redirect_to_store(&state, &query.library(), ItemKey::new(key), false).await
}

/// `GET /items/{key}/file/view` — 302 to an inline view URL carrying the
/// filename as a trailing path segment.
pub async fn view_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<items::LibraryQuery>,
) -> Result<Response, ServerError> {
    redirect_to_store(&state, &query.library(), ItemKey::new(key), true).await
}
