//! Attachment item rows: creation, metadata reads, and metadata updates.
//!
//! Item rows live in the state store keyed by `{library}:item:{key}`; the
//! store's compare-and-swap version doubles as the item version surfaced in
//! `Last-Modified-Version`.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use carrel_core::{AttachmentItem, AttachmentKind, FileError, ItemKey, LibraryId};
use carrel_state::key::{KeyKind, StateKey};
use carrel_state::store::CasResult;

use crate::api::AppState;
use crate::error::ServerError;

/// Library a request operates on when none is named.
pub const DEFAULT_LIBRARY: &str = "local";

/// Library selector common to all item-scoped routes.
#[derive(Debug, Deserialize)]
pub struct LibraryQuery {
    /// Library the item belongs to. Defaults to the local library.
    pub library: Option<String>,
}

impl LibraryQuery {
    pub fn library(&self) -> LibraryId {
        LibraryId::new(self.library.as_deref().unwrap_or(DEFAULT_LIBRARY))
    }
}

pub(crate) fn item_state_key(library: &LibraryId, key: &ItemKey) -> StateKey {
    StateKey::new(library.as_str(), KeyKind::Item, key.as_str())
}

/// Load an item row together with its store version.
pub(crate) async fn load_item(
    state: &AppState,
    library: &LibraryId,
    key: &ItemKey,
) -> Result<(AttachmentItem, u64), ServerError> {
    let versioned = state
        .state
        .get_versioned(&item_state_key(library, key))
        .await?
        .ok_or(FileError::NotFound)?;
    let item: AttachmentItem = serde_json::from_str(&versioned.value)
        .map_err(|e| ServerError::Config(format!("corrupt item row: {e}")))?;
    Ok((item, versioned.version))
}

/// Persist an updated item row against the version it was loaded at.
///
/// A conflicting concurrent write surfaces as `PreconditionFailed`: whatever
/// assertion the caller's conditional header made was evaluated against a
/// row that no longer exists.
pub(crate) async fn store_item_update(
    state: &AppState,
    library: &LibraryId,
    item: &mut AttachmentItem,
    expected_version: u64,
) -> Result<u64, ServerError> {
    item.version = expected_version + 1;
    let serialized = serde_json::to_string(item).map_err(carrel_state::error::StateError::from)?;
    match state
        .state
        .compare_and_swap(&item_state_key(library, &item.key), expected_version, &serialized)
        .await?
    {
        CasResult::Ok { new_version } => Ok(new_version),
        CasResult::Conflict { .. } => Err(FileError::PreconditionFailed.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    /// Item key, unique within the library.
    pub key: String,
    /// Imported or linked.
    #[serde(default = "default_kind")]
    pub kind: AttachmentKind,
}

fn default_kind() -> AttachmentKind {
    AttachmentKind::Imported
}

/// `POST /items` — create an attachment item with no file state.
pub async fn create_item(
    State(state): State<AppState>,
    Query(query): Query<LibraryQuery>,
    Json(request): Json<CreateItemRequest>,
) -> Result<(StatusCode, Json<AttachmentItem>), ServerError> {
    if request.key.is_empty() {
        return Err(FileError::BadRequest("item key not provided".into()).into());
    }
    let library = query.library();
    let item = AttachmentItem::new(ItemKey::new(&request.key), library.clone(), request.kind);

    let serialized = serde_json::to_string(&item).map_err(carrel_state::error::StateError::from)?;
    match state
        .state
        .compare_and_swap(&item_state_key(&library, &item.key), 0, &serialized)
        .await?
    {
        CasResult::Ok { .. } => Ok((StatusCode::CREATED, Json(item))),
        CasResult::Conflict { .. } => Err(FileError::BadRequest(format!(
            "item '{}' already exists",
            request.key
        ))
        .into()),
    }
}

/// `GET /items/{key}` — fetch item metadata.
pub async fn get_item(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<LibraryQuery>,
) -> Result<Json<AttachmentItem>, ServerError> {
    let (item, _) = load_item(&state, &query.library(), &ItemKey::new(key)).await?;
    Ok(Json(item))
}

#[derive(Debug, Default, Deserialize)]
pub struct MetadataPatch {
    pub md5: Option<String>,
    pub filename: Option<String>,
    pub mtime: Option<i64>,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    pub charset: Option<String>,
}

impl MetadataPatch {
    /// Whether this patch changes any of the fields that identify the stored
    /// content. Changing one severs the file association.
    fn invalidates(&self, item: &AttachmentItem) -> bool {
        let Some(file) = item.file.as_ref() else {
            return false;
        };
        let md5_changed = self
            .md5
            .as_ref()
            .is_some_and(|md5| !md5.eq_ignore_ascii_case(&file.md5));
        let filename_changed = self
            .filename
            .as_ref()
            .is_some_and(|name| *name != file.filename);
        let mtime_changed = self.mtime.is_some_and(|mtime| mtime != file.mtime);
        md5_changed || filename_changed || mtime_changed
    }
}

/// `PATCH /items/{key}` — metadata update.
///
/// Changing the declared md5, filename, or mtime dissociates the stored
/// blob: subsequent file reads behave as "no file" even though the blob
/// itself is never deleted.
pub async fn patch_item(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<LibraryQuery>,
    Json(patch): Json<MetadataPatch>,
) -> Result<Json<AttachmentItem>, ServerError> {
    let library = query.library();
    let key = ItemKey::new(key);
    let (mut item, version) = load_item(&state, &library, &key).await?;

    if patch.invalidates(&item) {
        item.dissociate();
    } else if let Some(file) = item.file.as_mut() {
        if let Some(content_type) = patch.content_type.clone() {
            file.content_type = content_type;
        }
        if let Some(charset) = patch.charset.clone() {
            file.charset = Some(charset);
        }
    }

    store_item_update(&state, &library, &mut item, version).await?;
    Ok(Json(item))
}
