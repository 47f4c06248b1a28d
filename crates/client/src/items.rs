//! Attachment item plumbing: create, fetch, and metadata updates.

use serde::Serialize;

use carrel_core::{AttachmentItem, AttachmentKind};

use crate::{CarrelClient, Error, error};

/// Sparse metadata update. Fields left as `None` are untouched; changing the
/// declared md5, filename, or mtime severs the item's file association on
/// the server.
#[derive(Debug, Default, Clone, Serialize)]
pub struct MetadataUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(rename = "contentType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
}

#[derive(Serialize)]
struct CreateItemRequest<'a> {
    key: &'a str,
    kind: AttachmentKind,
}

impl CarrelClient {
    /// Create an attachment item.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] with `BadRequest` if the key is taken.
    pub async fn create_attachment(
        &self,
        key: &str,
        kind: AttachmentKind,
    ) -> Result<AttachmentItem, Error> {
        let mut url = format!("{}/items", self.base_url);
        if let Some(library) = &self.library {
            url = format!("{url}?library={library}");
        }
        let response = self
            .add_auth(self.meta.post(&url))
            .json(&CreateItemRequest { key, kind })
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error::from_response(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Fetch an item's current state.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] with `NotFound` for unknown keys.
    pub async fn get_item(&self, key: &str) -> Result<AttachmentItem, Error> {
        let response = self
            .add_auth(self.meta.get(self.item_url(key, "")))
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error::from_response(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Apply a sparse metadata update and return the new item state.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] with `NotFound` for unknown keys.
    pub async fn update_metadata(
        &self,
        key: &str,
        update: &MetadataUpdate,
    ) -> Result<AttachmentItem, Error> {
        let response = self
            .add_auth(self.meta.patch(self.item_url(key, "")))
            .json(update)
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error::from_response(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
