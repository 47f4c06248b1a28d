//! Download resolution: follow the 302 by hand so the redirect target stays
//! observable.

use bytes::Bytes;

use crate::{CarrelClient, Error, error};

/// A downloaded attachment together with where it actually came from.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    /// The file content.
    pub bytes: Bytes,
    /// Content type reported by the store.
    pub content_type: String,
    /// The redirect target the content was served from. Legacy-layout blobs
    /// are recognizable by the `{hash}/{filename}` path.
    pub final_url: String,
}

impl CarrelClient {
    /// Download an item's file as an attachment.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] with `NotFound` when the item has no file state.
    pub async fn download(&self, item_key: &str) -> Result<DownloadedFile, Error> {
        self.follow(item_key, "/file").await
    }

    /// Fetch an item's file for inline viewing.
    ///
    /// # Errors
    ///
    /// Same as [`CarrelClient::download`].
    pub async fn view(&self, item_key: &str) -> Result<DownloadedFile, Error> {
        self.follow(item_key, "/file/view").await
    }

    async fn follow(&self, item_key: &str, suffix: &str) -> Result<DownloadedFile, Error> {
        let response = self
            .add_auth(self.meta.get(self.item_url(item_key, suffix)))
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if response.status() != reqwest::StatusCode::FOUND {
            return Err(error::from_response(response).await);
        }
        let location = response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Deserialization("redirect without a Location".into()))?
            .to_owned();

        let served = self
            .add_auth(self.transfer.get(&location))
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if !served.status().is_success() {
            return Err(error::from_response(served).await);
        }
        let content_type = served
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let bytes = served
            .bytes()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(DownloadedFile {
            bytes,
            content_type,
            final_url: location,
        })
    }
}
