//! The three-round-trip upload negotiation and partial updates.
//!
//! Correctness under concurrent writers comes only from the conditional
//! headers; the client keeps at most one negotiation in flight per item and
//! hash, and never retries a step verbatim. A transport failure means
//! redoing the whole sequence with a fresh ticket.

use bytes::Bytes;
use serde::Deserialize;

use carrel_core::fingerprint::md5_bytes;
use carrel_core::{
    FileDescriptor, PatchAlgorithm, Precondition, RegistrationReceipt, TicketBody, UploadTicket,
    ZipDescriptor,
};

use crate::{CarrelClient, Error, error};

/// Header carrying the item's version after a successful mutation.
const VERSION_HEADER: &str = "Last-Modified-Version";

/// Outcome of an authorization round-trip.
#[derive(Debug, Clone)]
pub enum Authorization {
    /// The content is already stored; the server associated it directly.
    Exists {
        /// The item's version after the association.
        version: u64,
    },
    /// The content must be transferred under this ticket.
    Ticket(UploadTicket),
}

/// Outcome of a full upload orchestration.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// The server already had the content; no bytes were moved.
    AlreadyExists {
        /// The item's version after the association.
        version: u64,
    },
    /// The content was transferred and registered.
    Uploaded(RegistrationReceipt),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AuthorizeResponse {
    Exists {
        #[allow(dead_code)]
        exists: u8,
    },
    Ticket(UploadTicket),
}

fn version_from(response: &reqwest::Response) -> Result<u64, Error> {
    response
        .headers()
        .get(VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            Error::Deserialization(format!("missing or invalid {VERSION_HEADER} header"))
        })
}

impl CarrelClient {
    /// Round-trip 1: ask whether the content must be transferred.
    ///
    /// # Errors
    ///
    /// Decodes 428/412/413/400 responses into [`Error::Protocol`].
    pub async fn authorize(
        &self,
        item_key: &str,
        descriptor: &FileDescriptor,
        precondition: &Precondition,
    ) -> Result<Authorization, Error> {
        self.send_authorization(item_key, descriptor, None, precondition, false)
            .await
    }

    /// Authorize an upload of a zip-contained file. Existence is judged by
    /// the logical file's digest; the container is what gets transferred.
    ///
    /// # Errors
    ///
    /// Same as [`CarrelClient::authorize`].
    pub async fn authorize_zip(
        &self,
        item_key: &str,
        zip: &ZipDescriptor,
        precondition: &Precondition,
    ) -> Result<Authorization, Error> {
        self.send_authorization(item_key, &zip.file, Some(zip), precondition, false)
            .await
    }

    /// Authorize requesting a parameterized ticket: the server returns form
    /// fields instead of prebuilt framing and the client assembles the
    /// multipart body itself.
    ///
    /// # Errors
    ///
    /// Same as [`CarrelClient::authorize`].
    pub async fn authorize_form(
        &self,
        item_key: &str,
        descriptor: &FileDescriptor,
        precondition: &Precondition,
    ) -> Result<Authorization, Error> {
        self.send_authorization(item_key, descriptor, None, precondition, true)
            .await
    }

    async fn send_authorization(
        &self,
        item_key: &str,
        descriptor: &FileDescriptor,
        zip: Option<&ZipDescriptor>,
        precondition: &Precondition,
        form_params: bool,
    ) -> Result<Authorization, Error> {
        let mut fields: Vec<(&str, String)> = vec![
            ("md5", descriptor.md5.clone()),
            ("filename", descriptor.filename.clone()),
            ("filesize", descriptor.size.to_string()),
            ("mtime", descriptor.mtime.to_string()),
        ];
        if !descriptor.content_type.is_empty() {
            fields.push(("contentType", descriptor.content_type.clone()));
        }
        if let Some(charset) = &descriptor.charset {
            fields.push(("charset", charset.clone()));
        }
        if let Some(zip) = zip {
            fields.push(("zip", "1".to_owned()));
            fields.push(("zipMD5", zip.zip_md5.clone()));
            fields.push(("zipFilename", zip.zip_filename.clone()));
            fields.push(("zipFilesize", zip.zip_size.to_string()));
        }
        if form_params {
            fields.push(("params", "1".to_owned()));
        }

        let mut request = self
            .add_auth(self.meta.post(self.item_url(item_key, "/file")))
            .form(&fields);
        if let Some((name, value)) = precondition.to_header() {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error::from_response(response).await);
        }

        let version = response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body: AuthorizeResponse = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        match body {
            AuthorizeResponse::Exists { .. } => Ok(Authorization::Exists {
                version: version.ok_or_else(|| {
                    Error::Deserialization(format!("missing {VERSION_HEADER} header"))
                })?,
            }),
            AuthorizeResponse::Ticket(ticket) => Ok(Authorization::Ticket(ticket)),
        }
    }

    /// Round-trip 2: send the content to the object store named by the
    /// ticket, assembling the body the way the ticket prescribes.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] for transport failures; the store's digest and
    /// size rejections surface as [`Error::Protocol`].
    pub async fn transfer(&self, ticket: &UploadTicket, data: Bytes) -> Result<(), Error> {
        let digest = md5_bytes(&data);
        let request = match &ticket.body {
            TicketBody::Sandwich { prefix, suffix } => {
                let mut body = Vec::with_capacity(prefix.len() + data.len() + suffix.len());
                body.extend_from_slice(prefix);
                body.extend_from_slice(&data);
                body.extend_from_slice(suffix);
                self.transfer
                    .post(&ticket.url)
                    .header("Content-Type", &ticket.content_type)
                    .header("Content-MD5", &digest)
                    .body(body)
            }
            TicketBody::Form { params } => {
                let mut form = reqwest::multipart::Form::new();
                let part_content_type = params.get("contentType").cloned();
                for (name, value) in params {
                    form = form.text(name.clone(), value.clone());
                }
                let mut part = reqwest::multipart::Part::bytes(data.to_vec());
                if let Some(content_type) = part_content_type {
                    part = part
                        .mime_str(&content_type)
                        .map_err(|e| Error::Configuration(e.to_string()))?;
                }
                self.transfer
                    .post(&ticket.url)
                    .header("Content-MD5", &digest)
                    .multipart(form.part("file", part))
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error::from_response(response).await);
        }
        Ok(())
    }

    /// Round-trip 3: consume the ticket and commit the item row.
    ///
    /// # Errors
    ///
    /// A consumed or expired upload key decodes as `BadRequest`; conditional
    /// failures as 428/412.
    pub async fn register(
        &self,
        item_key: &str,
        ticket: &UploadTicket,
        precondition: &Precondition,
    ) -> Result<RegistrationReceipt, Error> {
        let mut request = self
            .add_auth(self.meta.post(self.item_url(item_key, "/file")))
            .form(&[("upload", ticket.upload_key.as_str())]);
        if let Some((name, value)) = precondition.to_header() {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error::from_response(response).await);
        }
        Ok(RegistrationReceipt {
            version: version_from(&response)?,
        })
    }

    /// The full three-step orchestration: authorize, transfer, register.
    ///
    /// # Errors
    ///
    /// Any failing step surfaces as-is; the caller redoes the whole
    /// sequence with a fresh negotiation rather than retrying one step.
    pub async fn upload(
        &self,
        item_key: &str,
        descriptor: &FileDescriptor,
        data: Bytes,
        precondition: &Precondition,
    ) -> Result<UploadOutcome, Error> {
        let ticket = match self.authorize(item_key, descriptor, precondition).await? {
            Authorization::Exists { version } => {
                return Ok(UploadOutcome::AlreadyExists { version });
            }
            Authorization::Ticket(ticket) => ticket,
        };
        self.transfer(&ticket, data).await?;
        let receipt = self.register(item_key, &ticket, precondition).await?;
        Ok(UploadOutcome::Uploaded(receipt))
    }

    /// Negotiate and send a binary delta against the currently stored blob.
    ///
    /// Any patch failure is indistinguishable from the server refusing the
    /// reconstruction; the caller's fallback is a full upload.
    ///
    /// # Errors
    ///
    /// 412 if `prior_md5` no longer matches; `BadRequest` for rejected
    /// patches.
    pub async fn patch(
        &self,
        item_key: &str,
        descriptor: &FileDescriptor,
        prior_md5: &str,
        algorithm: PatchAlgorithm,
        patch_bytes: Bytes,
    ) -> Result<UploadOutcome, Error> {
        let precondition = Precondition::MustMatch(prior_md5.to_owned());
        let ticket = match self.authorize(item_key, descriptor, &precondition).await? {
            Authorization::Exists { version } => {
                return Ok(UploadOutcome::AlreadyExists { version });
            }
            Authorization::Ticket(ticket) => ticket,
        };

        let suffix = format!(
            "/file?algorithm={}&upload={}",
            algorithm.as_str(),
            ticket.upload_key
        );
        let mut request = self
            .add_auth(self.meta.post(self.item_url(item_key, &suffix)))
            .body(patch_bytes);
        if let Some((name, value)) = precondition.to_header() {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error::from_response(response).await);
        }
        Ok(UploadOutcome::Uploaded(RegistrationReceipt {
            version: version_from(&response)?,
        }))
    }
}
