//! Carrel HTTP client
//!
//! A native Rust client for the Carrel file-attachment storage API: item
//! plumbing, the three-round-trip upload negotiation, binary-diff partial
//! updates, and download resolution.
//!
//! # Quick start
//!
//! ```no_run
//! use carrel_client::{CarrelClient, UploadOutcome};
//! use carrel_core::{FileDescriptor, Precondition};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), carrel_client::Error> {
//!     let client = CarrelClient::new("http://localhost:8318");
//!
//!     let data = std::fs::read("paper.pdf").unwrap();
//!     let descriptor = FileDescriptor::for_bytes(&data, "paper.pdf", 1_700_000_000_000)
//!         .with_content_type("application/pdf");
//!
//!     match client
//!         .upload("ABCD2345", &descriptor, data.into(), &Precondition::MustNotExist)
//!         .await?
//!     {
//!         UploadOutcome::AlreadyExists { version } => {
//!             println!("content already stored, item at version {version}");
//!         }
//!         UploadOutcome::Uploaded(receipt) => {
//!             println!("uploaded, item at version {}", receipt.version);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Timeouts
//!
//! Authorization and registration are small metadata exchanges; the transfer
//! in between can carry hundreds of megabytes. The two run on separate
//! clients with separate timeouts (30 seconds and 5 minutes by default),
//! configurable through the builder.

mod download;
mod error;
mod items;
mod upload;

pub use download::DownloadedFile;
pub use error::Error;
pub use items::MetadataUpdate;
pub use upload::{Authorization, UploadOutcome};

use std::time::Duration;

use reqwest::Client;

/// Default timeout for metadata round-trips.
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for content transfers.
const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP client for the Carrel file-storage API.
#[derive(Debug, Clone)]
pub struct CarrelClient {
    /// Client for small metadata exchanges.
    meta: Client,
    /// Client for content transfers, with the long timeout.
    transfer: Client,
    base_url: String,
    api_key: Option<String>,
    library: Option<String>,
}

/// Builder for configuring a [`CarrelClient`].
#[derive(Debug)]
pub struct CarrelClientBuilder {
    base_url: String,
    metadata_timeout: Duration,
    transfer_timeout: Duration,
    api_key: Option<String>,
    library: Option<String>,
}

impl CarrelClientBuilder {
    /// Create a new builder with the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            api_key: None,
            library: None,
        }
    }

    /// Set the timeout for metadata round-trips.
    #[must_use]
    pub fn metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }

    /// Set the timeout for content transfers.
    #[must_use]
    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the API key for authentication.
    #[must_use]
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Scope requests to a library other than the server's default.
    #[must_use]
    pub fn library(mut self, library: impl Into<String>) -> Self {
        self.library = Some(library.into());
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the underlying HTTP clients
    /// cannot be constructed.
    pub fn build(self) -> Result<CarrelClient, Error> {
        // Redirects are never followed automatically: download resolution
        // needs the 302 target to be observable.
        let meta = Client::builder()
            .timeout(self.metadata_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;
        let transfer = Client::builder()
            .timeout(self.transfer_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        Ok(CarrelClient {
            meta,
            transfer,
            base_url: self.base_url,
            api_key: self.api_key,
            library: self.library,
        })
    }
}

impl CarrelClient {
    /// Create a new client with default configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        CarrelClientBuilder::new(base_url)
            .build()
            .expect("default client configuration should not fail")
    }

    /// Create a builder for advanced configuration.
    pub fn builder(base_url: impl Into<String>) -> CarrelClientBuilder {
        CarrelClientBuilder::new(base_url)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The item-scoped URL for a route suffix, carrying the library scope.
    pub(crate) fn item_url(&self, item_key: &str, suffix: &str) -> String {
        let mut url = format!("{}/items/{item_key}{suffix}", self.base_url);
        if let Some(library) = &self.library {
            url.push_str(if suffix.contains('?') || url.contains('?') {
                "&library="
            } else {
                "?library="
            });
            url.push_str(library);
        }
        url
    }

    /// Add the authorization header if an API key is set.
    pub(crate) fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }

    /// Check if the server is healthy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the server is unreachable.
    pub async fn health(&self) -> Result<bool, Error> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .add_auth(self.meta.get(&url))
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(response.status().is_success())
    }
}
