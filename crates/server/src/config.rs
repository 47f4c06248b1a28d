use std::collections::HashMap;

use serde::Deserialize;

use carrel_core::{DEFAULT_QUOTA_BYTES, LibraryId, OwnerId, QuotaPolicy};

/// Top-level configuration for the Carrel server, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CarrelConfig {
    /// HTTP server bind configuration.
    pub server: BindConfig,
    /// Storage quota configuration.
    pub quota: QuotaConfig,
    /// Upload ticket configuration.
    pub tickets: TicketConfig,
    /// Download redirect configuration.
    pub downloads: DownloadConfig,
    /// Library-to-owner attribution.
    ///
    /// Group libraries charge their owner's quota, not the uploading
    /// member's. A library absent from this map is owned by an identity of
    /// the same name.
    pub library_owners: HashMap<String, String>,
}

impl Default for CarrelConfig {
    fn default() -> Self {
        Self {
            server: BindConfig::default(),
            quota: QuotaConfig::default(),
            tickets: TicketConfig::default(),
            downloads: DownloadConfig::default(),
            library_owners: HashMap::new(),
        }
    }
}

impl CarrelConfig {
    /// The owner whose quota a library's uploads are attributed to.
    #[must_use]
    pub fn owner_of(&self, library: &LibraryId) -> OwnerId {
        self.library_owners
            .get(library.as_str())
            .map_or_else(|| OwnerId::new(library.as_str()), OwnerId::new)
    }

    /// The quota policy in force for an owner.
    #[must_use]
    pub fn quota_for(&self, owner: &OwnerId) -> QuotaPolicy {
        let ceiling_bytes = self
            .quota
            .owner_ceilings
            .get(owner.as_str())
            .copied()
            .unwrap_or(self.quota.default_ceiling_bytes);
        QuotaPolicy {
            owner: owner.clone(),
            ceiling_bytes,
        }
    }
}

/// HTTP bind settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Externally visible base URL, used in ticket URLs and redirects.
    /// Defaults to `http://{host}:{port}`.
    pub public_url: Option<String>,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8318,
            public_url: None,
        }
    }
}

impl BindConfig {
    /// The base URL clients are told to address.
    #[must_use]
    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}

/// Storage quota settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Default per-owner ceiling in bytes.
    pub default_ceiling_bytes: u64,
    /// Per-owner ceiling overrides in bytes.
    pub owner_ceilings: HashMap<String, u64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_ceiling_bytes: DEFAULT_QUOTA_BYTES,
            owner_ceilings: HashMap::new(),
        }
    }
}

/// Upload ticket settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Seconds an unconsumed ticket stays valid.
    pub ttl_seconds: u64,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self { ttl_seconds: 3600 }
    }
}

/// Download redirect settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Seconds a redirect target stays fetchable.
    pub redirect_ttl_seconds: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            redirect_ttl_seconds: 60,
        }
    }
}
