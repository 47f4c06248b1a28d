use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How the transfer body for a ticket must be assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TicketBody {
    /// Single-part mode: the content is sandwiched between two literal byte
    /// strings prescribed by the server.
    Sandwich {
        /// Bytes to place before the content.
        #[serde(with = "base64_bytes")]
        prefix: Vec<u8>,
        /// Bytes to place after the content.
        #[serde(with = "base64_bytes")]
        suffix: Vec<u8>,
    },
    /// Parameterized mode: the caller builds a multipart form from these
    /// fields, followed by a `file` field with the content.
    Form {
        /// Required form fields, in iteration order.
        params: BTreeMap<String, String>,
    },
}

/// Short-lived, single-use authorization to write one blob to the store.
///
/// Issued on a successful authorization round-trip, consumed exactly once on
/// registration, otherwise expired or invalidated by any change to the
/// owning item's stored hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTicket {
    /// Opaque single-use key, bound to one descriptor.
    #[serde(rename = "uploadKey")]
    pub upload_key: String,
    /// Object-store endpoint to send the content to.
    pub url: String,
    /// Body assembly instructions.
    #[serde(flatten)]
    pub body: TicketBody,
    /// Content type to send on the storage request.
    #[serde(rename = "contentType")]
    pub content_type: String,
}

/// Result of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    /// The item's new version. Strictly greater than the version before the
    /// upload, so callers can detect no-op vs. real updates.
    pub version: u64,
}

/// Serde helper: byte strings as standard base64, so ticket prefixes survive
/// JSON transport unmangled.
mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(D::Error::custom)
    }
}
