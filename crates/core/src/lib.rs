pub mod descriptor;
pub mod error;
pub mod fingerprint;
pub mod item;
pub mod key;
pub mod patch;
pub mod precondition;
pub mod quota;
pub mod ticket;
pub mod types;

pub use descriptor::{FileDescriptor, ZipDescriptor};
pub use error::FileError;
pub use fingerprint::{Md5Hasher, md5_bytes, md5_file};
pub use item::{AttachmentItem, AttachmentKind};
pub use key::{BlobKey, KeyLayout};
pub use patch::{PatchAlgorithm, PatchError, apply_patch, encode_patch};
pub use precondition::Precondition;
pub use quota::{DEFAULT_QUOTA_BYTES, QuotaPolicy, QuotaUsage};
pub use ticket::{RegistrationReceipt, TicketBody, UploadTicket};
pub use types::{ItemKey, LibraryId, OwnerId};
