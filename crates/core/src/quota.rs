use serde::{Deserialize, Serialize};

use crate::types::OwnerId;

/// Default per-owner storage ceiling: 300 MiB.
pub const DEFAULT_QUOTA_BYTES: u64 = 300 * 1024 * 1024;

/// A storage quota ceiling for a library owner.
///
/// For group libraries the policy is attributed to the group's owner, not
/// to whichever member is uploading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    /// The identity the ceiling applies to.
    pub owner: OwnerId,
    /// Maximum aggregate stored bytes.
    pub ceiling_bytes: u64,
}

impl QuotaPolicy {
    /// Policy with the default ceiling.
    #[must_use]
    pub fn with_default_ceiling(owner: OwnerId) -> Self {
        Self {
            owner,
            ceiling_bytes: DEFAULT_QUOTA_BYTES,
        }
    }

    /// Whether a projected total would exceed this ceiling.
    #[must_use]
    pub fn exceeded_by(&self, projected_bytes: u64) -> bool {
        projected_bytes > self.ceiling_bytes
    }
}

/// A snapshot of an owner's storage usage against their ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// The responsible owner.
    pub owner: OwnerId,
    /// Bytes currently attributed to the owner (committed plus reserved).
    pub used_bytes: u64,
    /// The ceiling in force.
    pub ceiling_bytes: u64,
}

impl QuotaUsage {
    /// Remaining headroom before the ceiling, saturating at zero.
    #[must_use]
    pub fn remaining_bytes(&self) -> u64 {
        self.ceiling_bytes.saturating_sub(self.used_bytes)
    }
}
