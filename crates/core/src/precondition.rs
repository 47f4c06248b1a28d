use serde::{Deserialize, Serialize};

use crate::error::FileError;
use crate::fingerprint::is_md5_hex;

/// Conditional assertion about an item's current file state.
///
/// Every mutating file request must carry one of these; their absence is a
/// distinct failure ([`FileError::PreconditionRequired`]) rather than a plain
/// bad request. This is the optimistic-concurrency mechanism that keeps
/// concurrent editors from clobbering each other's uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// The item must have no file state yet (`If-None-Match: *`).
    MustNotExist,
    /// The item's current file hash must equal the given digest
    /// (`If-Match: <md5>`).
    MustMatch(String),
    /// No assertion. Only valid for non-mutating calls.
    None,
}

impl Precondition {
    /// Render the conditional header for this precondition, if any.
    ///
    /// Returns `(header_name, value)`.
    #[must_use]
    pub fn to_header(&self) -> Option<(&'static str, String)> {
        match self {
            Self::MustNotExist => Some(("If-None-Match", "*".to_owned())),
            Self::MustMatch(md5) => Some(("If-Match", md5.clone())),
            Self::None => None,
        }
    }

    /// Interpret conditional header values from a request.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::BadRequest`] when both headers are present, when
    /// `If-None-Match` is anything but `*`, or when `If-Match` is not a hex
    /// digest.
    pub fn from_headers(
        if_match: Option<&str>,
        if_none_match: Option<&str>,
    ) -> Result<Self, FileError> {
        match (if_match, if_none_match) {
            (Some(_), Some(_)) => Err(FileError::BadRequest(
                "If-Match and If-None-Match cannot both be provided".into(),
            )),
            (None, Some("*")) => Ok(Self::MustNotExist),
            (None, Some(other)) => Err(FileError::BadRequest(format!(
                "invalid If-None-Match value '{other}'"
            ))),
            (Some(md5), None) if is_md5_hex(md5) => Ok(Self::MustMatch(md5.to_owned())),
            (Some(other), None) => Err(FileError::BadRequest(format!(
                "invalid If-Match value '{other}'"
            ))),
            (None, None) => Ok(Self::None),
        }
    }

    /// Evaluate this precondition against an item's current file digest.
    ///
    /// # Errors
    ///
    /// [`FileError::PreconditionRequired`] when no assertion was supplied,
    /// [`FileError::PreconditionFailed`] when the assertion does not hold.
    pub fn check(&self, current_md5: Option<&str>) -> Result<(), FileError> {
        match (self, current_md5) {
            (Self::None, _) => Err(FileError::PreconditionRequired),
            (Self::MustNotExist, None) => Ok(()),
            (Self::MustNotExist, Some(_)) => Err(FileError::PreconditionFailed),
            (Self::MustMatch(expected), Some(actual)) if expected.eq_ignore_ascii_case(actual) => {
                Ok(())
            }
            (Self::MustMatch(_), _) => Err(FileError::PreconditionFailed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5: &str = "900150983cd24fb0d6963f7d28e17f72";

    #[test]
    fn header_rendering() {
        assert_eq!(
            Precondition::MustNotExist.to_header(),
            Some(("If-None-Match", "*".to_owned()))
        );
        assert_eq!(
            Precondition::MustMatch(MD5.into()).to_header(),
            Some(("If-Match", MD5.to_owned()))
        );
        assert_eq!(Precondition::None.to_header(), None);
    }

    #[test]
    fn parse_valid_headers() {
        assert_eq!(
            Precondition::from_headers(None, Some("*")).unwrap(),
            Precondition::MustNotExist
        );
        assert_eq!(
            Precondition::from_headers(Some(MD5), None).unwrap(),
            Precondition::MustMatch(MD5.into())
        );
        assert_eq!(
            Precondition::from_headers(None, None).unwrap(),
            Precondition::None
        );
    }

    #[test]
    fn parse_rejects_invalid_values() {
        assert!(Precondition::from_headers(None, Some("abc")).is_err());
        assert!(Precondition::from_headers(Some("short"), None).is_err());
        assert!(Precondition::from_headers(Some(MD5), Some("*")).is_err());
    }

    #[test]
    fn check_must_not_exist() {
        assert!(Precondition::MustNotExist.check(None).is_ok());
        assert_eq!(
            Precondition::MustNotExist.check(Some(MD5)),
            Err(FileError::PreconditionFailed)
        );
    }

    #[test]
    fn check_must_match() {
        let pre = Precondition::MustMatch(MD5.into());
        assert!(pre.check(Some(MD5)).is_ok());
        assert!(pre.check(Some(&MD5.to_uppercase())).is_ok());
        assert_eq!(pre.check(None), Err(FileError::PreconditionFailed));
        assert_eq!(
            pre.check(Some("00000000000000000000000000000000")),
            Err(FileError::PreconditionFailed)
        );
    }

    #[test]
    fn check_none_requires_precondition() {
        assert_eq!(
            Precondition::None.check(None),
            Err(FileError::PreconditionRequired)
        );
        assert_eq!(
            Precondition::None.check(Some(MD5)),
            Err(FileError::PreconditionRequired)
        );
    }
}
