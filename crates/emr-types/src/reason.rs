//! Validated free-text inputs.

use std::fmt;

/// Minimum length of an amendment reason, in characters, after trimming.
pub const MIN_AMENDMENT_REASON_CHARS: usize = 10;

/// Errors that can occur when creating a validated amendment reason.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReasonError {
    /// The trimmed reason was shorter than the required minimum
    #[error(
        "amendment reason must be at least {MIN_AMENDMENT_REASON_CHARS} characters, got {0}"
    )]
    TooShort(usize),
}

/// A reason for amending a signed record.
///
/// Amending rewrites clinical content after signature, so the reason is
/// mandatory and must carry actual substance: at least
/// [`MIN_AMENDMENT_REASON_CHARS`] characters once trimmed. Constructing
/// this type is the validation; an `AmendmentReason` in hand is always
/// safe to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmendmentReason(String);

impl AmendmentReason {
    /// Creates a new `AmendmentReason` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace before the
    /// length check.
    ///
    /// # Arguments
    ///
    /// * `input` - Any type that can be converted to a string reference
    ///
    /// # Returns
    ///
    /// Returns `Ok(AmendmentReason)` if the trimmed input is long enough,
    /// or `Err(ReasonError::TooShort)` with the observed length otherwise.
    pub fn new(input: impl AsRef<str>) -> Result<Self, ReasonError> {
        let trimmed = input.as_ref().trim();
        let chars = trimmed.chars().count();
        if chars < MIN_AMENDMENT_REASON_CHARS {
            return Err(ReasonError::TooShort(chars));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AmendmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AmendmentReason {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for AmendmentReason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for AmendmentReason {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        AmendmentReason::new(&s).map_err(serde::de::Error::custom)
    }
}
