//! Subscriber Identifier — the 64-hex-char node identity used throughout
//! the overlay.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel string meaning "resolve this server at dispatch time".
pub const ANY: &str = "any";

/// A node identity: 64 hexadecimal characters, case-insensitive, stored
/// lower-case canonical. The sentinel [`ANY`] is a distinct value meaning
/// "to be resolved".
///
/// # Examples
///
/// ```
/// use dtrpc_core::Sid;
///
/// let sid = Sid::parse("AABB").unwrap_err(); // too short, not "any"
/// assert!(Sid::any().is_any());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sid(String);

/// Error returned when a string is not a valid SID.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SidParseError {
    /// The string was neither `any` nor 64 hex characters.
    #[error("'{0}' is not a valid SID: expected 64 hex characters or 'any'")]
    Invalid(String),
}

impl Sid {
    /// The `any` sentinel SID.
    pub fn any() -> Self {
        Sid(ANY.to_string())
    }

    /// Parse a SID from user/wire input, validating shape.
    ///
    /// Accepts the literal `any` or exactly 64 hex digits; hex input is
    /// lower-cased to its canonical form.
    pub fn parse(raw: &str) -> Result<Self, SidParseError> {
        if raw.eq_ignore_ascii_case(ANY) {
            return Ok(Sid(ANY.to_string()));
        }
        if raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(Sid(raw.to_ascii_lowercase()));
        }
        Err(SidParseError::Invalid(raw.to_string()))
    }

    /// Construct a SID without validation. Intended for test fixtures and
    /// callers that have already validated the string (e.g. a prior
    /// `parse`).
    pub fn new_unchecked(raw: impl Into<String>) -> Self {
        Sid(raw.into())
    }

    /// `true` if this is the `any` sentinel.
    pub fn is_any(&self) -> bool {
        self.0 == ANY
    }

    /// The canonical lower-case string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Sid {
    type Err = SidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sid::parse(s)
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Sid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
