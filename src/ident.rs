//! Identifier codec.
//!
//! External identifiers are short case-insensitive alphanumeric strings.
//! Reading them as base-36 numerals gives a dense integer key that the
//! destination stores as its correlation key.

use std::fmt;
use thiserror::Error;

/// Integer correlation key derived from an external identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalKey(u64);

impl InternalKey {
    pub fn new(value: u64) -> Self {
        InternalKey(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed identifier `{0}`")]
pub struct MalformedIdentifier(pub String);

/// Interpret `external` as a base-36 integer.
///
/// Upper and lower case letters decode to the same digit. Empty strings,
/// characters outside `[0-9a-zA-Z]` and values that overflow a `u64` are
/// rejected.
pub fn encode(external: &str) -> Result<InternalKey, MalformedIdentifier> {
    if external.is_empty() {
        return Err(MalformedIdentifier(external.to_string()));
    }

    let mut value: u64 = 0;
    for ch in external.chars() {
        let digit = ch
            .to_digit(36)
            .ok_or_else(|| MalformedIdentifier(external.to_string()))?;
        value = value
            .checked_mul(36)
            .and_then(|v| v.checked_add(u64::from(digit)))
            .ok_or_else(|| MalformedIdentifier(external.to_string()))?;
    }

    Ok(InternalKey(value))
}
