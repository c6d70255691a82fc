use std::fmt;

use thiserror::Error;

/// Default upper bound on client-supplied key length.
pub const DEFAULT_MAX_KEY_LENGTH: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidIdempotencyKey {
    #[error("idempotency key must not be empty")]
    Empty,

    #[error("idempotency key must be at most {max} characters, got {actual}")]
    TooLong { max: usize, actual: usize },
}

/// A validated, client-supplied idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn parse(raw: &str, max_length: usize) -> Result<Self, InvalidIdempotencyKey> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidIdempotencyKey::Empty);
        }

        let length = trimmed.chars().count();
        if length > max_length {
            return Err(InvalidIdempotencyKey::TooLong {
                max: max_length,
                actual: length,
            });
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for IdempotencyKey {
    type Error = InvalidIdempotencyKey;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::parse(raw, DEFAULT_MAX_KEY_LENGTH)
    }
}
