//! Validated tenant identifiers.

use std::fmt;
use thiserror::Error;

/// Longest accepted tenant name, in UTF-8 bytes.
pub const MAX_TENANT_NAME_BYTES: usize = 64;

const WORKSPACE_PREFIX: &str = "tenant_";
const ESCAPE: char = '_';

/// Reasons a tenant name is rejected at intake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenantNameError {
    /// Name was empty after trimming.
    #[error("tenant_name is required")]
    Empty,
    /// Name exceeded [`MAX_TENANT_NAME_BYTES`].
    #[error("tenant_name must be at most {MAX_TENANT_NAME_BYTES} bytes")]
    TooLong,
    /// Name contained a control character.
    #[error("tenant_name must not contain control characters")]
    InvalidCharacter,
}

/// Unique, immutable tenant name.
///
/// Any printable name is accepted. Storage locations use [`TenantName::key`], an escaped form
/// that maps distinct names to distinct keys and is safe as a path segment or collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantName(String);

impl TenantName {
    /// Validate raw form input into a tenant name.
    pub fn parse(raw: &str) -> Result<Self, TenantNameError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TenantNameError::Empty);
        }
        if trimmed.len() > MAX_TENANT_NAME_BYTES {
            return Err(TenantNameError::TooLong);
        }
        if trimmed.chars().any(char::is_control) {
            return Err(TenantNameError::InvalidCharacter);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the name as stored in the registry.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Escaped form of the name: ASCII letters, digits and `-` pass through, every other byte
    /// becomes `_XX` (uppercase hex).
    pub fn key(&self) -> String {
        let mut key = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                key.push(char::from(byte));
            } else {
                key.push(ESCAPE);
                key.push_str(&hex::encode_upper([byte]));
            }
        }
        key
    }

    /// Deterministic name of the tenant's workspace container.
    pub fn workspace_name(&self) -> String {
        format!("{WORKSPACE_PREFIX}{}", self.key())
    }
}

impl fmt::Display for TenantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
