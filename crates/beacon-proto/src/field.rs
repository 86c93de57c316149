//! Mutable fields addressable through the update endpoint.

use std::fmt;
use std::str::FromStr;

/// A field of the redirect server's state that the update endpoint can mutate.
///
/// The field name is the final path segment of the update URL
/// (`/api/update/{field}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateField {
    /// The redirect target URL. An empty value is an explicit unset.
    Target,
    /// The shared secret. Rotation authenticates with the *old* secret.
    Secret,
}

impl UpdateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateField::Target => "target",
            UpdateField::Secret => "secret",
        }
    }
}

impl fmt::Display for UpdateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognized field name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown update field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for UpdateField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "target" => Ok(UpdateField::Target),
            "secret" => Ok(UpdateField::Secret),
            other => Err(UnknownField(other.to_string())),
        }
    }
}
