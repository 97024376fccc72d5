use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::EnvelopeError;

/// Which side of a pairing a connection plays. Fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The display-side peer being paired and controlled.
    Subordinate,
    /// The controlling peer that initiates the offer.
    Coordinator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Subordinate => "subordinate",
            Role::Coordinator => "coordinator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque session identifier assigned by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Pixel dimensions of the subordinate's display, frozen once captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
}

impl DisplayGeometry {
    /// Both dimensions must be non-zero.
    pub fn new(width: u32, height: u32) -> Result<Self, EnvelopeError> {
        if width == 0 || height == 0 {
            return Err(EnvelopeError::InvalidGeometry { width, height });
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for DisplayGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn session_id_looks_up_by_str() {
        let mut map = HashMap::new();
        map.insert(SessionId::from("abc123"), 1);
        assert_eq!(map.get("abc123"), Some(&1));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(DisplayGeometry::new(0, 720).is_err());
        assert!(DisplayGeometry::new(1280, 0).is_err());
        assert_eq!(DisplayGeometry::new(1280, 720).unwrap().to_string(), "1280x720");
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Coordinator).unwrap(), "\"coordinator\"");
    }
}
