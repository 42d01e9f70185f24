//! SPDY protocol versions.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Version
// ============================================================================

/// Supported SPDY protocol versions.
///
/// The numeric value is the version carried in every control frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Version {
    /// SPDY/2, no flow control.
    V2,
    /// SPDY/3, per-stream flow control.
    V3,
}

impl Version {
    /// Returns the wire version number.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Returns the application protocol name used during negotiation.
    ///
    /// Format: `spdy/{version}`
    #[inline]
    #[must_use]
    pub const fn protocol(self) -> &'static str {
        match self {
            Self::V2 => "spdy/2",
            Self::V3 => "spdy/3",
        }
    }
}

impl TryFrom<u16> for Version {
    type Error = Error;

    fn try_from(version: u16) -> Result<Self> {
        match version {
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            other => Err(Error::unsupported_version(other)),
        }
    }
}

impl From<Version> for u16 {
    fn from(version: Version) -> Self {
        version.as_u16()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.protocol())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_from_known_versions() {
        assert_eq!(Version::try_from(2).unwrap(), Version::V2);
        assert_eq!(Version::try_from(3).unwrap(), Version::V3);
    }

    #[test]
    fn test_try_from_unknown_version() {
        let err = Version::try_from(4).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { version: 4 }));
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!(Version::V2.protocol(), "spdy/2");
        assert_eq!(Version::V3.to_string(), "spdy/3");
    }

    #[test]
    fn test_serde_as_number() {
        let json = serde_json::to_string(&Version::V3).unwrap();
        assert_eq!(json, "3");
        assert!(serde_json::from_str::<Version>("5").is_err());
    }
}
