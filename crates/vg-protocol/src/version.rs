//! RFB protocol versions
//!
//! Versions travel as fixed 12-byte ASCII banners (`"RFB 003.008\n"`).
//! Only the three versions below are accepted, in either role.

use std::fmt;

use crate::error::ProtocolError;

/// Length of a version banner in bytes
pub const VERSION_LEN: usize = 12;

/// Banner the gateway announces to connecting viewers
pub const SERVER_BANNER: &[u8; VERSION_LEN] = b"RFB 003.008\n";

/// An accepted RFB protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// RFB 3.3: server dictates a single security type, no failure reasons
    V3_3,
    /// RFB 3.7: security type list, no security-result reason
    V3_7,
    /// RFB 3.8: security type list and failure reasons
    V3_8,
}

impl ProtocolVersion {
    /// Parse a 12-byte version banner
    pub fn parse(banner: &[u8]) -> Result<Self, ProtocolError> {
        match banner {
            b"RFB 003.003\n" => Ok(ProtocolVersion::V3_3),
            b"RFB 003.007\n" => Ok(ProtocolVersion::V3_7),
            b"RFB 003.008\n" => Ok(ProtocolVersion::V3_8),
            other => Err(ProtocolError::UnsupportedVersion(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    /// The banner bytes for this version
    pub fn as_bytes(&self) -> &'static [u8; VERSION_LEN] {
        match self {
            ProtocolVersion::V3_3 => b"RFB 003.003\n",
            ProtocolVersion::V3_7 => b"RFB 003.007\n",
            ProtocolVersion::V3_8 => b"RFB 003.008\n",
        }
    }

    /// Whether the security type is negotiated from a list (3.7+)
    /// rather than dictated by the server (3.3)
    pub fn negotiates_security_list(&self) -> bool {
        !matches!(self, ProtocolVersion::V3_3)
    }

    /// Whether failed security results carry a reason string (3.8 only)
    pub fn sends_failure_reason(&self) -> bool {
        matches!(self, ProtocolVersion::V3_8)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V3_3 => write!(f, "3.3"),
            ProtocolVersion::V3_7 => write!(f, "3.7"),
            ProtocolVersion::V3_8 => write!(f, "3.8"),
        }
    }
}
