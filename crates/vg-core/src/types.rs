//! Core domain types

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Address of a per-user display server the gateway connects to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendEndpoint {
    /// Unix domain socket (Xvnc `-RfbUnixPath`)
    Unix(PathBuf),
    /// TCP address, typically on loopback
    Tcp(SocketAddr),
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendEndpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            BackendEndpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

impl From<SocketAddr> for BackendEndpoint {
    fn from(addr: SocketAddr) -> Self {
        BackendEndpoint::Tcp(addr)
    }
}

impl From<PathBuf> for BackendEndpoint {
    fn from(path: PathBuf) -> Self {
        BackendEndpoint::Unix(path)
    }
}

/// Longest user name accepted for a display session
pub const MAX_USERNAME_LEN: usize = 32;

/// A user name that is safe to place on a shell command line
///
/// Only the POSIX portable filename character set is accepted
/// (`A-Z a-z 0-9 . _ -`), with no leading hyphen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Username(String);

impl Username {
    /// Validate a user name
    pub fn parse(name: &str) -> Option<Self> {
        let valid = !name.is_empty()
            && name.len() <= MAX_USERNAME_LEN
            && name != "."
            && name != ".."
            && !name.starts_with('-')
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        valid.then(|| Username(name.to_string()))
    }

    /// The name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_validation() {
        for ok in ["bob", "alice.smith", "svc_vnc", "user-01", "A1"] {
            assert_eq!(Username::parse(ok).unwrap().as_str(), ok);
        }
        for bad in [
            "",
            ".",
            "..",
            "-rf",
            "bob smith",
            "bob;reboot",
            "$(id)",
            "bob'",
            "b\u{e9}b",
            "averyveryveryverylongusernamethatexceedsthelimit",
        ] {
            assert!(Username::parse(bad).is_none(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_endpoint_display() {
        let unix = BackendEndpoint::from(PathBuf::from("/tmp/rfb-bob.sock"));
        assert_eq!(unix.to_string(), "unix:/tmp/rfb-bob.sock");

        let tcp = BackendEndpoint::from("127.0.0.1:5901".parse::<SocketAddr>().unwrap());
        assert_eq!(tcp.to_string(), "tcp:127.0.0.1:5901");
    }
}
