//! Startup checks
//!
//! The gateway starts sessions for other users through `su`, so it must
//! run as root, and it cannot serve anything without Xvnc and its TLS
//! material. These checks run before the listener binds.

use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

use vg_core::config::GatewayConfig;

/// Run every startup check against the configuration
pub fn check_environment(config: &GatewayConfig) -> Result<()> {
    ensure_root()?;
    ensure_executable(&config.backend.xvnc_path)?;
    ensure_readable(config.tls.cert_path.as_deref(), "TLS certificate")?;
    ensure_readable(config.tls.key_path.as_deref(), "TLS private key")?;
    Ok(())
}

/// Refuse to continue unless the effective user is root
pub fn ensure_root() -> Result<()> {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        let euid = unsafe { libc::geteuid() };
        if euid != 0 {
            bail!("vnc-gate must run as root (effective uid is {})", euid);
        }
    }
    Ok(())
}

/// Check that `path` is a regular file with an execute bit set
pub fn ensure_executable(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Display server binary {:?} not found", path))?;
    if !metadata.is_file() {
        bail!("Display server binary {:?} is not a file", path);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            bail!("Display server binary {:?} is not executable", path);
        }
    }
    Ok(())
}

/// Check that a configured path is set and can be opened for reading
pub fn ensure_readable(path: Option<&Path>, what: &str) -> Result<()> {
    let path = path.ok_or_else(|| anyhow!("{} path is not configured", what))?;
    File::open(path).with_context(|| format!("Cannot read {} at {:?}", what, path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_ensure_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("Xvnc");
        std::fs::write(&binary, "#!/bin/sh\n").unwrap();

        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = ensure_executable(&binary).unwrap_err();
        assert!(err.to_string().contains("not executable"));

        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        ensure_executable(&binary).unwrap();

        assert!(ensure_executable(dir.path()).is_err());
        assert!(ensure_executable(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_ensure_readable() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        std::fs::write(&cert, "pem").unwrap();

        ensure_readable(Some(cert.as_path()), "TLS certificate").unwrap();

        let err = ensure_readable(None, "TLS certificate").unwrap_err();
        assert_eq!(err.to_string(), "TLS certificate path is not configured");

        let missing = dir.path().join("key.pem");
        let err = ensure_readable(Some(missing.as_path()), "TLS private key").unwrap_err();
        assert!(err.to_string().contains("Cannot read TLS private key"));
    }
}
