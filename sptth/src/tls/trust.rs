//! Installing the root certificate into the operating system trust store.
//!
//! The concrete installer is picked once at startup by [`platform_installer`];
//! the rest of the crate only sees the [`TrustInstaller`] capability.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("trust-store installation is not supported on {0}")]
    Unsupported(&'static str),

    #[error("no trust-store tool found (tried {0})")]
    ToolNotFound(&'static str),

    #[error("Failed to copy CA certificate to {0}: {1}")]
    Copy(PathBuf, std::io::Error),

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: &'static str,
        source: std::io::Error,
    },

    #[error("{command} failed ({status}): {stderr}")]
    CommandFailed {
        command: &'static str,
        status: String,
        stderr: String,
    },
}

/// Capability to make a root certificate trusted system-wide
pub trait TrustInstaller: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &'static str;

    fn install(&self, cert_path: &Path) -> Result<(), TrustError>;
}

/// Select the installer for the running platform
pub fn platform_installer() -> Box<dyn TrustInstaller> {
    if cfg!(target_os = "macos") {
        Box::new(MacosSystemKeychain)
    } else if cfg!(target_os = "windows") {
        Box::new(WindowsCertutil)
    } else if cfg!(target_os = "linux") {
        linux_installer()
    } else {
        Box::new(Unsupported(std::env::consts::OS))
    }
}

fn linux_installer() -> Box<dyn TrustInstaller> {
    if find_in_path("update-ca-certificates").is_some() {
        Box::new(LinuxAnchor {
            target: "/usr/local/share/ca-certificates/sptth-rootCA.crt",
            command: "update-ca-certificates",
            args: &[],
        })
    } else if find_in_path("update-ca-trust").is_some() {
        Box::new(LinuxAnchor {
            target: "/etc/pki/ca-trust/source/anchors/sptth-rootCA.crt",
            command: "update-ca-trust",
            args: &["extract"],
        })
    } else {
        Box::new(MissingTool("update-ca-certificates, update-ca-trust"))
    }
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn run(command: &'static str, args: &[&OsStr]) -> Result<(), TrustError> {
    let output = Command::new(command)
        .args(args)
        .output()
        .map_err(|source| TrustError::Spawn { command, source })?;

    if !output.status.success() {
        return Err(TrustError::CommandFailed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

struct MacosSystemKeychain;

impl TrustInstaller for MacosSystemKeychain {
    fn name(&self) -> &'static str {
        "macos:system-keychain"
    }

    fn install(&self, cert_path: &Path) -> Result<(), TrustError> {
        run(
            "security",
            &[
                OsStr::new("add-trusted-cert"),
                OsStr::new("-d"),
                OsStr::new("-r"),
                OsStr::new("trustRoot"),
                OsStr::new("-k"),
                OsStr::new("/Library/Keychains/System.keychain"),
                cert_path.as_os_str(),
            ],
        )
    }
}

struct WindowsCertutil;

impl TrustInstaller for WindowsCertutil {
    fn name(&self) -> &'static str {
        "windows:certutil"
    }

    fn install(&self, cert_path: &Path) -> Result<(), TrustError> {
        run(
            "certutil",
            &[
                OsStr::new("-addstore"),
                OsStr::new("-f"),
                OsStr::new("Root"),
                cert_path.as_os_str(),
            ],
        )
    }
}

/// Copy into the distribution's anchor directory, then refresh the bundle
struct LinuxAnchor {
    target: &'static str,
    command: &'static str,
    args: &'static [&'static str],
}

impl TrustInstaller for LinuxAnchor {
    fn name(&self) -> &'static str {
        self.command
    }

    fn install(&self, cert_path: &Path) -> Result<(), TrustError> {
        let target = PathBuf::from(self.target);
        std::fs::copy(cert_path, &target).map_err(|e| TrustError::Copy(target.clone(), e))?;

        let args: Vec<&OsStr> = self.args.iter().map(|a| OsStr::new(*a)).collect();
        run(self.command, &args)
    }
}

struct MissingTool(&'static str);

impl TrustInstaller for MissingTool {
    fn name(&self) -> &'static str {
        "linux:none"
    }

    fn install(&self, _cert_path: &Path) -> Result<(), TrustError> {
        Err(TrustError::ToolNotFound(self.0))
    }
}

struct Unsupported(&'static str);

impl TrustInstaller for Unsupported {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn install(&self, _cert_path: &Path) -> Result<(), TrustError> {
        Err(TrustError::Unsupported(self.0))
    }
}
