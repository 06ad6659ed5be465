//! Host identity: CPU architecture and distribution release.
//!
//! The supported matrix is the [`SUPPORTED_PLATFORMS`] table; adding a release
//! means adding a row, nothing else.

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::BootstrapError;
use crate::process::{Cmd, Host};

/// (distribution id, codename) pairs the bootstrap is known to work on.
pub const SUPPORTED_PLATFORMS: &[(&str, &str)] = &[
    ("debian", "bullseye"),
    ("debian", "bookworm"),
    ("ubuntu", "focal"),
    ("ubuntu", "jammy"),
];

pub const OS_RELEASE_PATH: &str = "/etc/os-release";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Arm64,
}

impl Architecture {
    /// Map a `uname -m` string. Anything unrecognized is treated as x86_64.
    pub fn from_machine(machine: &str) -> Self {
        match machine.trim() {
            "aarch64" | "arm64" | "armv8l" => Architecture::Arm64,
            _ => Architecture::X86_64,
        }
    }

    /// Architecture name as used in Debian package repositories.
    pub fn dpkg_name(self) -> &'static str {
        match self {
            Architecture::X86_64 => "amd64",
            Architecture::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86_64 => f.write_str("x86_64"),
            Architecture::Arm64 => f.write_str("arm64"),
        }
    }
}

/// Identity of the host, computed once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    pub architecture: Architecture,
    pub distribution_id: String,
    pub distribution_codename: String,
    pub is_supported: bool,
}

impl HostEnvironment {
    pub fn new(architecture: Architecture, distribution_id: &str, codename: &str) -> Self {
        let distribution_id = distribution_id.trim().to_ascii_lowercase();
        let distribution_codename = codename.trim().to_ascii_lowercase();
        let is_supported = is_supported(&distribution_id, &distribution_codename);
        Self {
            architecture,
            distribution_id,
            distribution_codename,
            is_supported,
        }
    }

    /// Build from a machine string and the text of an os-release file.
    pub fn from_parts(machine: &str, os_release: &str) -> Self {
        let id = os_release_value(os_release, "ID").unwrap_or_default();
        let codename = os_release_value(os_release, "VERSION_CODENAME")
            .or_else(|| os_release_value(os_release, "UBUNTU_CODENAME"))
            .unwrap_or_default();
        Self::new(Architecture::from_machine(machine), &id, &codename)
    }
}

impl fmt::Display for HostEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.distribution_id, self.distribution_codename, self.architecture
        )
    }
}

pub fn is_supported(distribution_id: &str, codename: &str) -> bool {
    SUPPORTED_PLATFORMS
        .iter()
        .any(|(id, name)| *id == distribution_id && *name == codename)
}

/// Detect the host from `uname -m` and `/etc/os-release`.
pub fn detect(host: &dyn Host) -> Result<HostEnvironment> {
    detect_from(host, Path::new(OS_RELEASE_PATH))
}

pub fn detect_from(host: &dyn Host, os_release_path: &Path) -> Result<HostEnvironment> {
    let os_release = fs::read_to_string(os_release_path)
        .with_context(|| format!("reading '{}'", os_release_path.display()))?;
    let machine = host.run(
        &Cmd::new("uname")
            .arg("-m")
            .error_msg("reading the machine architecture failed"),
    )?;
    Ok(HostEnvironment::from_parts(&machine.stdout, &os_release))
}

/// Abort unless the host is in the supported matrix.
pub fn require_supported(env: &HostEnvironment) -> Result<(), BootstrapError> {
    if env.is_supported {
        return Ok(());
    }

    let matrix = SUPPORTED_PLATFORMS
        .iter()
        .map(|(id, codename)| format!("  * {} {}", id, codename))
        .collect::<Vec<_>>()
        .join("\n");
    Err(BootstrapError::usage(
        format!(
            "unsupported platform '{} {}'",
            display_or_unknown(&env.distribution_id),
            display_or_unknown(&env.distribution_codename)
        ),
        format!(
            "Supported distributions:\n{}\nReinstall the host with one of them and re-run.",
            matrix
        ),
    ))
}

fn display_or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "unknown"
    } else {
        value
    }
}

/// Value of `key` in os-release syntax, with surrounding quotes removed.
fn os_release_value(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (k, v) = line.trim().split_once('=')?;
        if k != key {
            return None;
        }
        let v = v.trim().trim_matches('"').trim_matches('\'');
        Some(v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::FakeHost;
    use crate::process::CmdOutput;
    use tempfile::TempDir;

    const BOOKWORM: &str = r#"PRETTY_NAME="Debian GNU/Linux 12 (bookworm)"
NAME="Debian GNU/Linux"
VERSION_ID="12"
VERSION_CODENAME=bookworm
ID=debian
"#;

    const JAMMY: &str = r#"NAME="Ubuntu"
VERSION="22.04.4 LTS (Jammy Jellyfish)"
ID=ubuntu
ID_LIKE=debian
UBUNTU_CODENAME=jammy
"#;

    #[test]
    fn test_allow_list_pairs_are_supported() {
        for (id, codename) in SUPPORTED_PLATFORMS {
            let env = HostEnvironment::new(Architecture::X86_64, id, codename);
            assert!(env.is_supported, "{} {} should be supported", id, codename);
        }
    }

    #[test]
    fn test_pairs_outside_allow_list_are_not_supported() {
        for (id, codename) in [
            ("debian", "buster"),
            ("ubuntu", "bookworm"),
            ("fedora", "jammy"),
            ("arch", ""),
            ("", ""),
        ] {
            let env = HostEnvironment::new(Architecture::X86_64, id, codename);
            assert!(!env.is_supported, "{} {} should not be supported", id, codename);
        }
    }

    #[test]
    fn test_from_parts_reads_os_release() {
        let env = HostEnvironment::from_parts("x86_64", BOOKWORM);
        assert_eq!(env.distribution_id, "debian");
        assert_eq!(env.distribution_codename, "bookworm");
        assert!(env.is_supported);
    }

    #[test]
    fn test_ubuntu_codename_fallback() {
        let env = HostEnvironment::from_parts("aarch64", JAMMY);
        assert_eq!(env.distribution_codename, "jammy");
        assert_eq!(env.architecture, Architecture::Arm64);
        assert!(env.is_supported);
    }

    #[test]
    fn test_unrecognized_machine_is_x86_64() {
        assert_eq!(Architecture::from_machine(""), Architecture::X86_64);
        assert_eq!(Architecture::from_machine("riscv64"), Architecture::X86_64);
        assert_eq!(Architecture::from_machine("x86_64"), Architecture::X86_64);
        assert_eq!(Architecture::from_machine("arm64"), Architecture::Arm64);
    }

    #[test]
    fn test_require_supported_lists_matrix() {
        let env = HostEnvironment::new(Architecture::X86_64, "centos", "");
        let err = require_supported(&env).unwrap_err();
        assert!(err.is_usage());
        assert!(err.to_string().contains("centos unknown"));
        let remediation = err.remediation();
        for (id, codename) in SUPPORTED_PLATFORMS {
            assert!(remediation.contains(&format!("{} {}", id, codename)));
        }
    }

    #[test]
    fn test_detect_from_missing_file() {
        let host = FakeHost::permissive(&[]);
        assert!(detect_from(&host, Path::new("/nonexistent/os-release")).is_err());
    }

    #[test]
    fn test_detect_reads_uname_and_os_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("os-release");
        fs::write(&path, JAMMY).unwrap();
        let host = FakeHost::new(&[], |line| match line {
            "uname -m" => CmdOutput::ok("aarch64\n"),
            _ => CmdOutput::failed(1, ""),
        });

        let env = detect_from(&host, &path).unwrap();
        assert_eq!(env.architecture, Architecture::Arm64);
        assert_eq!(env.distribution_id, "ubuntu");
        assert_eq!(env.distribution_codename, "jammy");
        assert!(env.is_supported);
        assert_eq!(*host.history.borrow(), vec!["uname -m".to_string()]);
    }

    #[test]
    fn test_detect_fails_when_uname_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("os-release");
        fs::write(&path, BOOKWORM).unwrap();
        let host = FakeHost::new(&[], |_| CmdOutput::failed(1, "uname: not found"));

        let err = detect_from(&host, &path).unwrap_err();
        assert!(err.to_string().contains("machine architecture"));
    }
}
