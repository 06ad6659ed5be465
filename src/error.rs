//! Error taxonomy for the bootstrap run.
//!
//! Every variant is fatal. Probe failures and lock contention are not errors
//! and never reach this type.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Fatal conditions surfaced by a bootstrap step.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Bad invocation, unsupported platform, or an already-installed target.
    #[error("{message}")]
    Usage {
        message: String,
        remediation: String,
    },

    /// A package, runtime, or signing-key installation step failed.
    #[error("provisioning failed during {step}: {detail}")]
    Provisioning { step: &'static str, detail: String },

    /// The package database stayed locked past the configured limit.
    #[error("package database still locked after {}s", waited.as_secs())]
    LockTimeout { waited: Duration },

    /// A generated file could not be written.
    #[error("writing {}: {source}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process supervisor or firewall rejected a command.
    #[error("service activation failed: {detail}")]
    Activation { detail: String },
}

impl BootstrapError {
    pub fn usage(message: impl Into<String>, remediation: impl Into<String>) -> Self {
        BootstrapError::Usage {
            message: message.into(),
            remediation: remediation.into(),
        }
    }

    /// Next-step text shown to the operator alongside the error.
    pub fn remediation(&self) -> String {
        match self {
            BootstrapError::Usage { remediation, .. } => remediation.clone(),
            BootstrapError::Provisioning { .. } => "Check network access to the package mirrors and \
                 download.docker.com, then run `apt-get update` by hand to see the full error. \
                 Re-run feedgen-bootstrap once the host can install packages."
                .to_string(),
            BootstrapError::LockTimeout { .. } => "Another package manager is still running. \
                 Inspect it with `fuser -v /var/lib/dpkg/lock-frontend` and wait for it to finish, \
                 or raise lock_timeout_secs in the bootstrap config."
                .to_string(),
            BootstrapError::Artifact { path, .. } => format!(
                "Make sure {} is writable by root and the disk is not full, then re-run.",
                path.parent().unwrap_or(path).display()
            ),
            BootstrapError::Activation { .. } => "Inspect the unit with `systemctl status feedgen` \
                 and `journalctl -u feedgen`, then start it with `systemctl restart feedgen`."
                .to_string(),
        }
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, BootstrapError::Usage { .. })
    }
}

pub type BootstrapResult<T> = std::result::Result<T, BootstrapError>;
