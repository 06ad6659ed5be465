//! Preflight checks run before anything touches the host.
//!
//! # Example
//!
//! ```rust,no_run
//! use feedgen_bootstrap::preflight::{check_required_tools, require_root};
//! use feedgen_bootstrap::process::SystemHost;
//!
//! require_root().expect("run me with sudo");
//! let tools = &[("curl", "curl"), ("gpg", "gnupg")];
//! if let Err(e) = check_required_tools(&SystemHost, tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::error::BootstrapError;
use crate::process::Host;

/// Whether the effective user is root.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Abort unless running with administrative privilege.
pub fn require_root() -> Result<(), BootstrapError> {
    check_root(is_root())
}

fn check_root(is_root: bool) -> Result<(), BootstrapError> {
    if is_root {
        return Ok(());
    }
    Err(BootstrapError::usage(
        "this installer must be run as root",
        "Re-run it with sudo, for example:\n  sudo feedgen-bootstrap",
    ))
}

/// Check that specific tools are available on the host.
///
/// Each tuple is (command, package providing it).
pub fn check_required_tools(host: &dyn Host, tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !host.command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}
