//! systemd registration and firewall ports.
//!
//! `systemctl enable` on an enabled unit and `ufw allow` on an open port are
//! both no-ops, so activation can be repeated freely.

use crate::error::BootstrapError;
use crate::process::{Cmd, Host};

/// Inbound TCP ports Caddy needs: HTTP for ACME challenges, HTTPS for traffic.
pub const REQUIRED_PORTS: &[u16] = &[80, 443];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallOutcome {
    /// `ufw` is not installed.
    NotInstalled,
    /// `ufw` is installed but not enforcing.
    Inactive,
    /// Active firewall; lists the ports this run opened.
    Configured { opened: Vec<u16> },
}

fn activation(e: anyhow::Error) -> BootstrapError {
    BootstrapError::Activation {
        detail: format!("{:#}", e),
    }
}

/// Reload unit definitions, enable the unit at boot and (re)start it.
pub fn enable_and_restart(host: &dyn Host, unit: &str) -> Result<(), BootstrapError> {
    let steps = [
        Cmd::new("systemctl")
            .arg("daemon-reload")
            .error_msg("systemctl daemon-reload failed"),
        Cmd::new("systemctl")
            .args(["enable", unit])
            .error_msg(format!("enabling {} failed", unit)),
        Cmd::new("systemctl")
            .args(["restart", unit])
            .error_msg(format!("starting {} failed", unit)),
    ];
    for step in &steps {
        host.run(step).map_err(activation)?;
    }
    println!("* Service {} enabled and started", unit);
    Ok(())
}

/// Whether `ufw status` output lists `port/tcp` as allowed.
fn port_allowed(status: &str, port: u16) -> bool {
    let rule = format!("{}/tcp", port);
    status.lines().any(|line| {
        let mut cols = line.split_whitespace();
        cols.next() == Some(rule.as_str()) && cols.any(|c| c == "ALLOW")
    })
}

/// Open [`REQUIRED_PORTS`] when ufw is installed and active.
pub fn open_firewall_ports(host: &dyn Host) -> Result<FirewallOutcome, BootstrapError> {
    if !host.command_exists("ufw") {
        return Ok(FirewallOutcome::NotInstalled);
    }
    let status = host
        .run(&Cmd::new("ufw").arg("status").allow_fail())
        .map_err(activation)?;
    if status.stdout.lines().next().map(str::trim) != Some("Status: active") {
        tracing::info!("ufw installed but inactive; leaving firewall alone");
        return Ok(FirewallOutcome::Inactive);
    }

    let mut opened = Vec::new();
    for &port in REQUIRED_PORTS {
        if port_allowed(&status.stdout, port) {
            tracing::debug!(port, "port already open");
            continue;
        }
        host.run(
            &Cmd::new("ufw")
                .arg("allow")
                .arg(format!("{}/tcp", port))
                .error_msg(format!("opening port {} failed", port)),
        )
        .map_err(activation)?;
        println!("* Opened firewall port {}/tcp", port);
        opened.push(port);
    }
    Ok(FirewallOutcome::Configured { opened })
}

/// Register the unit with systemd, start it, then open firewall ports.
pub fn activate(host: &dyn Host, unit: &str) -> Result<FirewallOutcome, BootstrapError> {
    enable_and_restart(host, unit)?;
    open_firewall_ports(host)
}
