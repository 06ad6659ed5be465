//! System package and container runtime installation.
//!
//! Both entry points are safe to re-run. The runtime step probes `docker
//! version` first and does nothing when a working runtime is already there.
//! Any failed install step aborts the whole run.

use crate::error::BootstrapError;
use crate::platform::HostEnvironment;
use crate::preflight::check_required_tools;
use crate::process::{Cmd, Host};

pub const SYSTEM_PACKAGES: &[&str] = &[
    "ca-certificates",
    "curl",
    "gnupg",
    "jq",
    "lsb-release",
    "openssl",
    "sqlite3",
    "xxd",
];

pub const RUNTIME_PACKAGES: &[&str] = &[
    "containerd.io",
    "docker-ce",
    "docker-ce-cli",
    "docker-compose-plugin",
];

/// Tools the runtime install shells out to, with the package providing each.
const KEY_TOOLS: &[(&str, &str)] = &[("curl", "curl"), ("gpg", "gnupg")];

pub const KEYRING_DIR: &str = "/etc/apt/keyrings";
pub const DOCKER_KEY_PATH: &str = "/etc/apt/keyrings/docker.gpg";
pub const DOCKER_SOURCES_PATH: &str = "/etc/apt/sources.list.d/docker.list";

/// Outcome of [`ensure_container_runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeOutcome {
    AlreadyInstalled,
    InstalledNow,
}

fn apt_get() -> Cmd {
    Cmd::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
}

fn provisioning(step: &'static str) -> impl FnOnce(anyhow::Error) -> BootstrapError {
    move |e| BootstrapError::Provisioning {
        step,
        detail: format!("{:#}", e),
    }
}

/// Refresh package lists and install the base tool set.
pub fn ensure_system_packages(host: &dyn Host) -> Result<(), BootstrapError> {
    println!("* Installing system packages");
    host.run(&apt_get().arg("update").error_msg("apt-get update failed"))
        .map_err(provisioning("package index update"))?;
    host.run(
        &apt_get()
            .args(["install", "--yes"])
            .args(SYSTEM_PACKAGES.iter().copied())
            .error_msg("installing system packages failed"),
    )
    .map_err(provisioning("system package install"))?;
    Ok(())
}

/// Whether a working container runtime answers on this host.
pub fn runtime_present(host: &dyn Host) -> bool {
    host.run(&Cmd::new("docker").arg("version").allow_fail())
        .map(|out| out.success())
        .unwrap_or(false)
}

/// apt source line for Docker's repository on this platform.
pub fn docker_source_line(env: &HostEnvironment) -> String {
    format!(
        "deb [arch={} signed-by={}] https://download.docker.com/linux/{} {} stable\n",
        env.architecture.dpkg_name(),
        DOCKER_KEY_PATH,
        env.distribution_id,
        env.distribution_codename
    )
}

/// Install Docker Engine and the compose plugin unless already present.
pub fn ensure_container_runtime(
    host: &dyn Host,
    env: &HostEnvironment,
) -> Result<RuntimeOutcome, BootstrapError> {
    if runtime_present(host) {
        println!("* Container runtime already installed");
        return Ok(RuntimeOutcome::AlreadyInstalled);
    }

    println!("* Installing container runtime");
    check_required_tools(host, KEY_TOOLS).map_err(provisioning("runtime prerequisites"))?;
    install_signing_key(host, env)?;

    host.run(
        &Cmd::new("sh")
            .arg("-c")
            .arg(format!(
                "printf '%s' '{}' > {}",
                docker_source_line(env),
                DOCKER_SOURCES_PATH
            ))
            .error_msg("writing Docker apt source failed"),
    )
    .map_err(provisioning("runtime repository setup"))?;

    host.run(&apt_get().arg("update").error_msg("apt-get update failed"))
        .map_err(provisioning("package index update"))?;
    host.run(
        &apt_get()
            .args(["install", "--yes"])
            .args(RUNTIME_PACKAGES.iter().copied())
            .error_msg("installing container runtime failed"),
    )
    .map_err(provisioning("runtime install"))?;

    if !runtime_present(host) {
        return Err(BootstrapError::Provisioning {
            step: "runtime verification",
            detail: "`docker version` still fails after installing the runtime packages".into(),
        });
    }
    Ok(RuntimeOutcome::InstalledNow)
}

/// Replace Docker's apt signing key. The old file is removed first so a
/// re-run never appends to or keeps a stale key.
fn install_signing_key(host: &dyn Host, env: &HostEnvironment) -> Result<(), BootstrapError> {
    let key_url = format!("https://download.docker.com/linux/{}/gpg", env.distribution_id);

    host.run(
        &Cmd::new("install")
            .args(["-m", "0755", "-d", KEYRING_DIR])
            .error_msg("creating keyring directory failed"),
    )
    .map_err(provisioning("signing key"))?;
    host.run(&Cmd::new("rm").args(["-f", DOCKER_KEY_PATH]))
        .map_err(provisioning("signing key"))?;
    host.run(
        &Cmd::new("sh")
            .arg("-c")
            .arg(format!(
                "curl -fsSL {} | gpg --batch --dearmor -o {}",
                key_url, DOCKER_KEY_PATH
            ))
            .error_msg("fetching Docker signing key failed"),
    )
    .map_err(provisioning("signing key"))?;
    host.run(&Cmd::new("chmod").args(["a+r", DOCKER_KEY_PATH]))
        .map_err(provisioning("signing key"))?;
    Ok(())
}
