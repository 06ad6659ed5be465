//! The provisioning state machine.
//!
//! ```text
//! Start → Gated → Detected → AddressResolved → ParamsCollected
//!       → Provisioned → ArtifactsWritten → Activated → Done
//! ```
//!
//! Each stage is entered before its work starts, so after a failure
//! [`Bootstrap::stage`] names the step that failed. Nothing is written to
//! the data directory before `ArtifactsWritten`.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::activate::{activate, FirewallOutcome, REQUIRED_PORTS};
use crate::artifacts::{render, ArtifactSettings};
use crate::config::BootstrapConfig;
use crate::error::BootstrapError;
use crate::lock::{wait_for_package_lock, LockWait};
use crate::network::{
    default_probes, resolve_public_address, resolve_public_address_concurrent, AddressProbe,
    PublicAddress,
};
use crate::packages::{ensure_container_runtime, ensure_system_packages, RuntimeOutcome};
use crate::params::{self, DeploymentParameters, PositionalArgs, Prompter};
use crate::platform::{self, HostEnvironment};
use crate::process::Host;

/// Written by the running service; its presence means a completed install.
pub const COMPLETION_MARKER: &str = "db.sqlite";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    Gated,
    Detected,
    AddressResolved,
    ParamsCollected,
    Provisioned,
    ArtifactsWritten,
    Activated,
    Done,
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub environment: HostEnvironment,
    pub address: PublicAddress,
    pub params: DeploymentParameters,
    pub lock: LockWait,
    pub runtime: RuntimeOutcome,
    pub written: Vec<PathBuf>,
    pub firewall: FirewallOutcome,
}

type Detector<'a> = Box<dyn Fn() -> Result<HostEnvironment> + 'a>;
type Sleeper<'a> = Box<dyn FnMut(Duration) + 'a>;

pub struct Bootstrap<'a> {
    config: &'a BootstrapConfig,
    settings: ArtifactSettings,
    host: &'a dyn Host,
    prompter: Box<dyn Prompter + 'a>,
    detector: Detector<'a>,
    probes: Vec<Box<dyn AddressProbe>>,
    sleep: Sleeper<'a>,
    trail: Vec<Stage>,
}

/// Abort if `data_dir` already holds a completed install.
pub fn check_not_installed(data_dir: &Path) -> Result<(), BootstrapError> {
    if !data_dir.join(COMPLETION_MARKER).exists() {
        return Ok(());
    }
    Err(BootstrapError::usage(
        format!("feed generator is already installed in {}", data_dir.display()),
        format!(
            "To reinstall from scratch, stop the service and remove its data:\n  \
             sudo systemctl stop feedgen\n  \
             sudo rm -rf {}\n\
             Or pass a different data directory as the first argument.",
            data_dir.display()
        ),
    ))
}

impl<'a> Bootstrap<'a> {
    /// A bootstrap wired to the real platform, network and clock.
    pub fn new(
        config: &'a BootstrapConfig,
        settings: ArtifactSettings,
        host: &'a dyn Host,
        prompter: Box<dyn Prompter + 'a>,
    ) -> Self {
        Self {
            config,
            settings,
            host,
            prompter,
            detector: Box::new(move || platform::detect(host)),
            probes: default_probes(&config.metadata_endpoints, config.probe_timeout),
            sleep: Box::new(thread::sleep),
            trail: vec![Stage::Start],
        }
    }

    pub fn with_detector(mut self, detector: impl Fn() -> Result<HostEnvironment> + 'a) -> Self {
        self.detector = Box::new(detector);
        self
    }

    pub fn with_probes(mut self, probes: Vec<Box<dyn AddressProbe>>) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_sleep(mut self, sleep: impl FnMut(Duration) + 'a) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    /// The stage the run is in, or stopped in.
    pub fn stage(&self) -> Stage {
        self.trail.last().copied().unwrap_or(Stage::Start)
    }

    /// Every stage entered so far, in order.
    pub fn trail(&self) -> &[Stage] {
        &self.trail
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(?stage, "entering stage");
        self.trail.push(stage);
    }

    /// Run every step once, stopping at the first failure.
    pub fn run(&mut self, args: &PositionalArgs) -> Result<RunReport, BootstrapError> {
        self.enter(Stage::Gated);
        let data_dir = params::data_directory(args, &self.config.default_data_dir)?;
        check_not_installed(&data_dir)?;

        self.enter(Stage::Detected);
        let environment = (self.detector)().map_err(|e| {
            BootstrapError::usage(
                format!("could not identify this host: {:#}", e),
                "Make sure /etc/os-release exists and is readable.",
            )
        })?;
        platform::require_supported(&environment)?;
        println!("* Detected {}", environment);

        self.enter(Stage::AddressResolved);
        let address = if self.config.parallel_probes {
            resolve_public_address_concurrent(&self.probes)
        } else {
            resolve_public_address(&self.probes)
        };
        println!("* Public address: {}", address);

        self.enter(Stage::ParamsCollected);
        let params = params::collect(
            args,
            &self.config.default_data_dir,
            address,
            self.prompter.as_mut(),
        )?;

        self.enter(Stage::Provisioned);
        let lock = wait_for_package_lock(self.host, self.config.retry_policy(), &mut self.sleep)?;
        ensure_system_packages(self.host)?;
        let runtime = ensure_container_runtime(self.host, &environment)?;

        self.enter(Stage::ArtifactsWritten);
        let generated = render(&environment, &params, address, &self.settings);
        generated.write_all()?;
        let written = generated.artifacts.iter().map(|a| a.path.clone()).collect();

        self.enter(Stage::Activated);
        let firewall = activate(self.host, &self.config.unit_name)?;

        self.enter(Stage::Done);
        tracing::info!(data_dir = %params.data_directory.display(), "bootstrap complete");
        Ok(RunReport {
            environment,
            address,
            params,
            lock,
            runtime,
            written,
            firewall,
        })
    }
}

/// Operator instructions printed after a successful run.
pub fn completion_summary(report: &RunReport, unit_name: &str) -> String {
    let ports = REQUIRED_PORTS
        .iter()
        .map(|p| format!("{}/tcp", p))
        .collect::<Vec<_>>()
        .join(", ");
    let files = report
        .written
        .iter()
        .map(|p| format!("  {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "========================================================================\n\
         Feed generator installation successful!\n\
         ------------------------------------------------------------------------\n\
         \n\
         Check service status      : sudo systemctl status {unit}\n\
         Watch service logs        : sudo docker logs -f feedgen\n\
         Configuration files       :\n{files}\n\
         \n\
         Required DNS entry        : {host} A {address}\n\
         Required inbound ports    : {ports}\n\
         \n\
         The feed is served from https://{host} once DNS resolves to this server.\n\
         ========================================================================\n",
        unit = unit_name,
        files = files,
        host = report.params.hostname,
        address = report.address,
        ports = ports,
    )
}
