use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::artifacts::{ArtifactSettings, DEFAULT_COMPOSE_TEMPLATE};
use crate::lock::{RetryPolicy, DEFAULT_POLL_INTERVAL};
use crate::network::{MetadataEndpoint, DEFAULT_PROBE_TIMEOUT};
use crate::params::DEFAULT_DATA_DIR;

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_ENV: &str = "FEEDGEN_BOOTSTRAP_CONFIG";

pub const DEFAULT_UNIT_NAME: &str = "feedgen";
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// Resolved installer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub default_data_dir: PathBuf,
    pub unit_name: String,
    pub systemd_unit_dir: PathBuf,
    pub lock_poll_interval: Duration,
    pub lock_timeout: Option<Duration>,
    pub probe_timeout: Duration,
    pub parallel_probes: bool,
    pub compose_template: Option<PathBuf>,
    pub metadata_endpoints: Vec<MetadataEndpoint>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            default_data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            unit_name: DEFAULT_UNIT_NAME.to_string(),
            systemd_unit_dir: PathBuf::from(DEFAULT_UNIT_DIR),
            lock_poll_interval: DEFAULT_POLL_INTERVAL,
            lock_timeout: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            parallel_probes: false,
            compose_template: None,
            metadata_endpoints: MetadataEndpoint::defaults(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BootstrapToml {
    default_data_dir: Option<PathBuf>,
    unit_name: Option<String>,
    systemd_unit_dir: Option<PathBuf>,
    lock_poll_interval_secs: Option<u64>,
    lock_timeout_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
    parallel_probes: Option<bool>,
    compose_template: Option<PathBuf>,
    metadata_endpoints: Option<Vec<MetadataEndpoint>>,
}

impl BootstrapConfig {
    pub fn unit_path(&self) -> PathBuf {
        self.systemd_unit_dir
            .join(format!("{}.service", self.unit_name))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: self.lock_poll_interval,
            max_wait: self.lock_timeout,
        }
    }

    /// Artifact destinations, reading the compose template override if set.
    pub fn artifact_settings(&self) -> Result<ArtifactSettings> {
        let compose_template = match &self.compose_template {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("reading compose template '{}'", path.display()))?,
            None => DEFAULT_COMPOSE_TEMPLATE.to_string(),
        };
        Ok(ArtifactSettings {
            unit_path: self.unit_path(),
            compose_template,
        })
    }
}

/// Load and validate a config file. Unset keys keep their defaults.
pub fn load_config(path: &Path) -> Result<BootstrapConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading bootstrap config '{}'", path.display()))?;
    parse_config(&text, path)
}

pub fn parse_config(text: &str, origin: &Path) -> Result<BootstrapConfig> {
    let raw: BootstrapToml = toml::from_str(text)
        .with_context(|| format!("parsing bootstrap config '{}'", origin.display()))?;
    let defaults = BootstrapConfig::default();

    let unit_name = raw
        .unit_name
        .map(|n| n.trim().to_string())
        .unwrap_or(defaults.unit_name);
    if unit_name.is_empty() || unit_name.contains('/') || unit_name.ends_with(".service") {
        bail!(
            "invalid bootstrap config '{}': unit_name '{}' must be a bare unit name like 'feedgen'",
            origin.display(),
            unit_name
        );
    }

    let default_data_dir = raw.default_data_dir.unwrap_or(defaults.default_data_dir);
    if !default_data_dir.is_absolute() {
        bail!(
            "invalid bootstrap config '{}': default_data_dir must be absolute, got '{}'",
            origin.display(),
            default_data_dir.display()
        );
    }

    let probe_timeout = match raw.probe_timeout_secs {
        Some(0) => bail!(
            "invalid bootstrap config '{}': probe_timeout_secs must be at least 1",
            origin.display()
        ),
        Some(secs) => Duration::from_secs(secs),
        None => defaults.probe_timeout,
    };

    let lock_poll_interval = match raw.lock_poll_interval_secs {
        Some(0) => bail!(
            "invalid bootstrap config '{}': lock_poll_interval_secs must be at least 1",
            origin.display()
        ),
        Some(secs) => Duration::from_secs(secs),
        None => defaults.lock_poll_interval,
    };

    let metadata_endpoints = raw
        .metadata_endpoints
        .unwrap_or(defaults.metadata_endpoints);

    Ok(BootstrapConfig {
        default_data_dir,
        unit_name,
        systemd_unit_dir: raw.systemd_unit_dir.unwrap_or(defaults.systemd_unit_dir),
        lock_poll_interval,
        lock_timeout: raw.lock_timeout_secs.map(Duration::from_secs),
        probe_timeout,
        parallel_probes: raw.parallel_probes.unwrap_or(defaults.parallel_probes),
        compose_template: raw.compose_template,
        metadata_endpoints,
    })
}
