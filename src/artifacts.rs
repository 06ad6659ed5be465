//! Rendering and writing the generated configuration files.
//!
//! Rendering is pure: the same inputs always give byte-identical files. There
//! are no timestamps in any template. Writing is a separate step so nothing
//! lands on disk until every artifact has rendered.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::BootstrapError;
use crate::network::PublicAddress;
use crate::params::DeploymentParameters;
use crate::platform::HostEnvironment;

/// Compose descriptor shipped with the binary.
pub const DEFAULT_COMPOSE_TEMPLATE: &str = include_str!("../templates/compose.yaml");

/// Path in the compose template that stands for the data directory.
pub const COMPOSE_PLACEHOLDER: &str = "/feedgen";

pub const SERVICE_PORT: u16 = 3000;
pub const LISTEN_HOST: &str = "0.0.0.0";
/// SQLite location inside the container; the data directory is mounted at /data.
pub const SQLITE_LOCATION: &str = "/data/db.sqlite";
pub const RECONNECT_DELAY_MS: u32 = 3000;
pub const TLS_CHECK_PATH: &str = "/tls-check";

pub const ENV_FILE_NAME: &str = "feedgen.env";
pub const COMPOSE_FILE_NAME: &str = "compose.yaml";
pub const CADDYFILE_RELATIVE: &str = "caddy/etc/caddy/Caddyfile";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    EnvironmentFile,
    ProxyConfig,
    SupervisorUnit,
    ComposeDescriptor,
}

impl ArtifactKind {
    fn mode(self) -> u32 {
        match self {
            // Holds the publisher identity; keep it root-only.
            ArtifactKind::EnvironmentFile => 0o600,
            _ => 0o644,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub contents: String,
}

/// Rendered files for one run, in write order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifacts {
    pub artifacts: Vec<Artifact>,
}

impl GeneratedArtifacts {
    /// Write every artifact, creating parent directories. Existing files are
    /// overwritten.
    pub fn write_all(&self) -> Result<(), BootstrapError> {
        for artifact in &self.artifacts {
            write_file_mode(&artifact.path, &artifact.contents, artifact.kind.mode()).map_err(
                |source| BootstrapError::Artifact {
                    path: artifact.path.clone(),
                    source,
                },
            )?;
            tracing::info!(path = %artifact.path.display(), "wrote {:?}", artifact.kind);
        }
        Ok(())
    }
}

/// Where the non-data-directory artifacts go and which compose template to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSettings {
    pub unit_path: PathBuf,
    pub compose_template: String,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            unit_path: PathBuf::from("/etc/systemd/system/feedgen.service"),
            compose_template: DEFAULT_COMPOSE_TEMPLATE.to_string(),
        }
    }
}

pub fn env_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(ENV_FILE_NAME)
}

pub fn compose_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(COMPOSE_FILE_NAME)
}

pub fn caddyfile_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CADDYFILE_RELATIVE)
}

/// Render all four artifacts.
pub fn render(
    env: &HostEnvironment,
    params: &DeploymentParameters,
    address: PublicAddress,
    settings: &ArtifactSettings,
) -> GeneratedArtifacts {
    let data_dir = &params.data_directory;
    GeneratedArtifacts {
        artifacts: vec![
            Artifact {
                kind: ArtifactKind::EnvironmentFile,
                path: env_file_path(data_dir),
                contents: render_env_file(env, params, address),
            },
            Artifact {
                kind: ArtifactKind::ProxyConfig,
                path: caddyfile_path(data_dir),
                contents: render_caddyfile(params),
            },
            Artifact {
                kind: ArtifactKind::ComposeDescriptor,
                path: compose_file_path(data_dir),
                contents: render_compose(&settings.compose_template, data_dir),
            },
            Artifact {
                kind: ArtifactKind::SupervisorUnit,
                path: settings.unit_path.clone(),
                contents: render_systemd_unit(data_dir),
            },
        ],
    }
}

pub fn render_env_file(
    env: &HostEnvironment,
    params: &DeploymentParameters,
    address: PublicAddress,
) -> String {
    format!(
        "# Feed generator settings written by feedgen-bootstrap.\n\
         # Host: {env}; public address at install time: {address}\n\
         \n\
         # Port the service listens on\n\
         FEEDGEN_PORT={port}\n\
         # Bind address inside the container\n\
         FEEDGEN_LISTENHOST={listen}\n\
         # Persistent SQLite database (the data directory is mounted at /data)\n\
         FEEDGEN_SQLITE_LOCATION={sqlite}\n\
         # Firehose subscription endpoint\n\
         FEEDGEN_SUBSCRIPTION_ENDPOINT={endpoint}\n\
         # Public hostname the feed is served from\n\
         FEEDGEN_HOSTNAME={hostname}\n\
         # DID of the account that publishes the feed\n\
         FEEDGEN_PUBLISHER_DID={did}\n\
         # Delay between firehose reconnect attempts, in milliseconds\n\
         FEEDGEN_SUBSCRIPTION_RECONNECT_DELAY={delay}\n",
        env = env,
        address = address,
        port = SERVICE_PORT,
        listen = LISTEN_HOST,
        sqlite = SQLITE_LOCATION,
        endpoint = params.subscription_endpoint,
        hostname = params.hostname,
        did = params.publisher_did,
        delay = RECONNECT_DELAY_MS,
    )
}

pub fn render_caddyfile(params: &DeploymentParameters) -> String {
    format!(
        "{{\n\
         \temail {email}\n\
         \ton_demand_tls {{\n\
         \t\task http://localhost:{port}{check}\n\
         \t}}\n\
         }}\n\
         \n\
         {host} {{\n\
         \ttls {{\n\
         \t\ton_demand\n\
         \t}}\n\
         \treverse_proxy http://localhost:{port}\n\
         }}\n",
        email = params.admin_email,
        port = SERVICE_PORT,
        check = TLS_CHECK_PATH,
        host = params.hostname,
    )
}

pub fn render_systemd_unit(data_dir: &Path) -> String {
    let data_dir = data_dir.display();
    format!(
        "[Unit]\n\
         Description=Bluesky Feed Generator Service\n\
         Documentation=https://github.com/bluesky-social/feed-generator\n\
         Requires=docker.service\n\
         After=docker.service\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         RemainAfterExit=yes\n\
         WorkingDirectory={data_dir}\n\
         ExecStart=/usr/bin/docker compose --file {data_dir}/{compose} up --detach\n\
         ExecStop=/usr/bin/docker compose --file {data_dir}/{compose} down\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        data_dir = data_dir,
        compose = COMPOSE_FILE_NAME,
    )
}

/// Replace the placeholder path with the data directory wherever it appears
/// as a whole path prefix (`/feedgen`, `/feedgen/...`), leaving names like
/// `/feedgen.env` alone.
pub fn render_compose(template: &str, data_dir: &Path) -> String {
    let replacement = data_dir.display().to_string();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(idx) = rest.find(COMPOSE_PLACEHOLDER) {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx + COMPOSE_PLACEHOLDER.len()..];
        if is_path_start(out.chars().last()) && is_path_end(tail.chars().next()) {
            out.push_str(&replacement);
        } else {
            out.push_str(COMPOSE_PLACEHOLDER);
        }
        rest = tail;
    }
    out.push_str(rest);
    out
}

fn is_path_start(prev: Option<char>) -> bool {
    matches!(prev, None | Some(' ' | '\t' | '\n' | '"' | '\'' | '=' | ':' | '-'))
}

fn is_path_end(next: Option<char>) -> bool {
    matches!(next, None | Some('/' | ' ' | '\t' | '\n' | '\r' | '"' | '\'' | ':'))
}

/// Write a file with specific permissions, creating parent directories.
fn write_file_mode(path: &Path, content: &str, mode: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}
