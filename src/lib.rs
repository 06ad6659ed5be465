//! Host bootstrap for a containerized Bluesky feed generator.
//!
//! Takes a bare Debian or Ubuntu host to a running service in one pass:
//!
//! - **Platform detection** - distribution, codename and CPU architecture
//! - **Public address discovery** - interface list, then cloud metadata services
//! - **Package provisioning** - base tools plus Docker Engine, idempotently
//! - **Parameter collection** - positional arguments or interactive prompts
//! - **Artifact generation** - env file, Caddyfile, systemd unit, compose file
//! - **Activation** - systemd enable/restart and ufw ports
//!
//! # Architecture
//!
//! ```text
//! bin/feedgen-bootstrap
//!     │
//!     └── bootstrap::Bootstrap (state machine)
//!             │
//!             ├── platform ── network ── params
//!             ├── lock ── packages          (through process::Host)
//!             ├── artifacts                  (pure render, then write)
//!             └── activate                   (through process::Host)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use feedgen_bootstrap::{Bootstrap, BootstrapConfig, PositionalArgs};
//! use feedgen_bootstrap::params::TerminalPrompter;
//! use feedgen_bootstrap::process::SystemHost;
//!
//! let config = BootstrapConfig::default();
//! let settings = config.artifact_settings().unwrap();
//! let mut run = Bootstrap::new(&config, settings, &SystemHost, Box::new(TerminalPrompter::stdio()));
//! run.run(&PositionalArgs::default()).unwrap();
//! ```

pub mod activate;
pub mod artifacts;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod lock;
pub mod logging;
pub mod network;
pub mod packages;
pub mod params;
pub mod platform;
pub mod preflight;
pub mod process;

pub use bootstrap::{Bootstrap, RunReport, Stage};
pub use config::BootstrapConfig;
pub use error::BootstrapError;
pub use params::{DeploymentParameters, PositionalArgs};
pub use platform::HostEnvironment;
