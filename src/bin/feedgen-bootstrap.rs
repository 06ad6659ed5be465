use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::Level;

use feedgen_bootstrap::bootstrap::completion_summary;
use feedgen_bootstrap::config::{load_config, CONFIG_ENV};
use feedgen_bootstrap::logging::init_tracing;
use feedgen_bootstrap::params::{NoPrompt, Prompter, TerminalPrompter};
use feedgen_bootstrap::preflight::require_root;
use feedgen_bootstrap::process::SystemHost;
use feedgen_bootstrap::{Bootstrap, BootstrapConfig, BootstrapError, PositionalArgs};

/// Install and start a Bluesky feed generator on this host.
///
/// Any parameter left out is asked for interactively.
#[derive(Parser, Debug)]
#[command(name = "feedgen-bootstrap", version)]
struct Cli {
    /// Directory holding the service's data and configuration [default: /feedgen]
    data_dir: Option<String>,

    /// Public DNS name of this server (not an IP address)
    hostname: Option<String>,

    /// Contact email for TLS certificate issuance
    admin_email: Option<String>,

    /// Firehose subscription endpoint, e.g. wss://bsky.network
    subscription_endpoint: Option<String>,

    /// DID of the account publishing the feed
    publisher_did: Option<String>,

    /// TOML file overriding installer defaults
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Fail instead of prompting for missing parameters
    #[arg(long)]
    non_interactive: bool,

    /// Emit diagnostics as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Debug-level diagnostics
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn positional(&self) -> PositionalArgs {
        PositionalArgs {
            data_directory: self.data_dir.clone(),
            hostname: self.hostname.clone(),
            admin_email: self.admin_email.clone(),
            subscription_endpoint: self.subscription_endpoint.clone(),
            publisher_did: self.publisher_did.clone(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.log_json, level);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            if let Some(err) = e.downcast_ref::<BootstrapError>() {
                eprintln!("\n{}", err.remediation());
            }
            ExitCode::from(1)
        }
    }
}

fn config_error(e: anyhow::Error) -> BootstrapError {
    BootstrapError::usage(
        format!("{:#}", e),
        "Fix or remove the file passed to --config (or named by FEEDGEN_BOOTSTRAP_CONFIG) \
         and re-run.",
    )
}

fn run(cli: &Cli) -> Result<()> {
    require_root()?;

    let config = match &cli.config {
        Some(path) => load_config(path).map_err(config_error)?,
        None => BootstrapConfig::default(),
    };
    let settings = config.artifact_settings().map_err(config_error)?;
    let prompter: Box<dyn Prompter> = if cli.non_interactive {
        Box::new(NoPrompt)
    } else {
        Box::new(TerminalPrompter::stdio())
    };

    let mut bootstrap = Bootstrap::new(&config, settings, &SystemHost, prompter);
    let result = bootstrap.run(&cli.positional());
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(stage = ?bootstrap.stage(), "bootstrap stopped");
            return Err(e.into());
        }
    };

    println!("{}", completion_summary(&report, &config.unit_name));
    Ok(())
}
