//! Deployment parameters: positional arguments first, prompts second.
//!
//! Each field is read once from its argument slot. A missing or blank value
//! is asked for once; if the answer is still unusable the run stops with a
//! usage error naming the field.

use anyhow::{Context, Result};
use reqwest::Url;
use std::io::{self, BufRead, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::error::BootstrapError;
use crate::network::PublicAddress;

pub const DEFAULT_DATA_DIR: &str = "/feedgen";

pub const USAGE: &str = "Usage: sudo feedgen-bootstrap [DATA_DIR] [HOSTNAME] [ADMIN_EMAIL] \
[SUBSCRIPTION_ENDPOINT] [PUBLISHER_DID]\n\
Example: sudo feedgen-bootstrap /feedgen feeds.example.com you@example.com \
wss://bsky.network did:plc:abcde";

/// Prompted parameters, in argument order. The data directory is never
/// prompted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Hostname,
    AdminEmail,
    SubscriptionEndpoint,
    PublisherDid,
}

impl Field {
    pub fn label(self) -> &'static str {
        match self {
            Field::Hostname => "hostname",
            Field::AdminEmail => "admin email",
            Field::SubscriptionEndpoint => "subscription endpoint",
            Field::PublisherDid => "publisher DID",
        }
    }

    fn question(self) -> &'static str {
        match self {
            Field::Hostname => "Enter your public DNS name (e.g. feeds.example.com)",
            Field::AdminEmail => "Enter an admin email address (used for TLS certificates)",
            Field::SubscriptionEndpoint => {
                "Enter the firehose subscription endpoint (e.g. wss://bsky.network)"
            }
            Field::PublisherDid => "Enter the DID of the account publishing the feed",
        }
    }
}

/// Raw invocation arguments, in order. `None` means not supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionalArgs {
    pub data_directory: Option<String>,
    pub hostname: Option<String>,
    pub admin_email: Option<String>,
    pub subscription_endpoint: Option<String>,
    pub publisher_did: Option<String>,
}

impl PositionalArgs {
    fn get(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::Hostname => &self.hostname,
            Field::AdminEmail => &self.admin_email,
            Field::SubscriptionEndpoint => &self.subscription_endpoint,
            Field::PublisherDid => &self.publisher_did,
        };
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Validated parameters. Every field is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentParameters {
    pub data_directory: PathBuf,
    pub hostname: String,
    pub admin_email: String,
    pub subscription_endpoint: String,
    pub publisher_did: String,
}

/// Source of answers for parameters missing from the command line.
pub trait Prompter {
    fn ask(&mut self, field: Field, question: &str) -> Result<String>;
}

/// Line-oriented prompts on a reader/writer pair.
pub struct TerminalPrompter<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompter<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Prompter for TerminalPrompter<R, W> {
    fn ask(&mut self, field: Field, question: &str) -> Result<String> {
        write!(self.output, "{}: ", question)?;
        self.output.flush()?;
        let mut line = String::new();
        self.input
            .read_line(&mut line)
            .with_context(|| format!("reading {}", field.label()))?;
        Ok(line.trim().to_string())
    }
}

/// Never prompts; every missing value stays missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn ask(&mut self, _field: Field, _question: &str) -> Result<String> {
        Ok(String::new())
    }
}

/// Data directory from the first argument, or `default`. Never prompts.
///
/// The path ends up in the systemd unit and compose bind mounts, so it
/// must be absolute.
pub fn data_directory(args: &PositionalArgs, default: &Path) -> Result<PathBuf, BootstrapError> {
    let dir = args
        .data_directory
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| default.to_path_buf());
    if !dir.is_absolute() {
        return Err(BootstrapError::usage(
            format!("data directory must be an absolute path, got '{}'", dir.display()),
            USAGE,
        ));
    }
    Ok(dir)
}

fn missing(field: Field) -> BootstrapError {
    BootstrapError::usage(format!("{} is required", field.label()), USAGE)
}

fn acquire(
    args: &PositionalArgs,
    field: Field,
    question: &str,
    prompter: &mut dyn Prompter,
) -> Result<String, BootstrapError> {
    if let Some(value) = args.get(field) {
        return Ok(value.to_string());
    }
    let answer = prompter.ask(field, question).map_err(|e| {
        BootstrapError::usage(format!("could not read {}: {:#}", field.label(), e), USAGE)
    })?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(missing(field));
    }
    Ok(answer.to_string())
}

/// Reject hostnames that are raw IPv4 literals.
pub fn validate_hostname(hostname: &str) -> Result<(), BootstrapError> {
    if hostname.parse::<Ipv4Addr>().is_ok() {
        return Err(BootstrapError::usage(
            format!("invalid hostname '{}': an IP address is not a hostname", hostname),
            "Certificates are issued per DNS name. Create an A record pointing a name \
             such as feeds.example.com at this server and pass that name instead.",
        ));
    }
    Ok(())
}

/// Require an absolute URI such as `wss://bsky.network`.
pub fn validate_endpoint(endpoint: &str) -> Result<(), BootstrapError> {
    Url::parse(endpoint).map(|_| ()).map_err(|e| {
        BootstrapError::usage(
            format!("invalid subscription endpoint '{}': {}", endpoint, e),
            "Pass a full URI including the scheme, for example wss://bsky.network",
        )
    })
}

/// Collect all parameters in argument order.
pub fn collect(
    args: &PositionalArgs,
    default_data_dir: &Path,
    address: PublicAddress,
    prompter: &mut dyn Prompter,
) -> Result<DeploymentParameters, BootstrapError> {
    let data_directory = data_directory(args, default_data_dir)?;

    let hostname_question = format!(
        "{}\n  Its DNS A record must point to this server ({})\n  Hostname",
        Field::Hostname.question(),
        address
    );
    let hostname = acquire(args, Field::Hostname, &hostname_question, prompter)?;
    validate_hostname(&hostname)?;

    let admin_email = acquire(args, Field::AdminEmail, Field::AdminEmail.question(), prompter)?;

    let subscription_endpoint = acquire(
        args,
        Field::SubscriptionEndpoint,
        Field::SubscriptionEndpoint.question(),
        prompter,
    )?;
    validate_endpoint(&subscription_endpoint)?;

    let publisher_did = acquire(
        args,
        Field::PublisherDid,
        Field::PublisherDid.question(),
        prompter,
    )?;

    Ok(DeploymentParameters {
        data_directory,
        hostname,
        admin_email,
        subscription_endpoint,
        publisher_did,
    })
}
