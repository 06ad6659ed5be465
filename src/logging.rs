//! Tracing setup for the installer binary.
//!
//! Diagnostics go to stderr through `tracing`; operator-facing progress is
//! plain stdout so it stays readable when logs are silenced.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` applies to this crate and
/// HTTP client internals are held at `warn`. Later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "feedgen_bootstrap={},hyper=warn,reqwest=warn,warn",
            level.as_str().to_ascii_lowercase()
        ))
    });

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
