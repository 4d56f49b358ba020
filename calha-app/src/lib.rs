use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod app_config;
pub mod cli;
pub mod state;

pub use app_config::Config;
pub use state::Services;

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
/// Logs go to stderr so command output on stdout stays parseable.
pub fn init_tracing(filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
