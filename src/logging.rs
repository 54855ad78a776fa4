//! Console logging for the binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence; otherwise `default_level` applies (`info` for
/// normal runs, `warn` for quiet ones).
pub fn init_logging(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{default_level},othello_probe={default_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
