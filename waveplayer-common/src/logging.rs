//! Tracing subscriber bootstrap shared by the waveplayer binaries

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(level: &str) -> String {
    format!("waveplayer={level},waveplayer_common={level}")
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level` so individual targets can still be
/// tuned from the environment. Calling this twice is harmless; the second
/// install is ignored.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
