use tracing_subscriber::{fmt, EnvFilter};

/// Installs the fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Calling it again is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
