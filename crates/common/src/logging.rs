use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global fmt subscriber on stderr. Only the first call in a
/// process wins, so test binaries may call it freely.
pub fn init_logging(default_level: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
