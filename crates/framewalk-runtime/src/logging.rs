use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for hosts and tests.
///
/// Reads `RUST_LOG`; defaults to `info` if unset. Output goes to stderr
/// so collaborators keep stdout for their own rendering.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
