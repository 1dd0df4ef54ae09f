use tracing_subscriber::EnvFilter;

/// Installs the global subscriber, writing to stderr so command output on
/// stdout stays clean. `RUST_LOG` wins over `default_filter`; `verbose`
/// forces debug output for this crate.
pub fn init(default_filter: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("patrol=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
