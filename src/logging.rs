//! Console logging setup using `tracing-subscriber`.

use tracing_subscriber::EnvFilter;

/// Initialise human-readable logging on stderr.
///
/// `RUST_LOG` takes precedence; otherwise `debug` when `verbose`, else `info`.
pub fn init_cli(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
