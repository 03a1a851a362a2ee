/// Install a stderr `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` if the embedding process already installed a global subscriber; that one
/// keeps receiving this crate's events.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // stdout belongs to the embedding process
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
