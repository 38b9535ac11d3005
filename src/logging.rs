use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init(verbose: u8, quiet: bool) -> Result<()> {
    // RUST_LOG wins; otherwise -q/-v pick the level.
    let default_level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

    Ok(())
}
