use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// Verbose mode logs this crate at debug and everything else at warn;
/// `RUST_LOG` overrides the default filter.
pub fn init(verbose: bool) -> Result<()> {
    if !verbose {
        return Ok(());
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,kidscolor=debug"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
    Ok(())
}
