//! Log output for the command line binary.
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::error::Result;

/// Installs a global subscriber writing to stderr. `level` applies unless
/// `RUST_LOG` says otherwise.
pub fn init(level: Level) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
