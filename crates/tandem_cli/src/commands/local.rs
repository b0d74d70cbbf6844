//! Local command implementation.

use std::path::Path;
use tandem_engine::{DetectionMode, LocalPair, Shutdown, SyncConfig};
use tracing::info;

/// Mirrors `a` and `b` until the process is killed.
pub fn run(
    a: &Path,
    b: &Path,
    mode: DetectionMode,
    config: SyncConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    if a == b {
        return Err(format!("refusing to mirror {:?} onto itself", a).into());
    }

    let pair = LocalPair::new(a, b, config)?;
    let shutdown = Shutdown::new();
    let handle = pair.spawn(mode, &shutdown)?;
    info!("mirroring; stop with Ctrl-C");

    handle.join()?;
    Ok(())
}
