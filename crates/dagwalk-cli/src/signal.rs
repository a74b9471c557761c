//! OS signals to [`Shutdown`].
//!
//! A dedicated thread runs a single-threaded tokio runtime that waits for
//! Ctrl-C (and SIGTERM on unix), then cancels the token once. The pipeline
//! itself stays on plain threads.

use anyhow::{Context, Result};
use dagwalk_core::shutdown::Shutdown;
use tracing::{info, warn};

pub fn install(shutdown: Shutdown) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("dagwalk-signals".to_string())
        .spawn(move || {
            if runtime.block_on(wait_for_signal()) {
                info!("shutdown requested, draining pipeline");
                shutdown.cancel();
            }
        })
        .context("Failed to start signal thread")?;
    Ok(())
}

/// Returns `false` if no handler could be registered.
#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "cannot listen for SIGTERM");
            return ctrl_c().await;
        }
    };
    tokio::select! {
        received = ctrl_c() => received,
        _ = terminate.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    ctrl_c().await
}

async fn ctrl_c() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "cannot listen for Ctrl-C");
            false
        }
    }
}
