//! Turns SIGINT/SIGTERM into a flag the accept loop polls between requests.

use anyhow::{Context, Result};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

/// Starts a watcher thread and returns the flag it sets on the first signal.
pub fn stop_on_signal() -> Result<Arc<AtomicBool>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            let name = runtime.block_on(wait_for_signal());
            log::info!("🛑 {name} received, shutting down");
            flag.store(true, Ordering::Relaxed);
        })
        .context("spawn signal thread")?;

    Ok(stop)
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            log::warn!("cannot watch SIGTERM: {e}");
            return interrupt().await;
        }
    };
    tokio::select! {
        name = interrupt() => name,
        Some(()) = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    interrupt().await
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupt() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(e) => {
            log::warn!("cannot watch Ctrl-C: {e}");
            std::future::pending().await
        }
    }
}
