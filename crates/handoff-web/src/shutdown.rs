//! Graceful shutdown signal handling

use std::future::Future;
use std::io;

use tokio::signal;

/// Waits for Ctrl+C, or SIGTERM/SIGHUP/SIGQUIT/SIGUSR1/SIGUSR2/SIGABRT on
/// unix, and returns the name of the signal received.
///
/// A source whose handler cannot be installed is logged and then ignored,
/// so the remaining sources still stop the server.
async fn wait_for_signal() -> &'static str {
    let ctrl_c = async { signal::ctrl_c().await.map(|()| "SIGINT") };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal as unix_signal, SignalKind};

        let mut term = unix_signal(SignalKind::terminate())?;
        let mut hangup = unix_signal(SignalKind::hangup())?;
        let mut quit = unix_signal(SignalKind::quit())?;
        let mut usr1 = unix_signal(SignalKind::user_defined1())?;
        let mut usr2 = unix_signal(SignalKind::user_defined2())?;
        let mut abort = unix_signal(SignalKind::from_raw(6))?;
        Ok::<_, io::Error>(tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = hangup.recv() => "SIGHUP",
            _ = quit.recv() => "SIGQUIT",
            _ = usr1.recv() => "SIGUSR1",
            _ = usr2.recv() => "SIGUSR2",
            _ = abort.recv() => "SIGABRT",
        })
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<io::Result<&'static str>>();

    first_signal(ctrl_c, terminate).await
}

/// Races two signal sources. A source that fails is parked instead of
/// ending the race.
async fn first_signal(
    ctrl_c: impl Future<Output = io::Result<&'static str>>,
    terminate: impl Future<Output = io::Result<&'static str>>,
) -> &'static str {
    tokio::select! {
        name = or_pending("Ctrl+C", ctrl_c) => name,
        name = or_pending("termination", terminate) => name,
    }
}

async fn or_pending(
    source: &str,
    fut: impl Future<Output = io::Result<&'static str>>,
) -> &'static str {
    match fut.await {
        Ok(name) => name,
        Err(e) => {
            tracing::error!("Failed to install {source} signal handler: {e}");
            std::future::pending().await
        }
    }
}

/// Resolves once the server should stop.
pub async fn shutdown_signal() {
    let name = wait_for_signal().await;
    tracing::info!("Received signal {name}");
}
