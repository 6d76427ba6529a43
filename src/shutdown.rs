//! Signal handling for a clean stop of the poll supervisor
//!
//! SIGINT and SIGTERM cancel a shared [`CancellationToken`]; the supervisor
//! checks it at every sleep and closes its session before returning.

use std::fmt;
use std::io;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which signal asked the process to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => f.write_str("SIGINT"),
            ShutdownReason::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// SIGINT(Ctrl+C) 또는 SIGTERM 시그널을 수신하면 반환합니다.
pub async fn wait_for_signal() -> io::Result<ShutdownReason> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result.map(|_| ShutdownReason::Interrupt),
            _ = terminate.recv() => Ok(ShutdownReason::Terminate),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map(|_| ShutdownReason::Interrupt)
    }
}

/// Cancel `token` when a shutdown signal arrives
///
/// If the handlers cannot be installed the token is left alone and the
/// watcher runs until killed.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(reason) => {
                tracing::info!(signal = %reason, "Received shutdown signal, stopping watcher");
                token.cancel();
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
            }
        }
    })
}
