//! Termination-signal handling for socket-based hosts.
//!
//! One SIGTERM listener is registered per host. When it fires, the host's [`Shutdown`] runs to
//! completion (including the drain for the process-based host) and the process exits with
//! status 0.

use std::future::Future;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::{
    error::{BridgeError, Result},
    runtime::{RuntimeKind, Shutdown, ShutdownOutcome},
};

#[derive(Debug)]
pub struct ShutdownCoordinator;

impl ShutdownCoordinator {
    /// Register the termination listener for `kind` and spawn the task that answers it.
    ///
    /// Must be called from inside a tokio runtime. The returned handle only finishes if the
    /// signal stream ends without delivering a signal, since delivery exits the process.
    pub fn install(kind: RuntimeKind, shutdown: Shutdown) -> Result<JoinHandle<()>> {
        if kind == RuntimeKind::FetchEvent {
            return Err(BridgeError::UnsupportedRuntime(
                "fetch-event hosts receive no process signals",
            ));
        }

        let signal = terminate_signal()?;
        tracing::debug!(runtime = %kind, "termination listener installed");

        Ok(tokio::spawn(coordinate(signal, shutdown, |outcome| {
            tracing::info!(?outcome, "exiting");
            std::process::exit(0)
        })))
    }
}

#[cfg(unix)]
fn terminate_signal() -> Result<BoxFuture<'static, ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    Ok(Box::pin(async move {
        sigterm.recv().await;
    }))
}

#[cfg(not(unix))]
fn terminate_signal() -> Result<BoxFuture<'static, ()>> {
    Ok(Box::pin(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }))
}

/// Wait for `signal`, shut the host down, then hand the outcome to `exit`.
pub async fn coordinate<S, E>(signal: S, shutdown: Shutdown, exit: E)
where
    S: Future<Output = ()>,
    E: FnOnce(ShutdownOutcome),
{
    signal.await;
    tracing::info!("termination signal received");
    let outcome = shutdown.shutdown().await;
    exit(outcome);
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::runtime::StopHandle;

    #[tokio::test]
    async fn signal_triggers_shutdown_then_exit() {
        let token = CancellationToken::new();
        let shutdown = Shutdown::Axum(StopHandle::new(token.clone()));
        let (fire, signal) = oneshot::channel::<()>();
        let exited = Arc::new(Mutex::new(None));
        let recorded = Arc::clone(&exited);

        let task = tokio::spawn(coordinate(
            async move {
                let _ = signal.await;
            },
            shutdown,
            move |outcome| *recorded.lock().unwrap() = Some(outcome),
        ));

        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
        assert!(exited.lock().unwrap().is_none());

        fire.send(()).unwrap();
        task.await.unwrap();

        assert!(token.is_cancelled());
        assert_eq!(*exited.lock().unwrap(), Some(ShutdownOutcome::Stopped));
    }

    #[tokio::test]
    async fn fetch_event_hosts_cannot_install() {
        let shutdown = Shutdown::FetchEvent(StopHandle::new(CancellationToken::new()));
        let err = ShutdownCoordinator::install(RuntimeKind::FetchEvent, shutdown).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedRuntime(_)));
    }

    #[tokio::test]
    async fn process_hosts_install_a_listener() {
        let token = CancellationToken::new();
        let shutdown = Shutdown::Tower(StopHandle::new(token.clone()));
        let handle = ShutdownCoordinator::install(RuntimeKind::Tower, shutdown).unwrap();

        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        assert!(!token.is_cancelled());
        handle.abort();
    }
}
