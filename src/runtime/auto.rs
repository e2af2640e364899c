//! Tower host: the same router as the axum host, driven connection by connection through
//! hyper-util's auto builder so both HTTP/1 and HTTP/2 clients are accepted.

use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::{embedded::state_router, HostState, RunningHost, RuntimeKind, Shutdown, StopHandle};
use crate::error::Result;

pub(crate) fn serve(listener: TcpListener, state: HostState) -> Result<RunningHost> {
    let local_addr = listener.local_addr()?;
    let token = CancellationToken::new();
    let service = TowerToHyperService::new(state_router(state));
    let stop = token.clone();

    tokio::spawn(async move {
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::warn!(runtime = %RuntimeKind::Tower, error = %err, "accept failed");
                        continue;
                    }
                },
            };

            let service = service.clone();
            tokio::spawn(async move {
                let builder = Builder::new(TokioExecutor::new());
                if let Err(err) = builder.serve_connection(TokioIo::new(stream), service).await {
                    tracing::debug!(%peer, error = %err, "connection closed with error");
                }
            });
        }
        tracing::debug!(runtime = %RuntimeKind::Tower, "stopped accepting");
    });

    Ok(RunningHost {
        kind: RuntimeKind::Tower,
        local_addr: Some(local_addr),
        shutdown: Shutdown::Tower(StopHandle::new(token)),
    })
}
