//! Process-based host: a raw hyper HTTP/1 accept loop on the port from the environment.
//!
//! Requests are rebuilt from their parts into the canonical form and responses are fully
//! buffered before they are written. Shutdown stops accepting, asks every open connection to
//! close once idle and force-closes whatever is still open when the grace window ends.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::{to_bytes, Body};
use bytes::Bytes;
use http::{header::HeaderValue, HeaderMap, Request, Response};
use http_body_util::Full;
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::{
    drain::{drain, ConnectionTracker, DrainOutcome, DrainPolicy},
    CanonicalRequest, HostState, RunningHost, RuntimeKind, Shutdown, ShutdownOutcome,
};
use crate::error::{BridgeError, Result};

/// Shutdown handle for the process-based host.
#[derive(Debug)]
pub struct DrainHandle {
    stop: CancellationToken,
    force: CancellationToken,
    tracker: ConnectionTracker,
    policy: DrainPolicy,
    started: AtomicBool,
}

impl DrainHandle {
    pub(crate) async fn shutdown(&self) -> ShutdownOutcome {
        if self.started.swap(true, Ordering::SeqCst) {
            return ShutdownOutcome::AlreadyStopped;
        }

        self.stop.cancel();
        tracing::info!(
            open_connections = self.tracker.open(),
            "draining connections"
        );

        match drain(&self.tracker, self.policy, || self.force.cancel()).await {
            DrainOutcome::Drained => {
                tracing::info!("all connections closed");
                ShutdownOutcome::Drained
            }
            DrainOutcome::ForcedClose { remaining } => {
                tracing::warn!(open_connections = remaining, "forcing connections closed");
                ShutdownOutcome::ForcedClose { remaining }
            }
        }
    }

    /// Connections currently open on this host.
    pub fn open_connections(&self) -> usize {
        self.tracker.open()
    }
}

pub(crate) fn serve(
    listener: TcpListener,
    state: HostState,
    policy: DrainPolicy,
) -> Result<RunningHost> {
    let local_addr = listener.local_addr()?;
    let handle = DrainHandle {
        stop: CancellationToken::new(),
        force: CancellationToken::new(),
        tracker: ConnectionTracker::default(),
        policy,
        started: AtomicBool::new(false),
    };

    tokio::spawn(accept_loop(
        listener,
        state,
        handle.stop.clone(),
        handle.force.clone(),
        handle.tracker.clone(),
    ));

    Ok(RunningHost {
        kind: RuntimeKind::Hyper,
        local_addr: Some(local_addr),
        shutdown: Shutdown::Hyper(handle),
    })
}

async fn accept_loop(
    listener: TcpListener,
    state: HostState,
    stop: CancellationToken,
    force: CancellationToken,
    tracker: ConnectionTracker,
) {
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!(runtime = %RuntimeKind::Hyper, error = %err, "accept failed");
                    continue;
                }
            },
        };

        let guard = tracker.track();
        let state = state.clone();
        let stop = stop.clone();
        let force = force.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { respond(state, req).await }
            });

            let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            let mut conn = std::pin::pin!(conn);

            let result = tokio::select! {
                res = conn.as_mut() => res,
                _ = stop.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    tokio::select! {
                        res = conn.as_mut() => res,
                        _ = force.cancelled() => {
                            tracing::debug!(%peer, "connection force-closed");
                            return;
                        }
                    }
                }
            };

            if let Err(err) = result {
                tracing::debug!(%peer, error = %err, "connection closed with error");
            }
        });
    }
    tracing::debug!(runtime = %RuntimeKind::Hyper, "stopped accepting");
}

async fn respond(state: HostState, request: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
    let request = canonical_request(request);
    match state.handler.handle(request, &state.env).await {
        Ok(response) => write_response(response).await,
        Err(err) => {
            tracing::error!(error = %err, "invocation failed");
            Err(err)
        }
    }
}

fn canonical_request(request: Request<Incoming>) -> CanonicalRequest {
    let (mut parts, body) = request.into_parts();
    parts.headers = merge_headers(&parts.headers);
    Request::from_parts(parts, Body::new(body))
}

/// Drop headers with empty values and join repeated headers into one `", "` separated value.
pub(crate) fn merge_headers(headers: &HeaderMap) -> HeaderMap {
    let mut merged = HeaderMap::with_capacity(headers.keys_len());
    for name in headers.keys() {
        let values: Vec<&[u8]> = headers
            .get_all(name)
            .iter()
            .map(HeaderValue::as_bytes)
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            continue;
        }
        match HeaderValue::from_bytes(&values.join(&b", "[..])) {
            Ok(value) => {
                merged.insert(name.clone(), value);
            }
            Err(err) => tracing::debug!(header = %name, error = %err, "dropping header"),
        }
    }
    merged
}

async fn write_response(response: Response<Body>) -> Result<Response<Full<Bytes>>> {
    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|err| BridgeError::Body(err.into()))?;
    Ok(Response::from_parts(parts, Full::new(bytes)))
}
