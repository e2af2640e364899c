//! Event-driven host. The embedding program pushes [`FetchEvent`]s into a channel and each
//! event is answered through its own `respond_with` continuation.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{
    CanonicalRequest, CanonicalResponse, HostState, RunningHost, RuntimeKind, Shutdown,
    StopHandle,
};
use crate::error::{BridgeError, Result};

#[derive(Debug)]
pub struct FetchEvent {
    pub request: CanonicalRequest,
    pub respond_with: oneshot::Sender<Result<CanonicalResponse>>,
}

/// Receiving side, handed to [`super::HostBindings::with_fetch_events`].
#[derive(Debug)]
pub struct FetchEvents {
    rx: mpsc::Receiver<FetchEvent>,
}

/// Sending side, kept by the embedding program.
#[derive(Debug, Clone)]
pub struct FetchEventSender {
    tx: mpsc::Sender<FetchEvent>,
}

pub fn fetch_channel(buffer: usize) -> (FetchEventSender, FetchEvents) {
    let (tx, rx) = mpsc::channel(buffer);
    (FetchEventSender { tx }, FetchEvents { rx })
}

impl FetchEventSender {
    /// Send one request and wait for its response.
    ///
    /// Fails with [`BridgeError::ListenerClosed`] once the host has been shut down.
    pub async fn dispatch(&self, request: CanonicalRequest) -> Result<CanonicalResponse> {
        let (respond_with, response) = oneshot::channel();
        self.tx
            .send(FetchEvent {
                request,
                respond_with,
            })
            .await
            .map_err(|_| BridgeError::ListenerClosed)?;
        response.await.map_err(|_| BridgeError::ListenerClosed)?
    }
}

pub(crate) fn serve(events: FetchEvents, state: HostState) -> RunningHost {
    let token = CancellationToken::new();
    let stop = token.clone();
    let FetchEvents { mut rx } = events;

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let state = state.clone();
            tokio::spawn(async move {
                let FetchEvent {
                    request,
                    respond_with,
                } = event;
                let result = state.handler.handle(request, &state.env).await;
                if let Err(err) = &result {
                    tracing::error!(error = %err, "invocation failed");
                }
                if respond_with.send(result).is_err() {
                    tracing::debug!("fetch event dropped before its response");
                }
            });
        }
        rx.close();
        tracing::debug!(runtime = %RuntimeKind::FetchEvent, "subscription cancelled");
    });

    RunningHost {
        kind: RuntimeKind::FetchEvent,
        local_addr: None,
        shutdown: Shutdown::FetchEvent(StopHandle::new(token)),
    }
}
