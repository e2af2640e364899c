//! Host detection and the canonical request boundary.
//!
//! A host is picked once at startup from the capabilities in [`HostBindings`], in this order:
//! 1. [`RuntimeKind::Axum`]: an axum listener provided by the embedding program
//! 2. [`RuntimeKind::Tower`]: a listener served through hyper-util's auto (HTTP/1 + HTTP/2) builder
//! 3. [`RuntimeKind::Hyper`]: a raw hyper HTTP/1 loop on the port configured in the environment
//! 4. [`RuntimeKind::FetchEvent`]: a channel of fetch events pushed by an event-driven host
//!
//! The first match wins. Each variant starts its listener and returns a [`Shutdown`].

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use axum::body::Body;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
    config::BridgeConfig,
    env::EnvironmentSnapshot,
    error::{BridgeError, Result},
};

pub(crate) mod auto;
pub mod drain;
pub(crate) mod embedded;
pub mod fetch;
pub(crate) mod process;

pub use embedded::router;
pub use fetch::{fetch_channel, FetchEvent, FetchEventSender, FetchEvents};
pub use process::DrainHandle;

pub type CanonicalRequest = http::Request<Body>;
pub type CanonicalResponse = http::Response<Body>;

/// The single call boundary every host forwards to.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        request: CanonicalRequest,
        env: &EnvironmentSnapshot,
    ) -> Result<CanonicalResponse>;
}

#[derive(Clone)]
pub(crate) struct HostState {
    pub(crate) handler: Arc<dyn RequestHandler>,
    pub(crate) env: EnvironmentSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Axum,
    Tower,
    Hyper,
    FetchEvent,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuntimeKind::Axum => "axum",
            RuntimeKind::Tower => "tower",
            RuntimeKind::Hyper => "hyper",
            RuntimeKind::FetchEvent => "fetch-event",
        })
    }
}

/// Host capabilities supplied by the embedding program.
///
/// The process-based host is not listed here: it is indicated by a valid port in the
/// environment (see [`BridgeConfig::process_addr`]).
#[derive(Debug, Default)]
pub struct HostBindings {
    axum: Option<TcpListener>,
    tower: Option<TcpListener>,
    fetch_events: Option<FetchEvents>,
}

impl HostBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_axum(mut self, listener: TcpListener) -> Self {
        self.axum = Some(listener);
        self
    }

    pub fn with_tower(mut self, listener: TcpListener) -> Self {
        self.tower = Some(listener);
        self
    }

    pub fn with_fetch_events(mut self, events: FetchEvents) -> Self {
        self.fetch_events = Some(events);
        self
    }

    /// Which host [`start`] would pick for these bindings.
    pub fn detect(&self, config: &BridgeConfig) -> Result<RuntimeKind> {
        if self.axum.is_some() {
            Ok(RuntimeKind::Axum)
        } else if self.tower.is_some() {
            Ok(RuntimeKind::Tower)
        } else if config.process_addr().is_some() {
            Ok(RuntimeKind::Hyper)
        } else if self.fetch_events.is_some() {
            Ok(RuntimeKind::FetchEvent)
        } else {
            Err(BridgeError::UnsupportedRuntime(
                "no axum or tower listener, no valid port, no fetch event source",
            ))
        }
    }
}

/// A started host.
#[derive(Debug)]
pub struct RunningHost {
    pub kind: RuntimeKind,
    /// Bound address for socket-based hosts.
    pub local_addr: Option<SocketAddr>,
    pub shutdown: Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Direct stop; nothing was drained.
    Stopped,
    /// Every open connection closed inside the grace window.
    Drained,
    /// The grace window expired and `remaining` connections were force-closed.
    ForcedClose { remaining: usize },
    /// An earlier call already shut the host down.
    AlreadyStopped,
}

/// Stop procedure for a started host. Safe to call more than once.
#[derive(Debug)]
pub enum Shutdown {
    Axum(StopHandle),
    Tower(StopHandle),
    Hyper(process::DrainHandle),
    FetchEvent(StopHandle),
}

impl Shutdown {
    pub async fn shutdown(&self) -> ShutdownOutcome {
        match self {
            Shutdown::Axum(stop) | Shutdown::Tower(stop) | Shutdown::FetchEvent(stop) => {
                stop.stop()
            }
            Shutdown::Hyper(drain) => drain.shutdown().await,
        }
    }
}

/// Direct stop: cancels the host's serve task without waiting for it.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            token,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn stop(&self) -> ShutdownOutcome {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return ShutdownOutcome::AlreadyStopped;
        }
        self.token.cancel();
        ShutdownOutcome::Stopped
    }
}

/// Detect the host, start its listener and return the running handle.
///
/// Fails with [`BridgeError::UnsupportedRuntime`] before anything is bound when no host matches.
pub async fn start(
    handler: Arc<dyn RequestHandler>,
    env: EnvironmentSnapshot,
    config: &BridgeConfig,
    host: HostBindings,
) -> Result<RunningHost> {
    let kind = host.detect(config)?;
    let state = HostState { handler, env };
    let HostBindings {
        axum,
        tower,
        fetch_events,
    } = host;

    let running = match (kind, axum, tower, config.process_addr(), fetch_events) {
        (RuntimeKind::Axum, Some(listener), ..) => embedded::serve(listener, state)?,
        (RuntimeKind::Tower, _, Some(listener), ..) => auto::serve(listener, state)?,
        (RuntimeKind::Hyper, _, _, Some(addr), _) => {
            let listener = TcpListener::bind(addr).await?;
            process::serve(listener, state, config.drain)?
        }
        (RuntimeKind::FetchEvent, .., Some(events)) => fetch::serve(events, state),
        _ => return Err(BridgeError::UnsupportedRuntime("host binding disappeared")),
    };

    tracing::info!(
        runtime = %running.kind,
        addr = ?running.local_addr,
        "host started"
    );
    Ok(running)
}
