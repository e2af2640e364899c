//! `lambda-http-bridge` runs a single Lambda-style handler behind a plain HTTP port.
//!
//! A Lambda proxy in front of the process forwards each invocation as one HTTP request. The
//! invocation context travels JSON-encoded in the `x-amzn-lambda-context` header, an optional
//! request context in `x-amzn-lambda-request-context`, and the event in the request body. This
//! crate decodes those pieces, calls the registered handler, and writes its result back as JSON.
//!
//! Core modules:
//! - [`env`]: process environment snapshot (plus the trace-id side channel)
//! - [`context`]: invocation context / request context / event decoding
//! - [`invoke`]: handler trait and callback-or-future settlement
//! - [`bridge`]: the bound server handle returned by handler registration
//! - [`runtime`]: host detection and the four host backends (axum, tower, hyper, fetch events)
//! - [`shutdown`]: termination-signal coordination

pub mod bridge;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod invoke;
pub mod runtime;
pub mod shutdown;
pub mod telemetry;

pub use bridge::LambdaBridge;
pub use config::BridgeConfig;
pub use context::{Event, InvocationContext, RequestContext};
pub use env::EnvironmentSnapshot;
pub use error::{BridgeError, HandlerError, Result};
pub use invoke::{callback_fn, handler_fn, Completion, Handler, HandlerOutput};
pub use runtime::{HostBindings, RunningHost, RuntimeKind, Shutdown};
pub use shutdown::ShutdownCoordinator;
