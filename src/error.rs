//! Error taxonomy shared by the parser, the invoker and the host backends.

use std::{any::Any, error::Error as StdError, fmt};

use axum::response::{IntoResponse, Response};
use http::{header::CONTENT_TYPE, StatusCode};
use thiserror::Error;

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Which piece of the invocation a decode error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    LambdaContext,
    RequestContext,
    LambdaEvent,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Subject::LambdaContext => "Lambda context",
            Subject::RequestContext => "request context",
            Subject::LambdaEvent => "Lambda event",
        })
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unsupported runtime: {0}")]
    UnsupportedRuntime(&'static str),

    #[error("unexpected empty Lambda context")]
    EmptyContext,

    #[error("malformed JSON in {subject}: {raw}")]
    MalformedJson {
        subject: Subject,
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{subject} must be an object, got: {raw}")]
    NotAnObject { subject: Subject, raw: String },

    #[error("invalid Lambda context: {raw}")]
    InvalidContext {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Lambda context is missing `{field}`: {raw}")]
    MissingContextField { field: &'static str, raw: String },

    #[error("failed to read request body")]
    Body(#[source] BoxError),

    #[error("fetch event listener is closed")]
    ListenerClosed,

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "invocation failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(CONTENT_TYPE, "text/plain")],
            "internal error",
        )
            .into_response()
    }
}

/// Error produced by a registered handler: returned, passed to the completion callback, or
/// raised by a panic.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an arbitrary error, keeping it as the source.
    pub fn wrap(err: impl Into<BoxError>) -> Self {
        let err = err.into();
        Self {
            message: err.to_string(),
            source: Some(err),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(format!("handler panicked: {detail}"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for HandlerError {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(value: anyhow::Error) -> Self {
        Self::wrap(value)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(value: serde_json::Error) -> Self {
        Self::wrap(value)
    }
}
