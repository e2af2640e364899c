//! Handler registration shape and the invoker that settles it.
//!
//! A handler can complete in two ways: by calling its [`Completion`] callback, or by returning a
//! [`HandlerOutput::Deferred`] future. Both feed one [`Settlement`] cell and the first to arrive
//! decides the outcome; later attempts are ignored.

use std::{
    future::Future,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use futures::{future::BoxFuture, FutureExt as _};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::{
    context::{Event, InvocationContext},
    error::HandlerError,
};

pub type HandlerResult = Result<Value, HandlerError>;

/// What a handler hands back from its synchronous call.
pub enum HandlerOutput {
    /// Settle immediately with this value.
    Ready(Value),
    /// Settle when the future resolves (unless the callback settled first).
    Deferred(BoxFuture<'static, HandlerResult>),
    /// Nothing yet; the handler will call its [`Completion`].
    Pending,
}

impl HandlerOutput {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Deferred(future.boxed())
    }
}

impl std::fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerOutput::Ready(v) => f.debug_tuple("HandlerOutput::Ready").field(v).finish(),
            HandlerOutput::Deferred(_) => write!(f, "HandlerOutput::Deferred(..)"),
            HandlerOutput::Pending => write!(f, "HandlerOutput::Pending"),
        }
    }
}

/// A registered Lambda-style handler: `(event, context, callback) -> value-or-deferred`.
///
/// Returning `Err` is the synchronous failure path. Panics raised during the call are caught
/// and settle as errors too.
pub trait Handler: Send + Sync + 'static {
    fn call(
        &self,
        event: Event,
        context: InvocationContext,
        completion: Completion,
    ) -> Result<HandlerOutput, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(Event, InvocationContext, Completion) -> Result<HandlerOutput, HandlerError>
        + Send
        + Sync
        + 'static,
{
    fn call(
        &self,
        event: Event,
        context: InvocationContext,
        completion: Completion,
    ) -> Result<HandlerOutput, HandlerError> {
        self(event, context, completion)
    }
}

/// Single-resolution cell: the first `settle` wins, everything after is dropped.
pub struct Settlement<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Settlement<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Settlement<T> {
    /// Create a cell and the receiver that observes its settlement. The receiver errors if
    /// every clone of the cell is dropped without settling.
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Returns `true` if this call settled the cell.
    pub fn settle(&self, value: T) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            return false;
        };
        tx.send(value).is_ok()
    }

    pub fn is_settled(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// Completion callback handed to the handler. Cloneable; only the first call counts.
#[derive(Clone)]
pub struct Completion {
    cell: Settlement<HandlerResult>,
}

impl Completion {
    /// Returns `true` if this call settled the invocation.
    pub fn complete(&self, result: HandlerResult) -> bool {
        let won = self.cell.settle(result);
        if !won {
            tracing::debug!("ignoring completion for an already settled invocation");
        }
        won
    }

    pub fn succeed(&self, value: Value) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, error: impl Into<HandlerError>) -> bool {
        self.complete(Err(error.into()))
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("settled", &self.cell.is_settled())
            .finish()
    }
}

/// Call `handler` exactly once and wait for whichever completion path settles first.
pub async fn invoke<H>(handler: &H, event: Event, context: InvocationContext) -> HandlerResult
where
    H: Handler + ?Sized,
{
    let (cell, settled) = Settlement::new();
    let completion = Completion { cell: cell.clone() };

    let called = panic::catch_unwind(AssertUnwindSafe(|| {
        handler.call(event, context, completion)
    }));

    let deferred = match called {
        Ok(Ok(HandlerOutput::Deferred(future))) => Some(future),
        Ok(Ok(HandlerOutput::Ready(value))) => {
            cell.settle(Ok(value));
            None
        }
        Ok(Ok(HandlerOutput::Pending)) => None,
        Ok(Err(err)) => {
            cell.settle(Err(err));
            None
        }
        Err(payload) => {
            cell.settle(Err(HandlerError::from_panic(payload)));
            None
        }
    };

    let mut settled = settled;
    if let Some(future) = deferred {
        let future = AssertUnwindSafe(future).catch_unwind();
        tokio::select! {
            biased;
            result = &mut settled => return unwrap_settled(result),
            outcome = future => {
                cell.settle(outcome.unwrap_or_else(|payload| Err(HandlerError::from_panic(payload))));
            }
        }
    }

    drop(cell);
    unwrap_settled(settled.await)
}

fn unwrap_settled(result: Result<HandlerResult, oneshot::error::RecvError>) -> HandlerResult {
    result.unwrap_or_else(|_| Err(HandlerError::new("handler completed without settling")))
}

/// Handler built from an async closure; the returned future is the completion path.
pub struct HandlerFn<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Event, InvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    HandlerFn { f }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Event, InvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(
        &self,
        event: Event,
        context: InvocationContext,
        _completion: Completion,
    ) -> Result<HandlerOutput, HandlerError> {
        Ok(HandlerOutput::deferred((self.f)(event, context)))
    }
}

/// Handler built from a callback-style closure; it must eventually call the [`Completion`].
pub struct CallbackFn<F> {
    f: F,
}

pub fn callback_fn<F>(f: F) -> CallbackFn<F>
where
    F: Fn(Event, InvocationContext, Completion) + Send + Sync + 'static,
{
    CallbackFn { f }
}

impl<F> Handler for CallbackFn<F>
where
    F: Fn(Event, InvocationContext, Completion) + Send + Sync + 'static,
{
    fn call(
        &self,
        event: Event,
        context: InvocationContext,
        completion: Completion,
    ) -> Result<HandlerOutput, HandlerError> {
        (self.f)(event, context, completion);
        Ok(HandlerOutput::Pending)
    }
}
