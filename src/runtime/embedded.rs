//! Embedded axum host. The request is already an `http::Request` with an axum body,
//! so it goes to the bridge unchanged.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::{HostState, RequestHandler, RunningHost, RuntimeKind, Shutdown, StopHandle};
use crate::{env::EnvironmentSnapshot, error::Result};

/// A router that forwards every method and path to `handler`.
pub fn router(handler: Arc<dyn RequestHandler>, env: EnvironmentSnapshot) -> Router {
    state_router(HostState { handler, env })
}

pub(crate) fn state_router(state: HostState) -> Router {
    Router::new().fallback(forward).with_state(state)
}

async fn forward(State(state): State<HostState>, request: Request) -> Result<Response> {
    state.handler.handle(request, &state.env).await
}

pub(crate) fn serve(listener: TcpListener, state: HostState) -> Result<RunningHost> {
    let local_addr = listener.local_addr()?;
    let token = CancellationToken::new();
    let stop = token.clone();
    let app = state_router(state);

    tokio::spawn(async move {
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await });
        if let Err(err) = server.await {
            tracing::error!(runtime = %RuntimeKind::Axum, error = %err, "server error");
        }
    });

    Ok(RunningHost {
        kind: RuntimeKind::Axum,
        local_addr: Some(local_addr),
        shutdown: Shutdown::Axum(StopHandle::new(token)),
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use http::{Method, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::runtime::{CanonicalRequest, CanonicalResponse};

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(
            &self,
            request: CanonicalRequest,
            _env: &EnvironmentSnapshot,
        ) -> Result<CanonicalResponse> {
            let line = format!("{} {}", request.method(), request.uri().path());
            Ok(Response::new(Body::from(line)))
        }
    }

    #[tokio::test]
    async fn any_method_and_path_is_forwarded() {
        let app = router(Arc::new(Echo), EnvironmentSnapshot::default());

        let res = app
            .clone()
            .oneshot(
                http::Request::builder()
                    .method(Method::PUT)
                    .uri("/deeply/nested")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"PUT /deeply/nested");
    }

    #[tokio::test]
    async fn bridge_errors_answer_500() {
        struct Failing;

        #[async_trait]
        impl RequestHandler for Failing {
            async fn handle(
                &self,
                _request: CanonicalRequest,
                _env: &EnvironmentSnapshot,
            ) -> Result<CanonicalResponse> {
                Err(crate::error::BridgeError::EmptyContext)
            }
        }

        let res = router(Arc::new(Failing), EnvironmentSnapshot::default())
            .oneshot(
                http::Request::builder()
                    .method(Method::POST)
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
