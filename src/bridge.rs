//! The handle created by registering a handler.
//!
//! [`LambdaBridge`] is the [`RequestHandler`] every host forwards to: it decodes the
//! invocation context, the optional request context and the event, runs the handler through
//! [`invoke`] and writes the settled value back as JSON.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    response::{IntoResponse, Response},
};
use http::{header::CONTENT_TYPE, HeaderMap, Method};
use tracing::Instrument as _;

use crate::{
    config::BridgeConfig,
    context::{
        merge_request_context, parse_context, parse_event, parse_request_context,
        LAMBDA_CONTEXT_HEADER, REQUEST_CONTEXT_HEADER,
    },
    env::EnvironmentSnapshot,
    error::{BridgeError, HandlerError, Result},
    invoke::{invoke, Handler},
    runtime::{self, CanonicalRequest, CanonicalResponse, HostBindings, RequestHandler, RunningHost},
};

pub struct LambdaBridge {
    handler: Arc<dyn Handler>,
    max_body_bytes: usize,
}

impl std::fmt::Debug for LambdaBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LambdaBridge")
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

impl LambdaBridge {
    /// Bind `handler`. Nothing listens until [`LambdaBridge::start`].
    pub fn register(handler: impl Handler) -> Self {
        Self {
            handler: Arc::new(handler),
            max_body_bytes: BridgeConfig::default().max_body_bytes,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Detect the host and start serving. The body limit is taken from `config`.
    pub async fn start(
        self,
        env: EnvironmentSnapshot,
        config: &BridgeConfig,
        host: HostBindings,
    ) -> Result<RunningHost> {
        let bridge = self.with_max_body_bytes(config.max_body_bytes);
        runtime::start(Arc::new(bridge), env, config, host).await
    }
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

#[async_trait]
impl RequestHandler for LambdaBridge {
    async fn handle(
        &self,
        request: CanonicalRequest,
        env: &EnvironmentSnapshot,
    ) -> Result<CanonicalResponse> {
        // Health probes.
        if request.method() == Method::GET {
            return Ok(Response::new(Body::empty()));
        }

        let (parts, body) = request.into_parts();
        let context = parse_context(
            header_text(&parts.headers, LAMBDA_CONTEXT_HEADER).as_deref(),
            env,
        )?;

        let body = to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|err| BridgeError::Body(err.into()))?;
        let mut event = parse_event(&String::from_utf8_lossy(&body))?;
        let request_context =
            parse_request_context(header_text(&parts.headers, REQUEST_CONTEXT_HEADER).as_deref())?;
        merge_request_context(&mut event, request_context);

        let span = tracing::info_span!(
            "invoke",
            aws_request_id = context.aws_request_id.as_deref().unwrap_or_default()
        );
        let value = invoke(self.handler.as_ref(), event, context)
            .instrument(span)
            .await?;

        let body = serde_json::to_vec(&value).map_err(HandlerError::from)?;
        Ok(([(CONTENT_TYPE, "application/json")], body).into_response())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        context::InvocationContext,
        env::TRACE_ID_KEY,
        error::Subject,
        invoke::{callback_fn, handler_fn, Completion},
        runtime::router,
    };

    const CONTEXT: &str = r#"{
        "request_id": "r1",
        "deadline": 9999999999999,
        "xray_trace_id": "Root=1-abc",
        "env_config": {"function_name": "f", "memory": "128", "version": "1"}
    }"#;

    fn post() -> http::request::Builder {
        Request::builder().method(Method::POST).uri("/")
    }

    fn invocation(context: Option<&str>, body: &str) -> CanonicalRequest {
        let mut builder = post();
        if let Some(context) = context {
            builder = builder.header(LAMBDA_CONTEXT_HEADER, context.replace('\n', " "));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn echo() -> LambdaBridge {
        LambdaBridge::register(handler_fn(|event, ctx: InvocationContext| async move {
            Ok::<_, HandlerError>(json!({"event": event, "function_name": ctx.function_name}))
        }))
    }

    async fn json_body(res: CanonicalResponse) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn get_is_an_empty_ok_without_invoking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let bridge = LambdaBridge::register(callback_fn(
            move |_event, _ctx, completion: Completion| {
                counted.fetch_add(1, Ordering::SeqCst);
                completion.succeed(Value::Null);
            },
        ));

        let res = bridge
            .handle(
                Request::get("/health").body(Body::empty()).unwrap(),
                &EnvironmentSnapshot::default(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn get_ignores_malformed_headers_and_body() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let bridge = LambdaBridge::register(handler_fn(move |_event, _ctx| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, HandlerError>(Value::Null) }
        }));

        let request = Request::get("/")
            .header(LAMBDA_CONTEXT_HEADER, "{nope")
            .header(REQUEST_CONTEXT_HEADER, "[not an object")
            .body(Body::from("definitely not json"))
            .unwrap();
        let res = router(Arc::new(bridge), EnvironmentSnapshot::default())
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn post_invokes_handler_and_returns_json() {
        let app = router(Arc::new(echo()), EnvironmentSnapshot::default());

        let res = app
            .oneshot(invocation(Some(CONTEXT), r#"{"a":1}"#))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            json_body(res).await,
            json!({"event": {"a": 1}, "function_name": "f"})
        );
    }

    #[tokio::test]
    async fn trace_id_is_published_to_environment() {
        let env = EnvironmentSnapshot::default();
        echo()
            .handle(invocation(Some(CONTEXT), ""), &env)
            .await
            .unwrap();
        assert_eq!(env.var(TRACE_ID_KEY).as_deref(), Some("Root=1-abc"));
    }

    #[tokio::test]
    async fn missing_context_fails_before_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let bridge = LambdaBridge::register(handler_fn(move |_event, _ctx| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, HandlerError>(Value::Null) }
        }));

        let err = bridge
            .handle(
                invocation(None, r#"{"a":1}"#),
                &EnvironmentSnapshot::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::EmptyContext));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let res = router(Arc::new(bridge), EnvironmentSnapshot::default())
            .oneshot(invocation(None, r#"{"a":1}"#))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn request_context_is_merged_into_event() {
        let request = post()
            .header(LAMBDA_CONTEXT_HEADER, CONTEXT.replace('\n', " "))
            .header(REQUEST_CONTEXT_HEADER, r#"{"stage":"prod"}"#)
            .body(Body::from(r#"{"a":1}"#))
            .unwrap();

        let res = echo()
            .handle(request, &EnvironmentSnapshot::default())
            .await
            .unwrap();

        assert_eq!(
            json_body(res).await["event"],
            json!({"a": 1, "requestContext": {"stage": "prod"}})
        );
    }

    #[tokio::test]
    async fn empty_body_is_an_empty_event() {
        let res = echo()
            .handle(invocation(Some(CONTEXT), "  "), &EnvironmentSnapshot::default())
            .await
            .unwrap();
        assert_eq!(json_body(res).await["event"], json!({}));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let err = echo()
            .handle(
                invocation(Some(CONTEXT), "{not json"),
                &EnvironmentSnapshot::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::MalformedJson {
                subject: Subject::LambdaEvent,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let err = echo()
            .with_max_body_bytes(4)
            .handle(
                invocation(Some(CONTEXT), r#"{"a":12345}"#),
                &EnvironmentSnapshot::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Body(_)));
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let bridge = LambdaBridge::register(handler_fn(|_event, _ctx| async {
            Err::<Value, _>(HandlerError::new("nope"))
        }));

        let err = bridge
            .handle(invocation(Some(CONTEXT), ""), &EnvironmentSnapshot::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Handler(_)));
        assert_eq!(err.to_string(), "nope");
    }
}
