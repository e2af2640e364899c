//! Decoding of the invocation context, request context and event.
//!
//! The Lambda proxy forwards invocation metadata as JSON inside HTTP headers:
//! - `x-amzn-lambda-context` (required): request id, deadline, ARN, trace id, `env_config`
//! - `x-amzn-lambda-request-context` (optional): the API Gateway / ALB request context
//!
//! Every decoder trims its input first. A missing invocation context is a hard error; a missing
//! request context is not.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{
    env::EnvironmentSnapshot,
    error::{BridgeError, Result, Subject},
};

pub const LAMBDA_CONTEXT_HEADER: &str = "x-amzn-lambda-context";
pub const REQUEST_CONTEXT_HEADER: &str = "x-amzn-lambda-request-context";

pub const LOG_GROUP_ENV: &str = "AWS_LAMBDA_LOG_GROUP_NAME";
pub const LOG_STREAM_ENV: &str = "AWS_LAMBDA_LOG_STREAM_NAME";

/// Event field that receives the request context, when one is present.
pub const REQUEST_CONTEXT_FIELD: &str = "requestContext";

/// The JSON payload handed to the handler. Always an object.
pub type Event = Map<String, Value>;

/// Opaque request metadata merged into the event under `requestContext`.
pub type RequestContext = Map<String, Value>;

/// Per-invocation metadata decoded from `x-amzn-lambda-context`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    pub function_name: Option<String>,
    pub function_version: Option<String>,
    pub invoked_function_arn: Option<String>,
    #[serde(rename = "memoryLimitInMB")]
    pub memory_limit_in_mb: Option<u64>,
    pub aws_request_id: Option<String>,
    pub log_group_name: Option<String>,
    pub log_stream_name: Option<String>,
    pub identity: Option<Value>,
    pub client_context: Option<Value>,
    pub xray_trace_id: Option<String>,
    /// Invocation deadline in milliseconds since the Unix epoch.
    pub deadline_ms: i64,
}

impl InvocationContext {
    /// Milliseconds left until the deadline, recomputed on every call. Negative once the
    /// deadline has passed.
    pub fn remaining_time_millis(&self) -> i64 {
        self.deadline_ms.saturating_sub(now_millis())
    }

    /// [`Self::remaining_time_millis`] as a `Duration`, saturating at zero.
    pub fn remaining_time(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.remaining_time_millis()).unwrap_or(0))
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[derive(Debug, Deserialize)]
struct RawContext {
    request_id: Option<String>,
    deadline: Option<i64>,
    invoked_function_arn: Option<String>,
    xray_trace_id: Option<String>,
    client_context: Option<Value>,
    identity: Option<Value>,
    env_config: Option<RawEnvConfig>,
}

#[derive(Debug, Deserialize)]
struct RawEnvConfig {
    function_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_u64_or_string")]
    memory: Option<u64>,
    version: Option<String>,
    log_stream: Option<String>,
    log_group: Option<String>,
}

// Some proxies forward `AWS_LAMBDA_FUNCTION_MEMORY_SIZE` verbatim, so `memory` may be a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

fn de_opt_u64_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => Ok(Some(n)),
        Some(NumberOrText::Text(s)) => s.trim().parse().map(Some).map_err(de::Error::custom),
    }
}

fn trimmed(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn decode_object(subject: Subject, raw: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw).map_err(|source| BridgeError::MalformedJson {
        subject,
        raw: raw.to_string(),
        source,
    })?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(BridgeError::NotAnObject {
            subject,
            raw: raw.to_string(),
        }),
    }
}

/// Decode `x-amzn-lambda-context`.
///
/// Publishes the context's trace id into `env` as a side effect.
pub fn parse_context(raw: Option<&str>, env: &EnvironmentSnapshot) -> Result<InvocationContext> {
    let raw = trimmed(raw).ok_or(BridgeError::EmptyContext)?;
    let object = decode_object(Subject::LambdaContext, raw)?;

    let ctx: RawContext =
        serde_json::from_value(Value::Object(object)).map_err(|source| {
            BridgeError::InvalidContext {
                raw: raw.to_string(),
                source,
            }
        })?;

    let missing = |field| BridgeError::MissingContextField {
        field,
        raw: raw.to_string(),
    };
    let env_config = ctx.env_config.ok_or_else(|| missing("env_config"))?;
    let deadline_ms = ctx.deadline.ok_or_else(|| missing("deadline"))?;

    env.publish_trace_id(ctx.xray_trace_id.as_deref());

    Ok(InvocationContext {
        function_name: env_config.function_name,
        function_version: env_config.version,
        invoked_function_arn: ctx.invoked_function_arn,
        memory_limit_in_mb: env_config.memory,
        aws_request_id: ctx.request_id,
        log_group_name: env_config
            .log_group
            .filter(|v| !v.is_empty())
            .or_else(|| env.non_empty_var(LOG_GROUP_ENV)),
        log_stream_name: env_config
            .log_stream
            .filter(|v| !v.is_empty())
            .or_else(|| env.non_empty_var(LOG_STREAM_ENV)),
        identity: ctx.identity,
        client_context: ctx.client_context,
        xray_trace_id: ctx.xray_trace_id,
        deadline_ms,
    })
}

/// Decode `x-amzn-lambda-request-context`. Absent or blank input is `Ok(None)`.
pub fn parse_request_context(raw: Option<&str>) -> Result<Option<RequestContext>> {
    match trimmed(raw) {
        None => Ok(None),
        Some(raw) => decode_object(Subject::RequestContext, raw).map(Some),
    }
}

/// Decode the request body into an event. Blank input and JSON `null` both yield `{}`.
///
/// Arrays are rejected along with every other non-object: handlers always receive a map.
pub fn parse_event(body: &str) -> Result<Event> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(Event::new());
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Event::new()),
        Ok(_) => Err(BridgeError::NotAnObject {
            subject: Subject::LambdaEvent,
            raw: body.to_string(),
        }),
        Err(source) => Err(BridgeError::MalformedJson {
            subject: Subject::LambdaEvent,
            raw: body.to_string(),
            source,
        }),
    }
}

/// Attach a request context to the event under `requestContext`.
pub fn merge_request_context(event: &mut Event, request_context: Option<RequestContext>) {
    if let Some(rc) = request_context {
        event.insert(REQUEST_CONTEXT_FIELD.to_string(), Value::Object(rc));
    }
}
