//! Subscriber setup for the binary and for embedding programs that want the same output.

use tracing_subscriber::EnvFilter;

use crate::env::EnvironmentSnapshot;

pub const LOG_FORMAT_ENV: &str = "AWS_LAMBDA_LOG_FORMAT";
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

fn env_filter(env: &EnvironmentSnapshot) -> EnvFilter {
    env.non_empty_var(LOG_FILTER_ENV)
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn wants_json(env: &EnvironmentSnapshot) -> bool {
    env.var(LOG_FORMAT_ENV)
        .is_some_and(|format| format.eq_ignore_ascii_case("json"))
}

/// Install the global `fmt` subscriber. JSON output when `AWS_LAMBDA_LOG_FORMAT=json`.
///
/// A second call is a no-op.
pub fn init_tracing(env: &EnvironmentSnapshot) {
    let filter = env_filter(env);
    let installed = if wants_json(env) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if installed.is_err() {
        tracing::debug!("global subscriber already installed");
    }
}
