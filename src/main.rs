use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use lambda_http_bridge::{
    handler_fn, telemetry, BridgeConfig, EnvironmentSnapshot, Event, HandlerError, HostBindings,
    InvocationContext, LambdaBridge, ShutdownCoordinator,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HostArg {
    Axum,
    Tower,
    Hyper,
}

#[derive(Debug, Parser)]
#[command(about = "Serve an echo handler behind the Lambda HTTP bridge")]
struct Args {
    /// Which host capability to provide.
    #[arg(long, value_enum, default_value_t = HostArg::Hyper)]
    host: HostArg,

    /// Listen address. Defaults to the configured port (AWS_LWA_PORT, PORT) or 8080.
    #[arg(long)]
    addr: Option<SocketAddr>,
}

async fn echo(event: Event, ctx: InvocationContext) -> Result<Value, HandlerError> {
    Ok(json!({
        "event": event,
        "functionName": ctx.function_name,
        "awsRequestId": ctx.aws_request_id,
        "remainingTimeMillis": ctx.remaining_time_millis(),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = EnvironmentSnapshot::capture();
    telemetry::init_tracing(&env);

    let args = Args::parse();
    let mut config = BridgeConfig::from_env(&env)?;
    let addr = args.addr.unwrap_or_else(|| {
        SocketAddr::new(config.bind_host, config.port.unwrap_or(DEFAULT_PORT))
    });
    tracing::info!(host = ?args.host, %addr, "starting");

    let host = match args.host {
        HostArg::Axum => HostBindings::new().with_axum(TcpListener::bind(addr).await?),
        HostArg::Tower => HostBindings::new().with_tower(TcpListener::bind(addr).await?),
        HostArg::Hyper => {
            config.bind_host = addr.ip();
            config.port = Some(addr.port());
            HostBindings::new()
        }
    };

    let running = LambdaBridge::register(handler_fn(echo))
        .start(env, &config, host)
        .await?;
    tracing::info!(runtime = %running.kind, addr = ?running.local_addr, "listening");

    let signals = ShutdownCoordinator::install(running.kind, running.shutdown)?;
    signals.await?;
    Ok(())
}
