use std::net::SocketAddr;
use std::path::PathBuf;

use backsaas_gateway::config::GatewayConfig;
use backsaas_gateway::ratelimit::RateLimiter;
use backsaas_gateway::server::{build_router, GatewayState};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Configuration-driven reverse proxy for the BackSaaS platform.
#[derive(Debug, Parser)]
#[command(name = "backsaas-gateway")]
struct Args {
    /// Path to the gateway YAML configuration.
    #[arg(long, default_value = "gateway.yaml", env = "GATEWAY_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(message) = run(args).await {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), String> {
    let config = GatewayConfig::from_file(&args.config).map_err(|e| e.to_string())?;
    init_tracing(&config);

    let warnings = config.validate().map_err(|e| e.to_string())?;
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if config.jwt_secret().is_empty() {
        tracing::warn!("jwt_secret is empty; token verification will reject all tokens");
    }

    let limiter = RateLimiter::connect(config.redis_url()).await;
    let port = config.port();
    let environment = config.environment().to_string();
    let route_count = config.routes.len();

    let state = GatewayState::new(config, limiter).map_err(|e| e.to_string())?;
    state.limiter.start_sweeper();
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))?;
    tracing::info!(%addr, environment = %environment, routes = route_count, "gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| format!("server error: {e}"))
}

/// Initializes logging per the monitoring block: `log_level` seeds the
/// filter (overridable with RUST_LOG), `log_format` picks json or text.
fn init_tracing(config: &GatewayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.monitoring.log_level.clone()));
    if config.monitoring.log_format == "text" {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
